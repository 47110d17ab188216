//! Global configuration for cpc
//!
//! This module defines the structure of `config.yaml`. Every section has
//! serde defaults, so an empty or missing file yields a working configuration.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use cpc_core::{user_paths, CpcError, ErrorCategory, OperationKind, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::network::IpRange;

/// Root structure for the global cpc configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GlobalConfig {
    /// Address plan shared by all workspaces
    #[serde(default, skip_serializing_if = "NetworkSettings::is_default")]
    pub network: NetworkSettings,

    /// Per-kind deadlines for external calls
    #[serde(default, skip_serializing_if = "TimeoutSettings::is_default")]
    pub timeouts: TimeoutSettings,

    /// Per-kind retry policies
    #[serde(default, skip_serializing_if = "RetryTable::is_default")]
    pub retry: RetryTable,

    /// External engine binaries and working directories
    #[serde(default, skip_serializing_if = "EngineSettings::is_default")]
    pub engines: EngineSettings,

    /// Encrypted secrets artifact
    #[serde(default, skip_serializing_if = "SecretsSettings::is_default")]
    pub secrets: SecretsSettings,

    #[serde(default, skip_serializing_if = "PathSettings::is_default")]
    pub paths: PathSettings,

    /// Template workspaces that can be cloned but never deleted
    #[serde(default = "default_base_workspaces")]
    pub base_workspaces: Vec<String>,
}

fn default_base_workspaces() -> Vec<String> {
    ["ubuntu", "debian", "rocky", "suse"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            network: NetworkSettings::default(),
            timeouts: TimeoutSettings::default(),
            retry: RetryTable::default(),
            engines: EngineSettings::default(),
            secrets: SecretsSettings::default(),
            paths: PathSettings::default(),
            base_workspaces: default_base_workspaces(),
        }
    }
}

impl GlobalConfig {
    /// Check the configuration for values that would break address
    /// allocation or retry behaviour.
    pub fn validate(&self) -> Result<()> {
        self.network.validate()?;
        for kind in OperationKind::ALL {
            self.retry.for_kind(kind).validate(kind)?;
        }
        if self.timeouts.cancel_grace_secs == 0 {
            return Err(CpcError::config_with_hint(
                "timeouts.cancel_grace_secs must be greater than zero",
                "A grace period is needed to observe cancellation of external processes",
            ));
        }
        Ok(())
    }

    /// Resolved state directory (`paths.state_dir`, then `CPC_STATE_DIR`,
    /// then the platform data directory).
    pub fn state_dir(&self) -> Result<PathBuf> {
        match &self.paths.state_dir {
            Some(dir) => Ok(dir.clone()),
            None => user_paths::state_dir(),
        }
    }
}

/// Address plan: how workspace indices map onto IPv4 blocks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkSettings {
    /// First address of the block belonging to workspace index 0
    #[serde(default = "default_base_ip")]
    pub base_ip: Ipv4Addr,

    /// Addresses per workspace; copied into each workspace at creation time
    #[serde(default = "default_ip_block_size")]
    pub ip_block_size: u32,

    /// Offsets `[0, control_plane_slots)` of each block
    #[serde(default = "default_control_plane_slots")]
    pub control_plane_slots: u32,

    /// Offsets `[control_plane_slots, control_plane_slots + worker_slots)`
    #[serde(default = "default_worker_slots")]
    pub worker_slots: u32,

    /// Appended verbatim to generated hostnames (e.g. `.lab.local`)
    #[serde(default)]
    pub domain_suffix: String,

    /// Ranges node addresses must never fall into (DHCP pool, infra statics)
    #[serde(default)]
    pub reserved_ranges: IndexMap<String, IpRange>,
}

fn default_base_ip() -> Ipv4Addr {
    Ipv4Addr::new(10, 10, 10, 100)
}

fn default_ip_block_size() -> u32 {
    10
}

fn default_control_plane_slots() -> u32 {
    5
}

fn default_worker_slots() -> u32 {
    5
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            base_ip: default_base_ip(),
            ip_block_size: default_ip_block_size(),
            control_plane_slots: default_control_plane_slots(),
            worker_slots: default_worker_slots(),
            domain_suffix: String::new(),
            reserved_ranges: IndexMap::new(),
        }
    }
}

impl NetworkSettings {
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }

    /// Offsets a block must hold: every control-plane and worker slot.
    pub fn required_block_size(&self) -> u32 {
        self.control_plane_slots + self.worker_slots
    }

    pub fn validate(&self) -> Result<()> {
        if self.control_plane_slots == 0 || self.worker_slots == 0 {
            return Err(CpcError::config_with_hint(
                "network.control_plane_slots and network.worker_slots must be at least 1",
                "Defaults are 5 control-plane and 5 worker slots",
            ));
        }
        self.validate_block_size(self.ip_block_size)
    }

    /// Fail fast when `block_size` cannot hold every role slot.
    pub fn validate_block_size(&self, block_size: u32) -> Result<()> {
        let required = self.required_block_size();
        if block_size < required {
            return Err(CpcError::config_with_hint(
                format!(
                    "ip_block_size {block_size} is too small for {} control-plane + {} worker slots",
                    self.control_plane_slots, self.worker_slots
                ),
                format!("Set network.ip_block_size to at least {required}"),
            ));
        }
        Ok(())
    }

    /// Name of the reserved range containing `addr`, if any.
    pub fn reserved_range_for(&self, addr: Ipv4Addr) -> Option<(&str, &IpRange)> {
        self.reserved_ranges
            .iter()
            .find(|(_, range)| range.contains(addr))
            .map(|(name, range)| (name.as_str(), range))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeoutSettings {
    #[serde(default = "default_provision_secs")]
    pub provision_secs: u64,

    #[serde(default = "default_configure_secs")]
    pub configure_secs: u64,

    #[serde(default = "default_remote_exec_secs")]
    pub remote_exec_secs: u64,

    /// How long to wait for a cancelled process to exit before giving up on it
    #[serde(default = "default_cancel_grace_secs")]
    pub cancel_grace_secs: u64,
}

fn default_provision_secs() -> u64 {
    1800
}

fn default_configure_secs() -> u64 {
    3600
}

fn default_remote_exec_secs() -> u64 {
    300
}

fn default_cancel_grace_secs() -> u64 {
    30
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            provision_secs: default_provision_secs(),
            configure_secs: default_configure_secs(),
            remote_exec_secs: default_remote_exec_secs(),
            cancel_grace_secs: default_cancel_grace_secs(),
        }
    }
}

impl TimeoutSettings {
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }

    pub fn for_kind(&self, kind: OperationKind) -> Duration {
        let secs = match kind {
            OperationKind::Provision => self.provision_secs,
            OperationKind::Configure => self.configure_secs,
            OperationKind::RemoteExec => self.remote_exec_secs,
        };
        Duration::from_secs(secs)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_secs(self.cancel_grace_secs)
    }
}

/// Retry settings for one operation kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrySettings {
    pub max_attempts: u32,
    /// Lower cap applied when the failures are timeouts
    pub max_timeout_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_fraction: f64,
    #[serde(default = "default_retryable")]
    pub retryable: Vec<ErrorCategory>,
}

fn default_retryable() -> Vec<ErrorCategory> {
    vec![ErrorCategory::Execution, ErrorCategory::Timeout]
}

impl RetrySettings {
    fn with_delays(base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts: 3,
            max_timeout_attempts: 2,
            base_delay_ms,
            max_delay_ms,
            jitter_fraction: 0.2,
            retryable: default_retryable(),
        }
    }

    pub fn validate(&self, kind: OperationKind) -> Result<()> {
        if self.max_attempts == 0 || self.max_timeout_attempts == 0 {
            return Err(CpcError::config(format!(
                "retry.{kind}: attempt limits must be at least 1"
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter_fraction) {
            return Err(CpcError::config_with_hint(
                format!(
                    "retry.{kind}.jitter_fraction {} is outside [0, 1]",
                    self.jitter_fraction
                ),
                "Use a fraction such as 0.2 for +/-20% jitter",
            ));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(CpcError::config(format!(
                "retry.{kind}.base_delay_ms exceeds max_delay_ms"
            )));
        }
        if self
            .retryable
            .iter()
            .any(|c| matches!(c, ErrorCategory::Config | ErrorCategory::Input))
        {
            return Err(CpcError::config_with_hint(
                format!("retry.{kind}.retryable lists a non-retryable category"),
                "Only `execution` and `timeout` failures can be retried",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryTable {
    #[serde(default = "default_provision_retry")]
    pub provision: RetrySettings,

    #[serde(default = "default_configure_retry")]
    pub configure: RetrySettings,

    #[serde(default = "default_remote_exec_retry")]
    pub remote_exec: RetrySettings,
}

fn default_provision_retry() -> RetrySettings {
    RetrySettings::with_delays(5_000, 60_000)
}

fn default_configure_retry() -> RetrySettings {
    RetrySettings::with_delays(10_000, 120_000)
}

fn default_remote_exec_retry() -> RetrySettings {
    RetrySettings::with_delays(2_000, 30_000)
}

impl Default for RetryTable {
    fn default() -> Self {
        Self {
            provision: default_provision_retry(),
            configure: default_configure_retry(),
            remote_exec: default_remote_exec_retry(),
        }
    }
}

impl RetryTable {
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }

    pub fn for_kind(&self, kind: OperationKind) -> &RetrySettings {
        match kind {
            OperationKind::Provision => &self.provision,
            OperationKind::Configure => &self.configure,
            OperationKind::RemoteExec => &self.remote_exec,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineSettings {
    /// OpenTofu or Terraform CLI
    #[serde(default = "default_tofu_binary")]
    pub tofu_binary: String,

    /// Directory holding the infrastructure definitions
    #[serde(default = "default_infra_dir")]
    pub infra_dir: PathBuf,

    #[serde(default = "default_ansible_binary")]
    pub ansible_binary: String,

    #[serde(default = "default_playbooks_dir")]
    pub playbooks_dir: PathBuf,

    #[serde(default = "default_ssh_binary")]
    pub ssh_binary: String,

    #[serde(default = "default_ssh_user")]
    pub ssh_user: String,

    /// Private key used for remote commands; ssh defaults apply when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_key: Option<PathBuf>,
}

fn default_tofu_binary() -> String {
    "tofu".to_string()
}

fn default_infra_dir() -> PathBuf {
    PathBuf::from("terraform")
}

fn default_ansible_binary() -> String {
    "ansible-playbook".to_string()
}

fn default_playbooks_dir() -> PathBuf {
    PathBuf::from("ansible/playbooks")
}

fn default_ssh_binary() -> String {
    "ssh".to_string()
}

fn default_ssh_user() -> String {
    "ubuntu".to_string()
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            tofu_binary: default_tofu_binary(),
            infra_dir: default_infra_dir(),
            ansible_binary: default_ansible_binary(),
            playbooks_dir: default_playbooks_dir(),
            ssh_binary: default_ssh_binary(),
            ssh_user: default_ssh_user(),
            ssh_key: None,
        }
    }
}

impl EngineSettings {
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SecretsSettings {
    #[serde(default = "default_sops_binary")]
    pub sops_binary: String,

    /// SOPS-encrypted YAML; no secrets are loaded when unset
    #[serde(default = "default_secrets_file")]
    pub file: Option<PathBuf>,
}

fn default_sops_binary() -> String {
    "sops".to_string()
}

fn default_secrets_file() -> Option<PathBuf> {
    Some(PathBuf::from("terraform/secrets.sops.yaml"))
}

impl Default for SecretsSettings {
    fn default() -> Self {
        Self {
            sops_binary: default_sops_binary(),
            file: default_secrets_file(),
        }
    }
}

impl SecretsSettings {
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PathSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,
}

impl PathSettings {
    pub fn is_default(&self) -> bool {
        self.state_dir.is_none()
    }
}
