use std::path::{Path, PathBuf};

use async_trait::async_trait;
use cpc_checkpoint::Invocation;
use cpc_config::EngineSettings;
use cpc_core::{CpcError, OperationKind, Result};
use cpc_exec::ProcessSpec;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::sanitize_key;
use crate::engine::{Engine, EngineCall, EngineRequest, ProcessCall};
use crate::inventory;
use crate::scratch::Scratch;

/// Ansible configuration engine.
///
/// Inventory and extra vars are generated into the invocation's scratch
/// directory. Secrets travel as `CPC_SECRET_*` environment variables.
#[derive(Debug, Clone)]
pub struct AnsibleEngine {
    binary: String,
    playbooks_dir: PathBuf,
    user: String,
    private_key: Option<PathBuf>,
}

impl AnsibleEngine {
    pub fn new(binary: impl Into<String>, playbooks_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            playbooks_dir: playbooks_dir.into(),
            user: "ubuntu".to_string(),
            private_key: None,
        }
    }

    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self {
            binary: settings.ansible_binary.clone(),
            playbooks_dir: settings.playbooks_dir.clone(),
            user: settings.ssh_user.clone(),
            private_key: settings.ssh_key.clone(),
        }
    }

    fn playbook_path(&self, playbook: &str) -> Result<PathBuf> {
        let path = self.playbooks_dir.join(playbook);
        if path.is_file() {
            Ok(path)
        } else {
            Err(CpcError::config_with_hint(
                format!("Playbook not found: {}", path.display()),
                "Set engines.playbooks_dir in config.yaml",
            ))
        }
    }

    fn extra_vars(request: &EngineRequest<'_>) -> Value {
        let mut vars = Map::new();
        vars.insert("cluster_workspace".into(), json!(request.workspace.name));
        vars.insert(
            "correlation_id".into(),
            json!(request.correlation_id.as_str()),
        );
        for (key, value) in &request.invocation.parameters {
            vars.insert(key.clone(), json!(value));
        }
        Value::Object(vars)
    }

    fn command(&self, request: &EngineRequest<'_>, inventory: &Path, vars: &Path) -> Result<ProcessSpec> {
        let playbook = self.playbook_path(&request.invocation.action)?;
        let mut spec = ProcessSpec::new(&self.binary)
            .arg("-i")
            .arg(inventory.display().to_string())
            .arg(playbook.display().to_string())
            .arg("-e")
            .arg(format!("@{}", vars.display()))
            .args(["--user", self.user.as_str()])
            .env("ANSIBLE_HOST_KEY_CHECKING", "False")
            .env("ANSIBLE_NOCOLOR", "1");
        if let Some(key) = &self.private_key {
            spec = spec.arg("--private-key").arg(key.display().to_string());
        }
        if let Some(target) = &request.invocation.target {
            if !inventory::is_group(target) {
                request.node(target)?;
            }
            spec = spec.args(["--limit", target.as_str()]);
        }
        for (key, value) in request.secrets.iter() {
            spec = spec.env(
                format!("CPC_SECRET_{}", sanitize_key(key).to_ascii_uppercase()),
                value,
            );
        }
        Ok(spec)
    }
}

#[async_trait]
impl Engine for AnsibleEngine {
    fn kind(&self) -> OperationKind {
        OperationKind::Configure
    }

    fn name(&self) -> &'static str {
        "ansible"
    }

    fn required_tools(&self) -> Vec<(String, String)> {
        vec![(
            self.binary.clone(),
            "Install Ansible: pip install ansible-core".to_string(),
        )]
    }

    fn validate(&self, invocation: &Invocation) -> Result<()> {
        let playbook = invocation.action.as_str();
        let is_file_name = !playbook.is_empty()
            && !playbook.contains('/')
            && !playbook.contains('\\')
            && !playbook.starts_with('.');
        let is_yaml = playbook.ends_with(".yml") || playbook.ends_with(".yaml");
        if is_file_name && is_yaml {
            Ok(())
        } else {
            Err(CpcError::input(format!(
                "'{playbook}' is not a playbook file name"
            )))
        }
    }

    async fn start(&self, request: &EngineRequest<'_>) -> Result<Box<dyn EngineCall>> {
        self.validate(request.invocation)?;
        let inventory_path = Scratch::write_json(
            request.scratch,
            "inventory.json",
            &inventory::build(request.workspace, request.nodes),
        )?;
        let vars_path = Scratch::write_json(request.scratch, "extra-vars.json", &Self::extra_vars(request))?;

        let spec = self.command(request, &inventory_path, &vars_path)?;
        debug!(
            workspace = %request.workspace.name,
            playbook = %request.invocation.action,
            hosts = request.nodes.len(),
            "Starting playbook"
        );
        Ok(Box::new(ProcessCall::new(spec)))
    }
}
