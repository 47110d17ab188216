use super::global_config::*;
use super::loader;
use cpc_core::{ErrorCategory, OperationKind};
use std::net::Ipv4Addr;
use std::time::Duration;

#[test]
fn test_default_global_config() {
    let config = GlobalConfig::default();
    assert!(config.network.is_default());
    assert!(config.timeouts.is_default());
    assert!(config.retry.is_default());
    assert!(config.engines.is_default());
    assert!(config.secrets.is_default());
    assert!(config.paths.is_default());
    assert_eq!(config.base_workspaces, vec!["ubuntu", "debian", "rocky", "suse"]);
    assert!(config.validate().is_ok());
}

#[test]
fn test_network_settings_is_default() {
    let mut settings = NetworkSettings::default();
    assert!(settings.is_default());
    settings.domain_suffix = ".lab.local".to_string();
    assert!(!settings.is_default());
}

#[test]
fn test_empty_yaml_gives_defaults() {
    let config = loader::parse("").expect("empty config parses");
    assert_eq!(config, GlobalConfig::default());
}

#[test]
fn test_partial_yaml_keeps_other_defaults() {
    let yaml = r#"
network:
  base_ip: 192.168.50.10
  domain_suffix: .lab.local
  reserved_ranges:
    dhcp: 192.168.50.100-192.168.50.199
timeouts:
  provision_secs: 600
"#;
    let config = loader::parse(yaml).expect("valid config");
    assert_eq!(config.network.base_ip, Ipv4Addr::new(192, 168, 50, 10));
    assert_eq!(config.network.ip_block_size, 10);
    assert_eq!(config.network.domain_suffix, ".lab.local");
    assert_eq!(
        config.timeouts.for_kind(OperationKind::Provision),
        Duration::from_secs(600)
    );
    assert_eq!(
        config.timeouts.for_kind(OperationKind::Configure),
        Duration::from_secs(3600)
    );
    let (name, _) = config
        .network
        .reserved_range_for(Ipv4Addr::new(192, 168, 50, 150))
        .expect("address is reserved");
    assert_eq!(name, "dhcp");
    assert!(config
        .network
        .reserved_range_for(Ipv4Addr::new(192, 168, 50, 10))
        .is_none());
}

#[test]
fn test_block_too_small_is_config_error() {
    let yaml = "network:\n  ip_block_size: 6\n";
    let err = loader::parse(yaml).expect_err("block of 6 cannot hold 10 slots");
    assert_eq!(err.category(), ErrorCategory::Config);
    assert!(err.hint().unwrap_or_default().contains("at least 10"));
}

#[test]
fn test_retry_rejects_config_category() {
    let yaml = r#"
retry:
  remote_exec:
    max_attempts: 3
    max_timeout_attempts: 1
    base_delay_ms: 100
    max_delay_ms: 1000
    jitter_fraction: 0.1
    retryable: [execution, config]
"#;
    let err = loader::parse(yaml).expect_err("config failures are never retried");
    assert_eq!(err.category(), ErrorCategory::Config);
}

#[test]
fn test_jitter_out_of_range_rejected() {
    let mut config = GlobalConfig::default();
    config.retry.provision.jitter_fraction = 1.5;
    assert!(config.validate().is_err());
}

#[test]
fn test_retry_for_kind() {
    let table = RetryTable::default();
    assert_eq!(table.for_kind(OperationKind::Provision).base_delay_ms, 5_000);
    assert_eq!(table.for_kind(OperationKind::RemoteExec).max_delay_ms, 30_000);
    assert_eq!(
        table.for_kind(OperationKind::Configure).retryable,
        vec![ErrorCategory::Execution, ErrorCategory::Timeout]
    );
}

#[test]
fn test_invalid_yaml_is_config_error() {
    let err = loader::parse("network: [").expect_err("malformed yaml");
    assert_eq!(err.category(), ErrorCategory::Config);
}

#[test]
fn test_default_base_workspaces() {
    let config = GlobalConfig::default();
    assert!(config.base_workspaces.iter().any(|base| base == "ubuntu"));
    assert!(!config.base_workspaces.iter().any(|base| base == "k8s129"));
}

#[test]
fn test_serialized_defaults_are_compact() {
    let yaml = serde_yaml_ng::to_string(&GlobalConfig::default()).expect("serialize");
    assert!(!yaml.contains("network"));
    assert!(yaml.contains("base_workspaces"));
}
