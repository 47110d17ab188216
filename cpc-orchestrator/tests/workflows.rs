//! End-to-end workflow runs against mock engines.

use std::sync::Arc;

use cpc_checkpoint::StepState;
use cpc_config::{GlobalConfig, IpRange};
use cpc_core::{CpcError, ErrorCategory, OperationKind, ShutdownSignal};
use cpc_gateway::mock::{MockBehavior, MockEngine};
use cpc_gateway::{EngineSet, OperationGateway};
use cpc_orchestrator::{WorkflowOrchestrator, WorkflowRequest, WorkspaceManager};
use cpc_registry::Role;
use tempfile::TempDir;

const INIT: &str = "initialize_kubernetes_cluster_with_dns.yml";

const SUMMARY: &str = r#"{
    "controlplane-01": {"IP": "10.10.10.110", "hostname": "cu1", "VM_ID": 310},
    "worker-01": {"IP": "10.10.10.115", "hostname": "wu1", "VM_ID": 315},
    "worker-02": {"IP": "10.10.10.116", "hostname": "wu2", "VM_ID": 316}
}"#;

struct Harness {
    _temp: TempDir,
    orchestrator: WorkflowOrchestrator,
    manager: WorkspaceManager,
    provision: MockEngine,
    configure: MockEngine,
    remote: MockEngine,
}

fn harness_with(config: GlobalConfig) -> Harness {
    let temp = TempDir::new().unwrap();
    let provision = MockEngine::new(OperationKind::Provision);
    let configure = MockEngine::new(OperationKind::Configure);
    let remote = MockEngine::new(OperationKind::RemoteExec);
    let engines = EngineSet::new()
        .with(Arc::new(provision.clone()))
        .with(Arc::new(configure.clone()))
        .with(Arc::new(remote.clone()));
    let gateway = Arc::new(OperationGateway::new(
        &config,
        temp.path().to_path_buf(),
        engines,
        ShutdownSignal::new(),
    ));

    let manager = WorkspaceManager::new(Arc::clone(&gateway));
    // Index 0 goes to a placeholder so ubuntu's block starts at .110.
    manager.create("infra", None).unwrap();
    manager.create("ubuntu", None).unwrap();
    manager.ensure_nodes("ubuntu", Role::ControlPlane, 1).unwrap();
    manager.ensure_nodes("ubuntu", Role::Worker, 2).unwrap();

    Harness {
        _temp: temp,
        orchestrator: WorkflowOrchestrator::new(gateway),
        manager,
        provision,
        configure,
        remote,
    }
}

fn test_config() -> GlobalConfig {
    let mut config = GlobalConfig::default();
    config.secrets.file = None;
    for kind in OperationKind::ALL {
        let settings = match kind {
            OperationKind::Provision => &mut config.retry.provision,
            OperationKind::Configure => &mut config.retry.configure,
            OperationKind::RemoteExec => &mut config.retry.remote_exec,
        };
        settings.base_delay_ms = 1;
        settings.max_delay_ms = 2;
    }
    config
}

fn harness() -> Harness {
    harness_with(test_config())
}

fn state_of(record: &cpc_checkpoint::WorkflowRecord, step: &str) -> StepState {
    record.step_by_name(step).unwrap().state
}

#[tokio::test]
async fn test_bootstrap_runs_every_step_in_order() {
    let h = harness();
    h.provision.on("output", MockBehavior::Succeed(SUMMARY.into()));

    let report = h
        .orchestrator
        .run(WorkflowRequest::bootstrap("ubuntu"))
        .await
        .unwrap();

    assert!(report.succeeded(), "{:?}", report.failure);
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    assert_eq!(h.provision.actions(), vec!["apply", "output"]);
    assert_eq!(
        h.configure.actions(),
        vec![
            "install_kubernetes_cluster.yml",
            INIT,
            "pb_add_nodes.yml"
        ]
    );
    let validate = &h.remote.calls()[0];
    assert_eq!(validate.invocation.target.as_deref(), Some("cu1"));
    assert_eq!(validate.hosts, vec!["cu1", "wu1", "wu2"]);
}

#[tokio::test]
async fn test_reconciliation_reports_drift() {
    let h = harness();
    h.provision.on(
        "output",
        MockBehavior::Succeed(
            r#"{"controlplane-01": {"IP": "10.10.10.120", "hostname": "cu1"}}"#.into(),
        ),
    );

    let report = h
        .orchestrator
        .run(WorkflowRequest::bootstrap("ubuntu"))
        .await
        .unwrap();
    assert!(report.succeeded());
    assert_eq!(report.warnings.len(), 3);
    assert!(report.warnings[0].contains("cu1 was predicted at 10.10.10.110"));
}

#[tokio::test]
async fn test_bootstrap_guard() {
    let h = harness();
    h.orchestrator
        .run(WorkflowRequest::bootstrap("ubuntu"))
        .await
        .unwrap();

    let err = h
        .orchestrator
        .run(WorkflowRequest::bootstrap("ubuntu"))
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Input);
    assert!(err.to_string().contains("already bootstrapped"));

    let forced = h
        .orchestrator
        .run(WorkflowRequest::bootstrap("ubuntu").force(true))
        .await
        .unwrap();
    assert!(forced.succeeded());
}

#[tokio::test]
async fn test_failed_step_leaves_workflow_resumable() {
    let h = harness();
    h.configure
        .on(INIT, MockBehavior::Reject("inventory rejected".into()));

    let report = h
        .orchestrator
        .run(WorkflowRequest::bootstrap("ubuntu"))
        .await
        .unwrap();
    assert!(!report.succeeded());
    assert_eq!(
        report.failure.as_ref().map(CpcError::category),
        Some(ErrorCategory::Config)
    );
    let record = &report.record;
    assert_eq!(state_of(record, "provision-nodes"), StepState::Succeeded);
    assert_eq!(state_of(record, "install-base"), StepState::Succeeded);
    assert_eq!(state_of(record, "init-control-plane"), StepState::Failed);
    assert_eq!(state_of(record, "join-workers"), StepState::Pending);

    let resumed = h.orchestrator.resume(&record.id).await.unwrap();
    assert!(resumed.succeeded());
    // Completed steps are not re-run.
    assert_eq!(h.provision.call_count("apply"), 1);
    assert_eq!(h.configure.call_count("install_kubernetes_cluster.yml"), 1);
    assert_eq!(h.configure.call_count(INIT), 2);
    assert_eq!(
        resumed.record.step_by_name("init-control-plane").unwrap().attempt_count,
        2
    );
}

#[tokio::test]
async fn test_rollback_after_failure() {
    let h = harness();
    h.configure
        .on(INIT, MockBehavior::Reject("broken".into()));
    let report = h
        .orchestrator
        .run(WorkflowRequest::bootstrap("ubuntu"))
        .await
        .unwrap();

    let rollback = h.orchestrator.rollback(&report.record.id).await.unwrap();
    assert_eq!(rollback.rolled_back, vec!["provision-nodes"]);
    assert_eq!(rollback.skipped, vec!["install-base"]);
    assert_eq!(h.provision.call_count("destroy"), 1);

    let record = h.orchestrator.status(&report.record.id).unwrap();
    assert_eq!(state_of(&record, "provision-nodes"), StepState::RolledBack);

    let err = h.orchestrator.resume(&record.id).await.unwrap_err();
    assert!(matches!(err, CpcError::InvalidTransition(_) | CpcError::Input(_)));
}

#[tokio::test]
async fn test_add_node_issues_next_ordinal() {
    let h = harness();
    let report = h
        .orchestrator
        .run(WorkflowRequest::add_node("ubuntu", Role::Worker))
        .await
        .unwrap();
    assert!(report.succeeded());

    let calls = h.configure.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].invocation.target.as_deref(), Some("wu3"));
    assert!(calls[0].hosts.contains(&"wu3".to_string()));

    let nodes = h.manager.nodes("ubuntu").unwrap();
    let wu3 = nodes.iter().find(|n| n.hostname == "wu3").unwrap();
    assert_eq!(wu3.ip.to_string(), "10.10.10.117");
}

#[tokio::test]
async fn test_remove_node_retires_ordinal_before_deprovisioning() {
    let h = harness();
    let report = h
        .orchestrator
        .run(WorkflowRequest::remove_node("ubuntu", "wu2"))
        .await
        .unwrap();
    assert!(report.succeeded(), "{:?}", report.failure);

    // The drain ran while wu2 was still in the inventory; the apply ran without it.
    let drain = &h.configure.calls()[0];
    assert!(drain.hosts.contains(&"wu2".to_string()));
    assert_eq!(drain.invocation.parameters.get("node_name").unwrap(), "wu2");
    let apply = &h.provision.calls()[0];
    assert_eq!(apply.invocation.action, "apply");
    assert!(!apply.hosts.contains(&"wu2".to_string()));

    // Retired ordinals are never handed out again.
    let issued = h.manager.ensure_nodes("ubuntu", Role::Worker, 2).unwrap();
    assert_eq!(issued, vec![3]);
}

#[tokio::test]
async fn test_unknown_node_is_input_error() {
    let h = harness();
    let err = h
        .orchestrator
        .run(WorkflowRequest::upgrade_node("ubuntu", "wu9"))
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Input);
    assert!(h.orchestrator.list(Some("ubuntu")).unwrap().is_empty());
}

#[tokio::test]
async fn test_reserved_range_blocks_provisioning() {
    let mut config = test_config();
    config
        .network
        .reserved_ranges
        .insert("dhcp".into(), IpRange::parse("10.10.10.115-10.10.10.116").unwrap());
    let h = harness_with(config);

    let err = h
        .orchestrator
        .run(WorkflowRequest::bootstrap("ubuntu"))
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Config);
    assert!(h.provision.calls().is_empty());
}

#[tokio::test]
async fn test_delete_requires_force_with_live_resources() {
    let h = harness();
    h.manager.create("scratch", Some('s')).unwrap();
    h.manager
        .ensure_nodes("scratch", Role::ControlPlane, 1)
        .unwrap();
    h.orchestrator
        .run(WorkflowRequest::bootstrap("scratch"))
        .await
        .unwrap();

    h.provision.on(
        "output",
        MockBehavior::Succeed(r#"{"cp": {"IP": "10.10.10.120", "hostname": "cs1"}}"#.into()),
    );
    let err = h.manager.delete("scratch", false).await.unwrap_err();
    assert!(matches!(err, CpcError::HasLiveResources { .. }));
    assert!(h.manager.show("scratch").is_ok());

    h.provision.on(
        "output",
        MockBehavior::Succeed(r#"{"cp": {"IP": "10.10.10.120", "hostname": "cs1"}}"#.into()),
    );
    h.manager.delete("scratch", true).await.unwrap();
    assert_eq!(h.provision.call_count("destroy"), 1);
    assert!(h.manager.show("scratch").is_err());
}

#[tokio::test]
async fn test_delete_unprovisioned_workspace() {
    let h = harness();
    h.manager.clone_from("ubuntu", "test", Some('t')).unwrap();
    h.manager.switch("test").unwrap();

    h.manager.delete("test", false).await.unwrap();
    assert!(h.provision.calls().is_empty());
    assert_eq!(h.manager.current().unwrap(), None);
}

#[tokio::test]
async fn test_add_node_blocked_by_reserved_range_issues_nothing() {
    let mut config = test_config();
    config
        .network
        .reserved_ranges
        .insert("statics".into(), IpRange::parse("10.10.10.115").unwrap());
    let h = harness_with(config);

    let err = h
        .orchestrator
        .run(WorkflowRequest::add_node("ubuntu", Role::Worker))
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Config);

    let hostnames: Vec<String> = h
        .manager
        .nodes("ubuntu")
        .unwrap()
        .into_iter()
        .map(|n| n.hostname)
        .collect();
    assert_eq!(hostnames, vec!["cu1", "wu1", "wu2"]);
    // wu3 was never issued, so its ordinal is still free.
    assert_eq!(h.manager.ensure_nodes("ubuntu", Role::Worker, 3).unwrap(), vec![3]);
}

#[tokio::test]
async fn test_add_node_that_never_starts_is_withdrawn() {
    let h = harness();
    h.manager.create("scratch", Some('s')).unwrap();

    let err = h
        .orchestrator
        .run(WorkflowRequest::add_node("scratch", Role::Worker))
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Input);
    assert!(err.to_string().contains("no control plane"));

    assert!(h.manager.nodes("scratch").unwrap().is_empty());
    assert!(h.orchestrator.list(Some("scratch")).unwrap().is_empty());
    assert!(h.provision.calls().is_empty());
}
