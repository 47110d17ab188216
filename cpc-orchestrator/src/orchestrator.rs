//! Runs workflows step by step through the gateway.

use std::sync::Arc;

use chrono::Utc;
use cpc_checkpoint::{
    RollbackReport, StepRecord, StepState, WorkflowHandle, WorkflowRecord, WorkflowStatus,
};
use cpc_core::{CorrelationId, CpcError, ErrorRecord, OperationKind, Result};
use cpc_gateway::{reconcile, OperationGateway, Secrets, StepContext};
use cpc_registry::{check_reserved, resolve, resolve_active, NodeAddress, Workspace};
use scopeguard::ScopeGuard;
use serde::Serialize;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::definitions::{self, NodeSelector, WorkflowKind, WorkflowRequest};

/// Where a workflow run ended.
#[derive(Debug, Serialize)]
pub struct WorkflowReport {
    pub record: WorkflowRecord,
    /// Disagreements between predicted addresses and the cluster summary
    pub warnings: Vec<String>,
    #[serde(skip)]
    pub failure: Option<CpcError>,
}

impl WorkflowReport {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none() && self.record.status() == WorkflowStatus::Succeeded
    }
}

#[derive(Debug, Clone)]
pub struct WorkflowOrchestrator {
    gateway: Arc<OperationGateway>,
}

impl WorkflowOrchestrator {
    pub fn new(gateway: Arc<OperationGateway>) -> Self {
        Self { gateway }
    }

    pub fn gateway(&self) -> &OperationGateway {
        &self.gateway
    }

    /// Start a new workflow and run it until it finishes or a step fails.
    ///
    /// A failed workflow is left in the ledger for `resume` or `rollback`.
    pub async fn run(&self, request: WorkflowRequest) -> Result<WorkflowReport> {
        let registry = self.gateway.registry();
        let ledger = self.gateway.ledger();
        let workspace = registry.resolve(&request.workspace)?;

        if request.kind == WorkflowKind::Bootstrap && !request.force {
            self.bootstrap_guard(&workspace.name)?;
        }

        let kinds = request.kind.operation_kinds();
        self.gateway.preflight(kinds)?;
        let _claim = ledger.claim_workspace(&workspace.name)?;
        let secrets = self.gateway.secrets_for(kinds)?;

        let network = registry.network();
        if kinds.contains(&OperationKind::Provision) {
            for node in resolve_active(&workspace, network)? {
                check_reserved(&node, network)?;
            }
        }

        let target = self.select_target(&workspace, request.node.as_ref())?;
        // A node issued here is withdrawn again unless the workflow gets recorded.
        let issued = match &request.node {
            Some(NodeSelector::New(_)) => target.clone(),
            _ => None,
        };
        let unissue = scopeguard::guard(issued, |issued| {
            if let Some(node) = issued {
                self.withdraw(&workspace.name, &node);
            }
        });

        let current = registry.resolve(&workspace.name)?;
        let nodes = resolve_active(&current, network)?;
        let steps = definitions::plan(request.kind, &nodes, target.as_ref(), &request.parameters)?;
        let id = workflow_id(request.kind, &workspace.name);
        let handle = ledger.begin_workflow(
            &id,
            request.kind.as_str(),
            &workspace.name,
            CorrelationId::new(),
            steps,
        )?;
        ScopeGuard::into_inner(unissue);
        info!(
            workflow = %id,
            workspace = %workspace.name,
            correlation_id = %handle.correlation_id(),
            "Started {} workflow",
            request.kind
        );

        let remaining = handle.record()?.remaining_steps();
        self.execute(handle, secrets, remaining).await
    }

    /// Re-run the Pending and Failed steps of `id`.
    pub async fn resume(&self, id: &str) -> Result<WorkflowReport> {
        let ledger = self.gateway.ledger();
        let record = ledger.load(id)?;
        let _claim = ledger.claim_workspace(&record.workspace)?;

        let remaining = ledger.resume(id)?;
        let handle = ledger.handle(id)?;
        if remaining.is_empty() {
            info!(workflow = id, "Nothing left to run");
            return Ok(WorkflowReport {
                record: handle.record()?,
                warnings: Vec::new(),
                failure: None,
            });
        }

        let kinds = definitions::kinds_of(remaining.iter().map(|s| &s.invocation));
        self.gateway.preflight(&kinds)?;
        let secrets = self.gateway.secrets_for(&kinds)?;
        info!(
            workflow = id,
            steps = remaining.len(),
            "Resuming from step '{}'",
            remaining[0].name
        );
        self.execute(handle, secrets, remaining).await
    }

    /// Undo the completed steps of `id`, newest first.
    pub async fn rollback(&self, id: &str) -> Result<RollbackReport> {
        let ledger = self.gateway.ledger();
        let record = ledger.load(id)?;
        let _claim = ledger.claim_workspace(&record.workspace)?;

        let kinds = definitions::kinds_of(
            record
                .steps
                .iter()
                .filter(|s| s.state == StepState::Succeeded)
                .filter_map(|s| s.compensation.as_ref()),
        );
        self.gateway.preflight(&kinds)?;

        let span = info_span!(
            "rollback",
            workflow = id,
            workspace = %record.workspace,
            correlation_id = %record.correlation_id,
        );
        let report = ledger
            .rollback(id, self.gateway.as_ref())
            .instrument(span)
            .await?;
        if report.is_complete() {
            info!(workflow = id, steps = report.rolled_back.len(), "Rollback complete");
        } else {
            warn!(
                workflow = id,
                failed = report.failed.len(),
                skipped = report.skipped.len(),
                "Rollback finished with steps left in place"
            );
        }
        Ok(report)
    }

    pub fn status(&self, id: &str) -> Result<WorkflowRecord> {
        self.gateway.ledger().load(id)
    }

    /// Workflows, oldest first, optionally for one workspace.
    pub fn list(&self, workspace: Option<&str>) -> Result<Vec<WorkflowRecord>> {
        match workspace {
            Some(name) => self.gateway.ledger().for_workspace(name),
            None => self.gateway.ledger().list(),
        }
    }

    fn bootstrap_guard(&self, workspace: &str) -> Result<()> {
        let done = self
            .gateway
            .ledger()
            .for_workspace(workspace)?
            .into_iter()
            .find(|r| {
                r.operation == WorkflowKind::Bootstrap.as_str()
                    && r.status() == WorkflowStatus::Succeeded
            });
        match done {
            Some(record) => Err(CpcError::input(format!(
                "Workspace '{workspace}' was already bootstrapped by workflow {}; use --force to run it again",
                record.id
            ))),
            None => Ok(()),
        }
    }

    /// Resolve the node a node workflow acts on. A new node gets its
    /// ordinal issued here, after its address has passed the reserved-range
    /// check.
    fn select_target(
        &self,
        workspace: &Workspace,
        selector: Option<&NodeSelector>,
    ) -> Result<Option<NodeAddress>> {
        let registry = self.gateway.registry();
        let network = registry.network();
        match selector {
            None => Ok(None),
            Some(NodeSelector::New(role)) => {
                let next = workspace.ordinals(*role).next;
                let predicted = resolve(workspace, *role, next, network)?;
                check_reserved(&predicted, network)?;
                let ordinal = registry.issue_node(&workspace.name, *role)?;
                let updated = registry.resolve(&workspace.name)?;
                resolve(&updated, *role, ordinal, network).map(Some)
            }
            Some(NodeSelector::Existing(hostname)) => resolve_active(workspace, network)?
                .into_iter()
                .find(|n| &n.hostname == hostname)
                .map(Some)
                .ok_or_else(|| {
                    CpcError::input(format!(
                        "Node '{hostname}' is not active in workspace '{}'",
                        workspace.name
                    ))
                }),
        }
    }

    async fn execute(
        &self,
        handle: WorkflowHandle,
        secrets: Arc<Secrets>,
        steps: Vec<StepRecord>,
    ) -> Result<WorkflowReport> {
        let record = handle.record()?;
        let span = info_span!(
            "workflow",
            workflow = %record.id,
            operation = %record.operation,
            workspace = %record.workspace,
            correlation_id = %record.correlation_id,
        );
        self.execute_steps(handle, secrets, steps, &record.workspace)
            .instrument(span)
            .await
    }

    async fn execute_steps(
        &self,
        handle: WorkflowHandle,
        secrets: Arc<Secrets>,
        steps: Vec<StepRecord>,
        workspace: &str,
    ) -> Result<WorkflowReport> {
        let ctx = StepContext {
            handle: handle.clone(),
            secrets,
        };
        let mut warnings = Vec::new();
        let mut failure = None;

        for step in steps {
            if self.gateway.shutdown().is_triggered() {
                warn!(step = %step.name, "Shutdown requested, not starting step");
                failure = Some(CpcError::Cancelled {
                    operation: handle.id().to_string(),
                    reason: "shutdown requested".to_string(),
                });
                break;
            }

            if let Some(hostname) = definitions::node_to_retire(&step) {
                if let Err(err) = self.retire(workspace, hostname) {
                    let record = ErrorRecord::from_error(&err, handle.correlation_id())
                        .with_context("step", step.name.clone());
                    handle.mark(&step.id, StepState::Failed, Some(record))?;
                    failure = Some(err);
                    break;
                }
            }

            info!(step = %step.name, "Running {}", step.invocation);
            match self.gateway.run_step(&ctx, &step).await {
                Ok(_) => {
                    if step.kind == OperationKind::Provision && step.invocation.action == "apply" {
                        warnings.extend(self.reconcile(workspace).await);
                    }
                }
                Err(err) => {
                    error!(step = %step.name, "Step failed: {err}");
                    failure = Some(err);
                    break;
                }
            }
        }

        let record = handle.record()?;
        match &failure {
            None => info!(status = %record.status(), "Workflow finished"),
            Some(_) => warn!(
                "Workflow {} stopped; run `cpc workflow resume {}` or `cpc workflow rollback {}`",
                record.id, record.id, record.id
            ),
        }
        Ok(WorkflowReport {
            record,
            warnings,
            failure,
        })
    }

    /// Retire a node whose workflow never started.
    fn withdraw(&self, workspace: &str, node: &NodeAddress) {
        match self
            .gateway
            .registry()
            .retire_node(workspace, node.role, node.ordinal)
        {
            Ok(()) => info!(node = %node.hostname, "Withdrew node issued for a workflow that did not start"),
            Err(err) => warn!(node = %node.hostname, "Could not withdraw issued node: {err}"),
        }
    }

    /// Retire the node named `hostname`. Already retired is fine.
    fn retire(&self, workspace: &str, hostname: &str) -> Result<()> {
        let registry = self.gateway.registry();
        let current = registry.resolve(workspace)?;
        let node = resolve_active(&current, registry.network())?
            .into_iter()
            .find(|n| n.hostname == hostname);
        match node {
            Some(node) => {
                registry.retire_node(workspace, node.role, node.ordinal)?;
                info!(node = hostname, ordinal = node.ordinal, "Retired node");
            }
            None => debug!(node = hostname, "Node already retired"),
        }
        Ok(())
    }

    /// Compare the cluster summary against predicted addresses.
    async fn reconcile(&self, workspace: &str) -> Vec<String> {
        let predicted = match self
            .gateway
            .registry()
            .resolve(workspace)
            .and_then(|ws| resolve_active(&ws, self.gateway.registry().network()))
        {
            Ok(nodes) => nodes,
            Err(err) => return vec![format!("Could not compute node addresses: {err}")],
        };

        let warnings = match self.gateway.cluster_summary(workspace).await {
            Ok(Some(summary)) => reconcile(&predicted, &summary),
            Ok(None) if predicted.is_empty() => Vec::new(),
            Ok(None) => vec!["No cluster summary available".to_string()],
            Err(err) => vec![format!("Could not read cluster summary: {err}")],
        };
        for warning in &warnings {
            warn!("Reconciliation: {warning}");
        }
        warnings
    }
}

/// `<kind>-<workspace>-<UTC timestamp>-<random>`.
fn workflow_id(kind: WorkflowKind, workspace: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{kind}-{workspace}-{}-{}",
        Utc::now().format("%Y%m%d%H%M%S"),
        &suffix[..6]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_id_shape() {
        let id = workflow_id(WorkflowKind::AddNode, "ubuntu");
        assert!(id.starts_with("add-node-ubuntu-"));
        assert!(id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-'));
    }
}
