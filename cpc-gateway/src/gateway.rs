//! The single choke point for external calls.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use cpc_checkpoint::{
    CheckpointLedger, CompensationRunner, Invocation, StepPlan, StepRecord, StepState,
    WorkflowHandle, WorkflowRecord,
};
use cpc_config::{GlobalConfig, NetworkSettings, RetryTable};
use cpc_core::{tools, CorrelationId, CpcError, ErrorRecord, OperationKind, Result, ShutdownSignal};
use cpc_exec::{RetryOutcome, RetryPolicy, TimeoutSupervisor};
use cpc_registry::{resolve_active, ResourceInspector, Workspace, WorkspaceRegistry};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::engine::{EngineOutput, EngineRequest, EngineSet};
use crate::engines::{self, OUTPUT_ACTION};
use crate::scratch::Scratch;
use crate::secrets::{NoSecrets, Secrets, SecretsProvider, SopsSecrets};
use crate::summary::ClusterSummary;

/// Workflow a step belongs to, plus the secrets loaded for it.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub handle: WorkflowHandle,
    pub secrets: Arc<Secrets>,
}

/// Runs engine calls as `retry(timeout(engine))` and checkpoints them.
pub struct OperationGateway {
    engines: EngineSet,
    supervisor: TimeoutSupervisor,
    retry: RetryTable,
    network: NetworkSettings,
    registry: WorkspaceRegistry,
    ledger: CheckpointLedger,
    secrets: Arc<dyn SecretsProvider>,
    sops_binary: Option<String>,
}

impl std::fmt::Debug for OperationGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationGateway")
            .field("engines", &self.engines)
            .field("ledger", &self.ledger)
            .finish_non_exhaustive()
    }
}

impl OperationGateway {
    /// Gateway with the production engines for `config`.
    pub fn from_config(
        config: &GlobalConfig,
        state_dir: PathBuf,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self::new(config, state_dir, engines::from_config(config), shutdown)
    }

    pub fn new(
        config: &GlobalConfig,
        state_dir: PathBuf,
        engines: EngineSet,
        shutdown: ShutdownSignal,
    ) -> Self {
        let (secrets, sops_binary) = match SopsSecrets::from_settings(&config.secrets) {
            Some(sops) => {
                let binary = sops.binary().to_string();
                (Arc::new(sops) as Arc<dyn SecretsProvider>, Some(binary))
            }
            None => (Arc::new(NoSecrets) as Arc<dyn SecretsProvider>, None),
        };
        Self {
            engines,
            supervisor: TimeoutSupervisor::new(config.timeouts.clone(), shutdown),
            retry: config.retry.clone(),
            network: config.network.clone(),
            registry: WorkspaceRegistry::with_state_dir(state_dir.clone(), config),
            ledger: CheckpointLedger::with_state_dir(&state_dir),
            secrets,
            sops_binary,
        }
    }

    /// Replace the secrets source.
    pub fn with_secrets(mut self, provider: Arc<dyn SecretsProvider>) -> Self {
        self.secrets = provider;
        self.sops_binary = None;
        self
    }

    pub fn registry(&self) -> &WorkspaceRegistry {
        &self.registry
    }

    pub fn ledger(&self) -> &CheckpointLedger {
        &self.ledger
    }

    pub fn network(&self) -> &NetworkSettings {
        &self.network
    }

    pub fn shutdown(&self) -> &ShutdownSignal {
        self.supervisor.shutdown()
    }

    /// Check that every binary needed for `kinds` is on PATH.
    pub fn preflight(&self, kinds: &[OperationKind]) -> Result<()> {
        for &kind in kinds {
            let engine = self.engines.get(kind)?;
            for (tool, hint) in engine.required_tools() {
                tools::require_tool(&tool, &hint)?;
            }
        }
        let needs_secrets = kinds.iter().any(|&k| needs_secrets(k));
        if let (true, Some(binary)) = (needs_secrets, &self.sops_binary) {
            tools::require_tool(binary, "Install sops: https://github.com/getsops/sops")?;
        }
        Ok(())
    }

    /// Decrypt secrets once for a workflow.
    pub fn load_secrets(&self) -> Result<Arc<Secrets>> {
        self.secrets.load().map(Arc::new)
    }

    /// Secrets for a workflow whose steps have `kinds`.
    pub fn secrets_for(&self, kinds: &[OperationKind]) -> Result<Arc<Secrets>> {
        if kinds.iter().any(|&k| needs_secrets(k)) {
            self.load_secrets()
        } else {
            Ok(Arc::new(Secrets::empty()))
        }
    }

    /// Run one workflow step.
    ///
    /// Every attempt is marked Running in the ledger before it starts, and
    /// the step is marked Succeeded or Failed before this returns.
    pub async fn run_step(&self, ctx: &StepContext, step: &StepRecord) -> Result<EngineOutput> {
        let handle = &ctx.handle;
        let record = handle.record().map_err(|err| {
            error!(
                workflow = %handle.id(),
                step = %step.name,
                "Could not load workflow record, step left {}: {err}",
                step.state
            );
            err
        })?;
        let span = info_span!(
            "step",
            workflow = %handle.id(),
            step = %step.name,
            workspace = %record.workspace,
            correlation_id = %handle.correlation_id(),
        );

        let mark_running = |attempt: u32| -> Result<()> {
            debug!(attempt, "Starting attempt");
            handle.mark(&step.id, StepState::Running, None).map(|_| ())
        };

        let result = self
            .supervised(
                &step.invocation,
                &record.workspace,
                handle.correlation_id(),
                &ctx.secrets,
                &mark_running,
            )
            .instrument(span.clone())
            .await;

        let _entered = span.enter();
        match result {
            Ok(outcome) => {
                handle.mark(&step.id, StepState::Succeeded, None)?;
                info!(attempts = outcome.attempts, "Step succeeded");
                Ok(outcome.value)
            }
            Err(err) => {
                let error = ErrorRecord::from_error(&err, handle.correlation_id())
                    .with_context("step", step.name.clone())
                    .with_context("invocation", step.invocation.to_string());
                if let Err(mark_err) = handle.mark(&step.id, StepState::Failed, Some(error)) {
                    warn!("Could not record step failure: {mark_err}");
                }
                Err(err)
            }
        }
    }

    /// Run an ad-hoc call as a one-step workflow.
    pub async fn run(&self, workspace: &str, invocation: Invocation) -> Result<EngineOutput> {
        let kind = invocation.kind;
        self.engines.get(kind)?.validate(&invocation)?;
        self.preflight(&[kind])?;

        let secrets = self.secrets_for(&[kind])?;
        let short = Uuid::new_v4().simple().to_string();
        let id = format!("adhoc-{}-{}", kind.as_str().replace('_', "-"), &short[..8]);
        let handle = self.ledger.begin_workflow(
            &id,
            "adhoc",
            workspace,
            CorrelationId::new(),
            vec![StepPlan::new(kind.as_str(), invocation)],
        )?;
        let record = handle.record()?;
        let step = record
            .steps
            .first()
            .cloned()
            .ok_or_else(|| CpcError::execution("ad-hoc workflow has no step"))?;
        self.run_step(&StepContext { handle, secrets }, &step).await
    }

    /// Read the provisioning engine's cluster summary for `workspace`.
    pub async fn cluster_summary(&self, workspace: &str) -> Result<Option<ClusterSummary>> {
        let output = self
            .run(
                workspace,
                Invocation::new(OperationKind::Provision, OUTPUT_ACTION),
            )
            .await?;
        ClusterSummary::parse_optional(&output.stdout)
    }

    /// Whether a provisioning apply was ever attempted for `workspace`.
    fn ever_provisioned(&self, workspace: &str) -> Result<bool> {
        let attempted = self.ledger.for_workspace(workspace)?.iter().any(|wf| {
            wf.steps.iter().any(|s| {
                s.kind == OperationKind::Provision
                    && s.invocation.action == "apply"
                    && s.attempt_count > 0
            })
        });
        Ok(attempted)
    }

    async fn supervised(
        &self,
        invocation: &Invocation,
        workspace: &str,
        correlation_id: &CorrelationId,
        secrets: &Secrets,
        before_attempt: &(dyn Fn(u32) -> Result<()> + Sync),
    ) -> Result<RetryOutcome<EngineOutput>> {
        let engine = self.engines.get(invocation.kind)?;
        engine.validate(invocation)?;

        let policy = RetryPolicy::from(self.retry.for_kind(invocation.kind));
        let limit = self.supervisor.limit_for(invocation.kind);
        let label = invocation.to_string();
        let label = label.as_str();
        let engine = engine.as_ref();

        policy
            .execute(label, self.supervisor.shutdown(), move |attempt| async move {
                before_attempt(attempt)?;

                // Re-read each attempt: an earlier step may have changed the nodes.
                let workspace = self.registry.resolve(workspace)?;
                let nodes = resolve_active(&workspace, &self.network)?;
                let scratch = Scratch::new(&workspace.name)?;
                let request = EngineRequest {
                    workspace: &workspace,
                    invocation,
                    nodes: &nodes,
                    secrets,
                    scratch: scratch.path(),
                    correlation_id,
                };

                let mut call = engine.start(&request).await?;
                let output = self
                    .supervisor
                    .with_timeout(label, limit, call.as_mut())
                    .await;
                if output.is_err() {
                    debug!(status = ?call.status(), "Call ended without output");
                }
                drop(call);
                drop(scratch);
                output?.into_result(label)
            })
            .await
    }

    async fn run_compensation(
        &self,
        workflow: &WorkflowRecord,
        compensation: &Invocation,
    ) -> Result<EngineOutput> {
        let secrets = self.secrets_for(&[compensation.kind])?;
        let no_marks = |_attempt: u32| -> Result<()> { Ok(()) };
        let outcome = self
            .supervised(
                compensation,
                &workflow.workspace,
                &workflow.correlation_id,
                &secrets,
                &no_marks,
            )
            .await?;
        Ok(outcome.value)
    }
}

fn needs_secrets(kind: OperationKind) -> bool {
    matches!(kind, OperationKind::Provision | OperationKind::Configure)
}

#[async_trait]
impl ResourceInspector for OperationGateway {
    async fn live_resources(&self, workspace: &Workspace) -> Result<Vec<String>> {
        if !self.ever_provisioned(&workspace.name)? {
            debug!(workspace = %workspace.name, "No provisioning recorded, nothing to inspect");
            return Ok(Vec::new());
        }
        Ok(self
            .cluster_summary(&workspace.name)
            .await?
            .map(|summary| summary.hostnames())
            .unwrap_or_default())
    }

    async fn teardown(&self, workspace: &Workspace) -> Result<()> {
        info!(workspace = %workspace.name, "Destroying provisioned resources");
        self.run(
            &workspace.name,
            Invocation::new(OperationKind::Provision, "destroy"),
        )
        .await
        .map(|_| ())
    }
}

#[async_trait]
impl CompensationRunner for OperationGateway {
    async fn compensate(
        &self,
        workflow: &WorkflowRecord,
        step: &StepRecord,
        compensation: &Invocation,
    ) -> Result<()> {
        let span = info_span!(
            "compensate",
            workflow = %workflow.id,
            step = %step.name,
            correlation_id = %workflow.correlation_id,
        );
        self.run_compensation(workflow, compensation)
            .instrument(span)
            .await
            .map(|_| ())
    }
}
