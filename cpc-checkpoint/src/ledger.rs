//! Workflow persistence.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use cpc_core::{CorrelationId, CpcError, ErrorRecord, Result};
use fs2::FileExt;
use tracing::{debug, error, info, warn};

use crate::record::{StepPlan, StepRecord, StepState, WorkflowRecord};
use crate::rollback::{CompensationRunner, RollbackReport};

const WORKFLOWS_DIR: &str = "workflows";

/// Durable store of workflow step progress.
#[derive(Debug, Clone)]
pub struct CheckpointLedger {
    dir: PathBuf,
}

/// Exclusive claim on a workspace while one of its workflows runs.
#[derive(Debug)]
pub struct WorkspaceGuard {
    file: File,
    workspace: String,
}

impl Drop for WorkspaceGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        debug!(workspace = %self.workspace, "Released workspace workflow lock");
    }
}

/// A started workflow.
#[derive(Debug, Clone)]
pub struct WorkflowHandle {
    ledger: CheckpointLedger,
    id: String,
    correlation_id: CorrelationId,
}

impl WorkflowHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    pub fn ledger(&self) -> &CheckpointLedger {
        &self.ledger
    }

    pub fn mark(
        &self,
        step_id: &str,
        state: StepState,
        error: Option<ErrorRecord>,
    ) -> Result<StepRecord> {
        self.ledger.mark(&self.id, step_id, state, error)
    }

    pub fn record(&self) -> Result<WorkflowRecord> {
        self.ledger.load(&self.id)
    }
}

impl CheckpointLedger {
    pub fn with_state_dir(state_dir: &Path) -> Self {
        Self {
            dir: state_dir.join(WORKFLOWS_DIR),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn workflow_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.yaml"))
    }

    fn lock_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!(".{id}.lock"))
    }

    /// Record a new workflow with every step Pending.
    pub fn begin_workflow(
        &self,
        id: &str,
        operation: &str,
        workspace: &str,
        correlation_id: CorrelationId,
        steps: Vec<StepPlan>,
    ) -> Result<WorkflowHandle> {
        validate_id(id)?;
        if steps.is_empty() {
            return Err(CpcError::input(format!("Workflow '{id}' has no steps")));
        }
        fs::create_dir_all(&self.dir)?;

        let _lock = self.acquire_lock(id)?;
        if self.workflow_path(id).exists() {
            return Err(CpcError::input(format!("Workflow '{id}' already exists")));
        }

        let now = Utc::now();
        let steps = steps
            .into_iter()
            .enumerate()
            .map(|(i, plan)| {
                let sequence = i as u32 + 1;
                StepRecord {
                    id: format!("{sequence:02}-{}", plan.name),
                    name: plan.name,
                    sequence,
                    kind: plan.invocation.kind,
                    state: StepState::Pending,
                    attempt_count: 0,
                    last_error: None,
                    invocation: plan.invocation,
                    compensation: plan.compensation,
                    compensation_error: None,
                    started_at: None,
                    finished_at: None,
                }
            })
            .collect();

        let record = WorkflowRecord {
            id: id.to_string(),
            operation: operation.to_string(),
            workspace: workspace.to_string(),
            correlation_id: correlation_id.clone(),
            created_at: now,
            updated_at: now,
            steps,
        };
        self.save(&record)?;
        info!(workflow_id = id, operation, workspace, "Started workflow");

        Ok(WorkflowHandle {
            ledger: self.clone(),
            id: id.to_string(),
            correlation_id,
        })
    }

    /// Reopen an existing workflow.
    pub fn handle(&self, id: &str) -> Result<WorkflowHandle> {
        let record = self.load(id)?;
        Ok(WorkflowHandle {
            ledger: self.clone(),
            id: record.id,
            correlation_id: record.correlation_id,
        })
    }

    /// Persist a step transition.
    ///
    /// Allowed transitions:
    /// - `Running` from Pending, Running (next attempt) or Failed, only when
    ///   every lower-sequence step has Succeeded. Increments `attempt_count`.
    /// - `Succeeded` from Running.
    /// - `Failed` from Pending or Running.
    /// - `RolledBack` from Succeeded.
    pub fn mark(
        &self,
        workflow_id: &str,
        step_id: &str,
        state: StepState,
        error: Option<ErrorRecord>,
    ) -> Result<StepRecord> {
        self.update(workflow_id, |record| {
            let position = record
                .steps
                .iter()
                .position(|s| s.id == step_id)
                .ok_or_else(|| CpcError::not_found("Step", format!("{workflow_id}/{step_id}")))?;

            if state == StepState::Running {
                let sequence = record.steps[position].sequence;
                if let Some(blocker) = record
                    .steps
                    .iter()
                    .find(|s| s.sequence < sequence && s.state != StepState::Succeeded)
                {
                    return Err(CpcError::InvalidTransition(format!(
                        "step '{}' cannot start while '{}' is {}",
                        record.steps[position].name, blocker.name, blocker.state
                    )));
                }
            }

            let step = &mut record.steps[position];
            let allowed = match state {
                StepState::Running => matches!(
                    step.state,
                    StepState::Pending | StepState::Running | StepState::Failed
                ),
                StepState::Succeeded => step.state == StepState::Running,
                StepState::Failed => matches!(step.state, StepState::Pending | StepState::Running),
                StepState::RolledBack => step.state == StepState::Succeeded,
                StepState::Pending => false,
            };
            if !allowed {
                return Err(CpcError::InvalidTransition(format!(
                    "step '{}' cannot go from {} to {state}",
                    step.name, step.state
                )));
            }

            let now = Utc::now();
            match state {
                StepState::Running => {
                    step.attempt_count += 1;
                    step.started_at.get_or_insert(now);
                    step.finished_at = None;
                }
                StepState::Succeeded | StepState::Failed | StepState::RolledBack => {
                    step.finished_at = Some(now);
                }
                StepState::Pending => {}
            }
            if let Some(error) = error {
                step.last_error = Some(error);
            }
            step.state = state;
            debug!(
                workflow_id,
                step = %step.name,
                %state,
                attempt = step.attempt_count,
                "Checkpoint"
            );
            Ok(step.clone())
        })
    }

    /// Steps still to run (Pending or Failed), in sequence order.
    ///
    /// A step left Running by a process that died is marked Failed first.
    pub fn resume(&self, workflow_id: &str) -> Result<Vec<StepRecord>> {
        let record = self.update(workflow_id, |record| {
            if record.steps.iter().any(|s| s.state == StepState::RolledBack) {
                return Err(CpcError::InvalidTransition(format!(
                    "workflow '{}' was rolled back and cannot be resumed",
                    record.id
                )));
            }
            fail_interrupted(record);
            Ok(record.clone())
        })?;
        Ok(record.remaining_steps())
    }

    /// Undo completed steps in reverse order.
    ///
    /// A step becomes RolledBack only once its compensation succeeds. A failed
    /// compensation is recorded and the unwind continues with earlier steps.
    pub async fn rollback(
        &self,
        workflow_id: &str,
        runner: &dyn CompensationRunner,
    ) -> Result<RollbackReport> {
        let record = self.update(workflow_id, |record| {
            fail_interrupted(record);
            Ok(record.clone())
        })?;

        let mut completed: Vec<&StepRecord> = record
            .steps
            .iter()
            .filter(|s| s.state == StepState::Succeeded)
            .collect();
        completed.sort_by_key(|s| std::cmp::Reverse(s.sequence));

        let mut report = RollbackReport {
            workflow_id: workflow_id.to_string(),
            ..Default::default()
        };

        for step in completed {
            let Some(compensation) = &step.compensation else {
                warn!(workflow_id, step = %step.name, "No compensation registered, skipping");
                report.skipped.push(step.name.clone());
                continue;
            };

            info!(workflow_id, step = %step.name, "Compensating: {compensation}");
            match runner.compensate(&record, step, compensation).await {
                Ok(()) => {
                    self.mark(workflow_id, &step.id, StepState::RolledBack, None)?;
                    report.rolled_back.push(step.name.clone());
                }
                Err(err) => {
                    let error = ErrorRecord::from_error(&err, &record.correlation_id)
                        .with_context("step", step.name.clone());
                    error!(workflow_id, step = %step.name, "Compensation failed: {err}");
                    self.update(workflow_id, |record| {
                        if let Some(s) = record.steps.iter_mut().find(|s| s.id == step.id) {
                            s.compensation_error = Some(error.clone());
                        }
                        Ok(())
                    })?;
                    report.failed.push((step.name.clone(), error));
                }
            }
        }

        Ok(report)
    }

    pub fn load(&self, id: &str) -> Result<WorkflowRecord> {
        validate_id(id)?;
        if !self.workflow_path(id).exists() {
            return Err(CpcError::not_found("Workflow", id));
        }
        let _lock = self.acquire_lock(id)?;
        self.read(id)
    }

    /// All workflows, oldest first.
    pub fn list(&self) -> Result<Vec<WorkflowRecord>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match self.load(id) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping unreadable workflow {}: {e}", path.display()),
            }
        }
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }

    /// Workflows for one workspace, oldest first.
    pub fn for_workspace(&self, workspace: &str) -> Result<Vec<WorkflowRecord>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|r| r.workspace == workspace)
            .collect())
    }

    /// Claim `workspace` for the duration of a workflow run.
    pub fn claim_workspace(&self, workspace: &str) -> Result<WorkspaceGuard> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!(".workspace-{workspace}.lock"));
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;
        FileExt::try_lock_exclusive(&file).map_err(|_| {
            CpcError::input(format!(
                "Another workflow is already running for workspace '{workspace}'"
            ))
        })?;
        Ok(WorkspaceGuard {
            file,
            workspace: workspace.to_string(),
        })
    }

    fn update<T, F>(&self, id: &str, update_fn: F) -> Result<T>
    where
        F: FnOnce(&mut WorkflowRecord) -> Result<T>,
    {
        validate_id(id)?;
        let _lock = self.acquire_lock(id)?;
        let mut record = self.read(id)?;
        let value = update_fn(&mut record)?;
        record.updated_at = Utc::now();
        self.save(&record)?;
        Ok(value)
    }

    fn read(&self, id: &str) -> Result<WorkflowRecord> {
        let path = self.workflow_path(id);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(CpcError::not_found("Workflow", id));
            }
            Err(e) => return Err(e.into()),
        };
        serde_yaml_ng::from_str(&content).map_err(|e| {
            CpcError::Serialization(format!(
                "Failed to parse workflow file {}: {e}",
                path.display()
            ))
        })
    }

    fn save(&self, record: &WorkflowRecord) -> Result<()> {
        let yaml = serde_yaml_ng::to_string(record)?;
        let mut temp = tempfile::Builder::new()
            .prefix(".workflow-")
            .suffix(".tmp")
            .tempfile_in(&self.dir)?;
        temp.write_all(yaml.as_bytes())?;
        temp.as_file().sync_all()?;
        temp.persist(self.workflow_path(&record.id))
            .map_err(|e| e.error)?;
        Ok(())
    }

    fn acquire_lock(&self, id: &str) -> Result<LockedFile> {
        let path = self.lock_path(id);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;
        FileExt::lock_exclusive(&file).map_err(|e| CpcError::Lock {
            path: path.clone(),
            message: e.to_string(),
        })?;
        Ok(LockedFile(file))
    }
}

struct LockedFile(File);

impl Drop for LockedFile {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.0);
    }
}

/// Mark steps left Running by a dead process as Failed.
fn fail_interrupted(record: &mut WorkflowRecord) {
    let correlation_id = record.correlation_id.clone();
    for step in record
        .steps
        .iter_mut()
        .filter(|s| s.state == StepState::Running)
    {
        let err = CpcError::Cancelled {
            operation: step.name.clone(),
            reason: "interrupted while running".to_string(),
        };
        warn!(workflow_id = %record.id, step = %step.name, "Step was interrupted, marking failed");
        step.last_error = Some(ErrorRecord::from_error(&err, &correlation_id));
        step.state = StepState::Failed;
        step.finished_at = Some(Utc::now());
    }
}

fn validate_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(CpcError::input(format!("Invalid workflow id '{id}'")))
    }
}
