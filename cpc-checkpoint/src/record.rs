use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use cpc_core::{CorrelationId, ErrorRecord, OperationKind};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Pending,
    Running,
    Succeeded,
    Failed,
    RolledBack,
}

impl StepState {
    pub fn as_str(self) -> &'static str {
        match self {
            StepState::Pending => "pending",
            StepState::Running => "running",
            StepState::Succeeded => "succeeded",
            StepState::Failed => "failed",
            StepState::RolledBack => "rolled_back",
        }
    }

    /// Whether `resume` should run this step again.
    pub fn is_resumable(self) -> bool {
        matches!(self, StepState::Pending | StepState::Failed)
    }
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a step asks the gateway to do. Stored as data so a resumed process
/// can re-run it without the original request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invocation {
    pub kind: OperationKind,
    /// Engine action: `apply`, a playbook file name, a shell command...
    pub action: String,
    /// Node hostname for remote commands and limited playbook runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
}

impl Invocation {
    pub fn new(kind: OperationKind, action: impl Into<String>) -> Self {
        Self {
            kind,
            action: action.into(),
            target: None,
            parameters: BTreeMap::new(),
        }
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.action)?;
        if let Some(target) = &self.target {
            write!(f, " @{target}")?;
        }
        Ok(())
    }
}

/// A step as declared by a workflow definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepPlan {
    pub name: String,
    pub invocation: Invocation,
    pub compensation: Option<Invocation>,
}

impl StepPlan {
    pub fn new(name: impl Into<String>, invocation: Invocation) -> Self {
        Self {
            name: name.into(),
            invocation,
            compensation: None,
        }
    }

    pub fn compensate_with(mut self, compensation: Invocation) -> Self {
        self.compensation = Some(compensation);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub id: String,
    pub name: String,
    pub sequence: u32,
    pub kind: OperationKind,
    pub state: StepState,
    pub attempt_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<ErrorRecord>,
    pub invocation: Invocation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compensation: Option<Invocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compensation_error: Option<ErrorRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    RolledBack,
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkflowStatus::Pending => "pending",
            WorkflowStatus::Running => "running",
            WorkflowStatus::Succeeded => "succeeded",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::RolledBack => "rolled_back",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub id: String,
    /// Workflow definition name, e.g. `bootstrap`
    pub operation: String,
    pub workspace: String,
    pub correlation_id: CorrelationId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub steps: Vec<StepRecord>,
}

impl WorkflowRecord {
    pub fn step(&self, step_id: &str) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    pub fn step_by_name(&self, name: &str) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub fn status(&self) -> WorkflowStatus {
        let has = |state: StepState| self.steps.iter().any(|s| s.state == state);
        if self.steps.iter().all(|s| s.state == StepState::Succeeded) {
            WorkflowStatus::Succeeded
        } else if has(StepState::Running) {
            WorkflowStatus::Running
        } else if has(StepState::RolledBack) {
            WorkflowStatus::RolledBack
        } else if has(StepState::Failed) {
            WorkflowStatus::Failed
        } else if has(StepState::Succeeded) {
            WorkflowStatus::Running
        } else {
            WorkflowStatus::Pending
        }
    }

    /// Steps that `resume` would run, in sequence order.
    pub fn remaining_steps(&self) -> Vec<StepRecord> {
        let mut steps: Vec<StepRecord> = self
            .steps
            .iter()
            .filter(|s| s.state.is_resumable())
            .cloned()
            .collect();
        steps.sort_by_key(|s| s.sequence);
        steps
    }
}
