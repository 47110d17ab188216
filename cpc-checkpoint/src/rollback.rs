use async_trait::async_trait;
use cpc_core::{ErrorRecord, Result};
use serde::Serialize;

use crate::record::{Invocation, StepRecord, WorkflowRecord};

/// Runs a step's compensating action.
#[async_trait]
pub trait CompensationRunner: Send + Sync {
    async fn compensate(
        &self,
        workflow: &WorkflowRecord,
        step: &StepRecord,
        compensation: &Invocation,
    ) -> Result<()>;
}

/// Outcome of a rollback, step by step.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RollbackReport {
    pub workflow_id: String,
    /// Steps whose compensation succeeded, in the order they were unwound
    pub rolled_back: Vec<String>,
    /// Completed steps with no registered compensation
    pub skipped: Vec<String>,
    pub failed: Vec<(String, ErrorRecord)>,
}

impl RollbackReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }
}
