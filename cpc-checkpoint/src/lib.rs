//! Checkpoint ledger for cpc workflows.
//!
//! Each workflow is one YAML file under `<state_dir>/workflows/`. Every step
//! transition is written atomically before the caller moves on, so a
//! restarted process can resume from the first step that did not succeed.

pub mod ledger;
pub mod record;
pub mod rollback;

pub use ledger::{CheckpointLedger, WorkflowHandle, WorkspaceGuard};
pub use record::{Invocation, StepPlan, StepRecord, StepState, WorkflowRecord, WorkflowStatus};
pub use rollback::{CompensationRunner, RollbackReport};
