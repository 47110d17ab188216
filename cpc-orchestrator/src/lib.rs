//! Workflow orchestration for cpc.
//!
//! The orchestrator turns an operator request into a fixed list of steps,
//! records them in the checkpoint ledger and runs them one at a time through
//! the gateway. The workspace manager covers the lifecycle operations that
//! are not workflows: create, clone, delete and node bookkeeping.

pub mod definitions;
pub mod manager;
pub mod orchestrator;

pub use definitions::{NodeSelector, WorkflowKind, WorkflowRequest};
pub use manager::{WorkspaceDetails, WorkspaceManager};
pub use orchestrator::{WorkflowOrchestrator, WorkflowReport};
