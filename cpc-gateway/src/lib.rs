//! External operation gateway.
//!
//! Every call to an external engine goes through [`OperationGateway`], which
//! wraps it as `retry(timeout(engine))` and records each attempt in the
//! checkpoint ledger before returning. Engines are looked up by
//! [`OperationKind`](cpc_core::OperationKind); nothing outside an engine
//! knows which binary it drives.

pub mod engine;
pub mod engines;
pub mod gateway;
pub mod inventory;
pub mod scratch;
pub mod secrets;
pub mod summary;

#[cfg(any(test, feature = "test-helpers"))]
pub mod mock;

pub use engine::{CallStatus, Engine, EngineCall, EngineOutput, EngineRequest, EngineSet, ProcessCall};
pub use gateway::{OperationGateway, StepContext};
pub use scratch::Scratch;
pub use secrets::{NoSecrets, Secrets, SecretsProvider, SopsSecrets};
pub use summary::{reconcile, ClusterSummary, SummaryNode};
