pub mod error;
pub mod operation;
pub mod output_macros;
pub mod shutdown;
pub mod tools;
pub mod user_paths;

pub use error::{
    AttemptFailure, CorrelationId, CpcError, ErrorCategory, ErrorRecord, Result, Severity,
};
pub use operation::OperationKind;
pub use shutdown::ShutdownSignal;
