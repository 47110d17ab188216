//! Execution resilience for cpc.
//!
//! - [`retry`]: bounded exponential backoff with jitter, parameterized per
//!   operation kind.
//! - [`timeout`]: deadlines that cancel the in-flight call and wait for the
//!   cancellation to be acknowledged.
//! - [`process`]: child processes exposed as cancellable calls.
//!
//! The gateway composes them as `retry(timeout(call))`.

pub mod process;
pub mod retry;
pub mod timeout;

pub use process::{ChildProcess, ProcessOutput, ProcessSpec};
pub use retry::{RetryOutcome, RetryPolicy};
pub use timeout::{Cancellable, TimeoutSupervisor};
