//! Timeout supervisor.
//!
//! A supervised call is never dropped on the floor: when the deadline passes
//! (or shutdown is requested) the call is asked to cancel and the supervisor
//! waits for it to finish, up to a hard `cancel_grace` deadline, before
//! returning.

use std::time::Duration;

use async_trait::async_trait;
use cpc_config::TimeoutSettings;
use cpc_core::{CpcError, OperationKind, Result, ShutdownSignal};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, warn};

/// An in-flight external call.
#[async_trait]
pub trait Cancellable: Send {
    type Output: Send;

    /// Wait for the call to finish. Must be cancel-safe: it is polled inside
    /// `select!` and may be called again after being dropped.
    async fn wait(&mut self) -> Result<Self::Output>;

    /// Ask the call to stop. Returns once the request has been delivered.
    async fn cancel(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    Deadline,
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct TimeoutSupervisor {
    timeouts: TimeoutSettings,
    shutdown: ShutdownSignal,
}

impl TimeoutSupervisor {
    pub fn new(timeouts: TimeoutSettings, shutdown: ShutdownSignal) -> Self {
        Self { timeouts, shutdown }
    }

    /// Configured deadline for `kind`.
    pub fn limit_for(&self, kind: OperationKind) -> Duration {
        self.timeouts.for_kind(kind)
    }

    pub fn cancel_grace(&self) -> Duration {
        self.timeouts.cancel_grace()
    }

    pub fn shutdown(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    /// Wait for `call` for at most `limit`.
    ///
    /// Returns `Timeout` when the deadline passes and `Cancelled` when
    /// shutdown is requested first. Either way the call has been cancelled
    /// and its exit observed, or the grace deadline has also passed.
    pub async fn with_timeout<C>(
        &self,
        operation: &str,
        limit: Duration,
        call: &mut C,
    ) -> Result<C::Output>
    where
        C: Cancellable + ?Sized,
    {
        let interrupt = tokio::select! {
            result = call.wait() => return result,
            _ = sleep(limit) => Interrupt::Deadline,
            _ = self.shutdown.cancelled() => Interrupt::Shutdown,
        };

        match interrupt {
            Interrupt::Deadline => warn!(
                operation,
                limit_secs = limit.as_secs(),
                "Command execution timed out, cancelling"
            ),
            Interrupt::Shutdown => warn!(operation, "Shutdown requested, cancelling"),
        }

        self.cancel_and_observe(operation, call).await;

        Err(match interrupt {
            Interrupt::Deadline => CpcError::Timeout {
                operation: operation.to_string(),
                after: limit,
            },
            Interrupt::Shutdown => CpcError::Cancelled {
                operation: operation.to_string(),
                reason: "shutdown requested".to_string(),
            },
        })
    }

    async fn cancel_and_observe<C>(&self, operation: &str, call: &mut C)
    where
        C: Cancellable + ?Sized,
    {
        if let Err(e) = call.cancel().await {
            warn!(operation, "Cancellation request failed: {e}");
        }

        let grace = self.cancel_grace();
        match timeout(grace, call.wait()).await {
            Ok(_) => debug!(operation, "Cancellation acknowledged"),
            Err(_) => error!(
                operation,
                grace_secs = grace.as_secs(),
                "Call did not stop within the cancellation grace period"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    /// Finishes after `runtime`, or promptly once cancelled unless `stubborn`.
    struct FakeCall {
        runtime: Duration,
        stubborn: bool,
        cancelled: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Cancellable for FakeCall {
        type Output = &'static str;

        async fn wait(&mut self) -> Result<Self::Output> {
            if self.cancelled.load(Ordering::SeqCst) && !self.stubborn {
                return Err(CpcError::execution("killed"));
            }
            sleep(self.runtime).await;
            Ok("finished")
        }

        async fn cancel(&mut self) -> Result<()> {
            self.cancelled.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn supervisor(shutdown: ShutdownSignal) -> TimeoutSupervisor {
        let timeouts = TimeoutSettings {
            cancel_grace_secs: 5,
            ..Default::default()
        };
        TimeoutSupervisor::new(timeouts, shutdown)
    }

    fn call(runtime: Duration, stubborn: bool) -> (FakeCall, Arc<AtomicBool>) {
        let cancelled = Arc::new(AtomicBool::new(false));
        (
            FakeCall {
                runtime,
                stubborn,
                cancelled: Arc::clone(&cancelled),
            },
            cancelled,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_completes_within_limit() {
        let (mut fake, cancelled) = call(Duration::from_secs(1), false);
        let out = supervisor(ShutdownSignal::new())
            .with_timeout("plan", Duration::from_secs(10), &mut fake)
            .await
            .unwrap();
        assert_eq!(out, "finished");
        assert!(!cancelled.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_cancels_and_returns_timeout() {
        let (mut fake, cancelled) = call(Duration::from_secs(100), false);
        let err = supervisor(ShutdownSignal::new())
            .with_timeout("apply", Duration::from_secs(2), &mut fake)
            .await
            .unwrap_err();
        assert!(matches!(err, CpcError::Timeout { ref operation, .. } if operation == "apply"));
        assert!(cancelled.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unacknowledged_cancel_waits_for_grace() {
        let (mut fake, cancelled) = call(Duration::from_secs(1_000), true);
        let start = tokio::time::Instant::now();
        let err = supervisor(ShutdownSignal::new())
            .with_timeout("apply", Duration::from_secs(2), &mut fake)
            .await
            .unwrap_err();
        assert_eq!(err.category(), cpc_core::ErrorCategory::Timeout);
        assert!(cancelled.load(Ordering::SeqCst));
        assert!(start.elapsed() >= Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_returns_cancelled() {
        let shutdown = ShutdownSignal::new();
        shutdown.trigger();
        let (mut fake, cancelled) = call(Duration::from_secs(100), false);
        let err = supervisor(shutdown)
            .with_timeout("playbook", Duration::from_secs(50), &mut fake)
            .await
            .unwrap_err();
        assert!(err.is_cancellation());
        assert!(cancelled.load(Ordering::SeqCst));
    }

    #[test]
    fn test_limits_per_kind() {
        let supervisor = TimeoutSupervisor::new(TimeoutSettings::default(), ShutdownSignal::new());
        assert_eq!(
            supervisor.limit_for(OperationKind::RemoteExec),
            Duration::from_secs(300)
        );
        assert_eq!(
            supervisor.limit_for(OperationKind::Provision),
            Duration::from_secs(1800)
        );
    }
}
