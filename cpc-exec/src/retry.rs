//! Retry policy engine.
//!
//! `delay(n) = min(max_delay, base_delay * 2^(n-1))`, then scaled by a
//! uniform factor in `[1 - jitter, 1 + jitter]`. Config and Input failures
//! are returned after the first attempt. Timeout failures stop at
//! `max_timeout_attempts`, which is usually lower than `max_attempts`.

use std::future::Future;
use std::time::Duration;

use cpc_config::RetrySettings;
use cpc_core::{AttemptFailure, CpcError, ErrorCategory, Result, ShutdownSignal};
use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub max_timeout_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_fraction: f64,
    pub retryable: Vec<ErrorCategory>,
}

/// Successful result plus the attempts it took.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryOutcome<T> {
    pub value: T,
    pub attempts: u32,
    pub history: Vec<AttemptFailure>,
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            max_timeout_attempts: settings.max_timeout_attempts.max(1),
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            jitter_fraction: settings.jitter_fraction.clamp(0.0, 1.0),
            retryable: settings.retryable.clone(),
        }
    }
}

impl RetryPolicy {
    pub fn is_retryable(&self, err: &CpcError) -> bool {
        let category = err.category();
        // Config and Input are never retried whatever the table says.
        if matches!(category, ErrorCategory::Config | ErrorCategory::Input) {
            return false;
        }
        // A shutdown request must end the loop.
        !err.is_cancellation() && self.retryable.contains(&category)
    }

    /// Attempt cap for a failure of `category`.
    pub fn attempt_cap(&self, category: ErrorCategory) -> u32 {
        match category {
            ErrorCategory::Timeout => self.max_timeout_attempts.min(self.max_attempts),
            _ => self.max_attempts,
        }
    }

    /// Backoff after failed attempt `attempt` (1-based), before jitter.
    pub fn base_backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << exponent;
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Backoff with jitter applied.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let delay = self.base_backoff(attempt);
        if self.jitter_fraction <= 0.0 || delay.is_zero() {
            return delay;
        }
        let spread = rand::rng().random_range(-self.jitter_fraction..=self.jitter_fraction);
        delay.mul_f64((1.0 + spread).max(0.0))
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or hits
    /// the attempt cap.
    ///
    /// `op` receives the 1-based attempt number. The backoff sleep is
    /// abandoned as soon as `shutdown` fires, returning `Cancelled`.
    pub async fn execute<T, F, Fut>(
        &self,
        operation: &str,
        shutdown: &ShutdownSignal,
        mut op: F,
    ) -> Result<RetryOutcome<T>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut history = Vec::new();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let err = match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(operation, "Operation succeeded on attempt {attempt}");
                    }
                    return Ok(RetryOutcome {
                        value,
                        attempts: attempt,
                        history,
                    });
                }
                Err(err) => err,
            };

            let category = err.category();
            if !self.is_retryable(&err) {
                debug!(operation, attempt, %category, "Failure is not retryable");
                return Err(err);
            }

            let cap = self.attempt_cap(category);
            if attempt >= cap {
                warn!(
                    operation,
                    attempts = attempt,
                    %category,
                    "Retries exhausted: {err}"
                );
                history.push(AttemptFailure {
                    attempt,
                    category,
                    message: err.to_string(),
                    delay_ms: None,
                });
                return Err(CpcError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(err),
                    history,
                });
            }

            let delay = self.backoff(attempt);
            warn!(
                operation,
                attempt,
                max_attempts = cap,
                delay_ms = delay.as_millis() as u64,
                "Attempt failed, retrying: {err}"
            );
            history.push(AttemptFailure {
                attempt,
                category,
                message: err.to_string(),
                delay_ms: Some(delay.as_millis() as u64),
            });

            tokio::select! {
                _ = sleep(delay) => {}
                _ = shutdown.cancelled() => {
                    return Err(CpcError::Cancelled {
                        operation: operation.to_string(),
                        reason: format!("shutdown requested during retry backoff after attempt {attempt}"),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            max_timeout_attempts: 2,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1_000),
            jitter_fraction: 0.0,
            retryable: vec![ErrorCategory::Execution, ErrorCategory::Timeout],
        }
    }

    fn timeout_err() -> CpcError {
        CpcError::Timeout {
            operation: "apply".into(),
            after: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = policy();
        assert_eq!(policy.base_backoff(1), Duration::from_millis(100));
        assert_eq!(policy.base_backoff(2), Duration::from_millis(200));
        assert_eq!(policy.base_backoff(4), Duration::from_millis(800));
        assert_eq!(policy.base_backoff(5), Duration::from_millis(1_000));
        assert_eq!(policy.base_backoff(60), Duration::from_millis(1_000));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let policy = RetryPolicy {
            jitter_fraction: 0.25,
            ..policy()
        };
        for _ in 0..200 {
            let delay = policy.backoff(2);
            assert!(delay >= Duration::from_millis(150), "{delay:?}");
            assert!(delay <= Duration::from_millis(250), "{delay:?}");
        }
    }

    #[test]
    fn test_from_settings() {
        let settings = RetrySettings {
            max_attempts: 4,
            max_timeout_attempts: 2,
            base_delay_ms: 50,
            max_delay_ms: 500,
            jitter_fraction: 0.1,
            retryable: vec![ErrorCategory::Execution],
        };
        let policy = RetryPolicy::from(&settings);
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.base_delay, Duration::from_millis(50));
        assert!(!policy.is_retryable(&timeout_err()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_twice_then_succeed() {
        let calls = Arc::new(AtomicU32::new(0));
        let shutdown = ShutdownSignal::new();
        let outcome = policy()
            .execute("apply", &shutdown, |attempt| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    if attempt < 3 {
                        Err(CpcError::execution("tofu exited with 1"))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await
            .expect("third attempt succeeds");

        assert_eq!(outcome.value, "done");
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.history.len(), 2);
        assert_eq!(outcome.history[1].delay_ms, Some(200));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_config_error_attempted_once() {
        let calls = AtomicU32::new(0);
        let err = policy()
            .execute("apply", &ShutdownSignal::new(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(CpcError::config("missing secrets file")) }
            })
            .await
            .expect_err("config errors are not retried");

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, CpcError::Config { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_carries_history() {
        let err = policy()
            .execute("playbook", &ShutdownSignal::new(), |_| async {
                Err::<(), _>(CpcError::execution("unreachable host"))
            })
            .await
            .expect_err("always fails");

        match err {
            CpcError::RetriesExhausted {
                attempts,
                last,
                history,
            } => {
                assert_eq!(attempts, 3);
                assert_eq!(last.category(), ErrorCategory::Execution);
                assert_eq!(history.len(), 3);
                assert_eq!(history[2].delay_ms, None);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_use_lower_cap() {
        let calls = AtomicU32::new(0);
        let err = policy()
            .execute("apply", &ShutdownSignal::new(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(timeout_err()) }
            })
            .await
            .expect_err("always times out");

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(err.category(), ErrorCategory::Timeout);
        assert!(err.to_string().contains("Retries exhausted after 2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_backoff() {
        let shutdown = ShutdownSignal::new();
        let policy = RetryPolicy {
            base_delay: Duration::from_secs(600),
            max_delay: Duration::from_secs(600),
            ..policy()
        };

        let trigger = shutdown.clone();
        let err = policy
            .execute("apply", &shutdown, |_| {
                let trigger = trigger.clone();
                async move {
                    trigger.trigger();
                    Err::<(), _>(CpcError::execution("boom"))
                }
            })
            .await
            .expect_err("cancelled");

        assert!(err.is_cancellation());
        assert_eq!(err.category(), ErrorCategory::Timeout);
    }
}
