#![cfg(unix)]

use std::time::{Duration, Instant};

use cpc_config::TimeoutSettings;
use cpc_core::{CpcError, ErrorCategory, ShutdownSignal};
use cpc_exec::{Cancellable, ProcessSpec, RetryPolicy, TimeoutSupervisor};

fn supervisor(shutdown: ShutdownSignal) -> TimeoutSupervisor {
    let timeouts = TimeoutSettings {
        cancel_grace_secs: 5,
        ..Default::default()
    };
    TimeoutSupervisor::new(timeouts, shutdown)
}

#[tokio::test]
async fn timeout_kills_the_process_before_returning() {
    let mut child = ProcessSpec::new("sleep").arg("30").spawn().unwrap();

    let start = Instant::now();
    let err = supervisor(ShutdownSignal::new())
        .with_timeout("sleep", Duration::from_millis(200), &mut child)
        .await
        .unwrap_err();

    assert!(matches!(err, CpcError::Timeout { .. }));
    assert!(start.elapsed() < Duration::from_secs(5));

    // The exit has already been observed, so waiting again is immediate.
    let output = child.wait().await.unwrap();
    assert_eq!(output.exit_code, None);
}

#[tokio::test]
async fn retry_wraps_timeout_per_attempt() {
    let supervisor = supervisor(ShutdownSignal::new());
    let policy = RetryPolicy {
        max_attempts: 3,
        max_timeout_attempts: 2,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(10),
        jitter_fraction: 0.0,
        retryable: vec![ErrorCategory::Execution, ErrorCategory::Timeout],
    };

    let shutdown = supervisor.shutdown().clone();
    let err = policy
        .execute("slow-step", &shutdown, |_| {
            let supervisor = supervisor.clone();
            async move {
                let mut child = ProcessSpec::new("sleep").arg("30").spawn()?;
                supervisor
                    .with_timeout("slow-step", Duration::from_millis(100), &mut child)
                    .await
            }
        })
        .await
        .unwrap_err();

    match err {
        CpcError::RetriesExhausted { attempts, .. } => assert_eq!(attempts, 2),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn fast_command_finishes_normally() {
    let mut child = ProcessSpec::new("sh")
        .args(["-c", "echo ready"])
        .spawn()
        .unwrap();
    let output = supervisor(ShutdownSignal::new())
        .with_timeout("echo", Duration::from_secs(10), &mut child)
        .await
        .unwrap()
        .into_result("echo")
        .unwrap();
    assert_eq!(output.stdout, "ready");
}
