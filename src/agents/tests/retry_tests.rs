use super::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_backoff_ms: 100,
        max_backoff_ms: 1_000,
        attempt_timeout_secs: 5,
        jitter: 0.25,
    }
}

#[test]
fn default_policy_is_valid() {
    let policy = RetryPolicy::default();
    assert!(policy.validate().is_ok());
    assert_eq!(policy.max_attempts, 3);
    assert_eq!(policy.attempt_timeout(), Duration::from_secs(120));
}

#[test]
fn validate_rejects_zero_attempts_and_inverted_backoff() {
    let mut policy = fast_policy();
    policy.max_attempts = 0;
    assert!(policy.validate().is_err());

    let mut policy = fast_policy();
    policy.max_backoff_ms = 10;
    assert!(policy.validate().is_err());

    let mut policy = fast_policy();
    policy.jitter = 1.5;
    assert!(policy.validate().is_err());
}

#[test]
fn base_backoff_doubles_and_caps() {
    let policy = fast_policy();
    assert_eq!(policy.base_backoff(1), Duration::from_millis(100));
    assert_eq!(policy.base_backoff(2), Duration::from_millis(200));
    assert_eq!(policy.base_backoff(3), Duration::from_millis(400));
    assert_eq!(policy.base_backoff(10), Duration::from_millis(1_000));
}

#[test]
fn jittered_backoff_stays_within_bounds() {
    let policy = fast_policy();
    for _ in 0..100 {
        let delay = policy.backoff(2).as_millis();
        assert!((150..=250).contains(&delay), "delay {} out of range", delay);
    }
}

#[tokio::test(start_paused = true)]
async fn succeeds_after_transient_failures() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();

    let result = run_with_retry(
        AgentKind::Selection,
        &fast_policy(),
        &CancelSignal::never(),
        move |attempt| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(AttemptFailure::Transient {
                        message: "connection reset".to_string(),
                    })
                } else {
                    Ok("done")
                }
            }
        },
    )
    .await;

    assert_eq!(result.unwrap(), "done");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn all_timeouts_report_timeout_with_attempts() {
    let result: Result<(), AgentError> = run_with_retry(
        AgentKind::Organizing,
        &fast_policy(),
        &CancelSignal::never(),
        |_| async {
            std::future::pending::<()>().await;
            Ok(())
        },
    )
    .await;

    match result {
        Err(AgentError::Timeout { agent, attempts }) => {
            assert_eq!(agent, AgentKind::Organizing);
            assert_eq!(attempts.len(), 3);
            assert_eq!(
                attempts.iter().map(|a| a.attempt).collect::<Vec<_>>(),
                vec![1, 2, 3]
            );
        }
        other => panic!("expected Timeout, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn mixed_failures_report_exhausted() {
    let result: Result<(), AgentError> = run_with_retry(
        AgentKind::Editing,
        &fast_policy(),
        &CancelSignal::never(),
        |attempt| async move {
            if attempt == 1 {
                std::future::pending::<()>().await;
            }
            Err(AttemptFailure::RateLimited {
                retry_after_ms: Some(2_000),
            })
        },
    )
    .await;

    match result {
        Err(AgentError::Exhausted { attempts, .. }) => {
            assert_eq!(attempts.len(), 3);
            assert_eq!(attempts[0].failure, AttemptFailure::Timeout);
        }
        other => panic!("expected Exhausted, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn fatal_failure_stops_immediately() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let result: Result<(), AgentError> = run_with_retry(
        AgentKind::Selection,
        &fast_policy(),
        &CancelSignal::never(),
        move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                Err(AttemptFailure::Fatal {
                    message: "command not found".to_string(),
                })
            }
        },
    )
    .await;

    assert!(matches!(result, Err(AgentError::Exhausted { .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn invalid_response_is_retried_once() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let mut policy = fast_policy();
    policy.max_attempts = 5;

    let result: Result<(), AgentError> = run_with_retry(
        AgentKind::Selection,
        &policy,
        &CancelSignal::never(),
        move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                Err(AttemptFailure::InvalidResponse {
                    message: "missing field `selected`".to_string(),
                })
            }
        },
    )
    .await;

    assert!(matches!(result, Err(AgentError::Exhausted { .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn rate_limit_waits_at_least_retry_after() {
    let start = tokio::time::Instant::now();
    let result = run_with_retry(
        AgentKind::Selection,
        &fast_policy(),
        &CancelSignal::never(),
        |attempt| async move {
            if attempt == 1 {
                Err(AttemptFailure::RateLimited {
                    retry_after_ms: Some(3_000),
                })
            } else {
                Ok(attempt)
            }
        },
    )
    .await;

    assert_eq!(result.unwrap(), 2);
    assert!(start.elapsed() >= Duration::from_millis(3_000));
}

#[tokio::test(start_paused = true)]
async fn cancellation_preempts_a_running_attempt() {
    let (tx, rx) = watch::channel(false);
    let cancel = CancelSignal::new(rx);

    let handle = tokio::spawn(async move {
        run_with_retry::<(), _, _>(AgentKind::Organizing, &fast_policy(), &cancel, |_| async {
            std::future::pending::<()>().await;
            Ok(())
        })
        .await
    });

    tokio::time::sleep(Duration::from_secs(1)).await;
    tx.send_replace(true);

    let result = handle.await.unwrap();
    assert!(matches!(result, Err(AgentError::Cancelled { .. })));
}

#[tokio::test]
async fn already_cancelled_signal_skips_the_call() {
    let (tx, rx) = watch::channel(false);
    tx.send_replace(true);
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();

    let result: Result<(), AgentError> = run_with_retry(
        AgentKind::Selection,
        &fast_policy(),
        &CancelSignal::new(rx),
        move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        },
    )
    .await;

    assert!(matches!(result, Err(AgentError::Cancelled { .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn never_signal_is_not_cancelled() {
    let cancel = CancelSignal::never();
    assert!(!cancel.is_cancelled());
    let fired = tokio::time::timeout(Duration::from_millis(20), cancel.cancelled()).await;
    assert!(fired.is_err());
}
