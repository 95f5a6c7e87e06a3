use std::future::Future;
use std::time::Duration;

use revision_contracts::failure::FailureKind;
use tokio::time::Instant;

use crate::config::RetryPolicy;
use crate::errors::{classify, ClientError, StageError};
use crate::stage::Stage;

/// What happened on one call of a stage, reported after every attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptReport {
    pub stage: Stage,
    pub attempt: u32,
    pub duration_ms: u64,
    pub error_kind: Option<FailureKind>,
    pub error: Option<String>,
    pub will_retry: bool,
}

/// Runs `operation` under `timeout` until it succeeds, fails with a
/// non-network error, or `policy.max_attempts` calls have been made.
/// Returns the value together with the number of calls it took.
pub async fn execute_with_retry<T, Op, Fut, Observe>(
    policy: &RetryPolicy,
    timeout: Duration,
    stage: Stage,
    mut operation: Op,
    mut observe: Observe,
) -> Result<(T, u32), StageError>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
    Observe: FnMut(&AttemptReport),
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        let started = Instant::now();
        let outcome = match tokio::time::timeout(timeout, operation()).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout(timeout)),
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(value) => {
                tracing::debug!(
                    operation = stage.operation(),
                    attempt,
                    duration_ms,
                    "stage attempt succeeded"
                );
                observe(&AttemptReport {
                    stage,
                    attempt,
                    duration_ms,
                    error_kind: None,
                    error: None,
                    will_retry: false,
                });
                return Ok((value, attempt));
            }
            Err(error) => {
                let kind = classify(&error);
                let will_retry = kind.is_retryable() && attempt < max_attempts;
                tracing::warn!(
                    operation = stage.operation(),
                    attempt,
                    max_attempts,
                    duration_ms,
                    error_kind = kind.as_str(),
                    error = %error,
                    will_retry,
                    "stage attempt failed"
                );
                observe(&AttemptReport {
                    stage,
                    attempt,
                    duration_ms,
                    error_kind: Some(kind),
                    error: Some(error.to_string()),
                    will_retry,
                });
                if !will_retry {
                    return Err(StageError {
                        stage,
                        kind,
                        attempts: attempt,
                        source: error,
                    });
                }
                tokio::time::sleep(policy.delay_after(attempt)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use revision_contracts::failure::FailureKind;

    use super::{execute_with_retry, AttemptReport};
    use crate::config::RetryPolicy;
    use crate::errors::ClientError;
    use crate::stage::Stage;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(max_attempts)
            .with_delay(Duration::ZERO)
    }

    #[tokio::test]
    async fn retries_network_failures_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut reports: Vec<AttemptReport> = Vec::new();

        let (value, attempts) = execute_with_retry(
            &fast_policy(3),
            Duration::from_secs(5),
            Stage::Analysis,
            || {
                let calls = Arc::clone(&calls);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        return Err(ClientError::Transport("connection reset".to_string()));
                    }
                    Ok("ok")
                }
            },
            |report| reports.push(report.clone()),
        )
        .await
        .unwrap();

        assert_eq!(value, "ok");
        assert_eq!(attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(reports.len(), 3);
        assert!(reports[0].will_retry);
        assert_eq!(reports[2].error_kind, None);
    }

    #[tokio::test]
    async fn non_network_failure_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let err = execute_with_retry(
            &fast_policy(3),
            Duration::from_secs(5),
            Stage::Analysis,
            || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(ClientError::Status {
                        provider: "Gemini".to_string(),
                        status: 429,
                        body: "RESOURCE_EXHAUSTED".to_string(),
                    })
                }
            },
            |_| {},
        )
        .await
        .unwrap_err();

        assert_eq!(err.kind, FailureKind::Quota);
        assert_eq!(err.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeouts_count_against_the_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let err = execute_with_retry(
            &fast_policy(3).with_delay(Duration::from_secs(2)),
            Duration::from_secs(30),
            Stage::Generation,
            || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok::<(), ClientError>(())
                }
            },
            |_| {},
        )
        .await
        .unwrap_err();

        assert_eq!(err.stage, Stage::Generation);
        assert_eq!(err.kind, FailureKind::Network);
        assert_eq!(err.attempts, 3);
        assert_eq!(err.source, ClientError::Timeout(Duration::from_secs(30)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn single_attempt_policy_makes_one_call() {
        let calls = Arc::new(AtomicU32::new(0));
        let err = execute_with_retry(
            &fast_policy(1),
            Duration::from_secs(5),
            Stage::Analysis,
            || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(ClientError::Transport("refused".to_string()))
                }
            },
            |_| {},
        )
        .await
        .unwrap_err();

        assert_eq!(err.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
