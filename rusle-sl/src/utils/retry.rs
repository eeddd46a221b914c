//! Remote call retry logic
//!
//! Every attempt is bounded by a timeout. Transient failures (network errors,
//! HTTP 408/429/5xx) back off exponentially and retry until the attempt budget
//! is spent. Timeouts and rejections fail immediately.

use std::future::Future;
use std::time::{Duration, Instant};

use crate::services::compute_client::ComputeError;

/// Retry and timeout settings for one kind of remote call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Attempts including the first one
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Upper bound on each attempt
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration, attempt_timeout: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            max_backoff: Duration::from_secs(30),
            attempt_timeout,
        }
    }

    /// Single attempt, no backoff
    pub fn once(attempt_timeout: Duration) -> Self {
        Self::new(1, Duration::ZERO, attempt_timeout)
    }
}

/// Run `operation` under `policy`.
///
/// # Arguments
/// * `operation_name` - Name for logging and timeout errors (e.g. "composite tile")
/// * `policy` - Attempt budget, backoff and per-attempt timeout
/// * `operation` - Async closure performing one remote call
pub async fn retry_transient<F, Fut, T>(
    operation_name: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, ComputeError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ComputeError>>,
{
    let start_time = Instant::now();
    let mut attempt = 0;
    let mut backoff = policy.initial_backoff;

    loop {
        attempt += 1;

        if attempt > 1 {
            tracing::debug!(operation = operation_name, attempt, "Retrying remote call");
        }

        let outcome = match tokio::time::timeout(policy.attempt_timeout, operation()).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    timeout_ms = policy.attempt_timeout.as_millis() as u64,
                    "Remote call timed out"
                );
                return Err(ComputeError::Timeout {
                    operation: operation_name.to_string(),
                    after: policy.attempt_timeout,
                });
            }
        };

        match outcome {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        "Remote call succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) if !err.is_transient() => return Err(err),
            Err(err) if attempt >= policy.max_attempts => {
                tracing::error!(
                    operation = operation_name,
                    attempt,
                    error = %err,
                    "Remote call failed: retries exhausted"
                );
                return Err(err);
            }
            Err(err) => {
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "Transient remote failure, backing off"
                );
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(policy.max_backoff);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1), Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_transient_then_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = retry_transient("stats", &fast_policy(3), || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ComputeError::Transient("503".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), _> = retry_transient("tile", &fast_policy(2), || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ComputeError::Transient("connection reset".into()))
            }
        })
        .await;

        assert!(matches!(result, Err(ComputeError::Transient(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), _> = retry_transient("evaluate", &fast_policy(5), || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ComputeError::Rejected {
                    status: 400,
                    message: "bad band".into(),
                })
            }
        })
        .await;

        assert!(matches!(result, Err(ComputeError::Rejected { status: 400, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempt_timeout() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(20));
        let result: Result<(), _> = retry_transient("composite tile", &policy, || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        match result {
            Err(ComputeError::Timeout { operation, after }) => {
                assert_eq!(operation, "composite tile");
                assert_eq!(after, Duration::from_millis(20));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }
}
