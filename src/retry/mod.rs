//! Bounded, jittered retry for transient upstream failures

use crate::config::RetryConfig;
use crate::error::{RelayError, Result};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry `op` on transient errors, per the default classification.
///
/// Non-transient errors propagate immediately on first failure. After the
/// attempt budget is exhausted the last error is returned unchanged.
pub async fn with_retry<F, Fut, T>(policy: &RetryConfig, op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    with_retry_if(policy, RelayError::is_transient, op).await
}

/// Retry `op` on errors the given classifier accepts
pub async fn with_retry_if<F, Fut, T, C>(policy: &RetryConfig, retryable: C, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    C: Fn(&RelayError) -> bool,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if attempt < policy.max_attempts && retryable(&e) => {
                let delay = backoff_delay(policy, attempt);
                warn!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "Transient failure, retrying");
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Exponential backoff with +/-25% jitter to avoid synchronized retry storms
fn backoff_delay(policy: &RetryConfig, attempt: u32) -> Duration {
    let base = policy.initial_delay_ms as f64 * policy.backoff_multiplier.powi(attempt as i32 - 1);
    let capped = base.min(policy.max_delay_ms as f64);
    let jitter = capped * 0.25 * (rand::random::<f64>() * 2.0 - 1.0);
    Duration::from_millis((capped + jitter).max(0.0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RetrievalError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_delay_ms: 1,
            max_delay_ms: 10,
            backoff_multiplier: 2.0,
        }
    }

    fn transient() -> RelayError {
        RetrievalError::Timeout(100).into()
    }

    fn permanent() -> RelayError {
        RetrievalError::InvalidInput("bad query".to_string()).into()
    }

    #[tokio::test]
    async fn test_succeeds_first_try() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast_policy(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(7)
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast_policy(), || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(transient())
            } else {
                Ok("recovered")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "recovered");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_propagate_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry(&fast_policy(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(permanent())
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error_unchanged() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry(&fast_policy(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(transient())
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(RelayError::Retrieval(RetrievalError::Timeout(ms))) => assert_eq!(ms, 100),
            other => panic!("expected original timeout error, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryConfig {
            max_attempts: 10,
            initial_delay_ms: 100,
            max_delay_ms: 400,
            backoff_multiplier: 2.0,
        };

        // Attempt 5 would be 1600ms unjittered; cap plus jitter stays under 500ms
        let delay = backoff_delay(&policy, 5);
        assert!(delay <= Duration::from_millis(500));
    }
}
