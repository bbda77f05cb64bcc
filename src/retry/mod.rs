//! Retry combinator for fallible async calls.
//!
//! `retry_with_policy` wraps an operation with `(max_attempts, backoff,
//! is_retryable)` and returns the first success or the final failure, along
//! with the number of attempts that were made.

mod backoff;

use std::future::Future;

pub use backoff::{BackoffConfig, ExponentialBackoff};

use crate::config::DispatchConfig;

/// Retry policy
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first call (minimum 1)
    pub max_attempts: u32,
    pub backoff: BackoffConfig,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffConfig::default(),
        }
    }
}

impl RetryPolicy {
    /// Policy that makes exactly one attempt
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            backoff: BackoffConfig::default(),
        }
    }

    pub fn from_config(config: &DispatchConfig) -> Self {
        if !config.retry_enabled {
            return Self::no_retry();
        }
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: BackoffConfig::from(config),
        }
    }
}

/// Outcome of a retried call
#[derive(Debug)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// `policy.max_attempts` calls have been made.
pub async fn retry_with_policy<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation_name: &str,
    is_retryable: impl Fn(&E) -> bool,
    mut operation: F,
) -> Result<Attempted<T>, Attempted<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut backoff = ExponentialBackoff::with_config(policy.backoff.clone());
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;

        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(operation = operation_name, attempt, "Operation succeeded after retry");
                }
                return Ok(Attempted {
                    value,
                    attempts: attempt,
                });
            }
            Err(err) => {
                if !is_retryable(&err) {
                    tracing::warn!(
                        operation = operation_name,
                        attempt,
                        error = %err,
                        "Operation failed with non-retryable error"
                    );
                    return Err(Attempted {
                        value: err,
                        attempts: attempt,
                    });
                }

                if attempt >= max_attempts {
                    tracing::warn!(
                        operation = operation_name,
                        attempt,
                        max_attempts,
                        error = %err,
                        "Retry attempts exhausted"
                    );
                    return Err(Attempted {
                        value: err,
                        attempts: attempt,
                    });
                }

                let delay = backoff.next_delay();
                tracing::debug!(
                    operation = operation_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Operation failed, retrying after backoff"
                );
                tokio::time::sleep(delay).await;
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
        RetryPolicy {
            max_attempts,
            backoff: BackoffConfig {
                initial_delay_ms: 1,
                max_delay_ms: 2,
                multiplier: 2.0,
                jitter_factor: 0.0,
            },
        }
    }

    #[tokio::test]
    async fn test_succeeds_on_kth_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = retry_with_policy(&fast_policy(5), "test", |_: &String| true, move |_| {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(format!("fail {}", n))
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result.value, 3);
        assert_eq!(result.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_stops_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let err = retry_with_policy(&fast_policy(5), "test", |_: &String| false, move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>("fatal".to_string())
            }
        })
        .await
        .unwrap_err();

        assert_eq!(err.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausts_max_attempts() {
        let err = retry_with_policy(&fast_policy(3), "test", |_: &String| true, |attempt| async move {
            Err::<(), _>(format!("attempt {}", attempt))
        })
        .await
        .unwrap_err();

        assert_eq!(err.attempts, 3);
        assert_eq!(err.value, "attempt 3");
    }

    #[test]
    fn test_policy_from_config_respects_retry_flag() {
        let mut config = DispatchConfig::default();
        config.max_attempts = 4;
        assert_eq!(RetryPolicy::from_config(&config).max_attempts, 4);

        config.retry_enabled = false;
        assert_eq!(RetryPolicy::from_config(&config).max_attempts, 1);
    }
}
