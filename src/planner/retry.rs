//! Retry policy for provider calls.
//!
//! Transient provider errors are retried with exponential backoff:
//! attempt `n` waits `base * 2^(n-1)`, capped at `max`. A rate-limit hint
//! from the provider replaces the computed delay, still capped.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::config::RetryConfig;
use crate::error::{ProviderError, ReconcileError, StackError};

/// Backoff settings for transient provider errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

/// A provider call that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryFailure {
    /// Attempts made.
    pub attempts: u32,
    /// Last error returned by the provider.
    pub error: ProviderError,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    /// Creates a policy from the `retry` section of the stack file.
    #[must_use]
    pub const fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    /// A policy that never retries.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before the attempt after failed attempt `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32, retry_after_secs: Option<u64>) -> Duration {
        if let Some(secs) = retry_after_secs {
            return Duration::from_secs(secs).min(self.max_delay);
        }
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Runs `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// # Errors
    ///
    /// Returns the last provider error with the number of attempts made.
    pub async fn run<T, F, Fut>(&self, logical_id: &str, mut op: F) -> Result<T, RetryFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_transient() && attempt < max_attempts => {
                    let delay = self.delay_for(attempt, error.retry_after_secs());
                    warn!(
                        "Attempt {attempt}/{max_attempts} for '{logical_id}' failed: {error}; retrying in {delay:?}"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => {
                    return Err(RetryFailure {
                        attempts: attempt,
                        error,
                    });
                }
            }
        }
    }
}

impl RetryFailure {
    /// Returns true if the call gave up on a transient error.
    #[must_use]
    pub const fn exhausted(&self) -> bool {
        self.error.is_transient()
    }

    /// Converts into a reconciliation error for the given action.
    #[must_use]
    pub fn into_error(self, action: &str, kind: &str, logical_id: &str) -> StackError {
        let err = if self.exhausted() {
            ReconcileError::MaxRetriesExceeded {
                attempts: self.attempts,
                logical_id: logical_id.to_string(),
                last_error: self.error,
            }
        } else {
            ReconcileError::ResourceFailed {
                action: action.to_string(),
                kind: kind.to_string(),
                logical_id: logical_id.to_string(),
                source: self.error,
            }
        };
        StackError::Reconcile(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(3),
        };

        assert_eq!(policy.delay_for(1, None), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2, None), Duration::from_secs(1));
        assert_eq!(policy.delay_for(3, None), Duration::from_secs(2));
        assert_eq!(policy.delay_for(4, None), Duration::from_secs(3));
        assert_eq!(policy.delay_for(40, None), Duration::from_secs(3));
    }

    #[test]
    fn test_retry_after_hint_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        };
        assert_eq!(policy.delay_for(1, Some(2)), Duration::from_secs(2));
        assert_eq!(policy.delay_for(1, Some(60)), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_transient_then_success() {
        let calls = AtomicU32::new(0);
        let result = fast(5)
            .run("B1", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ProviderError::network("reset"))
                } else {
                    Ok("b-1")
                }
            })
            .await;

        assert_eq!(result, Ok("b-1"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let failure = fast(5)
            .run("B1", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ProviderError::PermissionDenied { message: "no".into() })
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!failure.exhausted());
        let err = failure.into_error("create", "bucket", "B1");
        assert!(matches!(err, StackError::Reconcile(ReconcileError::ResourceFailed { .. })));
    }

    #[tokio::test]
    async fn test_exhaustion() {
        let calls = AtomicU32::new(0);
        let failure = fast(3)
            .run("B1", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ProviderError::RateLimited { retry_after_secs: None })
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(failure.attempts, 3);
        let err = failure.into_error("create", "bucket", "B1");
        assert!(matches!(
            err,
            StackError::Reconcile(ReconcileError::MaxRetriesExceeded { attempts: 3, .. })
        ));
    }
}
