//! Bounded retry of ledger transactions.
//!
//! Every mutation runs in its own database transaction. When it fails with
//! a retryable error (stale version, serialization failure, deadlock,
//! unique violation) the transaction has already been rolled back, so the
//! whole operation is run again after an exponential, jittered delay.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::warn;

use cadence_shared::BillingConfig;

use crate::error::RepositoryError;

/// Upper bound for a single delay.
const MAX_DELAY: Duration = Duration::from_secs(2);

/// How often and how patiently an operation is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry; doubled for each further retry.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&BillingConfig::default())
    }
}

impl From<&BillingConfig> for RetryPolicy {
    fn from(config: &BillingConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// Runs each operation exactly once.
    #[must_use]
    pub const fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
        }
    }

    /// Delay ceiling after the given failed attempt (1-based), before jitter.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(factor).min(MAX_DELAY)
    }

    /// Jittered delay after the given failed attempt: uniformly between half
    /// the backoff and the full backoff.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let ceiling = u64::try_from(self.backoff(attempt).as_millis()).unwrap_or(u64::MAX);
        let floor = ceiling / 2;
        let jitter = if ceiling > floor {
            rand::rng().random_range(0..=ceiling - floor)
        } else {
            0
        };
        Duration::from_millis(floor + jitter)
    }
}

/// Runs the operation until it succeeds, fails with a non-retryable error, or
/// the attempts run out; the latter surfaces as `ConcurrentModification`.
///
/// # Errors
///
/// Returns the first non-retryable error, or `ConcurrentModification`.
pub async fn with_retry<T, F, Fut>(
    policy: RetryPolicy,
    operation: &'static str,
    mut run: F,
) -> Result<T, RepositoryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RepositoryError>>,
{
    let mut attempt = 1;
    loop {
        match run().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() => {
                if attempt >= policy.max_attempts {
                    warn!(operation, attempts = attempt, error = %err, "giving up after retries");
                    return Err(RepositoryError::ConcurrentModification { attempts: attempt });
                }
                let delay = policy.delay(attempt);
                warn!(
                    operation,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "retrying after concurrent modification"
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                warn!(operation, code = err.error_code(), error = %err, "operation rejected");
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use uuid::Uuid;

    fn stale() -> RepositoryError {
        RepositoryError::StaleVersion {
            table: "student_balances",
            id: Uuid::new_v4(),
        }
    }

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(25),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(25));
        assert_eq!(policy.backoff(2), Duration::from_millis(50));
        assert_eq!(policy.backoff(3), Duration::from_millis(100));
        assert_eq!(policy.backoff(30), MAX_DELAY);
    }

    #[test]
    fn test_delay_stays_within_jitter_window() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(40),
        };
        for _ in 0..100 {
            let delay = policy.delay(2);
            assert!(delay >= Duration::from_millis(40));
            assert!(delay <= Duration::from_millis(80));
        }
    }

    #[test]
    fn test_policy_from_config() {
        let config = BillingConfig {
            max_retries: 0,
            retry_base_delay_ms: 10,
            ..BillingConfig::default()
        };
        let policy = RetryPolicy::from(&config);
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.base_delay, Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = with_retry(fast(3), "test", || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(stale())
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_attempts_become_concurrent_modification() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = with_retry(fast(3), "test", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(stale())
        })
        .await;
        assert!(matches!(
            result,
            Err(RepositoryError::ConcurrentModification { attempts: 3 })
        ));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_business_errors_are_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = with_retry(fast(5), "test", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(RepositoryError::InvalidConfig("nope".to_string()))
        })
        .await;
        assert!(matches!(result, Err(RepositoryError::InvalidConfig(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
