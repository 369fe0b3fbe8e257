//! # Retry Executor
//!
//! Exponential backoff with optional jitter around a fallible async operation.
//! Errors are classified through [`Retryable`]; permanent errors and the error
//! from the final attempt are returned unchanged.

use crate::error::Retryable;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Backoff parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub initial_delay: Duration,
    /// Upper bound on the un-jittered delay
    pub max_delay: Duration,
    /// Growth factor between consecutive delays
    pub exponential_base: f64,
    /// Scale each delay by a uniform factor in `[0.5, 1.5)`
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Un-jittered delay after the failed attempt with zero-based index `attempt`
    ///
    /// `min(initial_delay * base^attempt, max_delay)`
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = self
            .exponential_base
            .powi(attempt.min(i32::MAX as u32) as i32);
        let secs = self.initial_delay.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Delay to sleep after the failed attempt with zero-based index `attempt`
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let delay = self.base_delay(attempt);
        if self.jitter {
            delay.mul_f64(0.5 + fastrand::f64())
        } else {
            delay
        }
    }
}

/// Runs an operation under a [`RetryPolicy`]
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute `operation` until it succeeds, fails permanently, or runs out of attempts
    ///
    /// The closure receives the 1-based attempt number.
    pub async fn execute<F, Fut, T, E>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + std::fmt::Display,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) if !error.is_retryable() => {
                    debug!(
                        attempt,
                        error_kind = error.kind(),
                        "Permanent error, not retrying"
                    );
                    return Err(error);
                }
                Err(error) if attempt >= max_attempts => {
                    warn!(
                        attempt,
                        max_attempts,
                        error_kind = error.kind(),
                        error = %error,
                        "Retry attempts exhausted"
                    );
                    return Err(error);
                }
                Err(error) => {
                    let delay = self.policy.backoff_delay(attempt - 1);
                    warn!(
                        attempt,
                        max_attempts,
                        error_kind = error.kind(),
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Retryable error, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ComputeError;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            exponential_base: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn test_base_delay_doubles_and_caps() {
        let policy = policy(10);
        let delays: Vec<u64> = (0..8).map(|i| policy.base_delay(i).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60]);
        assert_eq!(policy.base_delay(u32::MAX), Duration::from_secs(60));
    }

    fn arbitrary_policy() -> impl Strategy<Value = RetryPolicy> {
        (1u64..10_000, 1u64..600_000, 100u32..400).prop_map(|(initial_ms, max_ms, base)| {
            RetryPolicy {
                max_attempts: 10,
                initial_delay: Duration::from_millis(initial_ms),
                max_delay: Duration::from_millis(max_ms),
                exponential_base: f64::from(base) / 100.0,
                jitter: false,
            }
        })
    }

    proptest! {
        #[test]
        fn base_delay_never_exceeds_max(policy in arbitrary_policy(), attempt in 0u32..200) {
            prop_assert!(policy.base_delay(attempt) <= policy.max_delay);
        }

        #[test]
        fn base_delay_never_decreases(policy in arbitrary_policy(), attempt in 0u32..200) {
            prop_assert!(policy.base_delay(attempt) <= policy.base_delay(attempt + 1));
        }

        #[test]
        fn jittered_delay_stays_within_half_and_one_and_a_half(
            policy in arbitrary_policy(),
            attempt in 0u32..64,
        ) {
            let policy = RetryPolicy { jitter: true, ..policy };
            let base = policy.base_delay(attempt).as_secs_f64();
            let delay = policy.backoff_delay(attempt).as_secs_f64();
            prop_assert!(delay >= base * 0.5 - 1e-9);
            prop_assert!(delay < base * 1.5 + 1e-9);
        }
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy {
            jitter: true,
            ..policy(3)
        };
        for _ in 0..200 {
            let delay = policy.backoff_delay(2).as_secs_f64();
            assert!((2.0..6.0).contains(&delay), "delay {delay} out of range");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let executor = RetryExecutor::new(policy(3));
        let calls = AtomicU32::new(0);

        let result = executor
            .execute(|attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(ComputeError::Timeout("slow".into()))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error_unchanged() {
        let executor = RetryExecutor::new(policy(3));
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        let result: Result<(), _> = executor
            .execute(|attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Err(ComputeError::ServiceUnavailable(format!("attempt {attempt}"))) }
            })
            .await;

        assert_eq!(
            result,
            Err(ComputeError::ServiceUnavailable("attempt 3".into()))
        );
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s + 2s of backoff between the three attempts
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_aborts_immediately() {
        let executor = RetryExecutor::new(policy(5));
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = executor
            .execute(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ComputeError::InvalidCredentials("bad key".into())) }
            })
            .await;

        assert!(matches!(result, Err(ComputeError::InvalidCredentials(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
