//! # Resilience Module
//!
//! Fault tolerance primitives protecting the external audit operation and the
//! quota-limited result sink.
//!
//! ## Architecture
//!
//! - **Circuit Breaker**: Isolates a failing dependency and fails fast while it recovers
//! - **Retry Executor**: Exponential backoff with jitter for retryable errors
//! - **Rate Limiter**: Token bucket in front of the persistence API
//! - **Metrics**: Point-in-time breaker counters
//!
//! ## Usage
//!
//! ```rust,no_run
//! use speedaudit_core::error::ComputeError;
//! use speedaudit_core::resilience::{
//!     CircuitBreaker, CircuitBreakerConfig, RetryExecutor, RetryPolicy,
//! };
//!
//! # async fn example() {
//! let breaker = CircuitBreaker::new("audit_runner".to_string(), CircuitBreakerConfig::default());
//! let retry = RetryExecutor::new(RetryPolicy::default());
//!
//! let result = retry
//!     .execute(|_attempt| {
//!         breaker.call(|| async { Ok::<_, ComputeError>("scores") })
//!     })
//!     .await;
//! # let _ = result;
//! # }
//! ```

pub mod circuit_breaker;
pub mod config;
pub mod metrics;
pub mod rate_limiter;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerError, CircuitState};
pub use config::CircuitBreakerConfig;
pub use metrics::CircuitBreakerMetrics;
pub use rate_limiter::RateLimiter;
pub use retry::{RetryExecutor, RetryPolicy};
