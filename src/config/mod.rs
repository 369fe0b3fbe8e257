//! # Audit Configuration
//!
//! Typed configuration for the audit core. Every section has defaults, so an empty
//! file (or no file at all) yields a runnable configuration. Values are layered by
//! [`ConfigManager`]: defaults, then an optional TOML file, then `AUDIT__*`
//! environment variables.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use speedaudit_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load_from_file(Some("audit.toml".into()))?;
//! let workers = manager.config().orchestrator.workers;
//! let ttl = manager.config().cache.ttl();
//! # Ok(())
//! # }
//! ```
//!
//! Sections use plain seconds/milliseconds so they map cleanly onto TOML; the
//! `to_*` helpers convert them into the `Duration`-based runtime types.

pub mod error;
pub mod loader;

use crate::resilience::{CircuitBreakerConfig as BreakerRuntimeConfig, RetryPolicy};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Result cache settings
    pub cache: CacheConfig,

    /// Circuit breaker protecting the compute operation
    pub circuit_breaker: CircuitBreakerConfig,

    /// Retry/backoff policy for the compute operation
    pub retry: RetryConfig,

    /// Token bucket protecting the result persistence API
    pub rate_limiter: RateLimiterConfig,

    /// Worker pool and job selection
    pub orchestrator: OrchestratorConfig,
}

/// Which cache backend to attempt at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackendKind {
    /// Remote key-value store, falling back to the file backend if unreachable
    Redis,
    /// Local directory-based LRU cache
    File,
    /// Caching disabled
    None,
}

/// Caching configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub backend: CacheBackendKind,
    pub ttl_seconds: u64,
    /// Directory holding one file per entry plus the manifest
    pub directory: PathBuf,
    /// File backend capacity; least-recently-used entries beyond it are evicted
    pub max_entries: usize,
    pub redis: RedisConfig,
}

impl CacheConfig {
    /// Get entry time-to-live as Duration
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: CacheBackendKind::Redis,
            ttl_seconds: 86_400,
            directory: PathBuf::from(".audit_cache"),
            max_entries: 1000,
            redis: RedisConfig::default(),
        }
    }
}

/// Remote key-value store connection settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
    /// Namespace prepended to every key (`{key_prefix}:{fingerprint}`)
    pub key_prefix: String,
    pub connection_timeout_seconds: u64,
}

impl RedisConfig {
    /// Get handshake timeout as Duration
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_seconds)
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "speedaudit".to_string(),
            connection_timeout_seconds: 5,
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive expected failures before the breaker opens
    pub failure_threshold: u32,

    /// Time spent open before a half-open trial call is allowed (in seconds)
    pub recovery_timeout_seconds: u64,
}

impl CircuitBreakerConfig {
    /// Get recovery timeout as Duration
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_seconds)
    }

    /// Convert to resilience module's format
    pub fn to_resilience_config(&self) -> BreakerRuntimeConfig {
        BreakerRuntimeConfig {
            failure_threshold: self.failure_threshold,
            recovery_timeout: self.recovery_timeout(),
        }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_seconds: 300,
        }
    }
}

/// Backoff and retry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub exponential_base: f64,
    pub jitter: bool,
}

impl RetryConfig {
    /// Convert to the retry executor's policy
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            exponential_base: self.exponential_base,
            jitter: self.jitter,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 60_000,
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

/// Token bucket configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    /// Bucket size; also the number of tokens regenerated per window
    pub capacity: u32,
    pub window_seconds: u64,
}

impl RateLimiterConfig {
    /// Get refill window as Duration
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            capacity: 60,
            window_seconds: 60,
        }
    }
}

/// Worker pool and job selection configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub workers: usize,
    /// Position in the job list to resume from; earlier jobs are skipped
    pub resume_from: usize,
    pub include_pattern: Option<String>,
    pub exclude_pattern: Option<String>,
    /// Bypass cache reads (results are still written back)
    pub force_skip_cache: bool,
    /// Re-run jobs that already reached a terminal state in a previous run
    pub force_reprocess: bool,
    /// Capacity of the recent-errors ring buffer
    pub error_buffer_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workers: 3,
            resume_from: 0,
            include_pattern: None,
            exclude_pattern: None,
            force_skip_cache: false,
            force_reprocess: false,
            error_buffer_capacity: 1000,
        }
    }
}

/// Upper bound on the worker pool; the external operation is heavyweight
pub const MAX_WORKERS: usize = 16;

impl AuditConfig {
    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.cache.enabled && self.cache.ttl_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "cache.ttl_seconds",
                "0",
                "ttl must be greater than 0",
            ));
        }

        if self.cache.max_entries == 0 {
            return Err(ConfigurationError::invalid_value(
                "cache.max_entries",
                "0",
                "file cache capacity must be greater than 0",
            ));
        }

        if self.cache.enabled
            && self.cache.backend == CacheBackendKind::Redis
            && self.cache.redis.url.trim().is_empty()
        {
            return Err(ConfigurationError::missing_required_field(
                "cache.redis.url",
                "redis cache backend",
            ));
        }

        if self.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigurationError::invalid_value(
                "circuit_breaker.failure_threshold",
                "0",
                "failure threshold must be greater than 0",
            ));
        }

        if self.circuit_breaker.recovery_timeout_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "circuit_breaker.recovery_timeout_seconds",
                "0",
                "recovery timeout must be greater than 0",
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                "retry.max_attempts",
                "0",
                "at least one attempt is required",
            ));
        }

        if self.retry.exponential_base < 1.0 || !self.retry.exponential_base.is_finite() {
            return Err(ConfigurationError::invalid_value(
                "retry.exponential_base",
                self.retry.exponential_base.to_string(),
                "exponential base must be a finite number >= 1.0",
            ));
        }

        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigurationError::invalid_value(
                "retry.initial_delay_ms",
                self.retry.initial_delay_ms.to_string(),
                format!(
                    "initial delay must not exceed max_delay_ms ({})",
                    self.retry.max_delay_ms
                ),
            ));
        }

        if self.rate_limiter.capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "rate_limiter.capacity",
                "0",
                "bucket capacity must be greater than 0",
            ));
        }

        if self.rate_limiter.window_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "rate_limiter.window_seconds",
                "0",
                "refill window must be greater than 0",
            ));
        }

        if self.orchestrator.workers == 0 || self.orchestrator.workers > MAX_WORKERS {
            return Err(ConfigurationError::invalid_value(
                "orchestrator.workers",
                self.orchestrator.workers.to_string(),
                format!("worker pool size must be between 1 and {MAX_WORKERS}"),
            ));
        }

        if self.orchestrator.error_buffer_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "orchestrator.error_buffer_capacity",
                "0",
                "error buffer capacity must be greater than 0",
            ));
        }

        for (field, pattern) in [
            ("orchestrator.include_pattern", &self.orchestrator.include_pattern),
            ("orchestrator.exclude_pattern", &self.orchestrator.exclude_pattern),
        ] {
            if let Some(pattern) = pattern {
                if let Err(e) = Regex::new(pattern) {
                    return Err(ConfigurationError::invalid_value(
                        field,
                        pattern.clone(),
                        e.to_string(),
                    ));
                }
            }
        }

        Ok(())
    }
}
