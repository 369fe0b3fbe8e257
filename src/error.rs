//! Error types for the audit core.
//!
//! Errors fall into four families:
//!
//! - [`ComputeError`] - failures raised by the protected external compute operation,
//!   split into retryable and permanent variants
//! - [`crate::resilience::CircuitBreakerError`] - breaker rejections (fast-fail)
//! - [`crate::cache::CacheError`] - backend I/O failures, absorbed by the cache manager
//! - [`SinkError`] - failures of the result persistence callback
//!
//! Classification for retry purposes goes through the [`Retryable`] trait and never
//! inspects error messages.

use crate::config::ConfigurationError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Crate-level error
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("Compute error: {0}")]
    Compute(#[from] ComputeError),
    #[error("Persistence error: {0}")]
    Sink(#[from] SinkError),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Worker join error: {0}")]
    WorkerJoin(String),
}

pub type AuditResult<T> = Result<T, AuditError>;

/// Classification of an error for retry and circuit-breaker purposes
pub trait Retryable {
    /// Whether the failed operation may succeed if attempted again
    fn is_retryable(&self) -> bool;

    /// Stable snake_case identifier used in metrics and summaries
    fn kind(&self) -> &'static str;
}

/// Failures raised by the external compute operation (one audit of one URL)
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum ComputeError {
    // Retryable
    #[error("Operation timed out: {0}")]
    Timeout(String),
    #[error("Rate limited by upstream: {0}")]
    RateLimited(String),
    #[error("Service temporarily unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("Result artifact not yet available: {0}")]
    ResultPending(String),

    // Permanent
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),
    #[error("Resource not found: {0}")]
    NotFound(String),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Malformed input: {0}")]
    InvalidInput(String),
    #[error("Missing required external dependency: {0}")]
    MissingDependency(String),
}

impl Retryable for ComputeError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            ComputeError::Timeout(_)
                | ComputeError::RateLimited(_)
                | ComputeError::ServiceUnavailable(_)
                | ComputeError::ResultPending(_)
        )
    }

    fn kind(&self) -> &'static str {
        match self {
            ComputeError::Timeout(_) => "timeout",
            ComputeError::RateLimited(_) => "rate_limited",
            ComputeError::ServiceUnavailable(_) => "service_unavailable",
            ComputeError::ResultPending(_) => "result_pending",
            ComputeError::InvalidCredentials(_) => "invalid_credentials",
            ComputeError::NotFound(_) => "not_found",
            ComputeError::PermissionDenied(_) => "permission_denied",
            ComputeError::InvalidInput(_) => "invalid_input",
            ComputeError::MissingDependency(_) => "missing_dependency",
        }
    }
}

/// Failures of the caller-provided persistence callback
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Failed to write result for '{key}': {reason}")]
    WriteFailed { key: String, reason: String },
    #[error("Sink I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Sink serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SinkError {
    pub fn write_failed<K: Into<String>, R: std::fmt::Display>(key: K, reason: R) -> Self {
        Self::WriteFailed {
            key: key.into(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_taxonomy() {
        let retryable = [
            ComputeError::Timeout("t".into()),
            ComputeError::RateLimited("r".into()),
            ComputeError::ServiceUnavailable("s".into()),
            ComputeError::ResultPending("p".into()),
        ];
        for err in &retryable {
            assert!(err.is_retryable(), "{err} should be retryable");
        }

        let permanent = [
            ComputeError::InvalidCredentials("c".into()),
            ComputeError::NotFound("n".into()),
            ComputeError::PermissionDenied("p".into()),
            ComputeError::InvalidInput("i".into()),
            ComputeError::MissingDependency("m".into()),
        ];
        for err in &permanent {
            assert!(!err.is_retryable(), "{err} should be permanent");
        }
    }

    #[test]
    fn test_error_kinds_are_stable() {
        assert_eq!(ComputeError::Timeout(String::new()).kind(), "timeout");
        assert_eq!(ComputeError::NotFound(String::new()).kind(), "not_found");
        assert_eq!(
            ComputeError::MissingDependency(String::new()).kind(),
            "missing_dependency"
        );
    }

    #[test]
    fn test_compute_error_serializes_with_kind_tag() {
        let err = ComputeError::RateLimited("quota".into());
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "rate_limited");
        assert_eq!(json["message"], "quota");
    }
}
