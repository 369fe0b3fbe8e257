//! # Circuit Breaker Configuration
//!
//! Runtime configuration for a single circuit breaker. The file-facing
//! counterpart lives in `crate::config::CircuitBreakerConfig` and converts into
//! this type via `to_resilience_config()`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a single circuit breaker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening circuit
    pub failure_threshold: u32,

    /// Time to wait in open state before a half-open trial call is allowed
    pub recovery_timeout: Duration,
}

impl CircuitBreakerConfig {
    /// Create configuration for the browser-driven audit operation
    pub fn for_audit_runner() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(300),
        }
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.failure_threshold == 0 {
            return Err("failure_threshold must be greater than 0".to_string());
        }

        if self.recovery_timeout.is_zero() {
            return Err("recovery_timeout must be greater than 0".to_string());
        }

        Ok(())
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::for_audit_runner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_breaker_config_validation() {
        assert!(CircuitBreakerConfig::default().validate().is_ok());

        let invalid = CircuitBreakerConfig {
            failure_threshold: 0,
            ..Default::default()
        };
        assert!(invalid.validate().is_err());

        let invalid = CircuitBreakerConfig {
            recovery_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(invalid.validate().is_err());
    }
}
