//! # Circuit Breaker Metrics
//!
//! Point-in-time view of a circuit breaker's counters, for logging and for the
//! run summary.

use crate::resilience::CircuitState;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Metrics for a single circuit breaker instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    /// Calls that reached the wrapped operation
    pub total_calls: u64,

    /// Number of successful calls
    pub success_count: u64,

    /// Failures that counted against the breaker
    pub failure_count: u64,

    /// Failures of a class the breaker ignores
    pub ignored_failure_count: u64,

    /// Calls fast-failed while open
    pub rejected_count: u64,

    /// Current consecutive failure count
    pub consecutive_failures: u64,

    /// Total duration of all executed operations
    pub total_duration: Duration,

    /// Current circuit breaker state
    pub current_state: CircuitState,

    /// Calculated failure rate over executed calls (0.0 to 1.0)
    pub failure_rate: f64,

    /// Average operation duration
    pub average_duration: Duration,
}

impl CircuitBreakerMetrics {
    /// Create new metrics instance with zero values
    pub fn new() -> Self {
        Self {
            total_calls: 0,
            success_count: 0,
            failure_count: 0,
            ignored_failure_count: 0,
            rejected_count: 0,
            consecutive_failures: 0,
            total_duration: Duration::ZERO,
            current_state: CircuitState::Closed,
            failure_rate: 0.0,
            average_duration: Duration::ZERO,
        }
    }

    /// Check if metrics indicate healthy operation
    pub fn is_healthy(&self) -> bool {
        match self.current_state {
            CircuitState::Closed => self.failure_rate < 0.1,
            CircuitState::Open => false,
            CircuitState::HalfOpen => true,
        }
    }

    /// Get human-readable state description
    pub fn state_description(&self) -> &'static str {
        match self.current_state {
            CircuitState::Closed => "Healthy - Normal operation",
            CircuitState::Open => "Failing - Rejecting all calls",
            CircuitState::HalfOpen => "Recovering - Testing system health",
        }
    }

    /// Format metrics for logging
    pub fn format_summary(&self) -> String {
        format!(
            "State: {} | Calls: {} | Failures: {} | Rejected: {} | Avg Duration: {}ms",
            self.state_description(),
            self.total_calls,
            self.failure_count,
            self.rejected_count,
            self.average_duration.as_millis()
        )
    }
}

impl Default for CircuitBreakerMetrics {
    fn default() -> Self {
        Self::new()
    }
}
