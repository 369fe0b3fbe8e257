//! Collaborator seams for the orchestrator.
//!
//! The browser-driven audit and the spreadsheet writer live outside this crate;
//! the orchestrator only sees them through these traits.

use crate::error::{ComputeError, SinkError};
use crate::orchestration::JobOutcome;
use async_trait::async_trait;

/// The protected external operation: audit one job key
///
/// The returned value is opaque to the core; it is cached and handed to the
/// result sink as-is. Errors are interpreted only through their
/// retryable/permanent classification.
#[async_trait]
pub trait ComputeOperation: Send + Sync {
    async fn compute(&self, job_key: &str) -> Result<serde_json::Value, ComputeError>;

    /// Name used for breaker logging and metrics
    fn name(&self) -> &str {
        "compute"
    }
}

/// Incremental persistence of terminal job outcomes
///
/// Called once per job as soon as it reaches a terminal state. Outcomes may
/// arrive in any order; implementations key them by `(row_index, key)`.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn persist(&self, outcome: &JobOutcome) -> Result<(), SinkError>;
}

/// Sink that drops every outcome
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardSink;

#[async_trait]
impl ResultSink for DiscardSink {
    async fn persist(&self, _outcome: &JobOutcome) -> Result<(), SinkError> {
        Ok(())
    }
}
