//! Job records and their lifecycle.

use crate::config::ConfigurationError;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of one job: `pending -> in_progress -> {succeeded | failed | skipped}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Succeeded,
    Failed,
    Skipped,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Skipped
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of work: a job key (URL) at a position in the source list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub key: String,
    pub row_index: usize,
    pub attempt_count: u32,
    pub status: JobStatus,
    /// Kind of the final error when `status == Failed`
    pub error_kind: Option<String>,
    /// Whether the result came from the cache
    pub from_cache: bool,
}

impl JobRecord {
    pub fn new(row_index: usize, key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            row_index,
            attempt_count: 0,
            status: JobStatus::Pending,
            error_kind: None,
            from_cache: false,
        }
    }

    /// Build pending records from `(row_index, job_key)` pairs
    pub fn from_rows<I, K>(rows: I) -> Vec<Self>
    where
        I: IntoIterator<Item = (usize, K)>,
        K: Into<String>,
    {
        rows.into_iter()
            .map(|(row_index, key)| Self::new(row_index, key))
            .collect()
    }

    /// Identity used for incremental persistence
    pub fn identity(&self) -> (usize, &str) {
        (self.row_index, self.key.as_str())
    }
}

/// Terminal result handed to the result sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub key: String,
    pub row_index: usize,
    pub status: JobStatus,
    pub attempt_count: u32,
    pub from_cache: bool,
    pub result: Option<serde_json::Value>,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl JobOutcome {
    pub fn succeeded(job: &JobRecord, result: serde_json::Value) -> Self {
        Self {
            key: job.key.clone(),
            row_index: job.row_index,
            status: JobStatus::Succeeded,
            attempt_count: job.attempt_count,
            from_cache: job.from_cache,
            result: Some(result),
            error_kind: None,
            error_message: None,
            completed_at: Utc::now(),
        }
    }

    pub fn failed(job: &JobRecord, error_kind: &str, message: String) -> Self {
        Self {
            key: job.key.clone(),
            row_index: job.row_index,
            status: JobStatus::Failed,
            attempt_count: job.attempt_count,
            from_cache: false,
            result: None,
            error_kind: Some(error_kind.to_string()),
            error_message: Some(message),
            completed_at: Utc::now(),
        }
    }
}

/// Include/exclude regular expressions over job keys
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    include: Option<Regex>,
    exclude: Option<Regex>,
}

impl JobFilter {
    pub fn new(include: Option<&str>, exclude: Option<&str>) -> Result<Self, ConfigurationError> {
        let compile = |field: &str, pattern: Option<&str>| {
            pattern
                .map(|p| {
                    Regex::new(p).map_err(|e| {
                        ConfigurationError::invalid_value(field, p, e.to_string())
                    })
                })
                .transpose()
        };

        Ok(Self {
            include: compile("orchestrator.include_pattern", include)?,
            exclude: compile("orchestrator.exclude_pattern", exclude)?,
        })
    }

    /// Accept everything
    pub fn all() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.include.is_some() || self.exclude.is_some()
    }

    /// A key passes when it matches `include` (if set) and does not match `exclude`
    pub fn accepts(&self, key: &str) -> bool {
        let included = self.include.as_ref().map_or(true, |re| re.is_match(key));
        let excluded = self.exclude.as_ref().is_some_and(|re| re.is_match(key));
        included && !excluded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::InProgress.is_terminal());
        assert!(JobStatus::Succeeded.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Skipped.is_terminal());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&JobStatus::InProgress).unwrap(),
            "\"in_progress\""
        );
    }

    #[test]
    fn test_from_rows() {
        let jobs = JobRecord::from_rows(vec![(2, "https://a.test"), (3, "https://b.test")]);
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[1].identity(), (3, "https://b.test"));
        assert!(jobs.iter().all(|j| j.status == JobStatus::Pending));
    }

    #[test]
    fn test_filter() {
        let filter = JobFilter::new(Some(r"^https://shop\."), Some(r"/checkout")).unwrap();
        assert!(filter.accepts("https://shop.example.com/"));
        assert!(!filter.accepts("https://shop.example.com/checkout"));
        assert!(!filter.accepts("https://blog.example.com/"));

        let all = JobFilter::all();
        assert!(!all.is_active());
        assert!(all.accepts("anything"));
    }

    #[test]
    fn test_invalid_filter_pattern() {
        assert!(matches!(
            JobFilter::new(Some("("), None),
            Err(ConfigurationError::InvalidValue { .. })
        ));
    }
}
