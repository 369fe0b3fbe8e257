//! End-of-run summary.

use crate::metrics::MetricsSnapshot;
use crate::orchestration::{JobRecord, JobStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

/// Aggregate result of one orchestrator run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub total_jobs: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Jobs never started because the run was cancelled
    pub pending: usize,
    pub cancelled: bool,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Failed jobs by the kind of their final error
    pub failures_by_kind: BTreeMap<String, usize>,
    /// Every error observed during the run, including retried attempts
    pub errors_by_kind: BTreeMap<String, u64>,
    pub compute_attempts: u64,
}

impl RunSummary {
    pub fn build(
        run_id: Uuid,
        started_at: DateTime<Utc>,
        elapsed: Duration,
        jobs: &[JobRecord],
        metrics: &MetricsSnapshot,
        cancelled: bool,
    ) -> Self {
        let count = |status: JobStatus| jobs.iter().filter(|j| j.status == status).count();

        let mut failures_by_kind = BTreeMap::new();
        for job in jobs.iter().filter(|j| j.status == JobStatus::Failed) {
            let kind = job.error_kind.clone().unwrap_or_else(|| "unknown".to_string());
            *failures_by_kind.entry(kind).or_insert(0) += 1;
        }

        Self {
            run_id,
            started_at,
            finished_at: Utc::now(),
            elapsed,
            total_jobs: jobs.len(),
            succeeded: count(JobStatus::Succeeded),
            failed: count(JobStatus::Failed),
            skipped: count(JobStatus::Skipped),
            pending: count(JobStatus::Pending) + count(JobStatus::InProgress),
            cancelled,
            cache_hits: metrics.cache_hits,
            cache_misses: metrics.cache_misses,
            failures_by_kind,
            errors_by_kind: metrics.errors_by_kind.clone(),
            compute_attempts: metrics.compute_attempts,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.pending == 0
    }

    /// One-line form for logs and terminals
    pub fn format_summary(&self) -> String {
        let mut line = format!(
            "{} jobs: {} succeeded, {} failed, {} skipped, {} pending | cache {}/{} hits | {} attempts in {:.1}s",
            self.total_jobs,
            self.succeeded,
            self.failed,
            self.skipped,
            self.pending,
            self.cache_hits,
            self.cache_hits + self.cache_misses,
            self.compute_attempts,
            self.elapsed.as_secs_f64()
        );
        if !self.failures_by_kind.is_empty() {
            let breakdown: Vec<String> = self
                .failures_by_kind
                .iter()
                .map(|(kind, n)| format!("{kind}={n}"))
                .collect();
            line.push_str(&format!(" | failures: {}", breakdown.join(", ")));
        }
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_and_breakdown() {
        let mut jobs = JobRecord::from_rows((0..5).map(|i| (i, format!("https://{i}.test"))));
        jobs[0].status = JobStatus::Succeeded;
        jobs[1].status = JobStatus::Failed;
        jobs[1].error_kind = Some("timeout".into());
        jobs[2].status = JobStatus::Failed;
        jobs[2].error_kind = Some("not_found".into());
        jobs[3].status = JobStatus::Skipped;

        let summary = RunSummary::build(
            Uuid::new_v4(),
            Utc::now(),
            Duration::from_secs(2),
            &jobs,
            &MetricsSnapshot::default(),
            true,
        );

        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.pending, 1);
        assert!(!summary.is_complete());
        assert_eq!(summary.failures_by_kind["timeout"], 1);

        let line = summary.format_summary();
        assert!(line.starts_with("5 jobs: 1 succeeded, 2 failed"));
        assert!(line.contains("not_found=1, timeout=1"));
    }
}
