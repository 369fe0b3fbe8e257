//! Thread-safe error and outcome collector.
//!
//! The recent-error buffer is a bounded ring under its own lock; counters live in
//! `DashMap`s and atomics so concurrent workers never contend on a single lock.

use crate::error::Retryable;
use crate::orchestration::JobStatus;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// One recorded failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub timestamp: DateTime<Utc>,
    pub error_kind: String,
    pub origin_operation: String,
    pub message: String,
    pub retryable: bool,
    pub attempt_number: u32,
}

/// Duration statistics for one named operation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationStats {
    pub count: u64,
    pub failures: u64,
    pub total_duration: Duration,
    pub max_duration: Duration,
}

impl OperationStats {
    pub fn average_duration(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            let nanos = self.total_duration.as_nanos() / u128::from(self.count);
            Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
        }
    }
}

/// Point-in-time copy of every counter
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub errors_by_kind: BTreeMap<String, u64>,
    pub errors_by_operation: BTreeMap<String, u64>,
    pub recent_errors: Vec<ErrorRecord>,
    pub operations: BTreeMap<String, OperationStats>,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub jobs_by_status: BTreeMap<String, u64>,
    /// Failed jobs broken down by the kind of their final error
    pub failures_by_kind: BTreeMap<String, u64>,
    pub compute_attempts: u64,
}

impl MetricsSnapshot {
    pub fn jobs_with_status(&self, status: JobStatus) -> u64 {
        self.jobs_by_status
            .get(status.as_str())
            .copied()
            .unwrap_or(0)
    }

    pub fn total_errors(&self) -> u64 {
        self.errors_by_kind.values().sum()
    }

    pub fn cache_hit_rate(&self) -> f64 {
        let lookups = self.cache_hits + self.cache_misses;
        if lookups == 0 {
            0.0
        } else {
            self.cache_hits as f64 / lookups as f64
        }
    }
}

/// Cross-cutting sink for errors, operation timings and job outcomes
#[derive(Debug)]
pub struct ErrorMetricsCollector {
    capacity: usize,
    recent: Mutex<VecDeque<ErrorRecord>>,
    errors_by_kind: DashMap<String, u64>,
    errors_by_operation: DashMap<String, u64>,
    operations: DashMap<String, OperationStats>,
    jobs_by_status: DashMap<&'static str, u64>,
    failures_by_kind: DashMap<String, u64>,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    compute_attempts: AtomicU64,
}

impl Default for ErrorMetricsCollector {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl ErrorMetricsCollector {
    /// `capacity` bounds the recent-error ring buffer
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            recent: Mutex::new(VecDeque::with_capacity(capacity.clamp(1, 1024))),
            errors_by_kind: DashMap::new(),
            errors_by_operation: DashMap::new(),
            operations: DashMap::new(),
            jobs_by_status: DashMap::new(),
            failures_by_kind: DashMap::new(),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            compute_attempts: AtomicU64::new(0),
        }
    }

    // ========================================================================
    // Errors
    // ========================================================================

    /// Record a classified error raised by `operation` on the given attempt
    pub fn record_error<E>(&self, error: &E, operation: &str, attempt_number: u32)
    where
        E: Retryable + std::fmt::Display,
    {
        self.push_error(ErrorRecord {
            timestamp: Utc::now(),
            error_kind: error.kind().to_string(),
            origin_operation: operation.to_string(),
            message: error.to_string(),
            retryable: error.is_retryable(),
            attempt_number,
        });
    }

    /// Record an error that has no `Retryable` classification (e.g. persistence)
    pub fn record_error_kind(
        &self,
        error_kind: &str,
        operation: &str,
        message: impl Into<String>,
        attempt_number: u32,
    ) {
        self.push_error(ErrorRecord {
            timestamp: Utc::now(),
            error_kind: error_kind.to_string(),
            origin_operation: operation.to_string(),
            message: message.into(),
            retryable: false,
            attempt_number,
        });
    }

    fn push_error(&self, record: ErrorRecord) {
        *self
            .errors_by_kind
            .entry(record.error_kind.clone())
            .or_insert(0) += 1;
        *self
            .errors_by_operation
            .entry(record.origin_operation.clone())
            .or_insert(0) += 1;

        debug!(
            error_kind = %record.error_kind,
            operation = %record.origin_operation,
            attempt = record.attempt_number,
            "Error recorded"
        );

        let mut recent = self.recent.lock();
        if recent.len() == self.capacity {
            recent.pop_front();
        }
        recent.push_back(record);
    }

    // ========================================================================
    // Operations
    // ========================================================================

    pub fn record_operation(&self, operation: &str, duration: Duration, failed: bool) {
        let mut stats = self.operations.entry(operation.to_string()).or_default();
        stats.count += 1;
        if failed {
            stats.failures += 1;
        }
        stats.total_duration += duration;
        stats.max_duration = stats.max_duration.max(duration);
    }

    /// One invocation of the protected compute operation
    pub fn record_compute_attempt(&self) {
        self.compute_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn compute_attempts(&self) -> u64 {
        self.compute_attempts.load(Ordering::Relaxed)
    }

    // ========================================================================
    // Cache
    // ========================================================================

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    // ========================================================================
    // Job outcomes
    // ========================================================================

    /// Record a job reaching a terminal state; `error_kind` is set for failures
    pub fn record_job_outcome(&self, status: JobStatus, error_kind: Option<&str>) {
        *self.jobs_by_status.entry(status.as_str()).or_insert(0) += 1;
        if status == JobStatus::Failed {
            let kind = error_kind.unwrap_or("unknown");
            *self.failures_by_kind.entry(kind.to_string()).or_insert(0) += 1;
        }
    }

    // ========================================================================
    // Export
    // ========================================================================

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            errors_by_kind: collect_counts(&self.errors_by_kind),
            errors_by_operation: collect_counts(&self.errors_by_operation),
            recent_errors: self.recent.lock().iter().cloned().collect(),
            operations: self
                .operations
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect(),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            jobs_by_status: self
                .jobs_by_status
                .iter()
                .map(|entry| (entry.key().to_string(), *entry.value()))
                .collect(),
            failures_by_kind: collect_counts(&self.failures_by_kind),
            compute_attempts: self.compute_attempts.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.recent.lock().clear();
        self.errors_by_kind.clear();
        self.errors_by_operation.clear();
        self.operations.clear();
        self.jobs_by_status.clear();
        self.failures_by_kind.clear();
        self.cache_hits.store(0, Ordering::Relaxed);
        self.cache_misses.store(0, Ordering::Relaxed);
        self.compute_attempts.store(0, Ordering::Relaxed);
    }
}

fn collect_counts(map: &DashMap<String, u64>) -> BTreeMap<String, u64> {
    map.iter()
        .map(|entry| (entry.key().clone(), *entry.value()))
        .collect()
}
