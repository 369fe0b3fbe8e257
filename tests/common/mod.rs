//! Shared fakes and builders for orchestrator integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::json;
use speedaudit_core::cache::{CacheManager, FileCacheService};
use speedaudit_core::config::OrchestratorConfig;
use speedaudit_core::error::{ComputeError, SinkError};
use speedaudit_core::metrics::ErrorMetricsCollector;
use speedaudit_core::orchestration::{
    ComputeOperation, JobOrchestrator, JobOutcome, JobRecord, OrchestratorDeps, ResultSink,
    ShutdownSignal,
};
use speedaudit_core::resilience::{
    CircuitBreaker, CircuitBreakerConfig, RateLimiter, RetryExecutor, RetryPolicy,
};
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Scriptable stand-in for the browser-driven audit
#[derive(Default)]
pub struct FakeCompute {
    calls: DashMap<String, u32>,
    total: AtomicU32,
    retryable: HashSet<String>,
    permanent: HashSet<String>,
    panicking: HashSet<String>,
    delay: Option<Duration>,
    /// Trigger this signal once the given number of calls has started
    shutdown_after: Option<(u32, ShutdownSignal)>,
}

impl FakeCompute {
    pub fn new() -> Self {
        Self::default()
    }

    /// `key` always fails with a timeout
    pub fn with_retryable(mut self, key: impl Into<String>) -> Self {
        self.retryable.insert(key.into());
        self
    }

    /// `key` always fails with not-found
    pub fn with_permanent(mut self, key: impl Into<String>) -> Self {
        self.permanent.insert(key.into());
        self
    }

    /// `key` panics mid-audit
    pub fn with_panic(mut self, key: impl Into<String>) -> Self {
        self.panicking.insert(key.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_shutdown_after(mut self, calls: u32, signal: ShutdownSignal) -> Self {
        self.shutdown_after = Some((calls, signal));
        self
    }

    pub fn calls_for(&self, key: &str) -> u32 {
        self.calls.get(key).map_or(0, |c| *c)
    }

    pub fn total_calls(&self) -> u32 {
        self.total.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ComputeOperation for FakeCompute {
    async fn compute(&self, job_key: &str) -> Result<serde_json::Value, ComputeError> {
        *self.calls.entry(job_key.to_string()).or_insert(0) += 1;
        let total = self.total.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some((after, signal)) = &self.shutdown_after {
            if total >= *after {
                signal.trigger();
            }
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.panicking.contains(job_key) {
            panic!("driver crashed on {job_key}");
        }
        if self.retryable.contains(job_key) {
            return Err(ComputeError::Timeout(format!("{job_key} timed out")));
        }
        if self.permanent.contains(job_key) {
            return Err(ComputeError::NotFound(format!("{job_key} returned 404")));
        }
        Ok(json!({ "url": job_key, "performance": 0.91, "lcp_ms": 1800 }))
    }

    fn name(&self) -> &str {
        "fake_audit"
    }
}

/// Collects every persisted outcome in arrival order
#[derive(Default)]
pub struct MemorySink {
    outcomes: Mutex<Vec<JobOutcome>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outcomes(&self) -> Vec<JobOutcome> {
        self.outcomes.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.outcomes.lock().len()
    }
}

#[async_trait]
impl ResultSink for MemorySink {
    async fn persist(&self, outcome: &JobOutcome) -> Result<(), SinkError> {
        self.outcomes.lock().push(outcome.clone());
        Ok(())
    }
}

/// Three attempts with millisecond backoff and no jitter
pub fn fast_retry_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(100),
        exponential_base: 2.0,
        jitter: false,
    }
}

pub fn deps(
    compute: Arc<dyn ComputeOperation>,
    sink: Arc<dyn ResultSink>,
    cache: CacheManager,
) -> OrchestratorDeps {
    OrchestratorDeps {
        cache: Arc::new(cache),
        breaker: Arc::new(CircuitBreaker::new(
            "fake_audit".to_string(),
            CircuitBreakerConfig {
                failure_threshold: 5,
                recovery_timeout: Duration::from_secs(300),
            },
        )),
        retry: RetryExecutor::new(fast_retry_policy()),
        rate_limiter: Arc::new(RateLimiter::new(1000, Duration::from_secs(1))),
        metrics: Arc::new(ErrorMetricsCollector::new(100)),
        compute,
        sink,
    }
}

pub fn settings(workers: usize) -> OrchestratorConfig {
    OrchestratorConfig {
        workers,
        ..OrchestratorConfig::default()
    }
}

/// Orchestrator with no cache
pub fn orchestrator(
    settings: OrchestratorConfig,
    compute: Arc<FakeCompute>,
    sink: Arc<MemorySink>,
    shutdown: ShutdownSignal,
) -> JobOrchestrator {
    JobOrchestrator::new(settings, deps(compute, sink, CacheManager::disabled()), shutdown)
        .expect("valid orchestrator settings")
}

/// File cache rooted at `dir` with a one-hour TTL
pub async fn file_cache(dir: &Path, max_entries: usize) -> CacheManager {
    let service = FileCacheService::open(dir, max_entries)
        .await
        .expect("open file cache");
    CacheManager::file(service, Duration::from_secs(3600))
}

pub fn site(i: usize) -> String {
    format!("https://site{i}.test")
}

/// `n` pending jobs with row index equal to position
pub fn jobs(n: usize) -> Vec<JobRecord> {
    JobRecord::from_rows((0..n).map(|i| (i, site(i))))
}
