//! # Job Orchestrator
//!
//! Drives a job list through a bounded pool of worker tasks. Per job:
//!
//! ```text
//! lock key -> cache get -> (miss) retry( breaker( compute ) ) -> cache set
//!          -> terminal state -> rate limiter -> result sink
//! ```
//!
//! Jobs are queued in list order before workers start. Workers check the shutdown
//! signal between jobs only, so a cancelled run finishes its in-flight jobs and
//! leaves the rest `pending`.

use crate::cache::CacheManager;
use crate::config::{AuditConfig, OrchestratorConfig};
use crate::error::{AuditError, AuditResult, ComputeError, Retryable};
use crate::metrics::ErrorMetricsCollector;
use crate::orchestration::{
    ComputeOperation, JobFilter, JobOutcome, JobRecord, JobStatus, ResultSink, RunSummary,
    ShutdownSignal,
};
use crate::resilience::{CircuitBreaker, RateLimiter, RetryExecutor};
use chrono::Utc;
use crossbeam::queue::SegQueue;
use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Error kind recorded for a job whose processing panicked
pub const PANIC_ERROR_KIND: &str = "panic";

/// Shared components the orchestrator coordinates
pub struct OrchestratorDeps {
    pub cache: Arc<CacheManager>,
    pub breaker: Arc<CircuitBreaker>,
    pub retry: RetryExecutor,
    pub rate_limiter: Arc<RateLimiter>,
    pub metrics: Arc<ErrorMetricsCollector>,
    pub compute: Arc<dyn ComputeOperation>,
    pub sink: Arc<dyn ResultSink>,
}

impl std::fmt::Debug for OrchestratorDeps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestratorDeps")
            .field("cache", &self.cache.backend_name())
            .field("breaker", &self.breaker.state())
            .field("retry", self.retry.policy())
            .field("rate_limiter_capacity", &self.rate_limiter.capacity())
            .field("compute", &self.compute.name())
            .finish()
    }
}

/// Final job states plus the aggregate summary
#[derive(Debug, Clone)]
pub struct RunReport {
    pub jobs: Vec<JobRecord>,
    pub summary: RunSummary,
}

/// Per-run state shared by the workers
struct RunContext {
    run_id: Uuid,
    deps: Arc<OrchestratorDeps>,
    force_skip_cache: bool,
    jobs: Mutex<Vec<JobRecord>>,
    queue: SegQueue<usize>,
    shutdown: ShutdownSignal,
}

/// Bounded-concurrency driver for a job list
#[derive(Debug)]
pub struct JobOrchestrator {
    settings: OrchestratorConfig,
    filter: JobFilter,
    deps: Arc<OrchestratorDeps>,
    shutdown: ShutdownSignal,
}

impl JobOrchestrator {
    pub fn new(
        settings: OrchestratorConfig,
        deps: OrchestratorDeps,
        shutdown: ShutdownSignal,
    ) -> AuditResult<Self> {
        let filter = JobFilter::new(
            settings.include_pattern.as_deref(),
            settings.exclude_pattern.as_deref(),
        )?;

        Ok(Self {
            settings,
            filter,
            deps: Arc::new(deps),
            shutdown,
        })
    }

    /// Build every component from configuration
    ///
    /// The cache backend is selected here, once, for the life of the orchestrator.
    pub async fn from_config(
        config: &AuditConfig,
        compute: Arc<dyn ComputeOperation>,
        sink: Arc<dyn ResultSink>,
        shutdown: ShutdownSignal,
    ) -> AuditResult<Self> {
        config.validate()?;

        let deps = OrchestratorDeps {
            cache: Arc::new(CacheManager::from_config(&config.cache).await),
            breaker: Arc::new(CircuitBreaker::new(
                compute.name().to_string(),
                config.circuit_breaker.to_resilience_config(),
            )),
            retry: RetryExecutor::new(config.retry.to_policy()),
            rate_limiter: Arc::new(RateLimiter::new(
                config.rate_limiter.capacity,
                config.rate_limiter.window(),
            )),
            metrics: Arc::new(ErrorMetricsCollector::new(
                config.orchestrator.error_buffer_capacity,
            )),
            compute,
            sink,
        };

        Self::new(config.orchestrator.clone(), deps, shutdown)
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.deps.cache
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.deps.breaker
    }

    pub fn metrics(&self) -> &Arc<ErrorMetricsCollector> {
        &self.deps.metrics
    }

    pub fn shutdown_signal(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    pub fn settings(&self) -> &OrchestratorConfig {
        &self.settings
    }

    /// Process `jobs` and return their final states
    ///
    /// Job failures, including a panic inside one job, are recorded on the job and
    /// in the summary. Only a worker task that cannot be joined is an error.
    pub async fn run(&self, jobs: Vec<JobRecord>) -> AuditResult<RunReport> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let started = Instant::now();

        let mut jobs = jobs;
        let queue = self.prepare(&mut jobs);
        let dispatched = queue.len();
        let worker_count = self.settings.workers.clamp(1, dispatched.max(1));

        info!(
            %run_id,
            total_jobs = jobs.len(),
            dispatched,
            workers = worker_count,
            resume_from = self.settings.resume_from,
            cache_backend = self.deps.cache.backend_name(),
            "Starting audit run"
        );

        let ctx = Arc::new(RunContext {
            run_id,
            deps: Arc::clone(&self.deps),
            force_skip_cache: self.settings.force_skip_cache,
            jobs: Mutex::new(jobs),
            queue,
            shutdown: self.shutdown.clone(),
        });

        let handles: Vec<_> = (0..worker_count)
            .map(|worker_id| {
                let ctx = Arc::clone(&ctx);
                tokio::spawn(async move { worker_loop(ctx, worker_id).await })
            })
            .collect();

        let mut join_error = None;
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                error!(%run_id, error = %e, "Worker task failed");
                join_error.get_or_insert(e.to_string());
            }
        }
        if let Some(e) = join_error {
            return Err(AuditError::WorkerJoin(e));
        }

        let jobs = std::mem::take(&mut *ctx.jobs.lock());
        let cancelled = self.shutdown.is_triggered();
        let summary = RunSummary::build(
            run_id,
            started_at,
            started.elapsed(),
            &jobs,
            &self.deps.metrics.snapshot(),
            cancelled,
        );

        info!(
            %run_id,
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            pending = summary.pending,
            cancelled,
            breaker = %self.deps.breaker.metrics().format_summary(),
            "Audit run finished: {}",
            summary.format_summary()
        );

        Ok(RunReport { jobs, summary })
    }

    /// Apply resume offset, filter and force-reprocess; queue what remains
    fn prepare(&self, jobs: &mut [JobRecord]) -> SegQueue<usize> {
        let queue = SegQueue::new();
        let metrics = &self.deps.metrics;

        for (position, job) in jobs.iter_mut().enumerate() {
            if position < self.settings.resume_from {
                if !job.status.is_terminal() {
                    job.status = JobStatus::Skipped;
                    metrics.record_job_outcome(JobStatus::Skipped, None);
                }
                continue;
            }

            if job.status.is_terminal() {
                if !self.settings.force_reprocess {
                    debug!(job_key = %job.key, row_index = job.row_index, status = %job.status, "Already terminal, not reprocessing");
                    continue;
                }
                job.attempt_count = 0;
                job.error_kind = None;
                job.from_cache = false;
                job.status = JobStatus::Pending;
            }

            if !self.filter.accepts(&job.key) {
                debug!(job_key = %job.key, row_index = job.row_index, "Excluded by job filter");
                job.status = JobStatus::Skipped;
                metrics.record_job_outcome(JobStatus::Skipped, None);
                continue;
            }

            job.status = JobStatus::Pending;
            queue.push(position);
        }

        queue
    }
}

async fn worker_loop(ctx: Arc<RunContext>, worker_id: usize) {
    let mut processed = 0usize;

    while !ctx.shutdown.is_triggered() {
        let Some(position) = ctx.queue.pop() else {
            break;
        };
        if let Err(panic) = AssertUnwindSafe(process_job(&ctx, position))
            .catch_unwind()
            .await
        {
            record_panicked_job(&ctx, position, worker_id, panic_message(&*panic)).await;
        }
        processed += 1;
    }

    debug!(
        run_id = %ctx.run_id,
        worker_id,
        processed,
        cancelled = ctx.shutdown.is_triggered(),
        "Worker exiting"
    );
}

async fn process_job(ctx: &RunContext, position: usize) {
    let deps = &ctx.deps;
    let (key, row_index) = {
        let mut jobs = ctx.jobs.lock();
        let job = &mut jobs[position];
        job.status = JobStatus::InProgress;
        (job.key.clone(), job.row_index)
    };

    let key_guard = deps.cache.lock_key(&key).await;

    let cached = if ctx.force_skip_cache {
        None
    } else {
        let cached = deps.cache.get(&key).await;
        if cached.is_some() {
            deps.metrics.record_cache_hit();
        } else {
            deps.metrics.record_cache_miss();
        }
        cached
    };

    let outcome = match cached {
        Some(value) => {
            debug!(job_key = %key, row_index, "Cache hit");
            let job = update_job(ctx, position, |job| {
                job.status = JobStatus::Succeeded;
                job.from_cache = true;
            });
            JobOutcome::succeeded(&job, value)
        }
        None => {
            let (result, attempts) = compute_with_resilience(deps, &key).await;
            match result {
                Ok(value) => {
                    deps.cache.set(&key, &value, None).await;
                    let job = update_job(ctx, position, |job| {
                        job.status = JobStatus::Succeeded;
                        job.attempt_count = attempts;
                    });
                    info!(job_key = %key, row_index, attempt = attempts, "Job succeeded");
                    JobOutcome::succeeded(&job, value)
                }
                Err(e) => {
                    let kind = e.kind();
                    let job = update_job(ctx, position, |job| {
                        job.status = JobStatus::Failed;
                        job.attempt_count = attempts;
                        job.error_kind = Some(kind.to_string());
                    });
                    warn!(
                        job_key = %key,
                        row_index,
                        attempt = attempts,
                        error_kind = kind,
                        error = %e,
                        "Job failed"
                    );
                    JobOutcome::failed(&job, kind, e.to_string())
                }
            }
        }
    };
    drop(key_guard);

    deps.metrics
        .record_job_outcome(outcome.status, outcome.error_kind.as_deref());
    persist_outcome(deps, &outcome).await;
}

/// Run the compute operation through retry and the circuit breaker
///
/// Returns the final result and the number of attempts made.
async fn compute_with_resilience(
    deps: &OrchestratorDeps,
    key: &str,
) -> (
    Result<serde_json::Value, crate::resilience::CircuitBreakerError<ComputeError>>,
    u32,
) {
    let operation = deps.compute.name();
    let mut attempts = 0u32;

    let result = deps
        .retry
        .execute(|attempt| {
            attempts = attempt;
            async move {
                let started = Instant::now();
                let result = deps
                    .breaker
                    .call_with(
                        || async {
                            deps.metrics.record_compute_attempt();
                            deps.compute.compute(key).await
                        },
                        |e: &ComputeError| e.is_retryable(),
                    )
                    .await;

                let failed = result.is_err();
                if !matches!(
                    result,
                    Err(crate::resilience::CircuitBreakerError::CircuitOpen { .. })
                ) {
                    deps.metrics
                        .record_operation(operation, started.elapsed(), failed);
                }
                if let Err(e) = &result {
                    debug!(job_key = %key, attempt, error_kind = e.kind(), "Attempt failed");
                    deps.metrics.record_error(e, operation, attempt);
                }
                result
            }
        })
        .await;

    (result, attempts)
}

async fn persist_outcome(deps: &OrchestratorDeps, outcome: &JobOutcome) {
    deps.rate_limiter.acquire().await;

    let started = Instant::now();
    let result = deps.sink.persist(outcome).await;
    deps.metrics
        .record_operation("persist", started.elapsed(), result.is_err());

    if let Err(e) = result {
        error!(
            job_key = %outcome.key,
            row_index = outcome.row_index,
            status = %outcome.status,
            error = %e,
            "Failed to persist job outcome"
        );
        deps.metrics
            .record_error_kind("persistence", "persist", e.to_string(), 1);
    }
}

/// Fail a job whose processing panicked, unless it already reached a terminal state
async fn record_panicked_job(ctx: &RunContext, position: usize, worker_id: usize, message: String) {
    let deps = &ctx.deps;
    let (job, already_terminal) = {
        let mut jobs = ctx.jobs.lock();
        let job = &mut jobs[position];
        let already_terminal = job.status.is_terminal();
        if !already_terminal {
            job.status = JobStatus::Failed;
            job.attempt_count = job.attempt_count.max(1);
            job.error_kind = Some(PANIC_ERROR_KIND.to_string());
        }
        (job.clone(), already_terminal)
    };

    if already_terminal {
        // The outcome was already decided, so the panic came from persisting it
        error!(
            run_id = %ctx.run_id,
            worker_id,
            job_key = %job.key,
            row_index = job.row_index,
            panic = %message,
            "Panic while persisting job outcome"
        );
        deps.metrics
            .record_error_kind("persistence", "persist", message, 1);
        return;
    }

    error!(
        run_id = %ctx.run_id,
        worker_id,
        job_key = %job.key,
        row_index = job.row_index,
        panic = %message,
        "Job panicked"
    );
    deps.metrics
        .record_error_kind(PANIC_ERROR_KIND, deps.compute.name(), message.clone(), job.attempt_count);
    deps.metrics
        .record_job_outcome(JobStatus::Failed, Some(PANIC_ERROR_KIND));

    let outcome = JobOutcome::failed(&job, PANIC_ERROR_KIND, message);
    if AssertUnwindSafe(persist_outcome(deps, &outcome))
        .catch_unwind()
        .await
        .is_err()
    {
        error!(job_key = %outcome.key, row_index = outcome.row_index, "Panic while persisting failed job");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

fn update_job(ctx: &RunContext, position: usize, f: impl FnOnce(&mut JobRecord)) -> JobRecord {
    let mut jobs = ctx.jobs.lock();
    let job = &mut jobs[position];
    f(job);
    job.clone()
}
