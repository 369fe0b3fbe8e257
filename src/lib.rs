#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # SpeedAudit Core
//!
//! Resilient job-processing core for batch web-performance audits.
//!
//! ## Overview
//!
//! A batch audit walks thousands of URLs, runs an expensive and flaky external
//! audit for each, and writes results back as they complete. This crate owns
//! everything between the job list and the external calls:
//!
//! - **Result cache** keyed by a daily fingerprint, backed by Redis when
//!   reachable and by a file-based LRU store otherwise
//! - **Resilience primitives**: exponential-backoff retry with jitter, a
//!   circuit breaker, and a token-bucket rate limiter for the quota-bound
//!   persistence API
//! - **Job orchestrator**: a bounded worker pool with incremental persistence,
//!   resume-from-offset and cooperative cancellation
//! - **Error metrics**: counters, duration stats and a ring buffer of recent errors
//!
//! ## Module Organization
//!
//! - [`cache`] - Cache manager, fingerprinting and backends
//! - [`config`] - Layered configuration (defaults, TOML, environment)
//! - [`error`] - Error taxonomy and the [`Retryable`] classification trait
//! - [`logging`] - Console tracing setup
//! - [`metrics`] - Error metrics collector
//! - [`orchestration`] - Jobs, worker pool, progress log and run summary
//! - [`resilience`] - Retry, circuit breaker and rate limiter
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use speedaudit_core::{
//!     ComputeError, ComputeOperation, ConfigManager, JobOrchestrator, JobRecord, ProgressLog,
//!     ShutdownSignal,
//! };
//! use std::sync::Arc;
//!
//! #[derive(Debug)]
//! struct Lighthouse;
//!
//! #[async_trait]
//! impl ComputeOperation for Lighthouse {
//!     async fn compute(&self, job_key: &str) -> Result<serde_json::Value, ComputeError> {
//!         Ok(serde_json::json!({ "url": job_key, "performance": 0.93 }))
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigManager::load_from_file(None)?;
//! let sink = Arc::new(ProgressLog::open("progress.jsonl").await?);
//! let shutdown = ShutdownSignal::new();
//! let _ctrl_c = shutdown.listen_for_ctrl_c();
//!
//! let orchestrator =
//!     JobOrchestrator::from_config(config.config(), Arc::new(Lighthouse), sink, shutdown).await?;
//! let jobs = JobRecord::from_rows(vec![(2, "https://example.com/")]);
//! let report = orchestrator.run(jobs).await?;
//! println!("{}", report.summary.format_summary());
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # Unit and integration tests
//! ```
//!
//! Redis-backed tests only exercise the fallback path and need no server.

pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod orchestration;
pub mod resilience;

pub use cache::{CacheManager, CacheStats, Fingerprint};
pub use config::{AuditConfig, ConfigManager, ConfigurationError};
pub use error::{AuditError, AuditResult, ComputeError, Retryable, SinkError};
pub use logging::init_tracing;
pub use metrics::{ErrorMetricsCollector, MetricsSnapshot};
pub use orchestration::{
    ComputeOperation, JobOrchestrator, JobRecord, JobStatus, ProgressLog, ResultSink, RunReport,
    RunSummary, ShutdownSignal,
};
pub use resilience::{
    CircuitBreaker, CircuitBreakerError, CircuitState, RateLimiter, RetryExecutor, RetryPolicy,
};
