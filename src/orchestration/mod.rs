//! # Orchestration Engine
//!
//! Concurrent driver for a batch of audit jobs.
//!
//! ## Core Components
//!
//! - **JobOrchestrator**: Bounded worker pool tying cache, retry, circuit breaker
//!   and rate limiter together, with resume-from-offset and cooperative cancellation
//! - **JobRecord / JobStatus**: Per-job state machine
//!   (`pending -> in_progress -> {succeeded | failed | skipped}`)
//! - **ComputeOperation / ResultSink**: Seams to the external audit runner and the
//!   result writer
//! - **ProgressLog**: JSON-lines sink that can restore job states after a crash
//! - **ShutdownSignal**: Shared cancellation flag
//! - **RunSummary**: Aggregate counts and failure breakdown

pub mod job;
pub mod orchestrator;
pub mod progress;
pub mod shutdown;
pub mod summary;
pub mod traits;

pub use job::{JobFilter, JobOutcome, JobRecord, JobStatus};
pub use orchestrator::{JobOrchestrator, OrchestratorDeps, RunReport};
pub use progress::ProgressLog;
pub use shutdown::ShutdownSignal;
pub use summary::RunSummary;
pub use traits::{ComputeOperation, DiscardSink, ResultSink};
