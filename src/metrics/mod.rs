//! # Error Metrics Module
//!
//! In-process metrics for an audit run. Every component writes into a shared
//! [`ErrorMetricsCollector`]; the orchestrator reads a [`MetricsSnapshot`] at the
//! end of the run to build its summary.
//!
//! ## Usage
//!
//! ```rust
//! use speedaudit_core::metrics::ErrorMetricsCollector;
//! use speedaudit_core::error::ComputeError;
//! use std::time::Duration;
//!
//! let metrics = ErrorMetricsCollector::new(100);
//! metrics.record_error(&ComputeError::Timeout("lighthouse".into()), "audit", 1);
//! metrics.record_operation("audit", Duration::from_millis(1200), false);
//!
//! let snapshot = metrics.snapshot();
//! assert_eq!(snapshot.errors_by_kind["timeout"], 1);
//! ```

pub mod collector;

pub use collector::{ErrorMetricsCollector, ErrorRecord, MetricsSnapshot, OperationStats};
