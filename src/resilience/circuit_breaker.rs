//! # Circuit Breaker Implementation
//!
//! Provides fault isolation for the unreliable external audit operation.
//! This implementation follows the classic circuit breaker pattern with three states:
//! Closed (normal operation), Open (failing fast), and Half-Open (testing recovery).
//!
//! Half-open admits exactly one trial call. Only failures the caller classifies as
//! "expected" (see [`CircuitBreaker::call_with`]) count against the breaker; any
//! other error passes through without touching its state.

use crate::error::Retryable;
use crate::resilience::{CircuitBreakerConfig, CircuitBreakerMetrics};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Lock-free counters for circuit breaker metrics.
#[derive(Debug, Default)]
struct AtomicCircuitBreakerMetrics {
    total_calls: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    ignored_failure_count: AtomicU64,
    rejected_count: AtomicU64,
    total_duration_nanos: AtomicU64,
}

impl AtomicCircuitBreakerMetrics {
    #[inline]
    fn record_call(&self, duration: Duration) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.total_duration_nanos
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    fn snapshot(&self, state: CircuitState, consecutive_failures: u64) -> CircuitBreakerMetrics {
        let total_calls = self.total_calls.load(Ordering::Relaxed);
        let failure_count = self.failure_count.load(Ordering::Relaxed);
        let total_duration_nanos = self.total_duration_nanos.load(Ordering::Relaxed);

        let (failure_rate, average_duration) = if total_calls > 0 {
            (
                failure_count as f64 / total_calls as f64,
                Duration::from_nanos(total_duration_nanos / total_calls),
            )
        } else {
            (0.0, Duration::ZERO)
        };

        CircuitBreakerMetrics {
            total_calls,
            success_count: self.success_count.load(Ordering::Relaxed),
            failure_count,
            ignored_failure_count: self.ignored_failure_count.load(Ordering::Relaxed),
            rejected_count: self.rejected_count.load(Ordering::Relaxed),
            consecutive_failures,
            total_duration: Duration::from_nanos(total_duration_nanos),
            current_state: state,
            failure_rate,
            average_duration,
        }
    }
}

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    Closed,
    /// Failure mode - all calls fail fast without executing
    Open,
    /// Testing recovery - a single trial call is allowed through
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Errors that can occur during circuit breaker operation
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open, the operation was not attempted
    #[error("Circuit breaker is open for {component}")]
    CircuitOpen { component: String },

    /// Operation ran and failed
    #[error("Operation failed: {0}")]
    OperationFailed(E),
}

impl<E> CircuitBreakerError<E> {
    /// Whether this is a fast-fail rejection rather than an operation failure
    pub fn is_rejection(&self) -> bool {
        matches!(self, CircuitBreakerError::CircuitOpen { .. })
    }

    /// The wrapped operation error, if the operation ran
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            CircuitBreakerError::OperationFailed(e) => Some(e),
            CircuitBreakerError::CircuitOpen { .. } => None,
        }
    }
}

/// Retrying against an open breaker would burn the recovery window, so rejections
/// are permanent; operation failures keep their own classification.
impl<E: Retryable> Retryable for CircuitBreakerError<E> {
    fn is_retryable(&self) -> bool {
        match self {
            CircuitBreakerError::CircuitOpen { .. } => false,
            CircuitBreakerError::OperationFailed(e) => e.is_retryable(),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            CircuitBreakerError::CircuitOpen { .. } => "circuit_open",
            CircuitBreakerError::OperationFailed(e) => e.kind(),
        }
    }
}

/// State machine guarded by the breaker's lock
#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u64,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

/// What a caller was admitted as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Trial,
}

/// Holds a half-open trial slot until the admitted call resolves
///
/// Dropping an unresolved trial (timeout, `select!`, panic) frees the slot so the
/// next caller is admitted as the trial instead.
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
    resolved: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.resolved || self.admission != Admission::Trial {
            return;
        }
        let mut inner = self.breaker.inner.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.trial_in_flight = false;
            warn!(component = %self.breaker.name, "Half-open trial abandoned before completion");
        }
    }
}

/// Core circuit breaker implementation
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Component name for logging and metrics
    name: String,

    /// Configuration parameters
    config: CircuitBreakerConfig,

    /// State, failure streak and open timestamp; never held across an await
    inner: Mutex<BreakerState>,

    /// Lock-free call counters
    metrics: AtomicCircuitBreakerMetrics,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given name and configuration
    pub fn new(name: String, config: CircuitBreakerConfig) -> Self {
        info!(
            component = %name,
            failure_threshold = config.failure_threshold,
            recovery_timeout_seconds = config.recovery_timeout.as_secs(),
            "Circuit breaker initialized"
        );

        Self {
            name,
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
            metrics: AtomicCircuitBreakerMetrics::default(),
        }
    }

    /// Get current circuit state
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Current consecutive failure count
    pub fn consecutive_failures(&self) -> u64 {
        self.inner.lock().consecutive_failures
    }

    /// When the breaker last opened, if it is open or half-open
    pub fn opened_at(&self) -> Option<Instant> {
        self.inner.lock().opened_at
    }

    /// Execute an operation with circuit breaker protection; every error counts
    pub async fn call<F, T, E, Fut>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.call_with(operation, |_| true).await
    }

    /// Execute an operation, counting only errors for which `is_expected` is true
    ///
    /// Unexpected errors are returned to the caller without affecting breaker
    /// state (a half-open trial that ends this way frees the trial slot).
    pub async fn call_with<F, T, E, Fut, P>(
        &self,
        operation: F,
        is_expected: P,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let Some(admission) = self.admit() else {
            self.metrics.rejected_count.fetch_add(1, Ordering::Relaxed);
            debug!(component = %self.name, "Call rejected, circuit open");
            return Err(CircuitBreakerError::CircuitOpen {
                component: self.name.clone(),
            });
        };

        let mut guard = TrialGuard {
            breaker: self,
            admission,
            resolved: false,
        };

        let start_time = Instant::now();
        let result = operation().await;
        guard.resolved = true;
        let duration = start_time.elapsed();
        self.metrics.record_call(duration);

        match &result {
            Ok(_) => self.record_success(admission, duration),
            Err(e) if is_expected(e) => self.record_failure(admission, duration),
            Err(_) => self.record_ignored_failure(admission),
        }

        result.map_err(CircuitBreakerError::OperationFailed)
    }

    /// Decide whether a call may proceed, moving Open -> HalfOpen once the
    /// recovery timeout has elapsed
    fn admit(&self) -> Option<Admission> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Some(Admission::Normal),
            CircuitState::Open => {
                let Some(opened_at) = inner.opened_at else {
                    warn!(component = %self.name, "Circuit open but no timestamp recorded");
                    inner.opened_at = Some(Instant::now());
                    return None;
                };

                if opened_at.elapsed() >= self.config.recovery_timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_in_flight = true;
                    info!(
                        component = %self.name,
                        "Circuit breaker half-open (testing recovery)"
                    );
                    Some(Admission::Trial)
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    None
                } else {
                    inner.trial_in_flight = true;
                    Some(Admission::Trial)
                }
            }
        }
    }

    fn record_success(&self, admission: Admission, duration: Duration) {
        self.metrics.success_count.fetch_add(1, Ordering::Relaxed);

        debug!(
            component = %self.name,
            duration_ms = duration.as_millis(),
            "Operation succeeded"
        );

        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen if admission == Admission::Trial => {
                Self::close(&mut inner);
                info!(component = %self.name, "Circuit breaker closed (recovered)");
            }
            CircuitState::Closed | CircuitState::HalfOpen => {
                inner.consecutive_failures = 0;
            }
            CircuitState::Open => {
                // A call admitted before another caller tripped the breaker
                debug!(component = %self.name, "Success recorded while circuit is open");
            }
        }
    }

    fn record_failure(&self, admission: Admission, duration: Duration) {
        self.metrics.failure_count.fetch_add(1, Ordering::Relaxed);

        let mut inner = self.inner.lock();
        inner.consecutive_failures += 1;

        warn!(
            component = %self.name,
            duration_ms = duration.as_millis(),
            consecutive_failures = inner.consecutive_failures,
            "Operation failed"
        );

        match inner.state {
            CircuitState::Closed => {
                if inner.consecutive_failures >= u64::from(self.config.failure_threshold) {
                    self.open(&mut inner);
                }
            }
            CircuitState::HalfOpen if admission == Admission::Trial => {
                // Trial failed: back to open with a fresh recovery window
                self.open(&mut inner);
            }
            CircuitState::HalfOpen | CircuitState::Open => {}
        }
    }

    fn record_ignored_failure(&self, admission: Admission) {
        self.metrics
            .ignored_failure_count
            .fetch_add(1, Ordering::Relaxed);

        if admission == Admission::Trial {
            let mut inner = self.inner.lock();
            if inner.state == CircuitState::HalfOpen {
                inner.trial_in_flight = false;
            }
        }
    }

    fn open(&self, inner: &mut BreakerState) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
        inner.trial_in_flight = false;

        error!(
            component = %self.name,
            consecutive_failures = inner.consecutive_failures,
            failure_threshold = self.config.failure_threshold,
            recovery_timeout_seconds = self.config.recovery_timeout.as_secs(),
            "Circuit breaker opened (failing fast)"
        );
    }

    fn close(inner: &mut BreakerState) {
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.trial_in_flight = false;
    }

    /// Force circuit to closed state with a zeroed failure count (operator reset)
    pub fn reset(&self) {
        warn!(component = %self.name, "Circuit breaker manually reset");
        Self::close(&mut self.inner.lock());
    }

    /// Force circuit to open state (for emergency situations)
    pub fn force_open(&self) {
        warn!(component = %self.name, "Circuit breaker forced open");
        let mut inner = self.inner.lock();
        self.open(&mut inner);
    }

    /// Get current metrics snapshot
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let (state, consecutive_failures) = {
            let inner = self.inner.lock();
            (inner.state, inner.consecutive_failures)
        };
        self.metrics.snapshot(state, consecutive_failures)
    }

    /// Get component name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check if circuit is healthy (closed state with low failure rate)
    pub fn is_healthy(&self) -> bool {
        let metrics = self.metrics();
        if metrics.current_state != CircuitState::Closed {
            return false;
        }
        if metrics.total_calls < 10 {
            // Too few calls to determine health
            return true;
        }
        metrics.failure_rate < 0.1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ComputeError;
    use std::sync::atomic::AtomicU32;
    use tokio::time::advance;

    fn config(failure_threshold: u32, recovery_ms: u64) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold,
            recovery_timeout: Duration::from_millis(recovery_ms),
        }
    }

    #[tokio::test]
    async fn test_circuit_breaker_normal_operation() {
        let circuit = CircuitBreaker::new("test".to_string(), config(3, 100));

        assert_eq!(circuit.state(), CircuitState::Closed);

        let result = circuit.call(|| async { Ok::<_, String>("success") }).await;
        assert!(result.is_ok());

        let metrics = circuit.metrics();
        assert_eq!(metrics.total_calls, 1);
        assert_eq!(metrics.success_count, 1);
        assert_eq!(metrics.failure_count, 0);
    }

    #[tokio::test]
    async fn test_success_resets_consecutive_failures() {
        let circuit = CircuitBreaker::new("test".to_string(), config(3, 100));

        let _ = circuit.call(|| async { Err::<(), _>("error") }).await;
        let _ = circuit.call(|| async { Err::<(), _>("error") }).await;
        assert_eq!(circuit.consecutive_failures(), 2);

        let _ = circuit.call(|| async { Ok::<_, &str>(()) }).await;
        assert_eq!(circuit.consecutive_failures(), 0);
        assert_eq!(circuit.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold_and_rejects_without_invoking() {
        let circuit = CircuitBreaker::new("test".to_string(), config(2, 1_000));

        let _ = circuit.call(|| async { Err::<String, _>("error") }).await;
        assert_eq!(circuit.state(), CircuitState::Closed);

        let _ = circuit.call(|| async { Err::<String, _>("error") }).await;
        assert_eq!(circuit.state(), CircuitState::Open);
        assert!(circuit.opened_at().is_some());

        let invocations = AtomicU32::new(0);
        let result = circuit
            .call(|| async {
                invocations.fetch_add(1, Ordering::SeqCst);
                Ok::<_, &str>("should not execute")
            })
            .await;

        assert!(matches!(
            result,
            Err(CircuitBreakerError::CircuitOpen { .. })
        ));
        assert_eq!(invocations.load(Ordering::SeqCst), 0);
        assert_eq!(circuit.metrics().rejected_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_through_half_open() {
        let circuit = CircuitBreaker::new("test".to_string(), config(1, 50));

        let _ = circuit.call(|| async { Err::<String, _>("error") }).await;
        assert_eq!(circuit.state(), CircuitState::Open);

        advance(Duration::from_millis(60)).await;

        let result = circuit.call(|| async { Ok::<_, String>("success") }).await;
        assert!(result.is_ok());
        assert_eq!(circuit.state(), CircuitState::Closed);
        assert_eq!(circuit.consecutive_failures(), 0);
        assert!(circuit.opened_at().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_trial_observes_half_open_state() {
        let circuit = CircuitBreaker::new("test".to_string(), config(1, 50));
        let _ = circuit.call(|| async { Err::<(), _>("error") }).await;

        advance(Duration::from_millis(50)).await;

        let state_during_trial = circuit
            .call(|| async { Ok::<_, ()>(circuit.state()) })
            .await
            .unwrap();
        assert_eq!(state_during_trial, CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_trial_reopens_with_fresh_window() {
        let circuit = CircuitBreaker::new("test".to_string(), config(1, 100));
        let _ = circuit.call(|| async { Err::<(), _>("error") }).await;
        let first_opened = circuit.opened_at().unwrap();

        advance(Duration::from_millis(150)).await;
        let _ = circuit.call(|| async { Err::<(), _>("still broken") }).await;

        assert_eq!(circuit.state(), CircuitState::Open);
        let reopened = circuit.opened_at().unwrap();
        assert!(reopened > first_opened);

        // Recovery window restarted, so an immediate call is rejected
        let result = circuit.call(|| async { Ok::<_, &str>(()) }).await;
        assert!(result.unwrap_err().is_rejection());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_admits_single_trial() {
        let circuit = CircuitBreaker::new("test".to_string(), config(1, 10));
        let _ = circuit.call(|| async { Err::<(), _>("error") }).await;
        advance(Duration::from_millis(20)).await;

        let (trial, concurrent) = tokio::join!(
            circuit.call(|| async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok::<_, &str>("trial")
            }),
            async {
                tokio::task::yield_now().await;
                circuit.call(|| async { Ok::<_, &str>("second") }).await
            }
        );

        assert_eq!(trial.unwrap(), "trial");
        assert!(concurrent.unwrap_err().is_rejection());
        assert_eq!(circuit.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_trial_frees_the_slot() {
        let circuit = CircuitBreaker::new("test".to_string(), config(1, 10));
        let _ = circuit.call(|| async { Err::<(), _>("error") }).await;
        advance(Duration::from_millis(20)).await;

        let abandoned = tokio::time::timeout(
            Duration::from_millis(5),
            circuit.call(|| async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok::<_, &str>(())
            }),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(circuit.state(), CircuitState::HalfOpen);

        let result = circuit.call(|| async { Ok::<_, &str>("recovered") }).await;
        assert_eq!(result.unwrap(), "recovered");
        assert_eq!(circuit.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_unexpected_errors_do_not_count() {
        let circuit = CircuitBreaker::new("test".to_string(), config(1, 1_000));

        let result = circuit
            .call_with(
                || async { Err::<(), _>(ComputeError::NotFound("404".into())) },
                |e: &ComputeError| e.is_retryable(),
            )
            .await;

        assert!(matches!(
            result,
            Err(CircuitBreakerError::OperationFailed(ComputeError::NotFound(_)))
        ));
        assert_eq!(circuit.state(), CircuitState::Closed);
        assert_eq!(circuit.consecutive_failures(), 0);
        assert_eq!(circuit.metrics().ignored_failure_count, 1);

        let _ = circuit
            .call_with(
                || async { Err::<(), _>(ComputeError::Timeout("slow".into())) },
                |e: &ComputeError| e.is_retryable(),
            )
            .await;
        assert_eq!(circuit.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_reset_and_force_open() {
        let circuit = CircuitBreaker::new("test".to_string(), config(1, 60_000));

        circuit.force_open();
        assert_eq!(circuit.state(), CircuitState::Open);

        circuit.reset();
        assert_eq!(circuit.state(), CircuitState::Closed);
        assert_eq!(circuit.consecutive_failures(), 0);

        let result = circuit.call(|| async { Ok::<_, &str>(1) }).await;
        assert_eq!(result.unwrap(), 1);
    }

    #[test]
    fn test_rejection_is_permanent_for_retry() {
        let rejection: CircuitBreakerError<ComputeError> = CircuitBreakerError::CircuitOpen {
            component: "audit".into(),
        };
        assert!(!rejection.is_retryable());
        assert_eq!(rejection.kind(), "circuit_open");

        let wrapped = CircuitBreakerError::OperationFailed(ComputeError::Timeout("t".into()));
        assert!(wrapped.is_retryable());
        assert_eq!(wrapped.kind(), "timeout");
    }
}
