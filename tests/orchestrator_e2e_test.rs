//! End-to-end runs of the job orchestrator with in-memory collaborators

mod common;

use common::{jobs, orchestrator, settings, site, FakeCompute, MemorySink};
use speedaudit_core::orchestration::{JobStatus, ShutdownSignal};
use speedaudit_core::resilience::CircuitState;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_one_always_retryable_job_among_ten() {
    let compute = Arc::new(FakeCompute::new().with_retryable(site(4)));
    let sink = Arc::new(MemorySink::new());
    let orchestrator = orchestrator(settings(3), compute.clone(), sink.clone(), ShutdownSignal::new());

    let report = orchestrator.run(jobs(10)).await.unwrap();

    // max_attempts = 3: the first call plus two retries
    assert_eq!(compute.calls_for(&site(4)), 3);
    assert_eq!(report.jobs[4].status, JobStatus::Failed);
    assert_eq!(report.jobs[4].attempt_count, 3);
    assert_eq!(report.jobs[4].error_kind.as_deref(), Some("timeout"));

    let snapshot = orchestrator.metrics().snapshot();
    assert_eq!(snapshot.jobs_with_status(JobStatus::Failed), 1);
    assert_eq!(snapshot.jobs_with_status(JobStatus::Succeeded), 9);
    assert_eq!(snapshot.errors_by_kind["timeout"], 3);
    assert_eq!(snapshot.compute_attempts, 12);

    assert_eq!(report.summary.succeeded, 9);
    assert_eq!(report.summary.failed, 1);
    assert_eq!(report.summary.failures_by_kind["timeout"], 1);
    assert!(report.summary.is_complete());
    assert!(!report.summary.cancelled);

    // Successes in between keep the breaker closed
    assert_eq!(orchestrator.breaker().state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_every_terminal_job_is_persisted_once() {
    let compute = Arc::new(FakeCompute::new().with_permanent(site(2)));
    let sink = Arc::new(MemorySink::new());
    let orchestrator = orchestrator(settings(4), compute, sink.clone(), ShutdownSignal::new());

    orchestrator.run(jobs(8)).await.unwrap();

    let outcomes = sink.outcomes();
    assert_eq!(outcomes.len(), 8);
    let rows: HashSet<usize> = outcomes.iter().map(|o| o.row_index).collect();
    assert_eq!(rows, (0..8).collect());

    let failed = outcomes.iter().find(|o| o.row_index == 2).unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.error_kind.as_deref(), Some("not_found"));
    assert!(failed.result.is_none());
    assert!(failed.error_message.as_deref().unwrap().contains("404"));
}

#[tokio::test(start_paused = true)]
async fn test_panicking_job_fails_without_stopping_the_worker() {
    let compute = Arc::new(FakeCompute::new().with_panic(site(1)));
    let sink = Arc::new(MemorySink::new());
    let orchestrator = orchestrator(settings(1), compute.clone(), sink.clone(), ShutdownSignal::new());

    let report = orchestrator.run(jobs(5)).await.unwrap();

    // The single worker carries on with the rest of the queue
    assert_eq!(compute.total_calls(), 5);
    assert_eq!(report.jobs[1].status, JobStatus::Failed);
    assert_eq!(report.jobs[1].error_kind.as_deref(), Some("panic"));
    assert!(report.jobs.iter().enumerate().all(|(i, j)| i == 1 || j.status == JobStatus::Succeeded));
    assert_eq!(report.summary.succeeded, 4);
    assert_eq!(report.summary.failed, 1);
    assert!(report.summary.is_complete());

    let outcomes = sink.outcomes();
    assert_eq!(outcomes.len(), 5);
    let crashed = outcomes.iter().find(|o| o.row_index == 1).unwrap();
    assert_eq!(crashed.status, JobStatus::Failed);
    assert!(crashed.error_message.as_deref().unwrap().contains("driver crashed"));

    let snapshot = orchestrator.metrics().snapshot();
    assert_eq!(snapshot.failures_by_kind["panic"], 1);
    assert_eq!(snapshot.errors_by_kind["panic"], 1);
    assert_eq!(orchestrator.breaker().state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_leaves_unstarted_jobs_pending() {
    let shutdown = ShutdownSignal::new();
    let compute = Arc::new(
        FakeCompute::new()
            .with_delay(Duration::from_millis(50))
            .with_shutdown_after(2, shutdown.clone()),
    );
    let sink = Arc::new(MemorySink::new());
    let orchestrator = orchestrator(settings(1), compute.clone(), sink.clone(), shutdown);

    let report = orchestrator.run(jobs(5)).await.unwrap();

    // The in-flight job finishes; nothing new starts
    assert_eq!(compute.total_calls(), 2);
    assert_eq!(report.jobs[0].status, JobStatus::Succeeded);
    assert_eq!(report.jobs[1].status, JobStatus::Succeeded);
    assert!(report.jobs[2..]
        .iter()
        .all(|j| j.status == JobStatus::Pending && j.attempt_count == 0));

    assert!(report.summary.cancelled);
    assert_eq!(report.summary.pending, 3);
    assert!(!report.summary.is_complete());
    assert_eq!(sink.len(), 2);
}

#[tokio::test]
async fn test_shutdown_before_run_starts_nothing() {
    let shutdown = ShutdownSignal::new();
    shutdown.trigger();
    let compute = Arc::new(FakeCompute::new());
    let orchestrator = orchestrator(settings(3), compute.clone(), Arc::new(MemorySink::new()), shutdown);

    let report = orchestrator.run(jobs(4)).await.unwrap();

    assert_eq!(compute.total_calls(), 0);
    assert_eq!(report.summary.pending, 4);
    assert!(report.summary.cancelled);
}

#[tokio::test(start_paused = true)]
async fn test_filter_skips_without_persisting() {
    let compute = Arc::new(FakeCompute::new());
    let sink = Arc::new(MemorySink::new());
    let mut config = settings(2);
    config.include_pattern = Some(r"site[0-4]\.".to_string());
    config.exclude_pattern = Some(r"site3\.".to_string());
    let orchestrator = orchestrator(config, compute.clone(), sink.clone(), ShutdownSignal::new());

    let report = orchestrator.run(jobs(10)).await.unwrap();

    assert_eq!(report.summary.succeeded, 4);
    assert_eq!(report.summary.skipped, 6);
    assert_eq!(report.jobs[3].status, JobStatus::Skipped);
    assert_eq!(compute.calls_for(&site(3)), 0);
    assert_eq!(compute.total_calls(), 4);
    assert_eq!(sink.len(), 4);
    assert_eq!(
        orchestrator.metrics().snapshot().jobs_with_status(JobStatus::Skipped),
        6
    );
}

#[tokio::test(start_paused = true)]
async fn test_more_workers_than_jobs() {
    let compute = Arc::new(FakeCompute::new());
    let orchestrator = orchestrator(settings(16), compute.clone(), Arc::new(MemorySink::new()), ShutdownSignal::new());

    let report = orchestrator.run(jobs(2)).await.unwrap();

    assert_eq!(report.summary.succeeded, 2);
    assert_eq!(compute.total_calls(), 2);
}
