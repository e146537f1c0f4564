//! Tests for the orchestrator module

use super::builder::LoadTestBuilder;
use crate::completion::RunPhase;
use crate::config::RunConfig;
use crate::error::LoadGenError;
use crate::mock::MockBroker;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn runner(broker: &Arc<MockBroker>, config: RunConfig) -> super::LoadTestRunner {
    LoadTestBuilder::new()
        .config(config)
        .connector(broker.connector())
        .flush_grace(Duration::from_millis(1))
        .close_grace(Duration::from_millis(200))
        .seed(11)
        .build()
        .unwrap()
}

fn workload(producers: usize, messages: u64, rate: u32, consumers: usize) -> RunConfig {
    RunConfig::default()
        .with_producers(producers)
        .with_messages(messages)
        .with_rate(rate)
        .with_consumers(consumers)
        .with_message_size(16)
}

// ============================================================================
// Builder
// ============================================================================

#[test]
fn test_builder_requires_connector() {
    let err = LoadTestBuilder::new().build().unwrap_err();
    assert!(matches!(err, LoadGenError::MissingConfig("connector")));
}

#[test]
fn test_builder_rejects_invalid_config() {
    let broker = MockBroker::new();
    let err = LoadTestBuilder::new()
        .config(RunConfig::default().with_rate(0))
        .connector(broker.connector())
        .build()
        .unwrap_err();

    assert!(matches!(err, LoadGenError::Config(_)));
    assert!(err.is_fatal_startup());
}

// ============================================================================
// Runs
// ============================================================================

#[tokio::test]
async fn test_producers_only_sends_everything() {
    let broker = MockBroker::new();
    let summary = runner(&broker, workload(3, 20, 1000, 0)).run().await.unwrap();

    assert_eq!(summary.outcome, RunPhase::Completed);
    assert_eq!(summary.totals.sent, 60);
    assert_eq!(summary.totals.consumed, 0);
    assert_eq!(summary.failed_workers, 0);
    assert_eq!(broker.connects.load(Ordering::SeqCst), 3);
    assert_eq!(broker.depth(), 60);
}

#[tokio::test]
async fn test_zero_producers_resolves_at_once() {
    let broker = MockBroker::new();
    let summary = tokio::time::timeout(
        Duration::from_secs(5),
        runner(&broker, workload(0, 100, 10, 2)).run(),
    )
    .await
    .expect("run with no producers should finish immediately")
    .unwrap();

    assert_eq!(summary.outcome, RunPhase::Completed);
    assert_eq!(summary.totals.sent, 0);
    assert_eq!(summary.expected_total, 0);
}

#[tokio::test]
async fn test_end_to_end_full_ack() {
    let broker = MockBroker::new();
    let summary = runner(&broker, workload(2, 100, 500, 1)).run().await.unwrap();

    assert_eq!(summary.outcome, RunPhase::Completed);
    assert_eq!(summary.totals.sent, 200);
    assert_eq!(summary.totals.consumed, 200);
    assert_eq!(summary.totals.acked, 200);
    assert_eq!(summary.totals.nacked, 0);
    assert!(summary.fully_consumed());
    assert!(summary.elapsed < summary_safety_timeout(2, 100, 500));
}

fn summary_safety_timeout(producers: usize, messages: u64, rate: u32) -> Duration {
    workload(producers, messages, rate, 1).safety_timeout()
}

#[tokio::test]
async fn test_end_to_end_mixed_ack_ratio() {
    let broker = MockBroker::new();
    let config = workload(2, 250, 1000, 2).with_ack_probability(50.0);
    let summary = runner(&broker, config).run().await.unwrap();

    let totals = summary.totals;
    assert_eq!(summary.outcome, RunPhase::Completed);
    assert_eq!(totals.sent, 500);
    assert!(totals.consumed >= 500);
    assert_eq!(totals.acked + totals.nacked, totals.consumed);
    let ratio = totals.ack_ratio();
    assert!((0.35..0.65).contains(&ratio), "ack ratio {}", ratio);
}

#[tokio::test]
async fn test_end_to_end_zero_ack() {
    let broker = MockBroker::new();
    let config = workload(1, 50, 1000, 1).with_ack_probability(0.0);
    let summary = runner(&broker, config).run().await.unwrap();

    assert_eq!(summary.outcome, RunPhase::Completed);
    assert_eq!(summary.totals.acked, 0);
    assert_eq!(summary.totals.nacked, summary.totals.consumed);
}

#[tokio::test(start_paused = true)]
async fn test_silent_consumer_hits_safety_timeout() {
    let broker = MockBroker::new();
    broker.black_hole.store(true, Ordering::SeqCst);
    let config = workload(1, 10, 100, 1);
    let timeout = config.safety_timeout();

    let start = tokio::time::Instant::now();
    let summary = runner(&broker, config).run().await.unwrap();

    assert_eq!(summary.outcome, RunPhase::TimedOut);
    assert_eq!(summary.totals.sent, 10);
    assert_eq!(summary.totals.consumed, 0);
    assert!(start.elapsed() >= timeout);
    // The idle consumer wakes on the phase change and closes cleanly.
    assert_eq!(summary.failed_workers, 0);
}

#[tokio::test(start_paused = true)]
async fn test_consumer_stuck_in_close_is_aborted() {
    let broker = MockBroker::new();
    broker.hang_on_close.store(true, Ordering::SeqCst);
    let summary = runner(&broker, workload(1, 5, 1000, 1)).run().await.unwrap();

    assert_eq!(summary.outcome, RunPhase::Completed);
    assert_eq!(summary.totals.consumed, 5);
    assert_eq!(summary.failed_workers, 1);
}

#[tokio::test]
async fn test_failing_producer_is_isolated() {
    let broker = MockBroker::new();
    broker.fail_send_every.store(4, Ordering::SeqCst);
    let summary = runner(&broker, workload(2, 30, 1000, 1)).run().await.unwrap();

    assert_eq!(summary.outcome, RunPhase::Completed);
    assert_eq!(summary.totals.sent, 60);
    assert!(summary.totals.send_errors > 0);
    assert_eq!(summary.totals.consumed, 60);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_broker_reports_failed_workers() {
    let broker = MockBroker::new();
    broker.refuse_connections.store(true, Ordering::SeqCst);
    let summary = runner(&broker, workload(2, 10, 100, 1)).run().await.unwrap();

    assert_eq!(summary.outcome, RunPhase::TimedOut);
    assert_eq!(summary.totals.sent, 0);
    assert_eq!(summary.totals.connection_errors, 3);
    assert_eq!(summary.failed_workers, 3);
}

#[tokio::test]
async fn test_shutdown_interrupts_run() {
    let broker = MockBroker::new();
    let runner = Arc::new(runner(&broker, workload(1, 10_000, 100, 1)));

    let background = Arc::clone(&runner);
    let task = tokio::spawn(async move { background.run().await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    runner.shutdown();

    let summary = task.await.unwrap().unwrap();
    assert_eq!(summary.outcome, RunPhase::Interrupted);
    assert!(summary.totals.sent < 10_000);
    assert!(summary.to_string().contains("interrupted"));
}

#[tokio::test]
async fn test_runner_is_single_use() {
    let broker = MockBroker::new();
    let runner = runner(&broker, workload(1, 1, 1000, 0));

    runner.run().await.unwrap();
    let err = runner.run().await.unwrap_err();
    assert!(matches!(err, LoadGenError::Orchestration(_)));
}
