//! LoadTestRunner execution logic

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use indicatif::ProgressBar;
use tokio::time::Instant;

use crate::completion::{CompletionCoordinator, CompletionState, RunPhase};
use crate::config::RunConfig;
use crate::error::{LoadGenError, LoadGenResult};
use crate::stats::AggregateStats;
use crate::traits::Connector;
use crate::worker::{WorkerBuilder, WorkerHandle, WorkerStats};

use super::summary::RunSummary;
use super::ticker::StatsTicker;

/// Runs one load test from spawn to summary
///
/// Responsible for spawning workers, driving the completion policy, and
/// collecting the final counters. A runner is single-use.
pub struct LoadTestRunner {
    config: Arc<RunConfig>,
    connector: Arc<dyn Connector>,
    stats: Arc<AggregateStats>,
    coordinator: CompletionCoordinator,
    progress: ProgressBar,
    tick_period: Duration,
    flush_grace: Duration,
    close_grace: Duration,
    seed: Option<u64>,
    started: AtomicBool,
}

impl LoadTestRunner {
    /// Create a new runner
    ///
    /// Use `LoadTestBuilder` for a more ergonomic construction; it also
    /// validates the configuration.
    pub fn new(
        config: RunConfig,
        connector: Arc<dyn Connector>,
        progress: ProgressBar,
        tick_period: Duration,
        flush_grace: Duration,
        close_grace: Duration,
        seed: Option<u64>,
    ) -> Self {
        let stats = Arc::new(AggregateStats::new());
        let state = CompletionState::new(Arc::clone(&stats), config.expected_total());
        let coordinator =
            CompletionCoordinator::new(state, config.consumers, config.safety_timeout());

        Self {
            config: Arc::new(config),
            connector,
            stats,
            coordinator,
            progress,
            tick_period,
            flush_grace,
            close_grace,
            seed,
            started: AtomicBool::new(false),
        }
    }

    /// Get the run configuration
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Live counters
    pub fn stats(&self) -> &Arc<AggregateStats> {
        &self.stats
    }

    /// Current run phase
    pub fn phase(&self) -> RunPhase {
        self.coordinator.phase()
    }

    /// Stop the run; workers close and a partial summary is produced
    pub fn shutdown(&self) {
        if self.coordinator.interrupt() {
            tracing::info!("Shutdown requested");
        }
    }

    /// Run the load test
    ///
    /// Spawns consumers then producers, waits for producers, applies the
    /// completion policy, and returns the summary. Per-worker failures never
    /// surface here; they show up in the counters.
    pub async fn run(&self) -> LoadGenResult<RunSummary> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(LoadGenError::orchestration("load test runner already used"));
        }

        let producer_count = self.config.producers;
        let consumer_count = self.config.consumers;
        let state = self.coordinator.state().clone();

        let consumers = (0..consumer_count)
            .map(|id| {
                self.worker(id, &state)
                    .seed(self.seed.map(|seed| seed.wrapping_add(id as u64)))
                    .build_consumer()
            })
            .collect::<LoadGenResult<Vec<_>>>()?;
        let producers = (0..producer_count)
            .map(|id| self.worker(id, &state).build_producer())
            .collect::<LoadGenResult<Vec<_>>>()?;

        tracing::info!(
            broker = %self.config.broker,
            transport = self.connector.transport_name(),
            producers = producer_count,
            consumers = consumer_count,
            messages = self.config.messages_per_producer,
            rate = self.config.rate,
            size = self.config.message_size,
            destination = %self.config.destination,
            ack_probability = self.config.ack_probability,
            "Starting load test"
        );

        let started_at = Utc::now();
        let start = Instant::now();
        let ticker = StatsTicker::spawn(
            Arc::clone(&self.stats),
            start,
            self.tick_period,
            self.progress.clone(),
        );

        let consumer_handles: Vec<_> = consumers
            .into_iter()
            .map(WorkerHandle::spawn_consumer)
            .collect();
        let producer_handles: Vec<_> = producers
            .into_iter()
            .map(WorkerHandle::spawn_producer)
            .collect();

        let mut finished: Vec<WorkerStats> = Vec::with_capacity(producer_count + consumer_count);
        for handle in producer_handles {
            if let Some(stats) = handle.join().await {
                finished.push(stats);
            }
        }

        let mut phase = self.coordinator.producers_finished();
        tracing::info!(
            sent = self.stats.sent(),
            elapsed_secs = start.elapsed().as_secs_f64(),
            %phase,
            "Producers finished"
        );

        if !phase.is_terminal() {
            tracing::debug!(
                timeout_secs = self.coordinator.safety_timeout().as_secs(),
                expected = self.config.expected_total(),
                "Waiting for consumers"
            );
            phase = self.coordinator.await_consumers().await;
        }

        for handle in consumer_handles {
            if let Some(stats) = handle.join_within(self.close_grace).await {
                finished.push(stats);
            }
        }

        ticker.stop();

        let elapsed = start.elapsed();
        let totals = self.stats.snapshot();
        tracing::info!(
            outcome = %phase,
            sent = totals.sent,
            consumed = totals.consumed,
            acked = totals.acked,
            nacked = totals.nacked,
            elapsed_secs = elapsed.as_secs_f64(),
            "Load test finished"
        );

        Ok(RunSummary::new(
            phase,
            started_at,
            elapsed,
            totals,
            self.config.expected_total(),
            &finished,
            (producer_count, consumer_count),
        ))
    }

    /// Run with Ctrl+C signal handling
    ///
    /// Ctrl+C moves the run to `Interrupted`; the partial summary is still
    /// returned.
    pub async fn run_with_signal_handling(&self) -> LoadGenResult<RunSummary> {
        let coordinator = self.coordinator.clone();

        let signal_handle = tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("Received Ctrl+C, closing connections...");
                    coordinator.interrupt();
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                }
            }
        });

        let result = self.run().await;

        signal_handle.abort();

        result
    }

    fn worker(&self, id: usize, state: &CompletionState) -> WorkerBuilder {
        WorkerBuilder::new(id)
            .connector(Arc::clone(&self.connector))
            .config(Arc::clone(&self.config))
            .completion(state.clone())
            .flush_grace(self.flush_grace)
    }
}

impl std::fmt::Debug for LoadTestRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadTestRunner")
            .field("config", &self.config)
            .field("transport", &self.connector.transport_name())
            .field("phase", &self.phase())
            .finish()
    }
}
