//! Consumer worker: receive until the run completes, settle stochastically

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::watch;

use crate::completion::{CompletionState, RunPhase};
use crate::config::RunConfig;
use crate::traits::{Connection, Connector, Delivery, MessageReceiver, Outcome, ReceiverOptions};

use super::stats::{WorkerRole, WorkerStats};

/// Accept when a uniform roll in `[0, 100)` is at most `ack_probability`
pub fn decide_outcome(roll: f64, ack_probability: f64) -> Outcome {
    if roll <= ack_probability {
        Outcome::Accepted
    } else {
        Outcome::Released
    }
}

/// Receives messages and accepts or releases each one at random
///
/// Consumers compete for the same destination, so completion is judged
/// against the run-wide expected total rather than a per-consumer quota.
/// A consumer whose connection fails logs the error and then waits for
/// the run to end (normally via the safety timeout).
pub struct ConsumerWorker {
    id: usize,
    connector: Arc<dyn Connector>,
    config: Arc<RunConfig>,
    completion: CompletionState,
    rng: StdRng,
}

impl ConsumerWorker {
    /// Create a consumer
    ///
    /// `seed` fixes the accept/release sequence; `None` seeds from entropy.
    pub fn new(
        id: usize,
        connector: Arc<dyn Connector>,
        config: Arc<RunConfig>,
        completion: CompletionState,
        seed: Option<u64>,
    ) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            id,
            connector,
            config,
            completion,
            rng,
        }
    }

    /// Get the worker ID
    pub fn id(&self) -> usize {
        self.id
    }

    /// Run until the run reaches a terminal phase
    pub async fn run(mut self) -> WorkerStats {
        let mut stats = WorkerStats::new(self.id, WorkerRole::Consumer);
        stats.start();

        tracing::debug!(worker_id = self.id, "Consumer started");

        let mut connection = match self.connector.connect().await {
            Ok(connection) => connection,
            Err(e) => {
                tracing::error!(worker_id = self.id, error = %e, "Consumer connection failed");
                self.completion.stats().record_connection_error();
                return self.stall(stats).await;
            }
        };
        stats.connected = true;

        let destination = self.config.destination.clone();
        match connection
            .open_receiver(&destination, ReceiverOptions::manual_ack())
            .await
        {
            Ok(mut receiver) => {
                self.consume(receiver.as_mut(), &mut stats).await;
                if let Err(e) = receiver.close().await {
                    tracing::debug!(worker_id = self.id, error = %e, "Receiver close failed");
                }
                self.close(connection.as_mut()).await;
            }
            Err(e) => {
                tracing::error!(worker_id = self.id, error = %e, "Failed to open receiver");
                self.completion.stats().record_connection_error();
                self.close(connection.as_mut()).await;
                return self.stall(stats).await;
            }
        }

        stats.stop();
        tracing::debug!(
            worker_id = self.id,
            consumed = stats.processed,
            accepted = stats.accepted,
            released = stats.released,
            "Consumer finished"
        );

        stats
    }

    /// Receive and settle until the run is complete
    async fn consume(&mut self, receiver: &mut dyn MessageReceiver, stats: &mut WorkerStats) {
        let mut phase: watch::Receiver<RunPhase> = self.completion.subscribe();

        loop {
            if self.completion.try_complete() {
                break;
            }

            tokio::select! {
                biased;

                changed = phase.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }

                next = receiver.recv() => match next {
                    Some(Ok(delivery)) => self.handle(delivery, stats).await,
                    Some(Err(e)) => {
                        tracing::error!(worker_id = self.id, error = %e, "Receiver error");
                        self.completion.stats().record_connection_error();
                        self.completion.wait_terminal().await;
                        break;
                    }
                    None => {
                        tracing::warn!(worker_id = self.id, "Receiver closed before the run completed");
                        self.completion.wait_terminal().await;
                        break;
                    }
                },
            }
        }
    }

    /// Count, decide, settle
    ///
    /// Counters are bumped before the settle signal, and a failed signal does
    /// not roll them back.
    async fn handle(&mut self, delivery: Delivery, stats: &mut WorkerStats) {
        let aggregate = self.completion.stats();
        aggregate.record_consumed();
        stats.record_processed();

        let roll: f64 = self.rng.gen_range(0.0..100.0);
        let outcome = decide_outcome(roll, self.config.ack_probability);
        match outcome {
            Outcome::Accepted => aggregate.record_acked(),
            Outcome::Released => aggregate.record_nacked(),
        }
        stats.record_outcome(outcome);

        if let Err(e) = delivery.settle(outcome).await {
            tracing::warn!(worker_id = self.id, error = %e, ?outcome, "Settle failed");
            aggregate.record_settle_error();
            stats.record_error();
        }
    }

    /// Park a failed consumer until the run ends
    async fn stall(&self, mut stats: WorkerStats) -> WorkerStats {
        let phase = self.completion.wait_terminal().await;
        stats.stop();
        tracing::debug!(worker_id = self.id, %phase, "Failed consumer released");
        stats
    }

    async fn close(&self, connection: &mut dyn Connection) {
        if let Err(e) = connection.close().await {
            tracing::debug!(worker_id = self.id, error = %e, "Connection close failed");
        }
    }
}

impl std::fmt::Debug for ConsumerWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerWorker")
            .field("id", &self.id)
            .field("transport", &self.connector.transport_name())
            .field("destination", &self.config.destination)
            .field("ack_probability", &self.config.ack_probability)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decide_outcome_bounds() {
        assert_eq!(decide_outcome(0.0, 0.0), Outcome::Accepted);
        assert_eq!(decide_outcome(0.1, 0.0), Outcome::Released);
        assert_eq!(decide_outcome(99.99, 100.0), Outcome::Accepted);
        assert_eq!(decide_outcome(50.0, 50.0), Outcome::Accepted);
        assert_eq!(decide_outcome(50.01, 50.0), Outcome::Released);
    }

    #[test]
    fn test_decide_outcome_converges() {
        let mut rng = StdRng::seed_from_u64(7);
        let trials = 20_000;
        let accepted = (0..trials)
            .filter(|_| decide_outcome(rng.gen_range(0.0..100.0), 30.0) == Outcome::Accepted)
            .count();
        let ratio = accepted as f64 / trials as f64;
        assert!((ratio - 0.30).abs() < 0.02, "ratio {}", ratio);
    }
}
