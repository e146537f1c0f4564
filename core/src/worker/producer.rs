//! Producer worker: connect, send N paced messages, flush, close

use std::sync::Arc;
use std::time::Duration;

use crate::completion::{CompletionState, RunPhase};
use crate::config::RunConfig;
use crate::message::Message;
use crate::traits::{Connection, Connector, MessageSender};

use super::rate_limiter::RateLimiter;
use super::stats::{WorkerRole, WorkerStats};

/// Pause after the last send so buffered frames reach the broker before close
pub const DEFAULT_FLUSH_GRACE: Duration = Duration::from_millis(200);

/// How the send loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendLoopEnd {
    /// All N messages sent
    Finished,
    /// The run reached a terminal phase first
    Stopped,
    /// The link closed underneath us
    LinkLost,
}

/// Sends a fixed number of messages at a paced rate over its own connection
///
/// A producer always resolves: connection failures are logged and end only
/// this worker, so one bad connection never halts measurement of the rest.
pub struct ProducerWorker {
    id: usize,
    connector: Arc<dyn Connector>,
    config: Arc<RunConfig>,
    completion: CompletionState,
    flush_grace: Duration,
}

impl ProducerWorker {
    /// Create a producer
    ///
    /// Use [`WorkerBuilder`](super::WorkerBuilder) for a more ergonomic construction.
    pub fn new(
        id: usize,
        connector: Arc<dyn Connector>,
        config: Arc<RunConfig>,
        completion: CompletionState,
        flush_grace: Duration,
    ) -> Self {
        Self {
            id,
            connector,
            config,
            completion,
            flush_grace,
        }
    }

    /// Get the worker ID
    pub fn id(&self) -> usize {
        self.id
    }

    /// Run the producer to completion
    pub async fn run(self) -> WorkerStats {
        let mut stats = WorkerStats::new(self.id, WorkerRole::Producer);
        stats.start();

        tracing::debug!(worker_id = self.id, "Producer started");

        let mut connection = match self.connector.connect().await {
            Ok(connection) => connection,
            Err(e) => {
                tracing::error!(worker_id = self.id, error = %e, "Producer connection failed");
                self.completion.stats().record_connection_error();
                stats.stop();
                return stats;
            }
        };
        stats.connected = true;

        match connection.open_sender(&self.config.destination).await {
            Ok(mut sender) => {
                let end = self.send_all(sender.as_mut(), &mut stats).await;
                if end == SendLoopEnd::Finished && self.config.messages_per_producer > 0 {
                    tokio::time::sleep(self.flush_grace).await;
                }
                if let Err(e) = sender.close().await {
                    tracing::debug!(worker_id = self.id, error = %e, "Sender close failed");
                }
            }
            Err(e) => {
                tracing::error!(worker_id = self.id, error = %e, "Failed to open sender");
                self.completion.stats().record_connection_error();
            }
        }

        self.close(connection.as_mut()).await;

        stats.stop();
        tracing::debug!(
            worker_id = self.id,
            sent = stats.processed,
            errors = stats.errors,
            elapsed_ms = ?stats.elapsed().map(|d| d.as_millis()),
            rate = %format!("{:.1}", stats.rate_per_second()),
            "Producer finished"
        );

        stats
    }

    /// Pace sends until N messages went out, the link dies, or the run ends
    async fn send_all(&self, sender: &mut dyn MessageSender, stats: &mut WorkerStats) -> SendLoopEnd {
        let target = self.config.messages_per_producer;
        if target == 0 {
            return SendLoopEnd::Finished;
        }

        let aggregate = self.completion.stats();
        let limiter = RateLimiter::new(self.config.rate);
        let mut phase_rx = self.completion.subscribe();
        let mut sent = 0u64;

        while sent < target {
            tokio::select! {
                biased;

                terminal = phase_rx.wait_for(RunPhase::is_terminal) => {
                    let phase = terminal.map(|p| *p).unwrap_or_else(|_| self.completion.phase());
                    tracing::debug!(worker_id = self.id, %phase, sent, "Producer stopping early");
                    limiter.stop();
                    return SendLoopEnd::Stopped;
                }

                fired = limiter.tick() => {
                    if !fired {
                        break;
                    }
                }
            }

            let message = Message::filler(self.config.message_size, self.id, sent);
            match sender.send(message).await {
                Ok(()) => {
                    sent += 1;
                    stats.record_processed();
                    aggregate.record_sent();
                }
                Err(e) if e.is_terminal() => {
                    tracing::error!(worker_id = self.id, error = %e, sent, "Sender lost, producer giving up");
                    stats.record_error();
                    aggregate.record_send_error();
                    aggregate.record_connection_error();
                    limiter.stop();
                    return SendLoopEnd::LinkLost;
                }
                Err(e) => {
                    // Not retried; the next tick sends a fresh message.
                    tracing::warn!(worker_id = self.id, error = %e, "Send failed");
                    stats.record_error();
                    aggregate.record_send_error();
                }
            }
        }

        limiter.stop();
        SendLoopEnd::Finished
    }

    async fn close(&self, connection: &mut dyn Connection) {
        if let Err(e) = connection.close().await {
            tracing::debug!(worker_id = self.id, error = %e, "Connection close failed");
        }
    }
}

impl std::fmt::Debug for ProducerWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerWorker")
            .field("id", &self.id)
            .field("transport", &self.connector.transport_name())
            .field("messages", &self.config.messages_per_producer)
            .field("rate", &self.config.rate)
            .finish()
    }
}
