//! Worker statistics tracking

use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::traits::Outcome;

/// What a worker does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerRole {
    /// Sends messages
    Producer,
    /// Receives and settles messages
    Consumer,
}

impl std::fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerRole::Producer => f.write_str("producer"),
            WorkerRole::Consumer => f.write_str("consumer"),
        }
    }
}

/// Statistics tracked by each worker
///
/// Local to one worker; the run-wide totals live in
/// [`AggregateStats`](crate::stats::AggregateStats).
#[derive(Debug, Clone)]
pub struct WorkerStats {
    /// Worker identifier
    pub worker_id: usize,

    /// Producer or consumer
    pub role: WorkerRole,

    /// Messages sent (producer) or received (consumer)
    pub processed: u64,

    /// Deliveries accepted (consumer only)
    pub accepted: u64,

    /// Deliveries released (consumer only)
    pub released: u64,

    /// Failed sends or settlements
    pub errors: u64,

    /// Whether the worker ever reached an open connection
    pub connected: bool,

    /// Worker start time
    pub started_at: Option<Instant>,

    /// Worker end time
    pub ended_at: Option<Instant>,
}

impl WorkerStats {
    /// Create new empty stats
    pub fn new(worker_id: usize, role: WorkerRole) -> Self {
        Self {
            worker_id,
            role,
            processed: 0,
            accepted: 0,
            released: 0,
            errors: 0,
            connected: false,
            started_at: None,
            ended_at: None,
        }
    }

    /// Start tracking (records start time)
    pub fn start(&mut self) {
        self.started_at = Some(Instant::now());
    }

    /// Stop tracking (records end time)
    pub fn stop(&mut self) {
        self.ended_at = Some(Instant::now());
    }

    /// Record a successful send or receive
    pub fn record_processed(&mut self) {
        self.processed += 1;
    }

    /// Record the settlement decision for a delivery
    pub fn record_outcome(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Accepted => self.accepted += 1,
            Outcome::Released => self.released += 1,
        }
    }

    /// Record a failed send or settlement
    pub fn record_error(&mut self) {
        self.errors += 1;
    }

    /// Get elapsed time since start
    pub fn elapsed(&self) -> Option<std::time::Duration> {
        self.started_at.map(|start| {
            self.ended_at
                .map(|end| end.duration_since(start))
                .unwrap_or_else(|| start.elapsed())
        })
    }

    /// Messages per second processed by this worker
    pub fn rate_per_second(&self) -> f64 {
        self.elapsed()
            .map(|d| {
                let secs = d.as_secs_f64();
                if secs > 0.0 {
                    self.processed as f64 / secs
                } else {
                    0.0
                }
            })
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_stats_defaults() {
        let stats = WorkerStats::new(3, WorkerRole::Consumer);
        assert_eq!(stats.worker_id, 3);
        assert_eq!(stats.processed, 0);
        assert_eq!(stats.errors, 0);
        assert!(!stats.connected);
        assert!(stats.started_at.is_none());
        assert!(stats.elapsed().is_none());
        assert_eq!(stats.rate_per_second(), 0.0);
    }

    #[test]
    fn test_record_outcome() {
        let mut stats = WorkerStats::new(0, WorkerRole::Consumer);
        stats.record_processed();
        stats.record_outcome(Outcome::Accepted);
        stats.record_processed();
        stats.record_outcome(Outcome::Released);
        stats.record_error();

        assert_eq!(stats.processed, 2);
        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.released, 1);
        assert_eq!(stats.errors, 1);
    }

    #[test]
    fn test_worker_stats_start_stop() {
        let mut stats = WorkerStats::new(0, WorkerRole::Producer);
        stats.start();
        std::thread::sleep(std::time::Duration::from_millis(10));
        stats.stop();

        let elapsed = stats.elapsed().unwrap();
        assert!(elapsed >= std::time::Duration::from_millis(10));
    }

    #[test]
    fn test_role_display() {
        assert_eq!(WorkerRole::Producer.to_string(), "producer");
        assert_eq!(WorkerRole::Consumer.to_string(), "consumer");
    }
}
