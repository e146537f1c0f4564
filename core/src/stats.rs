//! Run-wide delivery counters shared by every worker
//!
//! Many writers (P producers + C consumers), few readers (the ticker and the
//! completion check). Each counter is an independent atomic, so increments
//! are linearized per counter while a [`StatsSnapshot`] across counters is
//! only approximately consistent.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Live counters for a run
#[derive(Debug, Default)]
pub struct AggregateStats {
    sent: AtomicU64,
    consumed: AtomicU64,
    acked: AtomicU64,
    nacked: AtomicU64,
    send_errors: AtomicU64,
    settle_errors: AtomicU64,
    connection_errors: AtomicU64,
}

impl AggregateStats {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// A message was handed to the transport
    pub fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    /// A delivery was received; returns the new consumed total
    pub fn record_consumed(&self) -> u64 {
        self.consumed.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// A delivery was accepted
    pub fn record_acked(&self) {
        self.acked.fetch_add(1, Ordering::Relaxed);
    }

    /// A delivery was released
    pub fn record_nacked(&self) {
        self.nacked.fetch_add(1, Ordering::Relaxed);
    }

    /// A send attempt failed
    pub fn record_send_error(&self) {
        self.send_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// An accept/release signal failed
    pub fn record_settle_error(&self) {
        self.settle_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// A worker lost (or never got) its connection
    pub fn record_connection_error(&self) {
        self.connection_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Messages sent so far
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Deliveries received so far
    pub fn consumed(&self) -> u64 {
        self.consumed.load(Ordering::Acquire)
    }

    /// Read every counter
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            sent: self.sent.load(Ordering::Relaxed),
            consumed: self.consumed.load(Ordering::Acquire),
            acked: self.acked.load(Ordering::Relaxed),
            nacked: self.nacked.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            settle_errors: self.settle_errors.load(Ordering::Relaxed),
            connection_errors: self.connection_errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`AggregateStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Messages sent
    pub sent: u64,
    /// Deliveries received
    pub consumed: u64,
    /// Deliveries accepted
    pub acked: u64,
    /// Deliveries released
    pub nacked: u64,
    /// Failed send attempts
    pub send_errors: u64,
    /// Failed accept/release signals
    pub settle_errors: u64,
    /// Workers that lost their connection
    pub connection_errors: u64,
}

impl StatsSnapshot {
    /// Deliveries with a recorded outcome (`acked + nacked`)
    pub fn settled(&self) -> u64 {
        self.acked + self.nacked
    }

    /// Fraction of consumed deliveries that were accepted (0.0 - 1.0)
    pub fn ack_ratio(&self) -> f64 {
        if self.consumed == 0 {
            0.0
        } else {
            self.acked as f64 / self.consumed as f64
        }
    }

    /// Average throughput over `elapsed`
    ///
    /// The divisor is floored at one second so the first ticks of a run do
    /// not report inflated rates.
    pub fn throughput(&self, elapsed: Duration) -> Throughput {
        let secs = elapsed.as_secs_f64().max(1.0);
        Throughput {
            sent_per_sec: self.sent as f64 / secs,
            consumed_per_sec: self.consumed as f64 / secs,
        }
    }
}

/// Messages per second derived from a snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Throughput {
    /// Send rate
    pub sent_per_sec: f64,
    /// Consume rate
    pub consumed_per_sec: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_stats_defaults() {
        let stats = AggregateStats::new();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn test_record_consumed_returns_total() {
        let stats = AggregateStats::new();
        assert_eq!(stats.record_consumed(), 1);
        assert_eq!(stats.record_consumed(), 2);
        assert_eq!(stats.consumed(), 2);
    }

    #[test]
    fn test_snapshot_counts() {
        let stats = AggregateStats::new();
        stats.record_sent();
        stats.record_sent();
        stats.record_consumed();
        stats.record_acked();
        stats.record_consumed();
        stats.record_nacked();
        stats.record_send_error();
        stats.record_settle_error();
        stats.record_connection_error();

        let snap = stats.snapshot();
        assert_eq!(snap.sent, 2);
        assert_eq!(snap.consumed, 2);
        assert_eq!(snap.acked, 1);
        assert_eq!(snap.nacked, 1);
        assert_eq!(snap.settled(), 2);
        assert_eq!(snap.send_errors, 1);
        assert_eq!(snap.settle_errors, 1);
        assert_eq!(snap.connection_errors, 1);
        assert!((snap.ack_ratio() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let stats = Arc::new(AggregateStats::new());
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let stats = Arc::clone(&stats);
                std::thread::spawn(move || {
                    for _ in 0..10_000 {
                        stats.record_sent();
                        stats.record_consumed();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        let snap = stats.snapshot();
        assert_eq!(snap.sent, 80_000);
        assert_eq!(snap.consumed, 80_000);
    }

    #[test]
    fn test_throughput() {
        let snap = StatsSnapshot {
            sent: 200,
            consumed: 100,
            ..Default::default()
        };
        let tp = snap.throughput(Duration::from_secs(4));
        assert!((tp.sent_per_sec - 50.0).abs() < 1e-9);
        assert!((tp.consumed_per_sec - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_throughput_floors_elapsed_at_one_second() {
        let snap = StatsSnapshot {
            sent: 10,
            ..Default::default()
        };
        let tp = snap.throughput(Duration::from_millis(100));
        assert!((tp.sent_per_sec - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_ack_ratio_empty() {
        assert_eq!(StatsSnapshot::default().ack_ratio(), 0.0);
    }
}
