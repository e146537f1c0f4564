//! Final run report

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::completion::RunPhase;
use crate::stats::{StatsSnapshot, Throughput};
use crate::worker::WorkerStats;

/// What a run did, built once every worker has stopped
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Terminal phase of the run
    pub outcome: RunPhase,

    /// Wall-clock start
    pub started_at: DateTime<Utc>,

    /// Run duration
    #[serde(serialize_with = "serialize_secs")]
    pub elapsed: Duration,

    /// Final counter values
    pub totals: StatsSnapshot,

    /// Messages the run set out to move
    pub expected_total: u64,

    /// Producer count
    pub producers: usize,

    /// Consumer count
    pub consumers: usize,

    /// Workers that never connected, panicked, or had to be aborted
    pub failed_workers: usize,

    /// Average rates over the whole run
    pub throughput: Throughput,
}

impl RunSummary {
    /// Build a summary from final counters and whatever worker stats came back
    pub fn new(
        outcome: RunPhase,
        started_at: DateTime<Utc>,
        elapsed: Duration,
        totals: StatsSnapshot,
        expected_total: u64,
        workers: &[WorkerStats],
        spawned: (usize, usize),
    ) -> Self {
        let (producers, consumers) = spawned;
        let healthy = workers.iter().filter(|w| w.connected).count();

        Self {
            outcome,
            started_at,
            elapsed,
            totals,
            expected_total,
            producers,
            consumers,
            failed_workers: (producers + consumers).saturating_sub(healthy),
            throughput: totals.throughput(elapsed),
        }
    }

    /// Whether consumers received everything that was sent
    pub fn fully_consumed(&self) -> bool {
        self.consumers > 0 && self.totals.consumed >= self.expected_total
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.elapsed.as_secs_f64();
        writeln!(f, "Load test {}.", self.outcome_label())?;
        write!(
            f,
            "Total sent: {} messages in {:.2}s - avg {:.2} msg/s",
            self.totals.sent, secs, self.throughput.sent_per_sec
        )?;
        if self.consumers > 0 {
            write!(
                f,
                "\nTotal consumed: {} (acked: {}, nacked/released: {}) - avg {:.2} msg/s",
                self.totals.consumed,
                self.totals.acked,
                self.totals.nacked,
                self.throughput.consumed_per_sec
            )?;
        }
        if self.totals.send_errors > 0 || self.totals.settle_errors > 0 {
            write!(
                f,
                "\nErrors: {} send, {} settle",
                self.totals.send_errors, self.totals.settle_errors
            )?;
        }
        if self.failed_workers > 0 {
            write!(
                f,
                "\nFailed workers: {} of {}",
                self.failed_workers,
                self.producers + self.consumers
            )?;
        }
        Ok(())
    }
}

impl RunSummary {
    fn outcome_label(&self) -> &'static str {
        match self.outcome {
            RunPhase::Completed => "complete",
            RunPhase::TimedOut => "stopped by safety timeout",
            RunPhase::Interrupted => "interrupted",
            RunPhase::Running | RunPhase::ProducersDone => "ended early",
        }
    }
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}
