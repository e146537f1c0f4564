//! Live status line refreshed while a run is in progress

use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::stats::{AggregateStats, StatsSnapshot};

/// Default refresh period of the status line
pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_secs(1);

/// Render the one-line run status
///
/// ```
/// use loadgen_core::orchestrator::status_line;
/// use loadgen_core::StatsSnapshot;
/// use std::time::Duration;
///
/// let snapshot = StatsSnapshot { sent: 200, consumed: 150, acked: 140, nacked: 10, ..Default::default() };
/// let line = status_line(&snapshot, Duration::from_secs(2));
/// assert_eq!(
///     line,
///     "Sent: 200 msgs - 100.00 msg/s | Consumed: 150 - 75.00 msg/s - a:140 n:10 - elapsed 2.0s"
/// );
/// ```
pub fn status_line(snapshot: &StatsSnapshot, elapsed: Duration) -> String {
    let rates = snapshot.throughput(elapsed);
    format!(
        "Sent: {} msgs - {:.2} msg/s | Consumed: {} - {:.2} msg/s - a:{} n:{} - elapsed {:.1}s",
        snapshot.sent,
        rates.sent_per_sec,
        snapshot.consumed,
        rates.consumed_per_sec,
        snapshot.acked,
        snapshot.nacked,
        elapsed.as_secs_f64()
    )
}

/// Spinner used for the status line
pub fn spinner() -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    bar
}

/// Background task that samples the counters and redraws the status line
#[derive(Debug)]
pub struct StatsTicker {
    task: JoinHandle<()>,
    bar: ProgressBar,
}

impl StatsTicker {
    /// Start ticking every `period`
    pub fn spawn(
        stats: Arc<AggregateStats>,
        started: Instant,
        period: Duration,
        bar: ProgressBar,
    ) -> Self {
        let target = bar.clone();
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // First tick completes immediately.
            interval.tick().await;

            loop {
                interval.tick().await;
                let line = status_line(&stats.snapshot(), started.elapsed());
                tracing::trace!(status = %line, "tick");
                target.set_message(line);
                target.tick();
            }
        });

        Self { task, bar }
    }

    /// Stop ticking and clear the line
    pub fn stop(self) {
        self.task.abort();
        self.bar.finish_and_clear();
    }
}
