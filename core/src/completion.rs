//! Run completion detection
//!
//! The run moves through a small, monotonic state machine:
//!
//! ```text
//! Running ──producers done──▶ ProducersDone ──consumed ≥ expected──▶ Completed
//!    │                             │
//!    │                             └──safety timeout──▶ TimedOut
//!    └──────────── Ctrl+C (any non-terminal phase) ──▶ Interrupted
//! ```
//!
//! The phase lives in a `tokio::sync::watch` channel, so workers await phase
//! changes instead of polling a shared flag. A terminal phase doubles as the
//! signal for every worker to close its connection.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::stats::AggregateStats;

/// Minimum time the run waits for consumers after producers finish
pub const SAFETY_TIMEOUT_FLOOR: Duration = Duration::from_secs(30);

/// Slack added on top of the theoretical production time
pub const SAFETY_TIMEOUT_SLACK: Duration = Duration::from_secs(20);

/// Phase of a load-test run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// Producers are still sending
    Running,
    /// Every producer has resolved; consumers may still be draining
    ProducersDone,
    /// All expected messages were consumed (or there were no consumers)
    Completed,
    /// Consumers did not drain before the safety timeout
    TimedOut,
    /// Stopped by the user
    Interrupted,
}

impl RunPhase {
    /// Whether the run is over and workers should close
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunPhase::Completed | RunPhase::TimedOut | RunPhase::Interrupted
        )
    }

    /// Display name
    pub fn as_str(&self) -> &'static str {
        match self {
            RunPhase::Running => "running",
            RunPhase::ProducersDone => "producers_done",
            RunPhase::Completed => "completed",
            RunPhase::TimedOut => "timed_out",
            RunPhase::Interrupted => "interrupted",
        }
    }
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared view of run progress handed to every worker
///
/// Cloning is cheap; all clones observe and drive the same phase.
#[derive(Debug, Clone)]
pub struct CompletionState {
    phase: Arc<watch::Sender<RunPhase>>,
    stats: Arc<AggregateStats>,
    expected_total: u64,
}

impl CompletionState {
    /// Create a state in the `Running` phase
    pub fn new(stats: Arc<AggregateStats>, expected_total: u64) -> Self {
        let (tx, _) = watch::channel(RunPhase::Running);
        Self {
            phase: Arc::new(tx),
            stats,
            expected_total,
        }
    }

    /// Current phase
    pub fn phase(&self) -> RunPhase {
        *self.phase.borrow()
    }

    /// Receiver notified on every phase change
    pub fn subscribe(&self) -> watch::Receiver<RunPhase> {
        self.phase.subscribe()
    }

    /// Live counters
    pub fn stats(&self) -> &Arc<AggregateStats> {
        &self.stats
    }

    /// Messages the run expects consumers to receive
    pub fn expected_total(&self) -> u64 {
        self.expected_total
    }

    /// Whether every producer has resolved
    pub fn producers_done(&self) -> bool {
        self.phase() != RunPhase::Running
    }

    /// Producers are done and consumers have received everything expected
    pub fn is_satisfied(&self) -> bool {
        self.producers_done() && self.stats.consumed() >= self.expected_total
    }

    /// Move to `Completed` if the consumer condition holds
    ///
    /// Returns `true` when the run is in a terminal phase afterwards, i.e.
    /// the caller should stop.
    pub fn try_complete(&self) -> bool {
        if self.is_satisfied() {
            self.transition(|p| p == RunPhase::ProducersDone, RunPhase::Completed);
        }
        self.phase().is_terminal()
    }

    /// Wait until the run reaches a terminal phase
    pub async fn wait_terminal(&self) -> RunPhase {
        let mut rx = self.phase.subscribe();
        // The sender lives inside `self`, so the channel cannot close here.
        let phase = match rx.wait_for(RunPhase::is_terminal).await {
            Ok(phase) => *phase,
            Err(_) => self.phase(),
        };
        phase
    }

    /// Apply `to` if the current phase satisfies `from`; returns whether it changed
    fn transition(&self, from: impl Fn(RunPhase) -> bool, to: RunPhase) -> bool {
        self.phase.send_if_modified(|phase| {
            if from(*phase) {
                *phase = to;
                true
            } else {
                false
            }
        })
    }
}

/// Decides when the run may stop waiting on consumers
#[derive(Debug, Clone)]
pub struct CompletionCoordinator {
    state: CompletionState,
    consumers: usize,
    safety_timeout: Duration,
}

impl CompletionCoordinator {
    /// Create a coordinator for a run with `consumers` consumer workers
    pub fn new(state: CompletionState, consumers: usize, safety_timeout: Duration) -> Self {
        Self {
            state,
            consumers,
            safety_timeout,
        }
    }

    /// Shared state for workers
    pub fn state(&self) -> &CompletionState {
        &self.state
    }

    /// Current phase
    pub fn phase(&self) -> RunPhase {
        self.state.phase()
    }

    /// Configured safety timeout
    pub fn safety_timeout(&self) -> Duration {
        self.safety_timeout
    }

    /// Record that every producer has resolved
    ///
    /// With no consumers the run completes immediately. Otherwise the run
    /// completes right away only if consumers already drained everything.
    pub fn producers_finished(&self) -> RunPhase {
        self.state
            .transition(|p| p == RunPhase::Running, RunPhase::ProducersDone);

        if self.consumers == 0 {
            self.state
                .transition(|p| p == RunPhase::ProducersDone, RunPhase::Completed);
        } else {
            self.state.try_complete();
        }

        self.state.phase()
    }

    /// Wait for consumers to drain, bounded by the safety timeout
    ///
    /// Returns the terminal phase the run ended in.
    pub async fn await_consumers(&self) -> RunPhase {
        if self.phase().is_terminal() {
            return self.phase();
        }

        match tokio::time::timeout(self.safety_timeout, self.state.wait_terminal()).await {
            Ok(phase) => phase,
            Err(_) => {
                let snapshot = self.state.stats().snapshot();
                tracing::warn!(
                    timeout_secs = self.safety_timeout.as_secs(),
                    consumed = snapshot.consumed,
                    expected = self.state.expected_total(),
                    "Safety timeout reached before consumers drained"
                );
                self.state
                    .transition(|p| !p.is_terminal(), RunPhase::TimedOut);
                self.phase()
            }
        }
    }

    /// Stop the run from outside (Ctrl+C); returns whether the phase changed
    pub fn interrupt(&self) -> bool {
        self.state
            .transition(|p| !p.is_terminal(), RunPhase::Interrupted)
    }
}

/// Safety timeout for a run
///
/// `max(30s, ceil(expected / (rate * producers))s + 20s)`. The production
/// term assumes consumption is gated by production alone, so with several
/// consumers on one destination this is a floor rather than a tight bound.
pub fn safety_timeout(expected_total: u64, rate: u32, producers: usize) -> Duration {
    let offered = u64::from(rate).saturating_mul(producers as u64).max(1);
    let production_secs = expected_total.div_ceil(offered);
    let bound = Duration::from_secs(production_secs).saturating_add(SAFETY_TIMEOUT_SLACK);
    bound.max(SAFETY_TIMEOUT_FLOOR)
}
