//! Builder pattern for LoadTestRunner construction

use std::sync::Arc;
use std::time::Duration;

use indicatif::ProgressBar;

use crate::config::RunConfig;
use crate::error::{LoadGenError, LoadGenResult};
use crate::traits::Connector;
use crate::worker::DEFAULT_FLUSH_GRACE;

use super::executor::LoadTestRunner;
use super::ticker::DEFAULT_TICK_PERIOD;

/// How long terminal-phase workers get to close before they are aborted
pub const DEFAULT_CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Builder for creating a LoadTestRunner with proper configuration
///
/// # Example
///
/// ```ignore
/// let runner = LoadTestBuilder::new()
///     .config(config)
///     .connector(connector)
///     .progress(ticker::spinner())
///     .build()?;
///
/// let summary = runner.run_with_signal_handling().await?;
/// ```
pub struct LoadTestBuilder {
    config: RunConfig,
    connector: Option<Arc<dyn Connector>>,
    tick_period: Duration,
    progress: Option<ProgressBar>,
    flush_grace: Duration,
    close_grace: Duration,
    seed: Option<u64>,
}

impl LoadTestBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: RunConfig::default(),
            connector: None,
            tick_period: DEFAULT_TICK_PERIOD,
            progress: None,
            flush_grace: DEFAULT_FLUSH_GRACE,
            close_grace: DEFAULT_CLOSE_GRACE,
            seed: None,
        }
    }

    /// Set the full run configuration
    pub fn config(mut self, config: RunConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the connector every worker connects through
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Set the status line refresh period
    pub fn tick_period(mut self, period: Duration) -> Self {
        self.tick_period = period;
        self
    }

    /// Draw the live status line on this bar (hidden when unset)
    pub fn progress(mut self, bar: ProgressBar) -> Self {
        self.progress = Some(bar);
        self
    }

    /// Set the producer flush grace
    pub fn flush_grace(mut self, grace: Duration) -> Self {
        self.flush_grace = grace;
        self
    }

    /// Set how long workers get to close once the run is over
    pub fn close_grace(mut self, grace: Duration) -> Self {
        self.close_grace = grace;
        self
    }

    /// Seed consumer RNGs (consumer `i` uses `seed + i`)
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Build the runner
    ///
    /// # Errors
    ///
    /// Returns an error if no connector is set or the configuration is invalid.
    pub fn build(self) -> LoadGenResult<LoadTestRunner> {
        let connector = self
            .connector
            .ok_or_else(|| LoadGenError::missing_config("connector"))?;

        self.config.validate()?;

        Ok(LoadTestRunner::new(
            self.config,
            connector,
            self.progress.unwrap_or_else(ProgressBar::hidden),
            self.tick_period,
            self.flush_grace,
            self.close_grace,
            self.seed,
        ))
    }
}

impl Default for LoadTestBuilder {
    fn default() -> Self {
        Self::new()
    }
}
