//! Load-test lifecycle management
//!
//! The runner coordinates one complete run:
//! - Spawning consumer and producer tasks
//! - Flipping the run phase once producers are done
//! - Bounding the consumer drain with the safety timeout
//! - Refreshing the live status line and building the final summary
//!
//! # Example
//!
//! ```ignore
//! use loadgen_core::orchestrator::{spinner, LoadTestBuilder};
//!
//! let runner = LoadTestBuilder::new()
//!     .config(config)
//!     .connector(connector)
//!     .progress(spinner())
//!     .build()?;
//!
//! let summary = runner.run_with_signal_handling().await?;
//! println!("{}", summary);
//! ```

mod builder;
mod executor;
mod summary;
mod ticker;

pub use builder::{LoadTestBuilder, DEFAULT_CLOSE_GRACE};
pub use executor::LoadTestRunner;
pub use summary::RunSummary;
pub use ticker::{spinner, status_line, StatsTicker, DEFAULT_TICK_PERIOD};

#[cfg(test)]
mod tests;
