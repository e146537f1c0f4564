//! Producer and consumer workers
//!
//! A worker is one tokio task that owns exactly one broker connection.
//! Producers run a tight loop: **tick -> build message -> send -> count**,
//! paced by a [`RateLimiter`]. Consumers run **receive -> count -> roll ->
//! settle** until the shared [`CompletionState`](crate::completion::CompletionState)
//! reports a terminal phase.
//!
//! Workers never return errors. Failures are logged, counted in
//! [`AggregateStats`](crate::stats::AggregateStats), and end only the worker
//! that hit them.
//!
//! # Example
//!
//! ```ignore
//! use loadgen_core::worker::{WorkerBuilder, WorkerHandle};
//!
//! let producer = WorkerBuilder::new(0)
//!     .connector(connector)
//!     .config(config)
//!     .completion(state)
//!     .build_producer()?;
//!
//! let stats = WorkerHandle::spawn_producer(producer).join().await;
//! ```

mod builder;
mod consumer;
mod handle;
mod producer;
mod rate_limiter;
mod stats;

pub use builder::WorkerBuilder;
pub use consumer::{decide_outcome, ConsumerWorker};
pub use handle::WorkerHandle;
pub use producer::{ProducerWorker, DEFAULT_FLUSH_GRACE};
pub use rate_limiter::{RateLimiter, MIN_INTERVAL};
pub use stats::{WorkerRole, WorkerStats};
