//! loadgen-core: engine of the broker load generator
//!
//! This crate provides everything except the wire protocols:
//!
//! - Run configuration and broker address parsing
//! - The connection traits transports implement
//! - Paced producer and stochastic-ack consumer workers
//! - Shared counters, the completion state machine, and the run orchestrator
//! - Error handling

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod completion;
pub mod config;
pub mod error;
pub mod message;
pub mod orchestrator;
pub mod stats;
pub mod traits;
pub mod worker;

#[cfg(test)]
mod mock;

pub use completion::{CompletionCoordinator, CompletionState, RunPhase};
pub use config::{BrokerEndpoint, ConfigError, Credentials, RunConfig, TransportKind};
pub use error::*;
pub use message::Message;
pub use orchestrator::{LoadTestBuilder, LoadTestRunner, RunSummary};
pub use stats::{AggregateStats, StatsSnapshot, Throughput};
pub use traits::*;
pub use worker::{ConsumerWorker, ProducerWorker, RateLimiter, WorkerBuilder, WorkerStats};
