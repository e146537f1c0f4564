//! Builder pattern for worker construction

use crate::completion::CompletionState;
use crate::config::RunConfig;
use crate::error::{LoadGenError, LoadGenResult};
use crate::traits::Connector;

use super::consumer::ConsumerWorker;
use super::producer::{ProducerWorker, DEFAULT_FLUSH_GRACE};

use std::sync::Arc;
use std::time::Duration;

/// Builder for producer and consumer workers
///
/// Both roles need the same three collaborators; the builder validates
/// they are present before handing out a worker.
///
/// # Example
/// ```ignore
/// let producer = WorkerBuilder::new(0)
///     .connector(connector)
///     .config(config)
///     .completion(state)
///     .build_producer()?;
/// ```
pub struct WorkerBuilder {
    id: usize,
    connector: Option<Arc<dyn Connector>>,
    config: Option<Arc<RunConfig>>,
    completion: Option<CompletionState>,
    flush_grace: Duration,
    seed: Option<u64>,
}

impl WorkerBuilder {
    /// Create a new builder with the given worker ID
    pub fn new(id: usize) -> Self {
        Self {
            id,
            connector: None,
            config: None,
            completion: None,
            flush_grace: DEFAULT_FLUSH_GRACE,
            seed: None,
        }
    }

    /// Set the connector
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Set the run configuration
    pub fn config(mut self, config: Arc<RunConfig>) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the shared completion state
    pub fn completion(mut self, completion: CompletionState) -> Self {
        self.completion = Some(completion);
        self
    }

    /// Pause between a producer's last send and its close
    pub fn flush_grace(mut self, grace: Duration) -> Self {
        self.flush_grace = grace;
        self
    }

    /// Seed a consumer's accept/release RNG
    pub fn seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    /// Build a producer
    ///
    /// # Errors
    /// Returns an error if any required field is missing.
    pub fn build_producer(self) -> LoadGenResult<ProducerWorker> {
        let flush_grace = self.flush_grace;
        let id = self.id;
        let (connector, config, completion) = self.parts()?;
        Ok(ProducerWorker::new(
            id,
            connector,
            config,
            completion,
            flush_grace,
        ))
    }

    /// Build a consumer
    ///
    /// # Errors
    /// Returns an error if any required field is missing.
    pub fn build_consumer(self) -> LoadGenResult<ConsumerWorker> {
        let seed = self.seed;
        let id = self.id;
        let (connector, config, completion) = self.parts()?;
        Ok(ConsumerWorker::new(id, connector, config, completion, seed))
    }

    fn parts(self) -> LoadGenResult<(Arc<dyn Connector>, Arc<RunConfig>, CompletionState)> {
        let connector = self
            .connector
            .ok_or(LoadGenError::missing_config("connector"))?;
        let config = self.config.ok_or(LoadGenError::missing_config("config"))?;
        let completion = self
            .completion
            .ok_or(LoadGenError::missing_config("completion"))?;
        Ok((connector, config, completion))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::AggregateStats;

    fn completion() -> CompletionState {
        CompletionState::new(Arc::new(AggregateStats::new()), 0)
    }

    #[test]
    fn test_builder_missing_connector() {
        let result = WorkerBuilder::new(0)
            .config(Arc::new(RunConfig::default()))
            .completion(completion())
            .build_producer();

        let err = result.unwrap_err();
        assert!(err.to_string().contains("connector"));
    }

    #[test]
    fn test_builder_missing_config() {
        let result = WorkerBuilder::new(0).completion(completion()).build_consumer();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_missing_completion() {
        let result = WorkerBuilder::new(0)
            .config(Arc::new(RunConfig::default()))
            .build_consumer();
        assert!(result.is_err());
    }
}
