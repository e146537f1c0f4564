//! Error types for loadgen-core

use thiserror::Error;

use crate::config::ConfigError;
use crate::traits::ConnectionError;

/// Core error type
///
/// Only configuration problems and orchestration faults surface here.
/// Per-message failures stay inside the worker that hit them.
#[derive(Error, Debug)]
pub enum LoadGenError {
    /// Configuration error (fatal, the run never starts)
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Connection error that escaped a worker
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// A required builder field was not provided
    #[error("missing configuration: {0}")]
    MissingConfig(&'static str),

    /// Orchestration error
    #[error("orchestration error: {0}")]
    Orchestration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LoadGenError {
    /// Shorthand for a missing builder field
    pub fn missing_config(field: &'static str) -> Self {
        LoadGenError::MissingConfig(field)
    }

    /// Shorthand for an orchestration fault
    pub fn orchestration(message: impl Into<String>) -> Self {
        LoadGenError::Orchestration(message.into())
    }

    /// Whether the error should abort the process with a startup failure
    pub fn is_fatal_startup(&self) -> bool {
        matches!(
            self,
            LoadGenError::Config(_) | LoadGenError::MissingConfig(_)
        )
    }
}

/// Result type alias
pub type LoadGenResult<T> = std::result::Result<T, LoadGenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_config_message() {
        let err = LoadGenError::missing_config("connector");
        assert!(err.to_string().contains("connector"));
        assert!(err.is_fatal_startup());
    }

    #[test]
    fn test_config_error_converts() {
        let err: LoadGenError = ConfigError::InvalidRate(0).into();
        assert!(matches!(err, LoadGenError::Config(_)));
        assert!(err.is_fatal_startup());
    }

    #[test]
    fn test_orchestration_is_not_startup_error() {
        let err = LoadGenError::orchestration("all workers panicked");
        assert!(!err.is_fatal_startup());
        assert_eq!(
            err.to_string(),
            "orchestration error: all workers panicked"
        );
    }
}
