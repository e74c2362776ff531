use std::time::Duration;

use thiserror::Error;

/// Error taxonomy shared by every ragdb crate.
///
/// Variants carry rendered messages rather than source errors so a single
/// failure can be fanned out to every chunk of a failed batch.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RagError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Dimension mismatch for index '{index}': expected {expected}, got {actual}")]
    DimensionMismatch {
        index: String,
        expected: usize,
        actual: usize,
    },

    #[error("Embedding provider error: {0}")]
    Provider(String),

    #[error("Backend '{backend}' error: {message}")]
    Backend { backend: String, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Partial failure: {succeeded} succeeded, {failed} failed")]
    PartialFailure { succeeded: usize, failed: usize },

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl RagError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn backend(backend: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Backend { backend: backend.into(), message: err.to_string() }
    }

    /// Construction-time errors: never retried, never partially applied.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::DimensionMismatch { .. })
    }

    /// Failures of an external call that a bounded retry may clear.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Provider(_) | Self::Backend { .. } | Self::Timeout(_) | Self::Io(_))
    }
}

impl From<std::io::Error> for RagError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<serde_json::Error> for RagError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RagError>;
