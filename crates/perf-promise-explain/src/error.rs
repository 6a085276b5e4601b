//! Error types for perf-promise-explain

use thiserror::Error;

/// Result type for explain and count probes.
pub type ExplainResult<T> = Result<T, ExplainError>;

/// Error type for explain and count probes.
#[derive(Debug, Error)]
pub enum ExplainError {
    /// Database error from tokio-postgres.
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),
    /// Decode error when reading a column of the probe result.
    #[error("Decode error for column '{column}': {message}")]
    Decode { column: String, message: String },
    /// A table name that cannot be safely quoted.
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),
    /// Any other probe failure (e.g. a test double or a foreign driver).
    #[error("{0}")]
    Other(String),
}

impl ExplainError {
    /// Create a decode error.
    pub fn decode(column: impl Into<String>, message: impl Into<String>) -> Self {
        ExplainError::Decode {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Create a free-form probe error.
    pub fn other(message: impl Into<String>) -> Self {
        ExplainError::Other(message.into())
    }
}
