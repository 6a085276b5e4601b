//! Error types for perf-promise

use perf_promise_explain::ExplainError;
use std::fmt;
use thiserror::Error;

/// Result type alias for perf-promise operations
pub type PromiseResult<T> = Result<T, PromiseError>;

/// Error types surfaced by the enforcer
#[derive(Debug, Error)]
pub enum PromiseError {
    /// A validated promise was broken and the enforcer is configured to raise
    #[error(transparent)]
    BrokenPromise(#[from] BrokenPromise),

    /// A lazy budget expression could not be evaluated
    #[error("Evaluation error: {0}")]
    Evaluation(#[from] EvaluationError),

    /// Plan or count probe error
    #[error("Probe error: {0}")]
    Explain(#[from] ExplainError),

    /// Invalid configuration or registration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl PromiseError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Check if this is a broken promise
    pub fn is_broken_promise(&self) -> bool {
        matches!(self, Self::BrokenPromise(_))
    }

    /// The broken promise carried by this error, if any
    pub fn as_broken_promise(&self) -> Option<&BrokenPromise> {
        match self {
            Self::BrokenPromise(broken) => Some(broken),
            _ => None,
        }
    }
}

/// Error raised while evaluating a [`LazyExpr`](crate::expr::LazyExpr)
#[derive(Debug, Error)]
pub enum EvaluationError {
    /// Right-hand side of a division evaluated to zero
    #[error("division by zero in `{0}`")]
    DivisionByZero(String),

    /// Arithmetic left the i64 range
    #[error("arithmetic overflow in `{0}`")]
    Overflow(String),

    /// The row count query for a dynamic count failed
    #[error("could not count rows of `{table}`: {source}")]
    Count {
        table: String,
        #[source]
        source: ExplainError,
    },
}

/// A failed promise: every failing check's message and backtrace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokenPromise {
    /// Handler the promise was declared on
    pub handler_id: String,
    /// Human-readable explanation
    pub message: String,
    /// Summarized statements with their call sites
    pub backtrace: Vec<String>,
}

impl fmt::Display for BrokenPromise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Broken promise on {}: {}", self.handler_id, self.message)
    }
}

impl std::error::Error for BrokenPromise {}
