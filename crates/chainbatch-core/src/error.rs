//! Error types for the chainbatch processor.

use thiserror::Error;

use crate::cursor::HashAndHeight;

/// Errors that can occur while processing batches.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("Source error: {0}")]
    Source(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Handler error in '{handler}': {reason}")]
    Handler { handler: String, reason: String },

    #[error(
        "already indexed block {head} was not found on chain (source has {})",
        .actual.as_deref().unwrap_or("no block")
    )]
    ContinuityViolation {
        head: HashAndHeight,
        actual: Option<String>,
    },

    #[error("Status mismatch: expected database head {expected}, found {actual}")]
    StatusMismatch {
        expected: HashAndHeight,
        actual: HashAndHeight,
    },

    #[error("Max retries reached after {attempts} attempts, last error: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<IndexerError>,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    /// Shorthand for a handler failure.
    pub fn handler(handler: impl Into<String>, reason: impl ToString) -> Self {
        Self::Handler {
            handler: handler.into(),
            reason: reason.to_string(),
        }
    }

    /// Returns `true` if a previously committed block is no longer canonical.
    pub fn is_continuity_violation(&self) -> bool {
        matches!(self, Self::ContinuityViolation { .. })
    }

    /// Returns `true` if the retry budget has been spent.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::RetriesExhausted { .. })
    }
}
