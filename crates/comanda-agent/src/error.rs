//! Error types for comanda-agent

use std::time::Duration;

use thiserror::Error;

/// Result type alias using comanda-agent Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while orchestrating a turn
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the language-model provider layer
    #[error(transparent)]
    Ai(#[from] comanda_ai::Error),

    /// The turn was superseded by a newer burst or the scheduler stopped.
    /// Expected control flow, never shown to the customer.
    #[error("Turn cancelled")]
    Cancelled,

    /// An external call did not finish within its deadline
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// A tool returned an error payload or could not be run
    #[error("Tool '{tool}' failed: {message}")]
    Tool { tool: String, message: String },

    /// The channel adapter refused or failed to deliver a message
    #[error("Channel error: {0}")]
    Channel(String),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A generic orchestration error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Check if this error is a cancellation rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled | Error::Ai(comanda_ai::Error::Aborted))
    }

    /// Check if this error is a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }
}
