//! Error types for event dispatch.

use thiserror::Error;

/// Failure reported by an [`EventHandler`](crate::EventHandler).
///
/// Handler failures are isolated: the bus logs them and republishes them as a
/// [`HANDLER_FAILED`](crate::HANDLER_FAILED) event, but they never reach the
/// publisher or sibling handlers.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The handler reported a failure.
    #[error("{0}")]
    Failed(String),

    /// The handler panicked.
    #[error("handler panicked: {0}")]
    Panicked(String),

    /// JSON conversion of the payload failed.
    #[error("payload error: {0}")]
    Payload(#[from] serde_json::Error),
}

impl HandlerError {
    /// Creates a [`Failed`](Self::Failed) error.
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// Errors raised by the bus and repositories themselves.
#[derive(Debug, Error)]
pub enum EventError {
    /// A pattern string could not be parsed.
    #[error("invalid event pattern '{0}'")]
    InvalidPattern(String),

    /// A repository entity does not exist.
    #[error("entity '{id}' not found in repository '{repository}'")]
    EntityNotFound {
        /// Repository name.
        repository: String,
        /// Missing entity id.
        id: String,
    },
}
