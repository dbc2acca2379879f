//! Runtime errors.

use std::time::Duration;

use thiserror::Error;
use vela_events::{HandlerError, SpawnError};
use vela_plugins::PluginError;
use vela_services::ServiceError;
use vela_system::server::ServerError;

use crate::task::TaskId;

/// Errors raised by the scheduler, the bridge and the runtime lifecycle.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Shutdown was requested; no new work is accepted.
    #[error("runtime is shutting down; rejected '{0}'")]
    ShuttingDown(String),

    /// The synchronous bridge was called from a context that cannot block.
    #[error("blocking bridge called from a current-thread runtime")]
    BridgeUnsupported,

    /// A bridged task was cancelled before producing a result.
    #[error("task {0} was cancelled")]
    Cancelled(TaskId),

    /// A bridged task panicked.
    #[error("task {task} panicked: {message}")]
    Panicked {
        /// The task.
        task: TaskId,
        /// Panic message.
        message: String,
    },

    /// A bounded operation did not finish in time.
    #[error("'{operation}' timed out after {after:?}")]
    Timeout {
        /// What was running.
        operation: String,
        /// The bound that elapsed.
        after: Duration,
    },

    /// No task with this id is tracked or recently finished.
    #[error("unknown task {0}")]
    UnknownTask(TaskId),

    /// No handler is registered under this name.
    #[error("no handler named '{0}'")]
    UnknownHandler(String),

    /// A handler name was registered twice.
    #[error("handler '{0}' is already registered")]
    DuplicateHandler(String),

    /// A named handler failed.
    #[error("handler '{name}' failed: {source}")]
    Handler {
        /// Handler name.
        name: String,
        /// The failure.
        #[source]
        source: HandlerError,
    },

    /// A configuration value was malformed.
    #[error("invalid configuration {key}: {reason}")]
    InvalidConfig {
        /// Variable or field name.
        key: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Module assembly failed at startup.
    #[error(transparent)]
    Startup(#[from] ServerError),

    /// A service call failed.
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// A plugin call failed.
    #[error(transparent)]
    Plugin(#[from] PluginError),

    /// JSON conversion failed.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// The thread pool or a signal handler could not be created.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RuntimeError {
    /// Creates an [`InvalidConfig`](Self::InvalidConfig) error.
    pub fn invalid_config(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Returns true for timeouts, including service and plugin timeouts.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Service(err) => err.is_timeout(),
            Self::Plugin(err) => err.is_timeout(),
            _ => false,
        }
    }

    /// Returns true for startup configuration errors.
    #[must_use]
    pub fn is_configuration_error(&self) -> bool {
        match self {
            Self::InvalidConfig { .. } | Self::DuplicateHandler(_) | Self::Startup(_) => true,
            Self::Service(err) => err.is_configuration_error(),
            Self::Plugin(err) => err.is_configuration_error(),
            _ => false,
        }
    }
}

impl From<SpawnError> for RuntimeError {
    fn from(err: SpawnError) -> Self {
        match err {
            SpawnError::ShuttingDown(name) => Self::ShuttingDown(name),
        }
    }
}
