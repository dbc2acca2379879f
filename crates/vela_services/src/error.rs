//! Service registry errors.

use std::time::Duration;

use thiserror::Error;
use vela_plugins::PluginError;

/// Errors raised by the registry and built-in services.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// A service with this name already exists.
    #[error("service '{0}' is already registered")]
    AlreadyRegistered(String),

    /// No service with this name.
    #[error("service '{0}' is not registered")]
    NotFound(String),

    /// The service has no such method.
    #[error("service '{service}' has no method '{method}'")]
    UnknownMethod {
        /// Service name.
        service: String,
        /// Requested method.
        method: String,
    },

    /// No plugin or built-in declares this action verb.
    #[error("no action handles the verb '{0}'")]
    UnknownAction(String),

    /// No plugin declares this qualifier.
    #[error("qualifier '{0}' is not available")]
    UnknownQualifier(String),

    /// The qualifier does not accept this value type.
    #[error("qualifier '{qualifier}' does not accept values of type '{value_type}'")]
    UnsupportedType {
        /// Qualifier name.
        qualifier: String,
        /// Offered type.
        value_type: String,
    },

    /// Arguments do not have the expected shape.
    #[error("invalid arguments for '{service}.{method}': {reason}")]
    InvalidArguments {
        /// Service name.
        service: String,
        /// Method name.
        method: String,
        /// What is wrong.
        reason: String,
    },

    /// A listener could not bind its address.
    #[error("failed to bind {address}: {source}")]
    Bind {
        /// Requested address.
        address: String,
        /// OS error.
        #[source]
        source: std::io::Error,
    },

    /// A socket connection id is unknown or closed.
    #[error("connection {0} is not open")]
    ConnectionClosed(u64),

    /// A built-in service call exceeded its limit.
    #[error("'{service}.{method}' timed out after {after:?}")]
    Timeout {
        /// Service name.
        service: String,
        /// Method name.
        method: String,
        /// Configured limit.
        after: Duration,
    },

    /// A built-in service failed.
    #[error("service '{service}' failed: {message}")]
    Failed {
        /// Service name.
        service: String,
        /// Failure description.
        message: String,
    },

    /// A plugin-backed call failed.
    #[error(transparent)]
    Plugin(#[from] PluginError),

    /// File system or network failure.
    #[error("service I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServiceError {
    /// Creates a [`ServiceError::Failed`].
    pub fn failed(service: impl Into<String>, message: impl core::fmt::Display) -> Self {
        Self::Failed {
            service: service.into(),
            message: message.to_string(),
        }
    }

    /// Creates a [`ServiceError::InvalidArguments`].
    pub fn invalid_arguments(
        service: impl Into<String>,
        method: impl Into<String>,
        reason: impl core::fmt::Display,
    ) -> Self {
        Self::InvalidArguments {
            service: service.into(),
            method: method.into(),
            reason: reason.to_string(),
        }
    }

    /// The call exceeded its time limit.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Plugin(err) => err.is_timeout(),
            _ => false,
        }
    }

    /// The registry configuration is inconsistent (duplicate names).
    #[must_use]
    pub fn is_configuration_error(&self) -> bool {
        match self {
            Self::AlreadyRegistered(_) => true,
            Self::Plugin(err) => err.is_configuration_error(),
            _ => false,
        }
    }

    /// A host resource (port, path, library) was unavailable.
    #[must_use]
    pub fn is_resource_error(&self) -> bool {
        match self {
            Self::Bind { .. } | Self::Io(_) => true,
            Self::Plugin(err) => err.is_resource_error(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plugin_timeout_is_a_timeout() {
        let err = ServiceError::from(PluginError::Timeout {
            plugin: "slow".into(),
            call: "run".into(),
            after: Duration::from_millis(5),
        });
        assert!(err.is_timeout());
        assert!(!err.is_configuration_error());
    }

    #[test]
    fn bind_failure_is_a_resource_error() {
        let err = ServiceError::Bind {
            address: "127.0.0.1:1".into(),
            source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
        };
        assert!(err.is_resource_error());
        assert!(err.to_string().starts_with("failed to bind 127.0.0.1:1"));
    }
}
