//! Plugin host errors.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::host::{ClaimKind, NameOwner};

/// Errors raised while loading or calling plugins.
///
/// Variants fall into four families, queryable with the `is_*` helpers:
/// contract violations by the plugin, resource failures on the host side,
/// configuration conflicts and timeouts.
#[derive(Debug, Error)]
pub enum PluginError {
    /// The plugin file does not exist or cannot be resolved.
    #[error("plugin not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The dynamic loader rejected the library.
    #[error("failed to load plugin '{}': {reason}", .path.display())]
    Load {
        /// Library path.
        path: PathBuf,
        /// Loader message.
        reason: String,
    },

    /// A required entry point is not exported.
    #[error("plugin '{}' does not export '{symbol}'", .path.display())]
    MissingSymbol {
        /// Library path.
        path: PathBuf,
        /// Missing symbol name.
        symbol: &'static str,
    },

    /// The metadata document is missing or malformed.
    #[error("plugin '{plugin}' has invalid metadata: {reason}")]
    InvalidMetadata {
        /// Plugin name.
        plugin: String,
        /// What is wrong.
        reason: String,
    },

    /// A name declared by the plugin is already owned.
    #[error("{kind} name '{name}' is already claimed by {owner}")]
    DuplicateName {
        /// Namespace of the name.
        kind: ClaimKind,
        /// The contested name.
        name: String,
        /// Current owner.
        owner: NameOwner,
    },

    /// Another process plugin already uses this name.
    #[error("process plugin '{name}' is already registered for {}", .program.display())]
    DuplicatePlugin {
        /// Plugin name.
        name: String,
        /// Program of the registered plugin.
        program: PathBuf,
    },

    /// An entry point returned a null pointer.
    #[error("plugin '{plugin}' returned no result for '{call}'")]
    NullResult {
        /// Plugin name.
        plugin: String,
        /// Action or qualifier name.
        call: String,
    },

    /// The returned buffer is not valid UTF-8 JSON.
    #[error("plugin '{plugin}' returned a malformed result for '{call}': {reason}")]
    MalformedResult {
        /// Plugin name.
        plugin: String,
        /// Action or qualifier name.
        call: String,
        /// Parse failure.
        reason: String,
    },

    /// The plugin set a non-zero status.
    #[error("plugin '{plugin}' failed '{call}' with status {status}{}", suffix(.message))]
    Status {
        /// Plugin name.
        plugin: String,
        /// Action or qualifier name.
        call: String,
        /// Status code written by the plugin.
        status: i32,
        /// Error text from the result, when present.
        message: Option<String>,
    },

    /// The plugin returned `{"error": ...}`.
    #[error("plugin '{plugin}' reported an error for '{call}': {message}")]
    Reported {
        /// Plugin name.
        plugin: String,
        /// Action or qualifier name.
        call: String,
        /// Reported message.
        message: String,
    },

    /// An argument cannot cross the boundary (interior NUL byte).
    #[error("invalid argument for plugin call: {0}")]
    InvalidArgument(String),

    /// The call did not finish in time.
    #[error("plugin '{plugin}' timed out after {after:?} in '{call}'")]
    Timeout {
        /// Plugin name.
        plugin: String,
        /// Action or qualifier name.
        call: String,
        /// Configured limit.
        after: Duration,
    },

    /// The blocking call task was lost.
    #[error("plugin call task failed: {0}")]
    CallAborted(String),

    /// Dynamic loading is not available on this platform.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// I/O failure (process plugins, path resolution).
    #[error("plugin I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding failure on the host side.
    #[error("plugin payload error: {0}")]
    Json(#[from] serde_json::Error),
}

fn suffix(message: &Option<String>) -> String {
    message
        .as_deref()
        .map(|message| format!(": {message}"))
        .unwrap_or_default()
}

impl PluginError {
    /// The plugin broke the binary contract.
    #[must_use]
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::MissingSymbol { .. }
                | Self::InvalidMetadata { .. }
                | Self::NullResult { .. }
                | Self::MalformedResult { .. }
        )
    }

    /// A host-side resource failed.
    #[must_use]
    pub fn is_resource_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_)
                | Self::Load { .. }
                | Self::Io(_)
                | Self::Unsupported(_)
                | Self::CallAborted(_)
        )
    }

    /// The call exceeded its time limit.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// The plugin cannot be registered with the current configuration.
    #[must_use]
    pub fn is_configuration_error(&self) -> bool {
        matches!(self, Self::DuplicateName { .. } | Self::DuplicatePlugin { .. })
    }

    /// The plugin ran and reported failure.
    #[must_use]
    pub fn is_plugin_failure(&self) -> bool {
        matches!(self, Self::Status { .. } | Self::Reported { .. })
    }
}
