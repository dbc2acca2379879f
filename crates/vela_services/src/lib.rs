//! Service registry for the Vela runtime (Layer 2).
//!
//! A service is a named capability exposing JSON methods. Built-in services
//! and plugin-declared services live in one [`ServiceRegistry`] and are
//! invoked the same way:
//!
//! ```no_run
//! # async fn demo(registry: vela_services::ServiceRegistry) -> Result<(), vela_services::ServiceError> {
//! registry.load_plugin("plugins/libcounter.so")?;
//! let count = registry
//!     .invoke("counter", "increment", serde_json::json!({}))
//!     .await?;
//! # Ok(()) }
//! ```
//!
//! Built-ins:
//!
//! - [`FileMonitor`] (`file-monitor`) - inotify or snapshot polling backend
//! - [`SocketListener`] (`socket`) - TCP listener publishing connection events

pub mod error;
pub mod file_monitor;
pub mod module;
pub mod plugin_service;
pub mod registry;
pub mod service;
pub mod socket;

pub use error::ServiceError;
pub use file_monitor::{
    FILE_CREATED, FILE_DELETED, FILE_MODIFIED, FileChange, FileChangeKind, FileMonitor,
    MonitorBackend, MonitorOptions, Snapshot,
};
pub use module::{FileMonitorModule, ServicesModule, SocketModule};
pub use plugin_service::{PluginService, ProcessPluginService};
pub use registry::ServiceRegistry;
pub use service::{FnService, Service};
pub use socket::{SOCKET_CONNECTED, SOCKET_DATA_RECEIVED, SOCKET_DISCONNECTED, SocketListener};
