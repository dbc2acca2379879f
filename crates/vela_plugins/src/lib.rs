//! Plugin host for the Vela runtime (Layer 1).
//!
//! A plugin is a dynamically loadable library exporting four C symbols:
//!
//! | Symbol | Signature |
//! |--------|-----------|
//! | `plugin_init` | `char* (void)` |
//! | `plugin_execute` | `char* (const char* action, const char* args_json, int* status)` |
//! | `plugin_qualifier` | `char* (const char* qualifier, const char* input_json, int* status)` |
//! | `plugin_free` | `void (char* ptr)` |
//!
//! Every payload is UTF-8 JSON. Every `char*` a plugin returns is owned by the
//! plugin's allocator and is released with that plugin's `plugin_free`, never
//! with the host allocator. [`PluginBuffer`] wraps each returned pointer the
//! moment it crosses the boundary and frees it on drop.
//!
//! - [`abi`] - symbol names and function pointer types
//! - [`buffer`] - the single-owner guard for plugin-allocated strings
//! - [`metadata`] - the `plugin_init` document
//! - [`library`] - dynamic loading behind the [`LibraryLoader`] seam
//! - [`handle`] - one loaded plugin and its per-handle call lock
//! - [`host`] - lazy, idempotent loading and name claims
//! - [`process`] - plugins run as child processes with killable timeouts

pub mod abi;
pub mod buffer;
pub mod error;
pub mod handle;
pub mod host;
pub mod library;
pub mod metadata;
pub mod process;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use abi::{ABI_VERSION, PluginVTable};
pub use buffer::PluginBuffer;
pub use error::PluginError;
pub use handle::PluginHandle;
pub use host::{ClaimKind, NameOwner, PluginHost};
pub use library::{DlopenLoader, LibraryLoader, PluginLibrary};
pub use metadata::{ActionDecl, PluginMetadata, QualifierDecl, ServiceDecl};
pub use process::{ProcessHandle, ProcessPlugin};

#[doc(hidden)]
pub mod __private {
    pub use serde_json;
}
