//! The foundational module framework for Vela (Layer 1).
//!
//! `vela_system` provides the primitives every other Vela crate builds on:
//!
//! - [`api`] - API trait for build-time capability registries
//! - [`module`] - Module trait for composable runtime functionality
//! - [`resource`] - Read-only global resources
//! - [`server`] - Server for module orchestration
//!
//! # Architecture
//!
//! - **Layer 1** (`vela_system`, `vela_events`, `vela_plugins`): primitives
//! - **Layer 2** (`vela_services`, `vela_runtime`): registry, scheduler, embedding
//! - **Layer 3** (`vela_core_modules`): logging and runtime metadata
//!
//! # Example
//!
//! ```
//! use vela_system::module::Module;
//! use vela_system::resource::GlobalResource;
//! use vela_system::server::{Server, ServerError};
//!
//! #[derive(Default)]
//! struct WatchConfig { root: String }
//! impl GlobalResource for WatchConfig {}
//!
//! struct WatchModule;
//!
//! impl Module for WatchModule {
//!     fn build(&self, server: &mut Server) -> Result<(), ServerError> {
//!         server.insert_global(WatchConfig::default());
//!         Ok(())
//!     }
//! }
//!
//! let mut server = Server::new();
//! server.add_modules(WatchModule);
//! server.finish().unwrap();
//! assert!(server.contains_global::<WatchConfig>());
//! ```

/// API trait for capability registration.
pub mod api;

/// Module trait for extensible functionality.
pub mod module;

/// Global resource storage.
pub mod resource;

/// Server for module orchestration.
pub mod server;

/// Re-export all common types for easy access.
pub mod prelude {
    pub use crate::api::*;
    pub use crate::module::*;
    pub use crate::resource::*;
    pub use crate::server::*;
}
