//! # Vela Internal Library
//!
//! Re-exports the Vela crates for convenience.

/// Layer 1: module lifecycle, build-time APIs and globals.
pub use vela_system;

/// Layer 1: event bus and reactive repositories.
pub use vela_events;

/// Layer 1: plugin host and the FFI contract.
pub use vela_plugins;

/// Layer 2: service registry and built-in capabilities.
pub use vela_services;

/// Layer 2: scheduler, runtime and embedding boundary.
pub use vela_runtime;

/// Layer 3: ambient modules.
pub use vela_core_modules;

/// Re-export all common types for easy access.
pub mod prelude {
    pub use vela_core_modules::{DefaultModules, MinimalModules, TracingFormat, TracingModule};
    pub use vela_events::{Delivery, Event, EventBus, EventPattern, HandlerError, handler_fn};
    pub use vela_plugins::{PluginError, PluginHost};
    pub use vela_runtime::{
        ExecutionContext, Runtime, RuntimeConfig, RuntimeError, TaskHandle, TaskState,
    };
    pub use vela_services::{
        FileMonitorModule, Service, ServiceError, ServiceRegistry, ServicesModule, SocketModule,
    };
    pub use vela_system::module::{Module, ModuleGroup};
}
