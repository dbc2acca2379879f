//! Ambient modules for Vela hosts.
//!
//! - [`RuntimeInfoModule`] - host metadata as the [`RuntimeInfo`] global
//! - [`TracingModule`] - `tracing` subscriber setup
//! - [`DefaultModules`] - both of the above
//! - [`MinimalModules`] - metadata only, for tests that keep their own logging
//!
//! # Example
//!
//! ```no_run
//! use vela_core_modules::DefaultModules;
//! use vela_runtime::Runtime;
//! use vela_system::module::ModuleGroup;
//!
//! let runtime = Runtime::builder()
//!     .add_modules(DefaultModules.build())
//!     .build()?;
//! # Ok::<(), vela_runtime::RuntimeError>(())
//! ```

mod runtime_info;
mod tracing_module;

pub use runtime_info::{RuntimeInfo, RuntimeInfoModule};
pub use tracing_module::{TracingConfig, TracingFormat, TracingModule};

use vela_system::module::{ModuleGroup, ModuleGroupBuilder};

/// Modules most hosts want: [`RuntimeInfoModule`] and [`TracingModule`].
///
/// ```ignore
/// Runtime::builder().add_modules(
///     DefaultModules
///         .build()
///         .disable::<TracingModule>()
///         .add(TracingModule::new().with_format(TracingFormat::Json)),
/// );
/// ```
#[derive(Debug, Clone, Copy)]
pub struct DefaultModules;

impl ModuleGroup for DefaultModules {
    fn build(self) -> ModuleGroupBuilder {
        ModuleGroupBuilder::new()
            .add(RuntimeInfoModule)
            .add(TracingModule::default())
    }
}

/// Only [`RuntimeInfoModule`]; installs no subscriber.
#[derive(Debug, Clone, Copy)]
pub struct MinimalModules;

impl ModuleGroup for MinimalModules {
    fn build(self) -> ModuleGroupBuilder {
        ModuleGroupBuilder::new().add(RuntimeInfoModule)
    }
}
