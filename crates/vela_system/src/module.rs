//! Module system for composing runtime functionality.
//!
//! Modules are the unit of composition in Vela. The event bus, the service
//! registry, built-in capabilities such as the file monitor, and logging setup
//! are all installed by modules added to a [`Server`].
//!
//! The name is deliberately distinct from *plugins*: plugins are third-party
//! shared libraries loaded through the FFI contract, while modules are Rust
//! types compiled into the host.
//!
//! # Example
//!
//! ```
//! use vela_system::module::{Module, ModuleId};
//! use vela_system::server::{Server, ServerError};
//!
//! struct LoggingModule;
//! impl Module for LoggingModule {
//!     fn build(&self, _server: &mut Server) -> Result<(), ServerError> {
//!         Ok(())
//!     }
//! }
//!
//! struct WatcherModule {
//!     root: String,
//! }
//!
//! impl Module for WatcherModule {
//!     fn build(&self, _server: &mut Server) -> Result<(), ServerError> {
//!         Ok(())
//!     }
//!
//!     fn dependencies(&self) -> Vec<ModuleId> {
//!         vec![ModuleId::of::<LoggingModule>()]
//!     }
//! }
//!
//! let mut server = Server::new();
//! server
//!     .add_modules(LoggingModule)
//!     .add_modules(WatcherModule { root: "/tmp".into() });
//! server.finish().unwrap();
//! ```

use core::any::TypeId;
use core::fmt;

use crate::server::{Server, ServerError};

// ─────────────────────────────────────────────────────────────────────────────
// Version
// ─────────────────────────────────────────────────────────────────────────────

/// Semantic version of a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    /// Major version.
    pub major: u32,
    /// Minor version.
    pub minor: u32,
    /// Patch version.
    pub patch: u32,
}

impl Version {
    /// Creates a version from its components.
    #[must_use]
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ModuleId
// ─────────────────────────────────────────────────────────────────────────────

/// Unique identifier for a module type.
///
/// Used for dependency resolution and duplicate detection. Based on [`TypeId`],
/// so each module type has exactly one `ModuleId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleId {
    type_id: TypeId,
    type_name: &'static str,
}

impl ModuleId {
    /// Creates a `ModuleId` for the given module type.
    #[must_use]
    pub fn of<M: Module>() -> Self {
        Self {
            type_id: TypeId::of::<M>(),
            type_name: core::any::type_name::<M>(),
        }
    }

    /// Returns the underlying `TypeId`.
    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Returns the type name for debugging.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Module Trait
// ─────────────────────────────────────────────────────────────────────────────

/// A unit of functionality installed into a [`Server`].
///
/// Modules follow a strict lifecycle managed by the server:
///
/// 1. **Build Phase** - `build()` is called in dependency order
/// 2. **Ready Phase** - `ready()` is called in dependency order
/// 3. **Cleanup Phase** - `cleanup()` is called in reverse dependency order
///
/// Errors returned from `build()` or `ready()` abort [`Server::finish`]. They
/// are startup configuration errors: a duplicate capability name, a plugin
/// library that cannot be opened, a listener that cannot bind.
pub trait Module: Send + Sync + 'static {
    /// Configures the server. Called once, in dependency order.
    ///
    /// Register APIs and global resources here. Keep it lightweight: anything
    /// that needs other modules' registrations belongs in `ready()`.
    fn build(&self, server: &mut Server) -> Result<(), ServerError>;

    /// Called after every module has been built.
    ///
    /// Use this for work that depends on other modules, such as registering
    /// services into a registry another module installed or spawning
    /// background tasks.
    fn ready(&self, _server: &mut Server) -> Result<(), ServerError> {
        Ok(())
    }

    /// Called when the server shuts down, in reverse dependency order.
    fn cleanup(&self, _server: &mut Server) {}

    /// Returns the module's name for debugging and error messages.
    ///
    /// Default implementation returns the type name.
    fn name(&self) -> &str {
        core::any::type_name::<Self>()
    }

    /// Returns the module's version.
    fn version(&self) -> Version {
        Version::new(0, 0, 1)
    }

    /// Declares modules that must be added before this one.
    fn dependencies(&self) -> Vec<ModuleId> {
        Vec::new()
    }

    /// Returns true if this module can only be added once.
    ///
    /// Default is `true`. Adding a unique module twice makes
    /// [`Server::finish`] fail with [`ServerError::DuplicateModule`].
    fn is_unique(&self) -> bool {
        true
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Modules Trait (for add_modules polymorphism)
// ─────────────────────────────────────────────────────────────────────────────

/// Trait for types that can be added to a server as modules.
///
/// Lets `server.add_modules()` accept both a single [`Module`] and a
/// [`ModuleGroupBuilder`]. Users typically don't implement this directly.
pub trait Modules {
    /// Adds these modules to the server.
    fn add_to_server(self, server: &mut Server);
}

impl<M: Module> Modules for M {
    fn add_to_server(self, server: &mut Server) {
        // Capture the id while the concrete type is still known.
        let id = ModuleId::of::<M>();
        server.add_module_boxed(id, Box::new(self));
    }
}

impl Modules for ModuleGroupBuilder {
    fn add_to_server(self, server: &mut Server) {
        for boxed in self.modules {
            server.add_module_boxed(boxed.id, boxed.module);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ModuleGroup
// ─────────────────────────────────────────────────────────────────────────────

/// A collection of modules that can be added together.
///
/// ```ignore
/// Server::new().add_modules(
///     DefaultModules
///         .build()
///         .disable::<TracingModule>()
///         .add(CustomTracingModule::new()),
/// );
/// ```
pub trait ModuleGroup {
    /// Returns the modules in this group.
    fn build(self) -> ModuleGroupBuilder;
}

/// A boxed module with its captured [`ModuleId`].
pub(crate) struct BoxedModule {
    pub(crate) id: ModuleId,
    pub(crate) module: Box<dyn Module>,
}

impl BoxedModule {
    fn name(&self) -> &str {
        self.module.name()
    }
}

/// Builder for customizing module groups.
#[derive(Default)]
pub struct ModuleGroupBuilder {
    pub(crate) modules: Vec<BoxedModule>,
}

impl ModuleGroupBuilder {
    /// Creates a new empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            modules: Vec::new(),
        }
    }

    /// Adds a module to the end of the group.
    #[must_use]
    #[expect(
        clippy::should_implement_trait,
        reason = "This is a builder method, not std::ops::Add"
    )]
    pub fn add<M: Module>(mut self, module: M) -> Self {
        self.modules.push(BoxedModule {
            id: ModuleId::of::<M>(),
            module: Box::new(module),
        });
        self
    }

    /// Adds a module after `Target`, or at the end if `Target` is absent.
    #[must_use]
    pub fn add_after<M: Module, Target: Module>(mut self, module: M) -> Self {
        let target = ModuleId::of::<Target>();
        let position = self
            .modules
            .iter()
            .position(|m| m.id == target)
            .map_or(self.modules.len(), |i| i + 1);
        self.modules.insert(
            position,
            BoxedModule {
                id: ModuleId::of::<M>(),
                module: Box::new(module),
            },
        );
        self
    }

    /// Removes a module from the group by type. No-op if absent.
    #[must_use]
    pub fn disable<M: Module>(mut self) -> Self {
        let target = ModuleId::of::<M>();
        self.modules.retain(|m| m.id != target);
        self
    }

    /// Returns the names of the modules in order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.modules.iter().map(BoxedModule::name).collect()
    }

    /// Returns the number of modules in the group.
    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Returns true if the group contains no modules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}
