//! Server for module orchestration.
//!
//! The [`Server`] owns the registered modules, the build-time APIs they expose
//! to each other, and read-only global resources. It has no behavior of its
//! own: the runtime core is assembled entirely from modules.
//!
//! # Lifecycle
//!
//! 1. **Dependency Resolution** - Validate and topologically sort modules
//! 2. **Build Phase** - Call `module.build()` in dependency order
//! 3. **Ready Phase** - Call `module.ready()` in dependency order
//! 4. **Cleanup Phase** - Call `module.cleanup()` in reverse order
//!
//! Every lifecycle failure is reported as a [`ServerError`]; an embedding host
//! surfaces it to its caller as a startup configuration error.

use core::any::{Any, TypeId};

use hashbrown::{HashMap, HashSet};
use thiserror::Error;

use crate::api::API;
use crate::module::{Module, ModuleId, Modules};
use crate::resource::{GlobalResource, Globals};

type BoxedAPI = Box<dyn Any + Send + Sync>;

// ─────────────────────────────────────────────────────────────────────────────
// ServerError
// ─────────────────────────────────────────────────────────────────────────────

/// Errors raised while assembling or building a [`Server`].
#[derive(Debug, Error)]
pub enum ServerError {
    /// A unique module was added twice.
    #[error("module '{0}' is unique and was already added")]
    DuplicateModule(String),

    /// A module depends on a module that was never added.
    #[error("module '{module}' requires '{dependency}' which was not added")]
    MissingDependency {
        /// The dependent module.
        module: String,
        /// The missing dependency.
        dependency: String,
    },

    /// Modules depend on each other in a cycle.
    #[error("circular dependency detected among modules: {0:?}")]
    CircularDependency(Vec<String>),

    /// `finish()` was called more than once.
    #[error("server was already built")]
    AlreadyBuilt,

    /// A module required an API that no module installed.
    #[error("required API '{0}' is not installed")]
    MissingApi(&'static str),

    /// A module required a global resource that no module installed.
    #[error("required global resource '{0}' is not installed")]
    MissingGlobal(&'static str),

    /// A module's `build()` or `ready()` failed.
    #[error("module '{module}' failed: {message}")]
    Module {
        /// The failing module.
        module: String,
        /// Description of the failure.
        message: String,
    },
}

impl ServerError {
    /// Creates a [`Module`](Self::Module) error from any displayable cause.
    pub fn module(module: impl Into<String>, cause: impl core::fmt::Display) -> Self {
        Self::Module {
            module: module.into(),
            message: cause.to_string(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Server
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuildState {
    NotStarted,
    Building,
    Built,
}

struct ModuleEntry {
    id: ModuleId,
    module: Box<dyn Module>,
    name: String,
}

/// Module orchestrator.
///
/// # Example
///
/// ```
/// use vela_system::api::API;
/// use vela_system::module::Module;
/// use vela_system::server::{Server, ServerError};
///
/// #[derive(Default)]
/// struct Names(Vec<String>);
/// impl API for Names {}
///
/// struct NamesModule;
/// impl Module for NamesModule {
///     fn build(&self, server: &mut Server) -> Result<(), ServerError> {
///         server.insert_api(Names::default());
///         Ok(())
///     }
/// }
///
/// let mut server = Server::new();
/// server.add_modules(NamesModule);
/// server.finish().unwrap();
/// assert!(server.contains_api::<Names>());
/// ```
pub struct Server {
    /// Read-only resources with server lifetime.
    globals: Globals,

    /// Build-time capability registries keyed by type.
    apis: HashMap<TypeId, BoxedAPI>,

    /// Modules queued for the next `finish()`.
    pending_modules: Vec<ModuleEntry>,

    /// Modules that have been built, in dependency order.
    built_modules: Vec<ModuleEntry>,

    /// Ids of every module added, for duplicate detection.
    module_ids: HashSet<ModuleId>,

    /// Errors recorded by `add_modules()`, reported by `finish()`.
    add_errors: Vec<ServerError>,

    build_state: BuildState,
}

impl core::fmt::Debug for Server {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Server")
            .field("modules", &self.module_names())
            .field("apis", &self.apis.len())
            .field("globals", &self.globals)
            .field("build_state", &self.build_state)
            .finish()
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl Server {
    /// Creates a new empty server.
    #[must_use]
    pub fn new() -> Self {
        Self {
            globals: Globals::new(),
            apis: HashMap::new(),
            pending_modules: Vec::new(),
            built_modules: Vec::new(),
            module_ids: HashSet::new(),
            add_errors: Vec::new(),
            build_state: BuildState::NotStarted,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Module Management
    // ─────────────────────────────────────────────────────────────────────────

    /// Adds one module or a [`ModuleGroupBuilder`](crate::module::ModuleGroupBuilder).
    ///
    /// Adding a unique module twice is recorded and reported by
    /// [`finish()`](Self::finish).
    pub fn add_modules<M: Modules>(&mut self, modules: M) -> &mut Self {
        modules.add_to_server(self);
        self
    }

    pub(crate) fn add_module_boxed(&mut self, id: ModuleId, module: Box<dyn Module>) {
        let name = module.name().to_string();

        if module.is_unique() && self.module_ids.contains(&id) {
            self.add_errors.push(ServerError::DuplicateModule(name));
            return;
        }
        self.module_ids.insert(id);

        self.pending_modules.push(ModuleEntry { id, module, name });
    }

    /// Returns true if a module of the given type has been added.
    #[must_use]
    pub fn has_module<M: Module>(&self) -> bool {
        self.module_ids.contains(&ModuleId::of::<M>())
    }

    /// Returns the names of all added modules, built ones first.
    #[must_use]
    pub fn module_names(&self) -> Vec<&str> {
        self.built_modules
            .iter()
            .chain(self.pending_modules.iter())
            .map(|entry| entry.name.as_str())
            .collect()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Global Resources
    // ─────────────────────────────────────────────────────────────────────────

    /// Inserts a global resource, returning the previous value of that type.
    pub fn insert_global<R: GlobalResource>(&mut self, resource: R) -> Option<R> {
        self.globals.insert(resource)
    }

    /// Returns true if a global resource of type `R` exists.
    #[must_use]
    pub fn contains_global<R: GlobalResource>(&self) -> bool {
        self.globals.contains::<R>()
    }

    /// Gets a reference to a global resource.
    #[must_use]
    pub fn get_global<R: GlobalResource>(&self) -> Option<&R> {
        self.globals.get::<R>()
    }

    /// Gets a global resource, failing with [`ServerError::MissingGlobal`].
    pub fn require_global<R: GlobalResource>(&self) -> Result<&R, ServerError> {
        self.get_global::<R>()
            .ok_or(ServerError::MissingGlobal(core::any::type_name::<R>()))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // APIs
    // ─────────────────────────────────────────────────────────────────────────

    /// Inserts an API, returning the previous value of that type.
    pub fn insert_api<A: API>(&mut self, api: A) -> Option<A> {
        let boxed: BoxedAPI = Box::new(api);
        self.apis
            .insert(TypeId::of::<A>(), boxed)
            .and_then(|old| old.downcast::<A>().ok())
            .map(|b| *b)
    }

    /// Gets a reference to an API.
    #[must_use]
    pub fn api<A: API>(&self) -> Option<&A> {
        self.apis
            .get(&TypeId::of::<A>())
            .and_then(|boxed| boxed.downcast_ref::<A>())
    }

    /// Gets an API, failing with [`ServerError::MissingApi`].
    pub fn require_api<A: API>(&self) -> Result<&A, ServerError> {
        self.api::<A>()
            .ok_or(ServerError::MissingApi(core::any::type_name::<A>()))
    }

    /// Returns true if an API of type `A` exists.
    #[must_use]
    pub fn contains_api<A: API>(&self) -> bool {
        self.apis.contains_key(&TypeId::of::<A>())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Returns true once [`finish()`](Self::finish) has completed.
    #[must_use]
    pub fn is_built(&self) -> bool {
        self.build_state == BuildState::Built
    }

    /// Builds and readies all modules in dependency order.
    ///
    /// # Errors
    ///
    /// - [`ServerError::DuplicateModule`] if a unique module was added twice
    /// - [`ServerError::MissingDependency`] / [`ServerError::CircularDependency`]
    /// - [`ServerError::AlreadyBuilt`] if called more than once
    /// - any error returned by a module's `build()` or `ready()`
    pub fn finish(&mut self) -> Result<(), ServerError> {
        if self.build_state != BuildState::NotStarted {
            return Err(ServerError::AlreadyBuilt);
        }
        if let Some(err) = self.add_errors.drain(..).next() {
            return Err(err);
        }

        let sorted = self.sort_modules_by_dependencies()?;

        self.build_state = BuildState::Building;
        for entry in &sorted {
            tracing::debug!(module = %entry.name, version = %entry.module.version(), "building module");
            entry.module.build(self)?;
        }
        for entry in &sorted {
            entry.module.ready(self)?;
        }
        self.built_modules.extend(sorted);

        self.build_state = BuildState::Built;
        Ok(())
    }

    /// Cleans up all built modules in reverse dependency order.
    pub fn cleanup(&mut self) {
        let built = core::mem::take(&mut self.built_modules);
        for entry in built.iter().rev() {
            tracing::debug!(module = %entry.name, "cleaning up module");
            entry.module.cleanup(self);
        }
        self.built_modules = built;
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internal: Dependency Resolution
    // ─────────────────────────────────────────────────────────────────────────

    /// Drains the pending modules in topological order (Kahn's algorithm).
    fn sort_modules_by_dependencies(&mut self) -> Result<Vec<ModuleEntry>, ServerError> {
        let n = self.pending_modules.len();
        let mut index_of: HashMap<ModuleId, Vec<usize>> = HashMap::new();
        for (i, entry) in self.pending_modules.iter().enumerate() {
            index_of.entry(entry.id).or_default().push(i);
        }

        let mut in_degree = vec![0usize; n];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];

        for (i, entry) in self.pending_modules.iter().enumerate() {
            for dep in entry.module.dependencies() {
                let Some(dep_indices) = index_of.get(&dep) else {
                    return Err(ServerError::MissingDependency {
                        module: entry.name.clone(),
                        dependency: dep.type_name().to_string(),
                    });
                };
                for &dep_idx in dep_indices {
                    dependents[dep_idx].push(i);
                    in_degree[i] += 1;
                }
            }
        }

        // Lowest index first keeps insertion order among independent modules.
        let mut ready: Vec<usize> = (0..n).filter(|&i| in_degree[i] == 0).rev().collect();
        let mut order = Vec::with_capacity(n);
        while let Some(idx) = ready.pop() {
            order.push(idx);
            for &dependent in &dependents[idx] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.push(dependent);
                }
            }
        }

        if order.len() != n {
            let in_cycle = in_degree
                .iter()
                .enumerate()
                .filter(|(_, deg)| **deg > 0)
                .map(|(i, _)| self.pending_modules[i].name.clone())
                .collect();
            return Err(ServerError::CircularDependency(in_cycle));
        }

        let mut slots: Vec<Option<ModuleEntry>> =
            core::mem::take(&mut self.pending_modules).into_iter().map(Some).collect();
        Ok(order.into_iter().filter_map(|i| slots[i].take()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    struct Recorder {
        label: &'static str,
        log: Log,
    }

    impl Recorder {
        fn record(&self, phase: &str) {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:{}", phase, self.label));
        }
    }

    struct First(Recorder);
    impl Module for First {
        fn build(&self, _server: &mut Server) -> Result<(), ServerError> {
            self.0.record("build");
            Ok(())
        }
        fn ready(&self, _server: &mut Server) -> Result<(), ServerError> {
            self.0.record("ready");
            Ok(())
        }
        fn cleanup(&self, _server: &mut Server) {
            self.0.record("cleanup");
        }
    }

    struct Second(Recorder);
    impl Module for Second {
        fn build(&self, _server: &mut Server) -> Result<(), ServerError> {
            self.0.record("build");
            Ok(())
        }
        fn ready(&self, _server: &mut Server) -> Result<(), ServerError> {
            self.0.record("ready");
            Ok(())
        }
        fn cleanup(&self, _server: &mut Server) {
            self.0.record("cleanup");
        }
        fn dependencies(&self) -> Vec<ModuleId> {
            vec![ModuleId::of::<First>()]
        }
    }

    fn recorder(label: &'static str, log: &Log) -> Recorder {
        Recorder {
            label,
            log: Arc::clone(log),
        }
    }

    #[test]
    fn lifecycle_runs_in_dependency_order() {
        let log: Log = Arc::default();
        let mut server = Server::new();
        // Added out of order on purpose.
        server.add_modules(Second(recorder("second", &log)));
        server.add_modules(First(recorder("first", &log)));
        server.finish().unwrap();
        server.cleanup();

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "build:first",
                "build:second",
                "ready:first",
                "ready:second",
                "cleanup:second",
                "cleanup:first",
            ]
        );
    }

    #[test]
    fn missing_dependency_is_an_error() {
        let log: Log = Arc::default();
        let mut server = Server::new();
        server.add_modules(Second(recorder("second", &log)));
        let err = server.finish().unwrap_err();
        assert!(matches!(err, ServerError::MissingDependency { .. }));
    }

    #[test]
    fn duplicate_unique_module_is_an_error() {
        let log: Log = Arc::default();
        let mut server = Server::new();
        server.add_modules(First(recorder("a", &log)));
        server.add_modules(First(recorder("b", &log)));
        let err = server.finish().unwrap_err();
        assert!(matches!(err, ServerError::DuplicateModule(_)));
    }

    #[test]
    fn finish_twice_is_an_error() {
        let mut server = Server::new();
        server.finish().unwrap();
        assert!(matches!(server.finish(), Err(ServerError::AlreadyBuilt)));
    }

    struct CycleA;
    struct CycleB;
    impl Module for CycleA {
        fn build(&self, _server: &mut Server) -> Result<(), ServerError> {
            Ok(())
        }
        fn dependencies(&self) -> Vec<ModuleId> {
            vec![ModuleId::of::<CycleB>()]
        }
    }
    impl Module for CycleB {
        fn build(&self, _server: &mut Server) -> Result<(), ServerError> {
            Ok(())
        }
        fn dependencies(&self) -> Vec<ModuleId> {
            vec![ModuleId::of::<CycleA>()]
        }
    }

    #[test]
    fn cycle_is_detected() {
        let mut server = Server::new();
        server.add_modules(CycleA).add_modules(CycleB);
        let Err(ServerError::CircularDependency(names)) = server.finish() else {
            panic!("expected a cycle error");
        };
        assert_eq!(names.len(), 2);
    }

    struct Failing;
    impl Module for Failing {
        fn build(&self, _server: &mut Server) -> Result<(), ServerError> {
            Err(ServerError::module("failing", "port already bound"))
        }
    }

    #[test]
    fn build_error_aborts_finish() {
        let mut server = Server::new();
        server.add_modules(Failing);
        let err = server.finish().unwrap_err();
        assert_eq!(err.to_string(), "module 'failing' failed: port already bound");
        assert!(!server.is_built());
    }

    struct Registry(Mutex<Vec<&'static str>>);
    impl API for Registry {}

    struct Installs;
    impl Module for Installs {
        fn build(&self, server: &mut Server) -> Result<(), ServerError> {
            server.insert_api(Registry(Mutex::new(Vec::new())));
            Ok(())
        }
    }

    struct Uses;
    impl Module for Uses {
        fn build(&self, _server: &mut Server) -> Result<(), ServerError> {
            Ok(())
        }
        fn ready(&self, server: &mut Server) -> Result<(), ServerError> {
            server.require_api::<Registry>()?.0.lock().unwrap().push("uses");
            Ok(())
        }
        fn dependencies(&self) -> Vec<ModuleId> {
            vec![ModuleId::of::<Installs>()]
        }
    }

    #[test]
    fn apis_are_shared_between_modules() {
        let mut server = Server::new();
        server.add_modules(Uses).add_modules(Installs);
        server.finish().unwrap();
        let registry = server.api::<Registry>().unwrap();
        assert_eq!(*registry.0.lock().unwrap(), vec!["uses"]);
    }

    #[test]
    fn require_api_reports_missing() {
        let server = Server::new();
        assert!(matches!(
            server.require_api::<Registry>(),
            Err(ServerError::MissingApi(_))
        ));
    }
}
