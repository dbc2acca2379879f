//! Lazy, idempotent plugin loading and the global name table.
//!
//! # Loading
//!
//! [`PluginHost::load`] canonicalizes the path and keeps one slot per
//! canonical path. The slot's own lock serializes loaders of the same file,
//! so concurrent first loads initialize the plugin exactly once while loads
//! of other files proceed in parallel.
//!
//! # Claims
//!
//! Service names, action verbs and qualifier names are global. A plugin's
//! names are claimed atomically when it loads; built-in services reserve
//! theirs with [`PluginHost::reserve_builtin`]. A second claim of the same
//! `(kind, name)` fails with [`PluginError::DuplicateName`] and the conflicting
//! plugin is not registered. Process plugins loaded with
//! [`PluginHost::load_process`] claim their names in the same table.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use hashbrown::HashMap;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use vela_system::api::API;

use crate::error::PluginError;
use crate::handle::PluginHandle;
use crate::library::{DlopenLoader, LibraryLoader};
use crate::metadata::PluginMetadata;
use crate::process::{ProcessHandle, ProcessPlugin};

/// Namespace of a claimed name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ClaimKind {
    /// Service registry names.
    Service,
    /// Action verbs.
    Action,
    /// Qualifier names.
    Qualifier,
}

impl core::fmt::Display for ClaimKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            Self::Service => "service",
            Self::Action => "action",
            Self::Qualifier => "qualifier",
        })
    }
}

/// Owner of a claimed name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameOwner {
    /// A service registered in-process.
    Builtin,
    /// A loaded plugin.
    Plugin {
        /// Plugin name.
        name: String,
        /// Canonical library path.
        path: PathBuf,
    },
    /// A process plugin.
    Process {
        /// Plugin name.
        name: String,
        /// Program spawned per call.
        program: PathBuf,
    },
}

impl core::fmt::Display for NameOwner {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Builtin => f.write_str("a built-in service"),
            Self::Plugin { name, path } => write!(f, "plugin '{name}' ({})", path.display()),
            Self::Process { name, program } => {
                write!(f, "process plugin '{name}' ({})", program.display())
            }
        }
    }
}

type Slot = Arc<Mutex<Option<Arc<PluginHandle>>>>;

struct HostInner {
    loader: Arc<dyn LibraryLoader>,
    slots: Mutex<HashMap<PathBuf, Slot>>,
    processes: Mutex<IndexMap<String, Arc<ProcessHandle>>>,
    claims: RwLock<IndexMap<(ClaimKind, String), NameOwner>>,
    loads: AtomicUsize,
    call_timeout: RwLock<Option<Duration>>,
}

/// Loads plugins and owns the global name table.
///
/// Cheap to clone; clones share the cache.
///
/// # Example
///
/// ```no_run
/// use vela_plugins::PluginHost;
///
/// let host = PluginHost::new();
/// let csv = host.load("plugins/libcsv.so")?;
/// let rows = csv.execute("parse-csv", &serde_json::json!({"data": "a,b\n1,2"}))?;
/// # Ok::<(), vela_plugins::PluginError>(())
/// ```
#[derive(Clone)]
pub struct PluginHost {
    inner: Arc<HostInner>,
}

impl API for PluginHost {}

impl Default for PluginHost {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for PluginHost {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PluginHost")
            .field("plugins", &self.loaded_paths())
            .field("processes", &self.inner.processes.lock().keys().collect::<Vec<_>>())
            .field("claims", &self.inner.claims.read().len())
            .finish()
    }
}

impl PluginHost {
    /// Creates a host using the platform loader.
    #[must_use]
    pub fn new() -> Self {
        Self::with_loader(Arc::new(DlopenLoader))
    }

    /// Creates a host using a custom loader.
    #[must_use]
    pub fn with_loader(loader: Arc<dyn LibraryLoader>) -> Self {
        Self {
            inner: Arc::new(HostInner {
                loader,
                slots: Mutex::new(HashMap::new()),
                processes: Mutex::new(IndexMap::new()),
                claims: RwLock::new(IndexMap::new()),
                loads: AtomicUsize::new(0),
                call_timeout: RwLock::new(None),
            }),
        }
    }

    /// Sets the default time limit for asynchronous plugin calls.
    pub fn set_call_timeout(&self, timeout: Option<Duration>) {
        *self.inner.call_timeout.write() = timeout;
    }

    /// Default time limit for asynchronous plugin calls.
    #[must_use]
    pub fn call_timeout(&self) -> Option<Duration> {
        *self.inner.call_timeout.read()
    }

    /// Loads the plugin at `path`, or returns the cached handle.
    ///
    /// # Errors
    ///
    /// - [`PluginError::NotFound`] if the path does not resolve
    /// - loader errors ([`PluginError::Load`], [`PluginError::MissingSymbol`])
    /// - [`PluginError::InvalidMetadata`] from `plugin_init`
    /// - [`PluginError::DuplicateName`] if a declared name is already owned
    ///
    /// A failed load leaves nothing cached; a later call retries.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<Arc<PluginHandle>, PluginError> {
        let requested = path.as_ref();
        let canonical = requested
            .canonicalize()
            .map_err(|_| PluginError::NotFound(requested.to_path_buf()))?;

        let slot = Arc::clone(
            self.inner
                .slots
                .lock()
                .entry(canonical.clone())
                .or_default(),
        );
        let mut slot = slot.lock();
        if let Some(handle) = slot.as_ref() {
            tracing::trace!(path = %canonical.display(), "plugin cache hit");
            return Ok(Arc::clone(handle));
        }

        let library = self.inner.loader.open(&canonical)?;
        self.inner.loads.fetch_add(1, Ordering::Relaxed);
        let handle = Arc::new(PluginHandle::initialize(&library)?);
        self.claim(
            handle.name(),
            handle.metadata(),
            NameOwner::Plugin {
                name: handle.name().to_string(),
                path: handle.path().to_path_buf(),
            },
        )?;

        tracing::info!(
            plugin = handle.name(),
            path = %canonical.display(),
            "plugin registered"
        );
        *slot = Some(Arc::clone(&handle));
        Ok(handle)
    }

    /// Loads every path in order, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// The first [`Self::load`] error.
    pub fn load_all<I, P>(&self, paths: I) -> Result<Vec<Arc<PluginHandle>>, PluginError>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        paths.into_iter().map(|path| self.load(path)).collect()
    }

    /// The cached handle for `path`, without loading.
    #[must_use]
    pub fn get(&self, path: impl AsRef<Path>) -> Option<Arc<PluginHandle>> {
        let canonical = path.as_ref().canonicalize().ok()?;
        self.cached(&canonical)
    }

    /// Returns true if `path` is loaded.
    #[must_use]
    pub fn is_loaded(&self, path: impl AsRef<Path>) -> bool {
        self.get(path).is_some()
    }

    /// Every loaded plugin.
    #[must_use]
    pub fn handles(&self) -> Vec<Arc<PluginHandle>> {
        let slots: Vec<Slot> = self.inner.slots.lock().values().cloned().collect();
        slots
            .iter()
            .filter_map(|slot| slot.lock().as_ref().map(Arc::clone))
            .collect()
    }

    /// Canonical paths of every loaded plugin.
    #[must_use]
    pub fn loaded_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self
            .handles()
            .iter()
            .map(|handle| handle.path().to_path_buf())
            .collect();
        paths.sort();
        paths
    }

    /// Initializes a process plugin and claims its declared names.
    ///
    /// Process plugins are identified by name. Loading the same command line
    /// again returns the registered handle without spawning `init`.
    ///
    /// # Errors
    ///
    /// - [`PluginError::DuplicatePlugin`] if the name is registered for a
    ///   different command line
    /// - [`ProcessPlugin::init`] errors
    /// - [`PluginError::DuplicateName`] if a declared name is already owned
    pub async fn load_process(
        &self,
        plugin: ProcessPlugin,
    ) -> Result<Arc<ProcessHandle>, PluginError> {
        if let Some(existing) = self.registered_process(&plugin)? {
            return Ok(existing);
        }

        let handle = Arc::new(ProcessHandle::initialize(plugin).await?);

        let mut processes = self.inner.processes.lock();
        // Another caller may have finished first while `init` ran.
        if let Some(existing) = processes.get(handle.name()) {
            return if existing.runs(handle.plugin()) {
                Ok(Arc::clone(existing))
            } else {
                Err(duplicate_process(existing))
            };
        }
        self.claim(
            handle.name(),
            handle.metadata(),
            NameOwner::Process {
                name: handle.name().to_string(),
                program: handle.plugin().program().to_path_buf(),
            },
        )?;
        tracing::info!(
            plugin = handle.name(),
            program = %handle.plugin().program().display(),
            "process plugin registered"
        );
        processes.insert(handle.name().to_string(), Arc::clone(&handle));
        Ok(handle)
    }

    /// The registered process plugin called `name`.
    #[must_use]
    pub fn process(&self, name: &str) -> Option<Arc<ProcessHandle>> {
        self.inner.processes.lock().get(name).cloned()
    }

    /// Every registered process plugin, in registration order.
    #[must_use]
    pub fn process_handles(&self) -> Vec<Arc<ProcessHandle>> {
        self.inner.processes.lock().values().cloned().collect()
    }

    fn registered_process(
        &self,
        plugin: &ProcessPlugin,
    ) -> Result<Option<Arc<ProcessHandle>>, PluginError> {
        match self.process(plugin.name()) {
            Some(existing) if existing.runs(plugin) => Ok(Some(existing)),
            Some(existing) => Err(duplicate_process(&existing)),
            None => Ok(None),
        }
    }

    /// Number of times a library was actually opened and initialized.
    #[must_use]
    pub fn load_count(&self) -> usize {
        self.inner.loads.load(Ordering::Relaxed)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Claims
    // ─────────────────────────────────────────────────────────────────────────

    /// Reserves `name` for a built-in.
    ///
    /// # Errors
    ///
    /// [`PluginError::DuplicateName`] if the name is already owned.
    pub fn reserve_builtin(&self, kind: ClaimKind, name: &str) -> Result<(), PluginError> {
        let mut claims = self.inner.claims.write();
        let key = (kind, name.to_string());
        if let Some(owner) = claims.get(&key) {
            return Err(PluginError::DuplicateName {
                kind,
                name: name.to_string(),
                owner: owner.clone(),
            });
        }
        claims.insert(key, NameOwner::Builtin);
        Ok(())
    }

    /// Releases a built-in reservation. Returns false if `name` was not a
    /// built-in claim.
    pub fn release_builtin(&self, kind: ClaimKind, name: &str) -> bool {
        let mut claims = self.inner.claims.write();
        let key = (kind, name.to_string());
        if claims.get(&key) == Some(&NameOwner::Builtin) {
            claims.shift_remove(&key);
            true
        } else {
            false
        }
    }

    /// Current owner of `name`.
    #[must_use]
    pub fn owner_of(&self, kind: ClaimKind, name: &str) -> Option<NameOwner> {
        self.inner
            .claims
            .read()
            .get(&(kind, name.to_string()))
            .cloned()
    }

    /// The library plugin owning `name`, if one owns it.
    #[must_use]
    pub fn plugin_for(&self, kind: ClaimKind, name: &str) -> Option<Arc<PluginHandle>> {
        match self.owner_of(kind, name)? {
            NameOwner::Plugin { path, .. } => self.cached(&path),
            NameOwner::Builtin | NameOwner::Process { .. } => None,
        }
    }

    /// The process plugin owning `name`, if one owns it.
    #[must_use]
    pub fn process_for(&self, kind: ClaimKind, name: &str) -> Option<Arc<ProcessHandle>> {
        match self.owner_of(kind, name)? {
            NameOwner::Process { name, .. } => self.process(&name),
            NameOwner::Builtin | NameOwner::Plugin { .. } => None,
        }
    }

    /// Every claimed name of `kind`, in claim order.
    #[must_use]
    pub fn claimed(&self, kind: ClaimKind) -> Vec<String> {
        self.inner
            .claims
            .read()
            .keys()
            .filter(|(claimed, _)| *claimed == kind)
            .map(|(_, name)| name.clone())
            .collect()
    }

    fn claim(
        &self,
        plugin: &str,
        metadata: &PluginMetadata,
        owner: NameOwner,
    ) -> Result<(), PluginError> {
        let wanted = metadata.claims();
        let mut claims = self.inner.claims.write();
        for (kind, name) in &wanted {
            if let Some(owner) = claims.get(&(*kind, name.clone())) {
                tracing::error!(
                    plugin,
                    %kind,
                    name,
                    %owner,
                    "duplicate name, plugin rejected"
                );
                return Err(PluginError::DuplicateName {
                    kind: *kind,
                    name: name.clone(),
                    owner: owner.clone(),
                });
            }
        }
        for key in wanted {
            claims.insert(key, owner.clone());
        }
        Ok(())
    }

    fn cached(&self, canonical: &Path) -> Option<Arc<PluginHandle>> {
        let slot = self.inner.slots.lock().get(canonical).cloned()?;
        let handle = slot.lock().as_ref().map(Arc::clone);
        handle
    }
}

fn duplicate_process(existing: &ProcessHandle) -> PluginError {
    PluginError::DuplicatePlugin {
        name: existing.name().to_string(),
        program: existing.plugin().program().to_path_buf(),
    }
}
