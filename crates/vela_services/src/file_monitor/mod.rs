//! File system monitor.
//!
//! The monitor is a built-in [`Service`] named `file-monitor` with methods
//! `watch`, `unwatch` and `list`. Changes are published on the event bus as
//! [`FILE_CREATED`], [`FILE_MODIFIED`] and [`FILE_DELETED`] with payload
//! `{"path": "..."}`.
//!
//! # Backends
//!
//! One backend is chosen when the monitor is created:
//!
//! - [`MonitorBackend::Native`] - kernel notifications (`inotify`), Linux only
//! - [`MonitorBackend::Polling`] - rescans each watched path every poll
//!   interval and diffs it against the previous scan, emitting exactly one
//!   event per created, modified or deleted entry
//!
//! [`MonitorBackend::detect`] picks `Native` where available. Requesting
//! `Native` elsewhere falls back to `Polling`.

#[cfg(target_os = "linux")]
mod inotify;
mod polling;
mod snapshot;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use vela_events::{Event, EventBus};
use vela_system::api::API;

pub use snapshot::Snapshot;

use crate::error::ServiceError;
use crate::service::Service;

/// Registry name of the file monitor.
pub const FILE_MONITOR_SERVICE: &str = "file-monitor";
/// Event kind for a new entry.
pub const FILE_CREATED: &str = "file.created";
/// Event kind for a changed entry.
pub const FILE_MODIFIED: &str = "file.modified";
/// Event kind for a removed entry.
pub const FILE_DELETED: &str = "file.deleted";

/// What happened to a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileChangeKind {
    /// The entry appeared.
    Created,
    /// The entry's contents or metadata changed.
    Modified,
    /// The entry disappeared.
    Deleted,
}

impl FileChangeKind {
    /// The event kind published for this change.
    #[must_use]
    pub fn event_kind(self) -> &'static str {
        match self {
            Self::Created => FILE_CREATED,
            Self::Modified => FILE_MODIFIED,
            Self::Deleted => FILE_DELETED,
        }
    }
}

/// One observed change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    /// What happened.
    pub kind: FileChangeKind,
    /// Affected path.
    pub path: PathBuf,
}

impl FileChange {
    /// Creates a change record.
    #[must_use]
    pub fn new(kind: FileChangeKind, path: PathBuf) -> Self {
        Self { kind, path }
    }

    /// Converts the change to its bus event.
    #[must_use]
    pub fn into_event(self) -> Event {
        Event::new(
            self.kind.event_kind(),
            json!({ "path": self.path.display().to_string() }),
        )
    }
}

/// File monitor implementation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorBackend {
    /// Kernel change notifications.
    Native,
    /// Periodic snapshot comparison.
    Polling,
}

impl MonitorBackend {
    /// The preferred backend on this platform.
    #[must_use]
    pub fn detect() -> Self {
        if cfg!(target_os = "linux") {
            Self::Native
        } else {
            Self::Polling
        }
    }

    fn available(self) -> Self {
        match self {
            Self::Native if !cfg!(target_os = "linux") => Self::Polling,
            other => other,
        }
    }
}

/// Default polling interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Construction options for [`FileMonitor`].
#[derive(Debug, Clone, Copy)]
pub struct MonitorOptions {
    /// Requested backend.
    pub backend: MonitorBackend,
    /// Rescan period of the polling backend.
    pub poll_interval: Duration,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            backend: MonitorBackend::detect(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

struct MonitorInner {
    bus: EventBus,
    backend: MonitorBackend,
    poll_interval: Duration,
    shutdown: CancellationToken,
    watches: Mutex<IndexMap<PathBuf, CancellationToken>>,
}

impl Drop for MonitorInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// The `file-monitor` built-in service.
///
/// Cheap to clone; clones share the watches. Watch loops stop when the
/// service shuts down or the last clone is dropped.
#[derive(Clone)]
pub struct FileMonitor {
    inner: Arc<MonitorInner>,
}

impl API for FileMonitor {}

impl core::fmt::Debug for FileMonitor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FileMonitor")
            .field("backend", &self.inner.backend)
            .field("poll_interval", &self.inner.poll_interval)
            .field("watched", &self.watched())
            .finish()
    }
}

impl FileMonitor {
    /// Creates a monitor publishing on `bus`.
    ///
    /// A `Native` request on a platform without it selects `Polling`.
    #[must_use]
    pub fn new(bus: EventBus, options: MonitorOptions) -> Self {
        let backend = options.backend.available();
        tracing::debug!(?backend, "file monitor backend selected");
        Self {
            inner: Arc::new(MonitorInner {
                bus,
                backend,
                poll_interval: options.poll_interval,
                shutdown: CancellationToken::new(),
                watches: Mutex::new(IndexMap::new()),
            }),
        }
    }

    /// The selected backend.
    #[must_use]
    pub fn backend(&self) -> MonitorBackend {
        self.inner.backend
    }

    /// Starts watching `path`. Watching an already watched path is a no-op.
    ///
    /// Entries present when the watch starts produce no events. Must be
    /// called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// I/O errors resolving or registering the path, or a rejected spawn
    /// during shutdown.
    pub fn watch(&self, path: impl AsRef<Path>) -> Result<PathBuf, ServiceError> {
        let canonical = path.as_ref().canonicalize()?;
        let inner = &self.inner;
        let mut watches = inner.watches.lock();
        if watches.contains_key(&canonical) {
            return Ok(canonical);
        }

        let token = inner.shutdown.child_token();
        let bus = inner.bus.clone();
        let work = match inner.backend {
            #[cfg(target_os = "linux")]
            MonitorBackend::Native => {
                let watcher = inotify::Watcher::new(&canonical)?;
                inotify::run(watcher, bus, token.clone()).boxed()
            }
            _ => {
                let baseline = Snapshot::scan(&canonical)?;
                polling::run(
                    canonical.clone(),
                    baseline,
                    inner.poll_interval,
                    bus,
                    token.clone(),
                )
                .boxed()
            }
        };

        inner
            .bus
            .spawner()
            .spawn_detached(&format!("file-monitor:{}", canonical.display()), work)
            .map_err(|err| ServiceError::failed(FILE_MONITOR_SERVICE, err))?;
        tracing::info!(path = %canonical.display(), backend = ?inner.backend, "watch started");
        watches.insert(canonical.clone(), token);
        Ok(canonical)
    }

    /// Stops watching `path`. Returns false if it was not watched.
    pub fn unwatch(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        match self.inner.watches.lock().shift_remove(&canonical) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Watched paths.
    #[must_use]
    pub fn watched(&self) -> Vec<PathBuf> {
        self.inner.watches.lock().keys().cloned().collect()
    }

    fn path_arg(method: &str, args: &Value) -> Result<PathBuf, ServiceError> {
        args.get("path")
            .and_then(Value::as_str)
            .map(PathBuf::from)
            .ok_or_else(|| {
                ServiceError::invalid_arguments(FILE_MONITOR_SERVICE, method, "expected {\"path\": string}")
            })
    }
}

#[async_trait]
impl Service for FileMonitor {
    fn name(&self) -> &str {
        FILE_MONITOR_SERVICE
    }

    fn methods(&self) -> Vec<String> {
        vec!["watch".into(), "unwatch".into(), "list".into()]
    }

    async fn invoke(&self, method: &str, args: Value) -> Result<Value, ServiceError> {
        match method {
            "watch" => {
                let path = self.watch(Self::path_arg(method, &args)?)?;
                Ok(json!({ "path": path.display().to_string() }))
            }
            "unwatch" => {
                let removed = self.unwatch(Self::path_arg(method, &args)?);
                Ok(json!({ "removed": removed }))
            }
            "list" => Ok(json!(
                self.watched()
                    .iter()
                    .map(|path| path.display().to_string())
                    .collect::<Vec<_>>()
            )),
            _ => Err(ServiceError::UnknownMethod {
                service: FILE_MONITOR_SERVICE.to_string(),
                method: method.to_string(),
            }),
        }
    }

    fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.watches.lock().clear();
    }
}
