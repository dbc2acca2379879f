//! The runtime object and its blocking event loop.
//!
//! A [`Runtime`] is constructed explicitly and owns everything it runs on:
//! the tokio thread pool, the [`Scheduler`], the [`EventBus`], the
//! [`PluginHost`] and the module [`Server`]. Several runtimes can coexist in
//! one process.
//!
//! # Lifecycle
//!
//! 1. [`RuntimeBuilder::build`] creates the pool, installs the core APIs and
//!    builds every module inside the pool's context
//! 2. Work arrives through services, the bus, [`Runtime::spawn`] or the
//!    synchronous bridge [`Runtime::block_on`]
//! 3. [`Runtime::run_event_loop_blocking`] parks the calling thread until
//!    shutdown is requested (API call, flag, SIGINT or SIGTERM), then cancels
//!    all tasks, waits out the grace period, cleans up modules and releases
//!    the pool

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::time::MissedTickBehavior;
use vela_events::{Event, EventBus, Repositories};
use vela_plugins::{PluginHost, ProcessPlugin};
use vela_services::{ServiceRegistry, ServicesModule};
use vela_system::module::{Module, ModuleId, Modules};
use vela_system::server::{Server, ServerError};

use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::handlers::HandlerRegistry;
use crate::scheduler::{CancelReport, Scheduler};
use crate::signals::ShutdownSignals;
use crate::task::TaskHandle;

/// Published when the event loop starts waiting for work.
pub const RUNTIME_STARTED: &str = "runtime.started";

// ─────────────────────────────────────────────────────────────────────────────
// Shutdown report
// ─────────────────────────────────────────────────────────────────────────────

/// What ended the event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// [`Runtime::request_shutdown`] or the shutdown flag.
    Requested,
    /// A process signal.
    Signal(&'static str),
}

impl core::fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Requested => f.write_str("requested"),
            Self::Signal(name) => f.write_str(name),
        }
    }
}

/// Summary returned by [`Runtime::run_event_loop_blocking`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Why the loop ended.
    pub reason: ShutdownReason,
    /// Live tasks cancelled at shutdown.
    pub cancelled: usize,
    /// Tasks aborted after the grace period.
    pub aborted: usize,
    /// Time spent in the shutdown protocol.
    pub elapsed: Duration,
}

// ─────────────────────────────────────────────────────────────────────────────
// HandlersModule
// ─────────────────────────────────────────────────────────────────────────────

/// Installs the [`HandlerRegistry`] API.
///
/// Added automatically by [`RuntimeBuilder::build`] unless present.
#[derive(Debug, Default, Clone, Copy)]
pub struct HandlersModule;

impl Module for HandlersModule {
    fn build(&self, server: &mut Server) -> Result<(), ServerError> {
        let registry = HandlerRegistry::new(
            server.require_api::<EventBus>()?.clone(),
            server.require_api::<ServiceRegistry>()?.clone(),
            server.require_api::<Scheduler>()?.clone(),
        );
        server.insert_api(registry);
        Ok(())
    }

    fn name(&self) -> &str {
        "handlers"
    }

    fn dependencies(&self) -> Vec<ModuleId> {
        vec![ModuleId::of::<ServicesModule>()]
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// RuntimeBuilder
// ─────────────────────────────────────────────────────────────────────────────

/// Configures and builds a [`Runtime`].
///
/// # Example
///
/// ```no_run
/// use vela_runtime::{Runtime, RuntimeConfig};
/// use vela_services::FileMonitorModule;
///
/// let runtime = Runtime::builder()
///     .with_config(RuntimeConfig::from_env()?)
///     .with_plugin("plugins/libcounter.so")
///     .add_modules(FileMonitorModule::new().watch("/srv/inbox"))
///     .build()?;
/// let report = runtime.run_event_loop_blocking()?;
/// println!("stopped: {}", report.reason);
/// # Ok::<(), vela_runtime::RuntimeError>(())
/// ```
#[derive(Debug, Default)]
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    server: Server,
    plugins: Vec<PathBuf>,
}

impl RuntimeBuilder {
    /// Starts from the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the configuration.
    #[must_use]
    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Loads the plugin at `path` during startup.
    #[must_use]
    pub fn with_plugin(mut self, path: impl Into<PathBuf>) -> Self {
        self.plugins.push(path.into());
        self
    }

    /// Adds modules built with the runtime.
    #[must_use]
    pub fn add_modules<M: Modules>(mut self, modules: M) -> Self {
        self.server.add_modules(modules);
        self
    }

    /// Creates the pool and builds every module.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::Io`] if the pool cannot be created,
    /// [`RuntimeError::Startup`] for module failures (including plugins that
    /// fail to load or claim a taken name).
    pub fn build(self) -> Result<Runtime, RuntimeError> {
        let Self {
            config,
            mut server,
            plugins: plugin_paths,
        } = self;

        let mut pool = tokio::runtime::Builder::new_multi_thread();
        pool.worker_threads(config.worker_threads)
            .thread_name(config.thread_name.clone())
            .enable_all();
        if let Some(threads) = config.max_blocking_threads {
            pool.max_blocking_threads(threads);
        }
        let pool = pool.build()?;
        let handle = pool.handle().clone();

        let scheduler = Scheduler::new(handle.clone());
        let bus = EventBus::new(Arc::new(scheduler.clone()));
        let repositories = Repositories::new(bus.clone());
        let plugins = PluginHost::new();
        plugins.set_call_timeout(config.plugin_call_timeout);

        server.insert_global(config.clone());
        server.insert_api(scheduler.clone());
        server.insert_api(bus.clone());
        server.insert_api(repositories.clone());
        server.insert_api(plugins.clone());

        if server.has_module::<ServicesModule>() {
            if !plugin_paths.is_empty() {
                pool.shutdown_background();
                return Err(RuntimeError::invalid_config(
                    "plugins",
                    "a ServicesModule was added explicitly; configure plugins on it",
                ));
            }
        } else {
            let services = plugin_paths
                .into_iter()
                .fold(ServicesModule::new(), ServicesModule::with_plugin);
            server.add_modules(services);
        }
        if !server.has_module::<HandlersModule>() {
            server.add_modules(HandlersModule);
        }

        let built = {
            let _entered = handle.enter();
            server.finish().and_then(|()| {
                Ok((
                    server.require_api::<ServiceRegistry>()?.clone(),
                    server.require_api::<HandlerRegistry>()?.clone(),
                ))
            })
        };
        let (services, handlers) = match built {
            Ok(apis) => apis,
            Err(err) => {
                tracing::error!(error = %err, "runtime startup failed");
                server.cleanup();
                pool.shutdown_background();
                return Err(err.into());
            }
        };

        tracing::info!(
            workers = config.worker_threads,
            modules = ?server.module_names(),
            "runtime started"
        );
        Ok(Runtime {
            pool: Mutex::new(Some(pool)),
            handle,
            scheduler,
            bus,
            repositories,
            plugins,
            services,
            handlers,
            config,
            server: Mutex::new(server),
            stopped: AtomicBool::new(false),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Runtime
// ─────────────────────────────────────────────────────────────────────────────

/// An explicitly owned runtime instance.
///
/// `Runtime` is `Send + Sync`: any thread may spawn, bridge or request
/// shutdown while another thread runs the event loop.
pub struct Runtime {
    pool: Mutex<Option<tokio::runtime::Runtime>>,
    handle: Handle,
    scheduler: Scheduler,
    bus: EventBus,
    repositories: Repositories,
    plugins: PluginHost,
    services: ServiceRegistry,
    handlers: HandlerRegistry,
    config: RuntimeConfig,
    server: Mutex<Server>,
    stopped: AtomicBool,
}

impl core::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .field("scheduler", &self.scheduler)
            .field("services", &self.services)
            .finish_non_exhaustive()
    }
}

impl Runtime {
    /// Starts a [`RuntimeBuilder`].
    #[must_use]
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Builds a runtime with `config` and the default modules.
    ///
    /// # Errors
    ///
    /// See [`RuntimeBuilder::build`].
    pub fn new(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        RuntimeBuilder::new().with_config(config).build()
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// The pool handle.
    #[must_use]
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// The task scheduler.
    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// The event bus.
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Reactive collections publishing on the bus.
    #[must_use]
    pub fn repositories(&self) -> &Repositories {
        &self.repositories
    }

    /// The plugin host.
    #[must_use]
    pub fn plugins(&self) -> &PluginHost {
        &self.plugins
    }

    /// The service registry.
    #[must_use]
    pub fn services(&self) -> &ServiceRegistry {
        &self.services
    }

    /// Named handlers.
    #[must_use]
    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    /// Runs `f` with the module server, e.g. to read a global or an API.
    pub fn with_server<R>(&self, f: impl FnOnce(&Server) -> R) -> R {
        f(&self.server.lock())
    }

    /// Spawns a tracked task.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::ShuttingDown`] after shutdown was requested.
    pub fn spawn<F>(&self, name: &str, work: F) -> Result<TaskHandle, RuntimeError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.scheduler.spawn(name, work)
    }

    /// Synchronous bridge: runs `work` on the pool and blocks for its output.
    ///
    /// # Errors
    ///
    /// See [`Scheduler::block_on`].
    pub fn block_on<F>(&self, work: F) -> Result<F::Output, RuntimeError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.scheduler.block_on("bridge", work)
    }

    /// Registers a process plugin from non-async code.
    ///
    /// Returns the service names it declares.
    ///
    /// # Errors
    ///
    /// Bridge errors, or [`RuntimeError::Service`] from
    /// [`ServiceRegistry::load_process_plugin`].
    pub fn load_process_plugin(&self, plugin: ProcessPlugin) -> Result<Vec<String>, RuntimeError> {
        let services = self.services.clone();
        let names = self.scheduler.block_on("load-process-plugin", async move {
            services.load_process_plugin(plugin).await
        })??;
        Ok(names)
    }

    /// Invokes a named handler from non-async code.
    ///
    /// # Errors
    ///
    /// See [`HandlerRegistry::invoke_blocking`].
    pub fn invoke_handler(&self, name: &str, args: Value) -> Result<Value, RuntimeError> {
        self.handlers.invoke_blocking(name, args)
    }

    /// Requests shutdown. Idempotent and callable from any thread.
    pub fn request_shutdown(&self) {
        self.scheduler.request_shutdown();
    }

    /// Returns true once shutdown was requested.
    #[must_use]
    pub fn is_shutdown_requested(&self) -> bool {
        self.scheduler.is_shutdown_requested()
    }

    /// Blocks the calling thread until shutdown, then shuts down.
    ///
    /// Returns once tasks have been cancelled (aborting those that outlive
    /// the grace period), modules cleaned up and the pool released. Spawns
    /// are rejected from the moment shutdown is requested.
    ///
    /// # Errors
    ///
    /// - [`RuntimeError::BridgeUnsupported`] from a current-thread runtime
    /// - [`RuntimeError::ShuttingDown`] if the loop already ran
    /// - [`RuntimeError::Io`] if signal handlers cannot be installed
    pub fn run_event_loop_blocking(&self) -> Result<ShutdownReport, RuntimeError> {
        if let Ok(current) = Handle::try_current()
            && matches!(current.runtime_flavor(), RuntimeFlavor::CurrentThread)
        {
            return Err(RuntimeError::BridgeUnsupported);
        }
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Err(RuntimeError::ShuttingDown("event loop".to_string()));
        }

        tokio::task::block_in_place(|| {
            let reason = match self.handle.block_on(self.wait_for_shutdown()) {
                Ok(reason) => reason,
                Err(err) => {
                    self.release(Duration::ZERO);
                    return Err(err);
                }
            };

            let started = Instant::now();
            self.scheduler.request_shutdown();
            let grace = self.config.shutdown_grace;
            let CancelReport { cancelled, aborted } =
                self.handle.block_on(self.scheduler.cancel_all(grace));
            self.release(grace.saturating_sub(started.elapsed()));

            let report = ShutdownReport {
                reason,
                cancelled,
                aborted,
                elapsed: started.elapsed(),
            };
            tracing::info!(
                reason = %report.reason,
                cancelled,
                aborted,
                elapsed = ?report.elapsed,
                "runtime stopped"
            );
            Ok(report)
        })
    }

    async fn wait_for_shutdown(&self) -> Result<ShutdownReason, RuntimeError> {
        let mut signals = if self.config.handle_signals {
            Some(ShutdownSignals::new()?)
        } else {
            None
        };
        let flag = self.scheduler.shutdown_flag();
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(
            poll_interval = ?self.config.poll_interval,
            signals = signals.is_some(),
            "event loop running"
        );
        self.bus.publish(Event::new(
            RUNTIME_STARTED,
            json!({
                "workers": self.config.worker_threads,
                "pollIntervalMs": u64::try_from(self.config.poll_interval.as_millis()).unwrap_or(u64::MAX),
            }),
        ));

        loop {
            tokio::select! {
                () = self.scheduler.shutdown_requested() => return Ok(ShutdownReason::Requested),
                name = next_signal(&mut signals) => {
                    tracing::info!(signal = name, "shutdown signal received");
                    return Ok(ShutdownReason::Signal(name));
                }
                _ = ticker.tick() => {
                    if flag.load(Ordering::SeqCst) {
                        return Ok(ShutdownReason::Requested);
                    }
                }
            }
        }
    }

    /// Cleans up modules and shuts the pool down, waiting at most `wait` for
    /// blocking threads.
    fn release(&self, wait: Duration) {
        self.server.lock().cleanup();
        if let Some(pool) = self.pool.lock().take() {
            pool.shutdown_timeout(wait);
        }
    }
}

async fn next_signal(signals: &mut Option<ShutdownSignals>) -> &'static str {
    match signals {
        Some(signals) => signals.recv().await,
        None => std::future::pending().await,
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.scheduler.request_shutdown();
        if let Some(pool) = self.pool.get_mut().take() {
            self.server.get_mut().cleanup();
            pool.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RuntimeConfig {
        RuntimeConfig::default()
            .with_worker_threads(2)
            .with_signals(false)
    }

    #[test]
    fn core_apis_are_installed() {
        let runtime = Runtime::new(config()).unwrap();
        runtime.with_server(|server| {
            assert!(server.contains_api::<Scheduler>());
            assert!(server.contains_api::<EventBus>());
            assert!(server.contains_api::<PluginHost>());
            assert!(server.contains_api::<ServiceRegistry>());
            assert!(server.contains_api::<HandlerRegistry>());
            assert_eq!(server.get_global::<RuntimeConfig>().map(|c| c.worker_threads), Some(2));
        });
    }

    #[test]
    fn plugins_conflict_with_explicit_services_module() {
        let result = Runtime::builder()
            .with_config(config())
            .with_plugin("libmissing.so")
            .add_modules(ServicesModule::new())
            .build();
        assert!(matches!(result, Err(RuntimeError::InvalidConfig { .. })));
    }

    #[test]
    fn missing_startup_plugin_fails_build() {
        let result = Runtime::builder()
            .with_config(config())
            .with_plugin("/definitely/not/here/libnothing.so")
            .build();
        let err = result.unwrap_err();
        assert!(matches!(err, RuntimeError::Startup(_)), "{err}");
    }

    #[test]
    fn second_event_loop_run_is_rejected() {
        let runtime = Runtime::new(config()).unwrap();
        runtime.request_shutdown();
        runtime.run_event_loop_blocking().unwrap();
        assert!(matches!(
            runtime.run_event_loop_blocking(),
            Err(RuntimeError::ShuttingDown(_))
        ));
    }
}
