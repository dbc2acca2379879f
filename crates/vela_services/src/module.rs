//! Modules installing the registry and the built-in services.

use std::path::PathBuf;
use std::time::Duration;

use vela_events::EventBus;
use vela_plugins::PluginHost;
use vela_system::module::{Module, ModuleId};
use vela_system::server::{Server, ServerError};

use crate::file_monitor::{FileMonitor, MonitorBackend, MonitorOptions};
use crate::registry::ServiceRegistry;
use crate::socket::SocketListener;

/// Installs the [`ServiceRegistry`] API and loads configured plugins.
///
/// Requires the [`PluginHost`] API. Plugins load in `ready()`; a plugin that
/// fails to load (including a duplicate name) fails server startup.
#[derive(Debug, Default, Clone)]
pub struct ServicesModule {
    plugins: Vec<PathBuf>,
}

impl ServicesModule {
    /// Creates the module with no plugins.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the plugin at `path` during startup.
    #[must_use]
    pub fn with_plugin(mut self, path: impl Into<PathBuf>) -> Self {
        self.plugins.push(path.into());
        self
    }
}

impl Module for ServicesModule {
    fn build(&self, server: &mut Server) -> Result<(), ServerError> {
        let host = server.require_api::<PluginHost>()?.clone();
        server.insert_api(ServiceRegistry::new(host));
        Ok(())
    }

    fn ready(&self, server: &mut Server) -> Result<(), ServerError> {
        let registry = server.require_api::<ServiceRegistry>()?;
        for path in &self.plugins {
            let services = registry
                .load_plugin(path)
                .map_err(|err| ServerError::module(self.name(), err))?;
            tracing::info!(path = %path.display(), ?services, "startup plugin loaded");
        }
        Ok(())
    }

    fn cleanup(&self, server: &mut Server) {
        if let Some(registry) = server.api::<ServiceRegistry>() {
            registry.shutdown();
        }
    }

    fn name(&self) -> &str {
        "services"
    }
}

/// Registers the `file-monitor` service and starts configured watches.
#[derive(Debug, Default, Clone)]
pub struct FileMonitorModule {
    options: MonitorOptions,
    paths: Vec<PathBuf>,
}

impl FileMonitorModule {
    /// Creates the module with the platform backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Forces a backend.
    #[must_use]
    pub fn with_backend(mut self, backend: MonitorBackend) -> Self {
        self.options.backend = backend;
        self
    }

    /// Sets the polling interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.options.poll_interval = interval;
        self
    }

    /// Watches `path` from startup.
    #[must_use]
    pub fn watch(mut self, path: impl Into<PathBuf>) -> Self {
        self.paths.push(path.into());
        self
    }
}

impl Module for FileMonitorModule {
    fn build(&self, server: &mut Server) -> Result<(), ServerError> {
        let bus = server.require_api::<EventBus>()?.clone();
        let registry = server.require_api::<ServiceRegistry>()?;
        let monitor = FileMonitor::new(bus, self.options);
        registry
            .register(monitor.clone())
            .map_err(|err| ServerError::module(self.name(), err))?;
        server.insert_api(monitor);
        Ok(())
    }

    fn ready(&self, server: &mut Server) -> Result<(), ServerError> {
        let monitor = server.require_api::<FileMonitor>()?;
        for path in &self.paths {
            monitor
                .watch(path)
                .map_err(|err| ServerError::module(self.name(), err))?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "file-monitor"
    }

    fn dependencies(&self) -> Vec<ModuleId> {
        vec![ModuleId::of::<ServicesModule>()]
    }
}

/// Registers the `socket` service and binds configured addresses.
#[derive(Debug, Default, Clone)]
pub struct SocketModule {
    addresses: Vec<String>,
}

impl SocketModule {
    /// Creates the module with no listeners.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Listens on `address` from startup.
    #[must_use]
    pub fn listen(mut self, address: impl Into<String>) -> Self {
        self.addresses.push(address.into());
        self
    }
}

impl Module for SocketModule {
    fn build(&self, server: &mut Server) -> Result<(), ServerError> {
        let bus = server.require_api::<EventBus>()?.clone();
        let registry = server.require_api::<ServiceRegistry>()?;
        let listener = SocketListener::new(bus);
        registry
            .register(listener.clone())
            .map_err(|err| ServerError::module(self.name(), err))?;
        server.insert_api(listener);
        Ok(())
    }

    fn ready(&self, server: &mut Server) -> Result<(), ServerError> {
        let listener = server.require_api::<SocketListener>()?;
        for address in &self.addresses {
            listener
                .listen(address)
                .map_err(|err| ServerError::module(self.name(), err))?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "socket"
    }

    fn dependencies(&self) -> Vec<ModuleId> {
        vec![ModuleId::of::<ServicesModule>()]
    }
}
