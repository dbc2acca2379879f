//! The service registry.
//!
//! Maps capability names to [`Service`] implementations. Names are immutable
//! once registered: a second registration is a configuration error. Every
//! registered name is also reserved with the [`PluginHost`], so built-ins and
//! plugins share one namespace whichever registers first.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use futures::FutureExt;
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde_json::Value;
use vela_plugins::{ClaimKind, PluginHost, PluginMetadata, ProcessPlugin};
use vela_system::api::API;

use crate::error::ServiceError;
use crate::plugin_service::{PluginService, ProcessPluginService};
use crate::service::{MethodFn, Service};

struct RegistryInner {
    host: PluginHost,
    services: RwLock<IndexMap<String, Arc<dyn Service>>>,
    actions: RwLock<IndexMap<String, MethodFn>>,
}

/// Registry of services and built-in actions.
///
/// Cheap to clone; clones share the table. Lookups clone the `Arc` of the
/// service and release the table lock before the service runs.
#[derive(Clone)]
pub struct ServiceRegistry {
    inner: Arc<RegistryInner>,
}

impl API for ServiceRegistry {}

impl core::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.names())
            .field("actions", &self.inner.actions.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ServiceRegistry {
    /// Creates an empty registry sharing `host`'s name table.
    #[must_use]
    pub fn new(host: PluginHost) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                host,
                services: RwLock::new(IndexMap::new()),
                actions: RwLock::new(IndexMap::new()),
            }),
        }
    }

    /// The plugin host backing plugin services.
    #[must_use]
    pub fn host(&self) -> &PluginHost {
        &self.inner.host
    }

    /// Registers a built-in service.
    ///
    /// # Errors
    ///
    /// [`ServiceError::AlreadyRegistered`] if the name is taken by another
    /// service or claimed by a plugin.
    pub fn register(&self, service: impl Service) -> Result<(), ServiceError> {
        self.register_shared(Arc::new(service))
    }

    /// Registers an already shared service.
    ///
    /// # Errors
    ///
    /// See [`Self::register`].
    pub fn register_shared(&self, service: Arc<dyn Service>) -> Result<(), ServiceError> {
        let name = service.name().to_string();
        let mut services = self.inner.services.write();
        if services.contains_key(&name) {
            return Err(ServiceError::AlreadyRegistered(name));
        }
        self.inner
            .host
            .reserve_builtin(ClaimKind::Service, &name)
            .map_err(|_| ServiceError::AlreadyRegistered(name.clone()))?;
        tracing::info!(service = %name, methods = ?service.methods(), "service registered");
        services.insert(name, service);
        Ok(())
    }

    /// Loads a plugin and registers every service it declares.
    ///
    /// Returns the declared service names. Loading an already loaded plugin
    /// is a no-op that returns the same names.
    ///
    /// # Errors
    ///
    /// Any [`PluginError`](vela_plugins::PluginError) from loading, including
    /// duplicate names.
    pub fn load_plugin(&self, path: impl AsRef<Path>) -> Result<Vec<String>, ServiceError> {
        let handle = self.inner.host.load(path)?;
        let timeout = self.inner.host.call_timeout();
        let mut services = self.inner.services.write();
        let mut names = Vec::with_capacity(handle.metadata().services.len());
        for decl in &handle.metadata().services {
            names.push(decl.name.clone());
            // The host's claim table guarantees an existing entry is this
            // plugin's own service from an earlier load.
            if services.contains_key(&decl.name) {
                continue;
            }
            tracing::info!(service = %decl.name, plugin = handle.name(), "plugin service registered");
            services.insert(
                decl.name.clone(),
                Arc::new(PluginService::new(
                    decl.clone(),
                    Arc::clone(&handle),
                    timeout,
                )),
            );
        }
        Ok(names)
    }

    /// Initializes a process plugin and registers every service it declares.
    ///
    /// Its actions and qualifiers become reachable through
    /// [`Self::execute_action`] and [`Self::qualify`]. Loading the same
    /// command line again is a no-op that returns the same names.
    ///
    /// # Errors
    ///
    /// Any [`PluginError`](vela_plugins::PluginError) from
    /// [`PluginHost::load_process`], including duplicate names.
    pub async fn load_process_plugin(
        &self,
        plugin: ProcessPlugin,
    ) -> Result<Vec<String>, ServiceError> {
        let handle = self.inner.host.load_process(plugin).await?;
        let mut services = self.inner.services.write();
        let mut names = Vec::with_capacity(handle.metadata().services.len());
        for decl in &handle.metadata().services {
            names.push(decl.name.clone());
            if services.contains_key(&decl.name) {
                continue;
            }
            tracing::info!(service = %decl.name, plugin = handle.name(), "process plugin service registered");
            services.insert(
                decl.name.clone(),
                Arc::new(ProcessPluginService::new(decl.clone(), Arc::clone(&handle))),
            );
        }
        Ok(names)
    }

    /// Looks up a service.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Service>> {
        self.inner.services.read().get(name).cloned()
    }

    /// Returns true if `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.inner.services.read().contains_key(name)
    }

    /// Registered service names, in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.inner.services.read().keys().cloned().collect()
    }

    /// Number of registered services.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.services.read().len()
    }

    /// Returns true if no service is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invokes `method` on service `name`.
    ///
    /// # Errors
    ///
    /// [`ServiceError::NotFound`] for an unknown service, otherwise whatever
    /// the service returns.
    pub async fn invoke(
        &self,
        name: &str,
        method: &str,
        args: Value,
    ) -> Result<Value, ServiceError> {
        let service = self
            .resolve(name)
            .ok_or_else(|| ServiceError::NotFound(name.to_string()))?;
        tracing::trace!(service = name, method, "service invoke");
        service.invoke(method, args).await
    }

    /// Registers a built-in action verb.
    ///
    /// # Errors
    ///
    /// [`ServiceError::AlreadyRegistered`] if the verb is claimed.
    pub fn register_action<F, Fut>(&self, verb: &str, f: F) -> Result<(), ServiceError>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ServiceError>> + Send + 'static,
    {
        let verb = verb.to_lowercase();
        let mut actions = self.inner.actions.write();
        self.inner
            .host
            .reserve_builtin(ClaimKind::Action, &verb)
            .map_err(|_| ServiceError::AlreadyRegistered(verb.clone()))?;
        let action: MethodFn = Arc::new(move |args| f(args).boxed());
        actions.insert(verb, action);
        Ok(())
    }

    /// Executes an action verb, built-in or plugin-provided.
    ///
    /// Plugin actions receive the lowercased verb as the action name.
    ///
    /// # Errors
    ///
    /// [`ServiceError::UnknownAction`] when nothing claims the verb.
    pub async fn execute_action(&self, verb: &str, args: Value) -> Result<Value, ServiceError> {
        let verb = verb.to_lowercase();
        let builtin = self.inner.actions.read().get(&verb).cloned();
        if let Some(action) = builtin {
            return action(args).await;
        }
        let host = &self.inner.host;
        if let Some(handle) = host.plugin_for(ClaimKind::Action, &verb) {
            return Ok(handle
                .execute_async(&verb, args, host.call_timeout())
                .await?);
        }
        let process = host
            .process_for(ClaimKind::Action, &verb)
            .ok_or_else(|| ServiceError::UnknownAction(verb.clone()))?;
        Ok(process.execute(&verb, args).await?)
    }

    /// Applies a plugin-provided qualifier to a value.
    ///
    /// Library plugins are consulted before process plugins.
    ///
    /// # Errors
    ///
    /// [`ServiceError::UnknownQualifier`] when no plugin declares it,
    /// [`ServiceError::UnsupportedType`] when the declaration excludes
    /// `value_type`.
    pub async fn qualify(
        &self,
        name: &str,
        value_type: &str,
        value: Value,
    ) -> Result<Value, ServiceError> {
        let host = &self.inner.host;
        if let Some(handle) = host.plugin_for(ClaimKind::Qualifier, name) {
            check_accepts(handle.metadata(), name, value_type)?;
            return Ok(handle
                .qualify_async(name, value_type, value, host.call_timeout())
                .await?);
        }
        let process = host
            .process_for(ClaimKind::Qualifier, name)
            .ok_or_else(|| ServiceError::UnknownQualifier(name.to_string()))?;
        check_accepts(process.metadata(), name, value_type)?;
        Ok(process.qualify(name, value_type, value).await?)
    }

    /// Calls [`Service::shutdown`] on every service.
    pub fn shutdown(&self) {
        let services: Vec<Arc<dyn Service>> =
            self.inner.services.read().values().cloned().collect();
        for service in services {
            tracing::debug!(service = service.name(), "service shutdown");
            service.shutdown();
        }
    }
}

fn check_accepts(
    metadata: &PluginMetadata,
    qualifier: &str,
    value_type: &str,
) -> Result<(), ServiceError> {
    match metadata.qualifier(qualifier) {
        Some(decl) if !decl.accepts(value_type) => Err(ServiceError::UnsupportedType {
            qualifier: qualifier.to_string(),
            value_type: value_type.to_string(),
        }),
        _ => Ok(()),
    }
}
