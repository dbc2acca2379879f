//! Services backed by a loaded plugin, in process or as a child process.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use vela_plugins::{PluginHandle, ProcessHandle, ServiceDecl};

use crate::error::ServiceError;
use crate::service::Service;

/// One service declared in a plugin's metadata.
///
/// Method `m` is dispatched to `plugin_execute` as the action `"<symbol>.m"`.
/// Qualifiers go to `plugin_qualifier` of the same plugin.
pub struct PluginService {
    decl: ServiceDecl,
    handle: Arc<PluginHandle>,
    timeout: Option<Duration>,
}

impl core::fmt::Debug for PluginService {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PluginService")
            .field("name", &self.decl.name)
            .field("plugin", &self.handle.name())
            .field("methods", &self.decl.methods)
            .finish()
    }
}

impl PluginService {
    /// Wraps a declared service of `handle`.
    #[must_use]
    pub fn new(decl: ServiceDecl, handle: Arc<PluginHandle>, timeout: Option<Duration>) -> Self {
        Self {
            decl,
            handle,
            timeout,
        }
    }

    /// The backing plugin.
    #[must_use]
    pub fn plugin(&self) -> &Arc<PluginHandle> {
        &self.handle
    }

}

/// Maps `method` of `decl` to the plugin action `"<symbol>.<method>"`.
fn action_for(decl: &ServiceDecl, method: &str) -> Result<String, ServiceError> {
    let declared = decl.methods.is_empty() || decl.methods.iter().any(|known| known == method);
    if !declared {
        return Err(ServiceError::UnknownMethod {
            service: decl.name.clone(),
            method: method.to_string(),
        });
    }
    Ok(format!("{}.{method}", decl.symbol()))
}

#[async_trait]
impl Service for PluginService {
    fn name(&self) -> &str {
        &self.decl.name
    }

    fn methods(&self) -> Vec<String> {
        self.decl.methods.clone()
    }

    async fn invoke(&self, method: &str, args: Value) -> Result<Value, ServiceError> {
        let action = action_for(&self.decl, method)?;
        Ok(self
            .handle
            .execute_async(&action, args, self.timeout)
            .await?)
    }

    async fn qualify(
        &self,
        qualifier: &str,
        value_type: &str,
        value: Value,
    ) -> Result<Value, ServiceError> {
        Ok(self
            .handle
            .qualify_async(qualifier, value_type, value, self.timeout)
            .await?)
    }
}

/// One service declared by a process plugin.
///
/// Dispatch matches [`PluginService`]; every call runs in a fresh child
/// bounded by the plugin's own timeout.
pub struct ProcessPluginService {
    decl: ServiceDecl,
    handle: Arc<ProcessHandle>,
}

impl core::fmt::Debug for ProcessPluginService {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProcessPluginService")
            .field("name", &self.decl.name)
            .field("plugin", &self.handle.name())
            .field("program", &self.handle.plugin().program())
            .finish()
    }
}

impl ProcessPluginService {
    /// Wraps a declared service of `handle`.
    #[must_use]
    pub fn new(decl: ServiceDecl, handle: Arc<ProcessHandle>) -> Self {
        Self { decl, handle }
    }

    /// The backing process plugin.
    #[must_use]
    pub fn plugin(&self) -> &Arc<ProcessHandle> {
        &self.handle
    }
}

#[async_trait]
impl Service for ProcessPluginService {
    fn name(&self) -> &str {
        &self.decl.name
    }

    fn methods(&self) -> Vec<String> {
        self.decl.methods.clone()
    }

    async fn invoke(&self, method: &str, args: Value) -> Result<Value, ServiceError> {
        let action = action_for(&self.decl, method)?;
        Ok(self.handle.execute(&action, args).await?)
    }

    async fn qualify(
        &self,
        qualifier: &str,
        value_type: &str,
        value: Value,
    ) -> Result<Value, ServiceError> {
        Ok(self.handle.qualify(qualifier, value_type, value).await?)
    }
}
