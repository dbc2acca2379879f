//! The [`Service`] capability interface.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use indexmap::IndexMap;
use serde_json::Value;

use crate::error::ServiceError;

/// A named capability exposing methods over JSON.
///
/// Built-in services and plugin-backed services implement the same
/// interface, so callers never know which kind they are talking to.
#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// Registry name.
    fn name(&self) -> &str;

    /// Method names this service answers.
    fn methods(&self) -> Vec<String>;

    /// Invokes `method` with JSON `args`.
    async fn invoke(&self, method: &str, args: Value) -> Result<Value, ServiceError>;

    /// Applies a qualifier provided by this service.
    async fn qualify(
        &self,
        qualifier: &str,
        _value_type: &str,
        _value: Value,
    ) -> Result<Value, ServiceError> {
        Err(ServiceError::UnknownQualifier(qualifier.to_string()))
    }

    /// Releases resources (listeners, watches). Called once at shutdown.
    fn shutdown(&self) {}
}

pub(crate) type MethodFn =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, ServiceError>> + Send + Sync>;

/// A service assembled from async closures.
///
/// # Example
///
/// ```
/// use serde_json::{Value, json};
/// use vela_services::FnService;
///
/// let math = FnService::new("math").method("add", |args: Value| async move {
///     let a = args["a"].as_i64().unwrap_or_default();
///     let b = args["b"].as_i64().unwrap_or_default();
///     Ok(json!(a + b))
/// });
/// ```
pub struct FnService {
    name: String,
    methods: IndexMap<String, MethodFn>,
}

impl core::fmt::Debug for FnService {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FnService")
            .field("name", &self.name)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl FnService {
    /// Creates a service with no methods.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: IndexMap::new(),
        }
    }

    /// Adds a method.
    #[must_use]
    pub fn method<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ServiceError>> + Send + 'static,
    {
        let method: MethodFn = Arc::new(move |args| f(args).boxed());
        self.methods.insert(name.into(), method);
        self
    }
}

#[async_trait]
impl Service for FnService {
    fn name(&self) -> &str {
        &self.name
    }

    fn methods(&self) -> Vec<String> {
        self.methods.keys().cloned().collect()
    }

    async fn invoke(&self, method: &str, args: Value) -> Result<Value, ServiceError> {
        let method_fn = self
            .methods
            .get(method)
            .cloned()
            .ok_or_else(|| ServiceError::UnknownMethod {
                service: self.name.clone(),
                method: method.to_string(),
            })?;
        method_fn(args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn fn_service_dispatches_by_method() {
        let service = FnService::new("echo")
            .method("say", |args: Value| async move { Ok(args) })
            .method("fail", |_| async { Err(ServiceError::failed("echo", "nope")) });

        assert_eq!(service.methods(), vec!["say", "fail"]);
        assert_eq!(service.invoke("say", json!("hi")).await.unwrap(), json!("hi"));
        assert!(service.invoke("fail", Value::Null).await.is_err());
        assert!(matches!(
            service.invoke("missing", Value::Null).await,
            Err(ServiceError::UnknownMethod { .. })
        ));
        assert!(matches!(
            service.qualify("first", "List", json!([1])).await,
            Err(ServiceError::UnknownQualifier(_))
        ));
    }
}
