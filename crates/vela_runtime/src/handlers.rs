//! Named feature-set handlers.
//!
//! A handler is an async function of an [`ExecutionContext`] returning a JSON
//! value. Handlers are registered by name, then either invoked directly
//! ([`HandlerRegistry::invoke`], or [`HandlerRegistry::invoke_blocking`] from
//! non-async code) or attached to the bus as observers
//! ([`HandlerRegistry::observe`]). Each run gets a fresh context.

use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::oneshot;
use vela_events::{Delivery, EventBus, EventPattern, HandlerError, SubscriptionId, handler_fn};
use vela_services::ServiceRegistry;
use vela_system::api::API;

use crate::context::ExecutionContext;
use crate::error::RuntimeError;
use crate::scheduler::Scheduler;

/// Future returned by a handler.
pub type HandlerFuture = BoxFuture<'static, Result<Value, HandlerError>>;

type HandlerFn = Arc<dyn Fn(ExecutionContext) -> HandlerFuture + Send + Sync>;

struct HandlersInner {
    bus: EventBus,
    services: ServiceRegistry,
    scheduler: Scheduler,
    handlers: RwLock<IndexMap<String, HandlerFn>>,
}

/// Registry of named handlers.
///
/// Cheap to clone; clones share the table.
#[derive(Clone)]
pub struct HandlerRegistry {
    inner: Arc<HandlersInner>,
}

impl API for HandlerRegistry {}

impl core::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.names())
            .finish()
    }
}

impl HandlerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(bus: EventBus, services: ServiceRegistry, scheduler: Scheduler) -> Self {
        Self {
            inner: Arc::new(HandlersInner {
                bus,
                services,
                scheduler,
                handlers: RwLock::new(IndexMap::new()),
            }),
        }
    }

    /// Registers a handler under `name`.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::DuplicateHandler`] if the name is taken.
    pub fn register<F, Fut>(&self, name: &str, f: F) -> Result<(), RuntimeError>
    where
        F: Fn(ExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        let handler: HandlerFn = Arc::new(move |ctx| f(ctx).boxed());
        let mut handlers = self.inner.handlers.write();
        if handlers.contains_key(name) {
            return Err(RuntimeError::DuplicateHandler(name.to_string()));
        }
        handlers.insert(name.to_string(), handler);
        tracing::debug!(handler = name, "handler registered");
        Ok(())
    }

    /// Returns true if `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.inner.handlers.read().contains_key(name)
    }

    /// Registered names in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.inner.handlers.read().keys().cloned().collect()
    }

    fn lookup(&self, name: &str) -> Result<HandlerFn, RuntimeError> {
        self.inner
            .handlers
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownHandler(name.to_string()))
    }

    fn context(&self) -> ExecutionContext {
        ExecutionContext::new(self.inner.bus.clone(), self.inner.services.clone())
    }

    /// Runs handler `name` as a scheduler task and waits for its result.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::UnknownHandler`], [`RuntimeError::Handler`] for a
    /// failed run, [`RuntimeError::Cancelled`] if the task was cancelled.
    pub async fn invoke(&self, name: &str, args: Value) -> Result<Value, RuntimeError> {
        let handler = self.lookup(name)?;
        let registry = self.clone();
        let (tx, rx) = oneshot::channel();
        let task = self
            .inner
            .scheduler
            .spawn(&format!("handler:{name}"), async move {
                let ctx = registry.context().with_input(args);
                let _ = tx.send(handler(ctx).await);
            })?;

        match rx.await {
            Ok(result) => result.map_err(|source| RuntimeError::Handler {
                name: name.to_string(),
                source,
            }),
            Err(_) => Err(RuntimeError::Cancelled(task.id())),
        }
    }

    /// Runs handler `name` through the synchronous bridge.
    ///
    /// For callers without an async context, such as the C boundary.
    ///
    /// # Errors
    ///
    /// As [`invoke`](Self::invoke), plus the bridge errors of
    /// [`Scheduler::block_on`].
    pub fn invoke_blocking(&self, name: &str, args: Value) -> Result<Value, RuntimeError> {
        let handler = self.lookup(name)?;
        let registry = self.clone();
        let result = self.inner.scheduler.block_on(&format!("bridge:{name}"), async move {
            let ctx = registry.context().with_input(args);
            handler(ctx).await
        })?;
        result.map_err(|source| RuntimeError::Handler {
            name: name.to_string(),
            source,
        })
    }

    /// Runs handler `name` for every event matching `pattern`.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::UnknownHandler`] if `name` is not registered yet.
    pub fn observe(
        &self,
        pattern: EventPattern,
        name: &str,
    ) -> Result<SubscriptionId, RuntimeError> {
        self.observe_with(pattern, name, Delivery::default())
    }

    /// [`observe`](Self::observe) with an explicit delivery mode.
    ///
    /// # Errors
    ///
    /// See [`observe`](Self::observe).
    pub fn observe_with(
        &self,
        pattern: EventPattern,
        name: &str,
        delivery: Delivery,
    ) -> Result<SubscriptionId, RuntimeError> {
        let handler = self.lookup(name)?;
        let registry = self.clone();
        let handler_name = name.to_string();
        tracing::debug!(handler = name, %pattern, "handler observing");
        let id = self.inner.bus.subscribe_with(
            pattern,
            handler_fn(name, move |event| {
                let ctx = registry.context().with_event(event);
                let run = handler(ctx);
                let handler_name = handler_name.clone();
                async move {
                    let value = run.await?;
                    tracing::trace!(handler = %handler_name, result = %value, "observer finished");
                    Ok(())
                }
            }),
            delivery,
        );
        Ok(id)
    }
}
