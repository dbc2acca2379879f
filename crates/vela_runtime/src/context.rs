//! Per-invocation execution state.

use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use vela_events::{Event, EventBus};
use vela_services::{ServiceError, ServiceRegistry};

use crate::scheduler;

/// State of one feature set invocation.
///
/// Holds the variable bindings, the triggering event (when the invocation
/// was event-driven), and handles to the services and the bus. A context
/// belongs to one invocation; [`child`](Self::child) derives a nested one.
///
/// Cancellation follows the scheduler task that created the context: once
/// that task is cancelled, [`emit`](Self::emit) publishes nothing.
///
/// # Example
///
/// ```no_run
/// # async fn feature(mut ctx: vela_runtime::ExecutionContext) -> Result<(), vela_services::ServiceError> {
/// let path = ctx.event().map(|event| event.payload()["path"].clone());
/// ctx.bind("path", path.unwrap_or_default());
/// let stats = ctx.invoke("file-monitor", "list", serde_json::Value::Null).await?;
/// ctx.emit("report.ready", stats);
/// # Ok(()) }
/// ```
pub struct ExecutionContext {
    bus: EventBus,
    services: ServiceRegistry,
    bindings: IndexMap<String, Value>,
    input: Value,
    event: Option<Arc<Event>>,
    token: CancellationToken,
    depth: usize,
}

impl core::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("bindings", &self.bindings.keys().collect::<Vec<_>>())
            .field("event", &self.event.as_ref().map(|event| event.kind()))
            .field("depth", &self.depth)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl ExecutionContext {
    /// Creates a root context.
    ///
    /// Inside a scheduler task the context takes that task's cancellation
    /// token; elsewhere it gets a fresh one.
    #[must_use]
    pub fn new(bus: EventBus, services: ServiceRegistry) -> Self {
        Self {
            bus,
            services,
            bindings: IndexMap::new(),
            input: Value::Null,
            event: None,
            token: scheduler::current_token().unwrap_or_default(),
            depth: 0,
        }
    }

    /// Sets the invocation input.
    #[must_use]
    pub fn with_input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }

    /// Sets the triggering event.
    #[must_use]
    pub fn with_event(mut self, event: Arc<Event>) -> Self {
        self.event = Some(event);
        self
    }

    /// Replaces the cancellation token.
    #[must_use]
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// The invocation input (`null` for event-driven invocations).
    #[must_use]
    pub fn input(&self) -> &Value {
        &self.input
    }

    /// The event that triggered this invocation.
    #[must_use]
    pub fn event(&self) -> Option<&Arc<Event>> {
        self.event.as_ref()
    }

    /// Binds `name`, returning the previous value.
    pub fn bind(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.bindings.insert(name.into(), value)
    }

    /// The value bound to `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }

    /// Removes a binding.
    pub fn unbind(&mut self, name: &str) -> Option<Value> {
        self.bindings.shift_remove(name)
    }

    /// All bindings as a JSON object.
    #[must_use]
    pub fn bindings(&self) -> Value {
        Value::Object(
            self.bindings
                .iter()
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
        )
    }

    /// Nesting depth; 0 for a root context.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// The service registry.
    #[must_use]
    pub fn services(&self) -> &ServiceRegistry {
        &self.services
    }

    /// The event bus.
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Derives a nested context.
    ///
    /// The child starts with a copy of the bindings, shares the services and
    /// the event, and is cancelled with its parent.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            bus: self.bus.clone(),
            services: self.services.clone(),
            bindings: self.bindings.clone(),
            input: self.input.clone(),
            event: self.event.clone(),
            token: self.token.child_token(),
            depth: self.depth + 1,
        }
    }

    /// Publishes an event. Returns the number of dispatches scheduled.
    ///
    /// A cancelled context publishes nothing and returns 0.
    pub fn emit(&self, kind: impl Into<String>, payload: Value) -> usize {
        if self.is_cancelled() {
            return 0;
        }
        self.bus.publish(Event::new(kind, payload))
    }

    /// Invokes a service method.
    ///
    /// # Errors
    ///
    /// Whatever the registry or service returns.
    pub async fn invoke(
        &self,
        service: &str,
        method: &str,
        args: Value,
    ) -> Result<Value, ServiceError> {
        self.services.invoke(service, method, args).await
    }

    /// Executes an action verb.
    ///
    /// # Errors
    ///
    /// See [`ServiceRegistry::execute_action`].
    pub async fn execute_action(&self, verb: &str, args: Value) -> Result<Value, ServiceError> {
        self.services.execute_action(verb, args).await
    }

    /// Applies a qualifier.
    ///
    /// # Errors
    ///
    /// See [`ServiceRegistry::qualify`].
    pub async fn qualify(
        &self,
        qualifier: &str,
        value_type: &str,
        value: Value,
    ) -> Result<Value, ServiceError> {
        self.services.qualify(qualifier, value_type, value).await
    }

    /// Returns true once the owning task was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves when the owning task is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// The cancellation token.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}
