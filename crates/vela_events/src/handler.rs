//! Event handlers.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::HandlerError;
use crate::event::Event;

/// Reacts to events delivered by the [`EventBus`](crate::EventBus).
///
/// Handlers must be safe to run concurrently with other handlers for the same
/// event. Under [`Delivery::Concurrent`](crate::Delivery::Concurrent) they
/// also overlap with themselves.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    /// Handles one event.
    async fn handle(&self, event: Arc<Event>) -> Result<(), HandlerError>;

    /// Name used in logs and failure events.
    fn name(&self) -> &str {
        core::any::type_name::<Self>()
    }
}

/// Adapter turning an async closure into an [`EventHandler`].
pub struct FnHandler<F> {
    name: String,
    f: F,
}

impl<F> core::fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FnHandler").field("name", &self.name).finish()
    }
}

/// Creates a named handler from an async closure.
///
/// ```
/// use vela_events::handler_fn;
///
/// let handler = handler_fn("audit", |event| async move {
///     tracing::info!(kind = event.kind(), "audited");
///     Ok(())
/// });
/// ```
pub fn handler_fn<F, Fut>(name: impl Into<String>, f: F) -> FnHandler<F>
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    FnHandler {
        name: name.into(),
        f,
    }
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, event: Arc<Event>) -> Result<(), HandlerError> {
        (self.f)(event).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}
