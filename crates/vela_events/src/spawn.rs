//! The scheduling seam between the bus and the task scheduler.
//!
//! The bus never runs handlers itself: it hands each dispatch to a [`Spawner`].
//! The runtime's scheduler implements this trait so that every handler
//! execution is a tracked, cancellable task. [`TokioSpawner`] is a plain
//! fallback for using the bus without the runtime.

use futures::future::BoxFuture;
use thiserror::Error;

/// A task could not be scheduled.
#[derive(Debug, Error)]
pub enum SpawnError {
    /// The scheduler no longer accepts work.
    #[error("cannot spawn '{0}': scheduler is shutting down")]
    ShuttingDown(String),
}

/// Schedules detached units of work.
pub trait Spawner: Send + Sync + 'static {
    /// Schedules `future` to run concurrently with the caller.
    ///
    /// Returns as soon as the work is queued; never waits for it.
    fn spawn_detached(&self, name: &str, future: BoxFuture<'static, ()>)
    -> Result<(), SpawnError>;
}

/// [`Spawner`] backed by a tokio runtime handle.
#[derive(Debug, Clone)]
pub struct TokioSpawner {
    handle: tokio::runtime::Handle,
}

impl TokioSpawner {
    /// Wraps an explicit runtime handle.
    #[must_use]
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Uses the runtime of the calling context.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    #[must_use]
    pub fn current() -> Self {
        Self::new(tokio::runtime::Handle::current())
    }
}

impl Spawner for TokioSpawner {
    fn spawn_detached(
        &self,
        _name: &str,
        future: BoxFuture<'static, ()>,
    ) -> Result<(), SpawnError> {
        drop(self.handle.spawn(future));
        Ok(())
    }
}
