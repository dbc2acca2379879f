//! Task identity, state and handles.

use core::fmt;
use core::pin::Pin;
use core::task::{Context, Poll};

use futures::future::BoxFuture;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Identifier of a scheduled task, unique per scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TaskId(pub(crate) u64);

impl TaskId {
    /// The raw numeric id.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Lifecycle of a task.
///
/// `Scheduled -> Running -> (Suspended <-> Running) -> Completed | Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Queued, never polled.
    Scheduled,
    /// Being polled.
    Running,
    /// Waiting at a suspension point.
    Suspended,
    /// Finished its body.
    Completed,
    /// Stopped by cancellation or abort.
    Cancelled,
}

impl TaskState {
    /// Returns true for `Completed` and `Cancelled`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

/// A handle to a scheduled task.
///
/// Cloning is cheap. Any number of clones may [`wait`](Self::wait).
#[derive(Clone)]
pub struct TaskHandle {
    id: TaskId,
    name: String,
    state: watch::Receiver<TaskState>,
    token: CancellationToken,
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

impl TaskHandle {
    pub(crate) fn new(
        id: TaskId,
        name: String,
        state: watch::Receiver<TaskState>,
        token: CancellationToken,
    ) -> Self {
        Self {
            id,
            name,
            state,
            token,
        }
    }

    /// The task id.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// The name given at spawn.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The current state.
    #[must_use]
    pub fn state(&self) -> TaskState {
        *self.state.borrow()
    }

    /// Requests cooperative cancellation.
    ///
    /// The task stops at its next suspension point.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Waits until the task reaches a terminal state and returns it.
    pub async fn wait(&self) -> TaskState {
        let mut state = self.state.clone();
        let reached = state.wait_for(|state| state.is_terminal()).await.map(|state| *state);
        // The sender is dropped only after the terminal state was sent.
        reached.unwrap_or_else(|_| *state.borrow())
    }
}

/// Reports `Running` while the body is polled and `Suspended` while it waits.
pub(crate) struct Tracked<'a> {
    body: BoxFuture<'static, ()>,
    state: &'a watch::Sender<TaskState>,
}

impl<'a> Tracked<'a> {
    pub(crate) fn new(body: BoxFuture<'static, ()>, state: &'a watch::Sender<TaskState>) -> Self {
        Self { body, state }
    }

    fn report(&self, next: TaskState) {
        self.state.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                *state = next;
                true
            }
        });
    }
}

impl Future for Tracked<'_> {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        self.report(TaskState::Running);
        let poll = self.body.as_mut().poll(cx);
        if poll.is_pending() {
            self.report(TaskState::Suspended);
        }
        poll
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    #[test]
    fn terminal_states() {
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Cancelled.is_terminal());
        assert!(!TaskState::Suspended.is_terminal());
        assert_eq!(TaskId(7).to_string(), "task-7");
    }

    #[tokio::test]
    async fn tracked_reports_suspension() {
        let (tx, rx) = watch::channel(TaskState::Scheduled);
        let (release, gate) = tokio::sync::oneshot::channel::<()>();
        let body = async move {
            gate.await.ok();
        }
        .boxed();

        let mut tracked = Box::pin(Tracked::new(body, &tx));
        assert!(futures::poll!(tracked.as_mut()).is_pending());
        assert_eq!(*rx.borrow(), TaskState::Suspended);

        release.send(()).ok();
        tracked.await;
        assert_eq!(*rx.borrow(), TaskState::Running);
    }

    #[tokio::test]
    async fn wait_returns_terminal_state() {
        let (tx, rx) = watch::channel(TaskState::Running);
        let handle = TaskHandle::new(TaskId(1), "waiter".into(), rx, CancellationToken::new());

        let waiter = tokio::spawn({
            let handle = handle.clone();
            async move { handle.wait().await }
        });
        tx.send(TaskState::Suspended).unwrap();
        tx.send(TaskState::Completed).unwrap();
        assert_eq!(waiter.await.unwrap(), TaskState::Completed);
    }

    #[tokio::test]
    async fn wait_after_sender_dropped_reads_last_state() {
        let (tx, rx) = watch::channel(TaskState::Running);
        let handle = TaskHandle::new(TaskId(2), "gone".into(), rx, CancellationToken::new());
        tx.send(TaskState::Cancelled).unwrap();
        drop(tx);
        assert_eq!(handle.wait().await, TaskState::Cancelled);
    }
}
