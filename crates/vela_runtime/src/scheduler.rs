//! The task scheduler.
//!
//! Every unit of background work, including each event handler dispatch, runs
//! as a tracked task:
//!
//! - a [`TaskId`] and an entry in the task table while it is live
//! - a [`CancellationToken`] checked at every suspension point: once it fires,
//!   the body is dropped the next time the task is woken, so a cancelled task
//!   makes no further progress
//! - a watch channel carrying its [`TaskState`], so any number of waiters can
//!   observe completion
//!
//! Finished outcomes are kept in a bounded ring so that a waiter arriving
//! after the task was removed from the table still gets its terminal state.
//!
//! The table lock is held only while inserting, removing or snapshotting
//! entries, never while a task body runs or while waiting on a task.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::{oneshot, watch};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use vela_events::{SpawnError, Spawner};
use vela_system::api::API;

use crate::error::RuntimeError;
use crate::task::{TaskHandle, TaskId, TaskState, Tracked};

/// Number of finished task outcomes retained for late waiters.
pub const FINISHED_CAPACITY: usize = 1024;

tokio::task_local! {
    static CURRENT: TaskScope;
}

#[derive(Clone)]
struct TaskScope {
    id: TaskId,
    token: CancellationToken,
}

/// Id of the scheduler task running the caller, if any.
#[must_use]
pub fn current_task() -> Option<TaskId> {
    CURRENT.try_with(|scope| scope.id).ok()
}

/// Cancellation token of the scheduler task running the caller, if any.
#[must_use]
pub fn current_token() -> Option<CancellationToken> {
    CURRENT.try_with(|scope| scope.token.clone()).ok()
}

/// Outcome of [`Scheduler::cancel_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CancelReport {
    /// Live tasks that were cancelled.
    pub cancelled: usize,
    /// Tasks still running after the grace period, aborted.
    pub aborted: usize,
}

struct TaskEntry {
    name: String,
    token: CancellationToken,
    state: watch::Receiver<TaskState>,
    abort: Option<AbortHandle>,
}

struct SchedulerInner {
    handle: Handle,
    requested: Arc<AtomicBool>,
    shutdown: CancellationToken,
    tasks: Mutex<IndexMap<TaskId, TaskEntry>>,
    finished: Mutex<VecDeque<(TaskId, TaskState)>>,
    next_id: AtomicU64,
}

/// Records the terminal state when a task body ends or is dropped.
///
/// A body that is aborted, or dropped because the runtime shut down, never
/// sets `outcome` and is recorded as cancelled.
struct Finish {
    inner: Arc<SchedulerInner>,
    id: TaskId,
    state: watch::Sender<TaskState>,
    outcome: Option<TaskState>,
}

impl Drop for Finish {
    fn drop(&mut self) {
        let state = self.outcome.unwrap_or(TaskState::Cancelled);
        self.state.send_replace(state);
        {
            let mut finished = self.inner.finished.lock();
            if finished.len() == FINISHED_CAPACITY {
                finished.pop_front();
            }
            finished.push_back((self.id, state));
        }
        self.inner.tasks.lock().shift_remove(&self.id);
        tracing::trace!(task = %self.id, ?state, "task finished");
    }
}

/// Spawns, tracks and cancels tasks on a tokio multi-thread pool.
///
/// Cheap to clone; clones share the task table. Also the [`Spawner`] behind
/// the event bus, so handler dispatches are tracked tasks.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl API for Scheduler {}

impl core::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Scheduler")
            .field("active", &self.active_count())
            .field("shutdown_requested", &self.is_shutdown_requested())
            .finish()
    }
}

impl Scheduler {
    /// Creates a scheduler spawning onto `handle`.
    #[must_use]
    pub fn new(handle: Handle) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                handle,
                requested: Arc::new(AtomicBool::new(false)),
                shutdown: CancellationToken::new(),
                tasks: Mutex::new(IndexMap::new()),
                finished: Mutex::new(VecDeque::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// The runtime handle tasks are spawned on.
    #[must_use]
    pub fn handle(&self) -> &Handle {
        &self.inner.handle
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Spawning
    // ─────────────────────────────────────────────────────────────────────────

    /// Schedules `work` and returns immediately.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::ShuttingDown`] once shutdown was requested.
    pub fn spawn<F>(&self, name: &str, work: F) -> Result<TaskHandle, RuntimeError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.spawn_boxed(name, work.boxed())
    }

    fn spawn_boxed(
        &self,
        name: &str,
        work: BoxFuture<'static, ()>,
    ) -> Result<TaskHandle, RuntimeError> {
        let inner = &self.inner;
        let id = TaskId(inner.next_id.fetch_add(1, Ordering::Relaxed));
        let token = CancellationToken::new();
        let (state_tx, state_rx) = watch::channel(TaskState::Scheduled);

        {
            let mut tasks = inner.tasks.lock();
            if inner.requested.load(Ordering::SeqCst) {
                return Err(RuntimeError::ShuttingDown(name.to_string()));
            }
            tasks.insert(
                id,
                TaskEntry {
                    name: name.to_string(),
                    token: token.clone(),
                    state: state_rx.clone(),
                    abort: None,
                },
            );
        }

        let finish = Finish {
            inner: Arc::clone(inner),
            id,
            state: state_tx,
            outcome: None,
        };
        let body = run_task(finish, token.clone(), work, name.to_string());
        let scope = TaskScope {
            id,
            token: token.clone(),
        };
        // Spawned outside the table lock: a runtime that is shutting down
        // drops the future inline, and `Finish` takes the lock.
        let join = inner.handle.spawn(CURRENT.scope(scope, body));
        if let Some(entry) = inner.tasks.lock().get_mut(&id) {
            entry.abort = Some(join.abort_handle());
        }

        tracing::trace!(task = %id, name, "task spawned");
        Ok(TaskHandle::new(id, name.to_string(), state_rx, token))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Observation
    // ─────────────────────────────────────────────────────────────────────────

    /// Waits for task `id` to reach a terminal state.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::UnknownTask`] if the id is neither live nor among the
    /// recently finished.
    pub async fn await_task(&self, id: TaskId) -> Result<TaskState, RuntimeError> {
        let live = self
            .inner
            .tasks
            .lock()
            .get(&id)
            .map(|entry| entry.state.clone());
        if let Some(mut state) = live {
            let reached = state.wait_for(|state| state.is_terminal()).await.map(|state| *state);
            return Ok(reached.unwrap_or_else(|_| *state.borrow()));
        }
        self.finished_state(id).ok_or(RuntimeError::UnknownTask(id))
    }

    /// Current state of task `id`.
    #[must_use]
    pub fn task_state(&self, id: TaskId) -> Option<TaskState> {
        let live = self
            .inner
            .tasks
            .lock()
            .get(&id)
            .map(|entry| *entry.state.borrow());
        live.or_else(|| self.finished_state(id))
    }

    fn finished_state(&self, id: TaskId) -> Option<TaskState> {
        self.inner
            .finished
            .lock()
            .iter()
            .rev()
            .find(|(finished, _)| *finished == id)
            .map(|(_, state)| *state)
    }

    /// Live tasks as `(id, name, state)`.
    #[must_use]
    pub fn tasks(&self) -> Vec<(TaskId, String, TaskState)> {
        self.inner
            .tasks
            .lock()
            .iter()
            .map(|(id, entry)| (*id, entry.name.clone(), *entry.state.borrow()))
            .collect()
    }

    /// Number of live tasks.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.inner.tasks.lock().len()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Cancellation and shutdown
    // ─────────────────────────────────────────────────────────────────────────

    /// Cancels every live task and waits up to `grace` for each to stop.
    ///
    /// Tasks that have not reached a terminal state when the grace period
    /// ends are aborted.
    pub async fn cancel_all(&self, grace: Duration) -> CancelReport {
        let snapshot: Vec<(TaskId, String, CancellationToken, watch::Receiver<TaskState>, Option<AbortHandle>)> = self
            .inner
            .tasks
            .lock()
            .iter()
            .filter(|(_, entry)| !entry.state.borrow().is_terminal())
            .map(|(id, entry)| {
                (
                    *id,
                    entry.name.clone(),
                    entry.token.clone(),
                    entry.state.clone(),
                    entry.abort.clone(),
                )
            })
            .collect();

        for (_, _, token, _, _) in &snapshot {
            token.cancel();
        }

        let waits = snapshot.iter().map(|(_, _, _, state, _)| {
            let mut state = state.clone();
            async move {
                let _ = state.wait_for(|state| state.is_terminal()).await;
            }
        });
        let settled = tokio::time::timeout(grace, futures::future::join_all(waits))
            .await
            .is_ok();

        let mut report = CancelReport {
            cancelled: snapshot.len(),
            aborted: 0,
        };
        if !settled {
            for (id, name, _, state, abort) in &snapshot {
                if state.borrow().is_terminal() {
                    continue;
                }
                if let Some(abort) = abort {
                    abort.abort();
                }
                report.aborted += 1;
                tracing::warn!(task = %id, name = %name, ?grace, "task ignored cancellation; aborted");
            }
        }
        tracing::debug!(cancelled = report.cancelled, aborted = report.aborted, "tasks cancelled");
        report
    }

    /// Requests shutdown. Idempotent and callable from any thread.
    ///
    /// From this point every spawn is rejected.
    pub fn request_shutdown(&self) {
        if !self.inner.requested.swap(true, Ordering::SeqCst) {
            tracing::info!("shutdown requested");
        }
        self.inner.shutdown.cancel();
    }

    /// Returns true once shutdown was requested through any path.
    #[must_use]
    pub fn is_shutdown_requested(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    /// The raw shutdown flag.
    ///
    /// Storing `true` is async-signal-safe; the event loop observes it within
    /// one polling interval.
    #[must_use]
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.inner.requested)
    }

    /// Resolves when [`request_shutdown`](Self::request_shutdown) is called.
    pub async fn shutdown_requested(&self) {
        self.inner.shutdown.cancelled().await;
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Synchronous bridge
    // ─────────────────────────────────────────────────────────────────────────

    /// Runs `work` on the pool and blocks the calling thread for its output.
    ///
    /// The work never runs on the calling thread. Called from a pool worker,
    /// the worker's other tasks are handed off first, so bridging from inside
    /// the runtime does not starve it.
    ///
    /// # Errors
    ///
    /// - [`RuntimeError::BridgeUnsupported`] from a current-thread runtime
    /// - [`RuntimeError::ShuttingDown`] if the work cannot be spawned
    /// - [`RuntimeError::Cancelled`] if the task was cancelled first
    /// - [`RuntimeError::Panicked`] if the work panicked
    pub fn block_on<F>(&self, name: &str, work: F) -> Result<F::Output, RuntimeError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        if let Ok(current) = Handle::try_current()
            && matches!(current.runtime_flavor(), RuntimeFlavor::CurrentThread)
        {
            return Err(RuntimeError::BridgeUnsupported);
        }

        let (tx, rx) = oneshot::channel();
        let task = self.spawn(name, async move {
            let output = AssertUnwindSafe(work).catch_unwind().await;
            let _ = tx.send(output);
        })?;

        let received = tokio::task::block_in_place(|| futures::executor::block_on(rx));
        match received {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(panic)) => Err(RuntimeError::Panicked {
                task: task.id(),
                message: panic_message(panic.as_ref()),
            }),
            Err(_) => Err(RuntimeError::Cancelled(task.id())),
        }
    }

    /// [`block_on`](Self::block_on) bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::Timeout`] when the bound elapses; the task is dropped.
    pub fn block_on_timeout<F>(
        &self,
        name: &str,
        timeout: Duration,
        work: F,
    ) -> Result<F::Output, RuntimeError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        // The timer is registered on a worker; the caller may have no reactor.
        self.block_on(name, async move { tokio::time::timeout(timeout, work).await })?
            .map_err(|_| RuntimeError::Timeout {
                operation: name.to_string(),
                after: timeout,
            })
    }
}

async fn run_task(
    mut finish: Finish,
    token: CancellationToken,
    work: BoxFuture<'static, ()>,
    name: String,
) {
    let outcome = {
        let tracked = AssertUnwindSafe(Tracked::new(work, &finish.state)).catch_unwind();
        tokio::select! {
            biased;
            () = token.cancelled() => TaskState::Cancelled,
            result = tracked => {
                if let Err(panic) = result {
                    tracing::error!(task = %finish.id, name = %name, panic = %panic_message(panic.as_ref()), "task panicked");
                }
                TaskState::Completed
            }
        }
    };
    if outcome == TaskState::Cancelled {
        tracing::debug!(task = %finish.id, name = %name, "task cancelled");
    }
    finish.outcome = Some(outcome);
}

fn panic_message(panic: &(dyn core::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl Spawner for Scheduler {
    fn spawn_detached(
        &self,
        name: &str,
        future: BoxFuture<'static, ()>,
    ) -> Result<(), SpawnError> {
        self.spawn_boxed(name, future)
            .map(drop)
            .map_err(|_| SpawnError::ShuttingDown(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler() -> Scheduler {
        Scheduler::new(Handle::current())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn completed_task_is_observable_after_removal() {
        let scheduler = scheduler();
        let handle = scheduler.spawn("quick", async {}).unwrap();
        assert_eq!(handle.wait().await, TaskState::Completed);

        // The table entry is gone; the ring still answers.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(scheduler.active_count(), 0);
        assert_eq!(
            scheduler.await_task(handle.id()).await.unwrap(),
            TaskState::Completed
        );
        assert!(matches!(
            scheduler.await_task(TaskId(9999)).await,
            Err(RuntimeError::UnknownTask(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn task_local_scope_is_visible() {
        let scheduler = scheduler();
        let (tx, rx) = oneshot::channel();
        let handle = scheduler
            .spawn("scoped", async move {
                let _ = tx.send(current_task());
            })
            .unwrap();
        assert_eq!(rx.await.unwrap(), Some(handle.id()));
        assert_eq!(current_task(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn panicking_task_completes() {
        let scheduler = scheduler();
        let handle = scheduler
            .spawn("panics", async { panic!("boom") })
            .unwrap();
        assert_eq!(handle.wait().await, TaskState::Completed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn spawn_rejected_after_shutdown_request() {
        let scheduler = scheduler();
        scheduler.request_shutdown();
        scheduler.request_shutdown();
        assert!(scheduler.is_shutdown_requested());
        assert!(matches!(
            scheduler.spawn("late", async {}),
            Err(RuntimeError::ShuttingDown(name)) if name == "late"
        ));
        assert!(
            scheduler
                .spawn_detached("late", async {}.boxed())
                .is_err()
        );
    }

    #[test]
    fn bridge_refuses_current_thread_runtime() {
        let pool = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let scheduler = Scheduler::new(pool.handle().clone());

        let local = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let result = local.block_on(async { scheduler.block_on("nested", async { 1 }) });
        assert!(matches!(result, Err(RuntimeError::BridgeUnsupported)));
    }
}
