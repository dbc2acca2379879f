//! Task tracking and cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use vela_runtime::{Scheduler, TaskState};

async fn wait_for_state(scheduler: &Scheduler, handle: &vela_runtime::TaskHandle, state: TaskState) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while scheduler.task_state(handle.id()) != Some(state) {
        assert!(Instant::now() < deadline, "task never reached {state:?}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelled_tasks_make_no_further_progress() {
    let scheduler = Scheduler::new(Handle::current());
    let ticks = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..5)
        .map(|i| {
            let ticks = Arc::clone(&ticks);
            scheduler
                .spawn(&format!("ticker-{i}"), async move {
                    loop {
                        ticks.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                    }
                })
                .unwrap()
        })
        .collect();
    tokio::time::sleep(Duration::from_millis(30)).await;

    let report = scheduler.cancel_all(Duration::from_secs(1)).await;
    assert_eq!(report.cancelled, 5);
    assert_eq!(report.aborted, 0);

    let frozen = ticks.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(ticks.load(Ordering::SeqCst), frozen);

    for handle in &handles {
        assert_eq!(handle.state(), TaskState::Cancelled);
    }
    assert_eq!(scheduler.active_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stubborn_task_is_aborted_after_grace() {
    let scheduler = Scheduler::new(Handle::current());
    let handle = scheduler
        .spawn("stubborn", async {
            std::thread::sleep(Duration::from_millis(300));
            std::future::pending::<()>().await;
        })
        .unwrap();
    wait_for_state(&scheduler, &handle, TaskState::Running).await;

    let started = Instant::now();
    let report = scheduler.cancel_all(Duration::from_millis(50)).await;
    assert!(started.elapsed() < Duration::from_millis(250));
    assert_eq!(report.cancelled, 1);
    assert_eq!(report.aborted, 1);

    assert_eq!(handle.wait().await, TaskState::Cancelled);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn task_states_follow_suspension() {
    let scheduler = Scheduler::new(Handle::current());
    let (tx, rx) = oneshot::channel::<()>();
    let handle = scheduler
        .spawn("waiter", async move {
            rx.await.ok();
        })
        .unwrap();

    wait_for_state(&scheduler, &handle, TaskState::Suspended).await;
    assert_eq!(scheduler.tasks().len(), 1);
    assert_eq!(scheduler.tasks()[0].1, "waiter");

    tx.send(()).unwrap();
    assert_eq!(
        scheduler.await_task(handle.id()).await.unwrap(),
        TaskState::Completed
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn individual_cancel_leaves_siblings_running() {
    let scheduler = Scheduler::new(Handle::current());
    let (tx, rx) = oneshot::channel::<()>();
    let victim = scheduler
        .spawn("victim", std::future::pending::<()>())
        .unwrap();
    let sibling = scheduler
        .spawn("sibling", async move {
            rx.await.ok();
        })
        .unwrap();

    victim.cancel();
    assert_eq!(victim.wait().await, TaskState::Cancelled);
    assert!(!sibling.state().is_terminal());

    tx.send(()).unwrap();
    assert_eq!(sibling.wait().await, TaskState::Completed);
}
