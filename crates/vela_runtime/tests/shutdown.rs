//! The blocking event loop and the shutdown protocol.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use vela_runtime::{Runtime, RuntimeConfig, RuntimeError, ShutdownReason};

struct DropCounter(Arc<AtomicUsize>);

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

fn config() -> RuntimeConfig {
    RuntimeConfig::default()
        .with_worker_threads(4)
        .with_signals(false)
        .with_poll_interval(Duration::from_millis(10))
        .with_shutdown_grace(Duration::from_millis(200))
}

#[test]
fn run_returns_within_grace_with_tasks_in_flight() {
    let runtime = Runtime::new(config()).unwrap();
    let dropped = Arc::new(AtomicUsize::new(0));

    for name in ["cooperative-a", "cooperative-b"] {
        let guard = DropCounter(Arc::clone(&dropped));
        runtime
            .spawn(name, async move {
                let _guard = guard;
                tokio::time::sleep(Duration::from_secs(60)).await;
            })
            .unwrap();
    }
    runtime
        .spawn("stubborn", async {
            std::thread::sleep(Duration::from_millis(800));
        })
        .unwrap();
    std::thread::sleep(Duration::from_millis(50));

    let report = std::thread::scope(|scope| {
        scope.spawn(|| {
            std::thread::sleep(Duration::from_millis(50));
            runtime.request_shutdown();
        });
        let started = Instant::now();
        let report = runtime.run_event_loop_blocking().unwrap();
        assert!(
            started.elapsed() < Duration::from_millis(600),
            "shutdown took {:?}",
            started.elapsed()
        );
        report
    });

    assert_eq!(report.reason, ShutdownReason::Requested);
    assert_eq!(report.cancelled, 3);
    assert_eq!(report.aborted, 1);
    assert_eq!(dropped.load(Ordering::SeqCst), 2);

    assert!(matches!(
        runtime.spawn("late", async {}),
        Err(RuntimeError::ShuttingDown(_))
    ));
}

#[test]
fn shutdown_flag_is_observed_by_polling() {
    let runtime = Runtime::new(config()).unwrap();
    let flag = runtime.scheduler().shutdown_flag();

    let report = std::thread::scope(|scope| {
        scope.spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            flag.store(true, Ordering::SeqCst);
        });
        runtime.run_event_loop_blocking().unwrap()
    });

    assert_eq!(report.reason, ShutdownReason::Requested);
    assert_eq!(report.cancelled, 0);
    assert!(runtime.is_shutdown_requested());
}

#[test]
fn event_dispatches_are_cancelled_with_other_tasks() {
    use vela_events::{Event, EventPattern, handler_fn};

    let runtime = Runtime::new(config()).unwrap();
    let dropped = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&dropped);
    runtime.bus().subscribe(
        EventPattern::exact("job.started"),
        handler_fn("long-job", move |_event| {
            let guard = DropCounter(Arc::clone(&counter));
            async move {
                let _guard = guard;
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            }
        }),
    );
    assert_eq!(runtime.bus().publish(Event::new("job.started", serde_json::Value::Null)), 1);
    std::thread::sleep(Duration::from_millis(30));

    runtime.request_shutdown();
    let report = runtime.run_event_loop_blocking().unwrap();
    assert_eq!(report.cancelled, 1);
    assert_eq!(report.aborted, 0);
    assert_eq!(dropped.load(Ordering::SeqCst), 1);
    assert_eq!(runtime.bus().publish(Event::new("job.started", serde_json::Value::Null)), 0);
}

#[test]
fn started_event_reaches_subscribers() {
    use vela_events::{EventPattern, handler_fn};
    use vela_runtime::RUNTIME_STARTED;

    let runtime = Runtime::new(config().with_worker_threads(2)).unwrap();
    let scheduler = runtime.scheduler().clone();
    let workers = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&workers);
    runtime.bus().subscribe(
        EventPattern::exact(RUNTIME_STARTED),
        handler_fn("stop-on-start", move |event| {
            let count = event.payload()["workers"].as_u64().unwrap_or(0);
            seen.store(count as usize, Ordering::SeqCst);
            scheduler.request_shutdown();
            async { Ok(()) }
        }),
    );

    let report = runtime.run_event_loop_blocking().unwrap();
    assert_eq!(report.reason, ShutdownReason::Requested);
    assert_eq!(workers.load(Ordering::SeqCst), 2);
}
