//! The synchronous bridge under concurrency, nesting, timeouts and panics.

use std::sync::mpsc;
use std::time::Duration;

use vela_runtime::{Runtime, RuntimeConfig, RuntimeError};

fn runtime(workers: usize) -> Runtime {
    Runtime::new(
        RuntimeConfig::default()
            .with_worker_threads(workers)
            .with_signals(false),
    )
    .unwrap()
}

#[test]
fn hundred_threads_bridge_concurrently() {
    let runtime = runtime(4);

    let results: Vec<u64> = std::thread::scope(|scope| {
        let callers: Vec<_> = (0..100_u64)
            .map(|i| {
                let runtime = &runtime;
                scope.spawn(move || {
                    runtime
                        .block_on(async move {
                            tokio::time::sleep(Duration::from_millis(10)).await;
                            i * 2
                        })
                        .unwrap()
                })
            })
            .collect();
        callers.into_iter().map(|caller| caller.join().unwrap()).collect()
    });

    let expected: Vec<u64> = (0..100).map(|i| i * 2).collect();
    assert_eq!(results, expected);
}

#[test]
fn bridge_from_a_task_on_a_single_worker() {
    let runtime = runtime(1);
    let scheduler = runtime.scheduler().clone();
    let (tx, rx) = mpsc::channel();

    runtime
        .spawn("outer", async move {
            let inner = scheduler.block_on("inner", async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                "done"
            });
            tx.send(inner).ok();
        })
        .unwrap();

    let inner = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(inner.unwrap(), "done");
}

#[test]
fn bridge_timeout_is_reported() {
    let runtime = runtime(2);
    let started = std::time::Instant::now();
    let err = runtime
        .scheduler()
        .block_on_timeout("slow", Duration::from_millis(50), async {
            tokio::time::sleep(Duration::from_secs(30)).await;
        })
        .unwrap_err();
    assert!(err.is_timeout(), "{err}");
    assert!(matches!(err, RuntimeError::Timeout { ref operation, .. } if operation == "slow"));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn bridge_timeout_from_plain_threads() {
    let runtime = runtime(2);
    std::thread::scope(|scope| {
        let fast = scope.spawn(|| {
            runtime
                .scheduler()
                .block_on_timeout("fast", Duration::from_secs(5), async {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    7
                })
        });
        let slow = scope.spawn(|| {
            runtime
                .scheduler()
                .block_on_timeout("slow", Duration::from_millis(20), std::future::pending::<()>())
        });
        assert_eq!(fast.join().unwrap().unwrap(), 7);
        assert!(slow.join().unwrap().unwrap_err().is_timeout());
    });
}

#[test]
fn bridge_reports_panics() {
    let runtime = runtime(2);
    let err = runtime
        .block_on(async {
            panic!("kaboom");
        })
        .unwrap_err();
    match err {
        RuntimeError::Panicked { message, .. } => assert!(message.contains("kaboom")),
        other => panic!("unexpected error: {other}"),
    }

    // The pool survives the panic.
    assert_eq!(runtime.block_on(async { 7 }).unwrap(), 7);
}

#[test]
fn bridge_rejected_after_shutdown_request() {
    let runtime = runtime(2);
    runtime.request_shutdown();
    assert!(matches!(
        runtime.block_on(async {}),
        Err(RuntimeError::ShuttingDown(_))
    ));
}
