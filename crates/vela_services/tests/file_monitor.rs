//! File monitor backends publishing onto a real bus.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use vela_events::{Event, EventBus, EventPattern, TokioSpawner, handler_fn};
use vela_services::{
    FILE_CREATED, FILE_DELETED, FILE_MODIFIED, FileMonitor, MonitorBackend, MonitorOptions,
    Service,
};

fn bus() -> EventBus {
    EventBus::new(Arc::new(TokioSpawner::current()))
}

fn capture(bus: &EventBus) -> mpsc::UnboundedReceiver<(String, String)> {
    let (tx, rx) = mpsc::unbounded_channel();
    bus.subscribe(
        EventPattern::Prefix("file.".into()),
        handler_fn("capture", move |event: Arc<Event>| {
            let tx = tx.clone();
            async move {
                let path = event.payload()["path"].as_str().unwrap_or_default().to_string();
                tx.send((event.kind().to_string(), path)).ok();
                Ok(())
            }
        }),
    );
    rx
}

async fn next(rx: &mut mpsc::UnboundedReceiver<(String, String)>) -> (String, String) {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for file event")
        .expect("channel closed")
}

/// Waits long enough for several polls, then asserts nothing else arrived.
async fn quiet(rx: &mut mpsc::UnboundedReceiver<(String, String)>) {
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(rx.try_recv().is_err(), "unexpected extra event");
}

fn name_of(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn polling_emits_exactly_one_event_per_change() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("existing.txt"), b"before").unwrap();

    let bus = bus();
    let mut rx = capture(&bus);
    let monitor = FileMonitor::new(
        bus.clone(),
        MonitorOptions {
            backend: MonitorBackend::Polling,
            poll_interval: Duration::from_millis(10),
        },
    );
    assert_eq!(monitor.backend(), MonitorBackend::Polling);
    monitor.watch(dir.path()).unwrap();

    // Pre-existing entries are the baseline.
    quiet(&mut rx).await;

    let file = dir.path().join("a.txt");
    std::fs::write(&file, b"one").unwrap();
    let (kind, path) = next(&mut rx).await;
    assert_eq!((kind.as_str(), name_of(&path).as_str()), (FILE_CREATED, "a.txt"));
    quiet(&mut rx).await;

    std::fs::write(&file, b"a longer body").unwrap();
    let (kind, path) = next(&mut rx).await;
    assert_eq!((kind.as_str(), name_of(&path).as_str()), (FILE_MODIFIED, "a.txt"));
    quiet(&mut rx).await;

    std::fs::remove_file(&file).unwrap();
    let (kind, path) = next(&mut rx).await;
    assert_eq!((kind.as_str(), name_of(&path).as_str()), (FILE_DELETED, "a.txt"));
    quiet(&mut rx).await;

    monitor.shutdown();
    std::fs::write(dir.path().join("late.txt"), b"x").unwrap();
    quiet(&mut rx).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn watch_is_idempotent_and_unwatch_stops_events() {
    let dir = tempfile::tempdir().unwrap();
    let bus = bus();
    let mut rx = capture(&bus);
    let monitor = FileMonitor::new(
        bus,
        MonitorOptions {
            backend: MonitorBackend::Polling,
            poll_interval: Duration::from_millis(10),
        },
    );

    let first = monitor.watch(dir.path()).unwrap();
    let second = monitor.watch(dir.path().join(".")).unwrap();
    assert_eq!(first, second);
    assert_eq!(monitor.watched().len(), 1);

    assert!(monitor.unwatch(dir.path()));
    assert!(!monitor.unwatch(dir.path()));
    std::fs::write(dir.path().join("b.txt"), b"x").unwrap();
    quiet(&mut rx).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn service_methods_manage_watches() {
    let dir = tempfile::tempdir().unwrap();
    let monitor = FileMonitor::new(
        bus(),
        MonitorOptions {
            backend: MonitorBackend::Polling,
            poll_interval: Duration::from_millis(10),
        },
    );
    let path = dir.path().display().to_string();

    monitor
        .invoke("watch", serde_json::json!({ "path": path }))
        .await
        .unwrap();
    let listed = monitor.invoke("list", Value::Null).await.unwrap();
    assert_eq!(listed.as_array().map(Vec::len), Some(1));
    assert!(monitor.invoke("watch", Value::Null).await.is_err());
}

#[cfg(target_os = "linux")]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn native_backend_reports_create_and_delete() {
    let dir = tempfile::tempdir().unwrap();
    let bus = bus();
    let mut rx = capture(&bus);
    let monitor = FileMonitor::new(
        bus,
        MonitorOptions {
            backend: MonitorBackend::Native,
            ..MonitorOptions::default()
        },
    );
    assert_eq!(monitor.backend(), MonitorBackend::Native);
    monitor.watch(dir.path()).unwrap();

    let file = dir.path().join("native.txt");
    std::fs::write(&file, b"hi").unwrap();
    let (kind, path) = next(&mut rx).await;
    assert_eq!((kind.as_str(), name_of(&path).as_str()), (FILE_CREATED, "native.txt"));

    std::fs::remove_file(&file).unwrap();
    loop {
        let (kind, path) = next(&mut rx).await;
        if kind == FILE_DELETED {
            assert_eq!(name_of(&path), "native.txt");
            break;
        }
        // The write that follows creation closes the file once more.
        assert_eq!(kind, FILE_MODIFIED);
    }
    monitor.shutdown();
}
