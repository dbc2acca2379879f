//! Dispatch behavior of the event bus on a real tokio runtime.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::{Notify, mpsc};
use vela_events::{
    Delivery, Event, EventBus, EventPattern, HANDLER_FAILED, HandlerError, Repositories,
    TokioSpawner, handler_fn,
};

fn bus() -> EventBus {
    EventBus::new(Arc::new(TokioSpawner::current()))
}

async fn recv(rx: &mut mpsc::UnboundedReceiver<Value>) -> Value {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for handler")
        .expect("channel closed")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn handler_receives_exact_payload_once() {
    let bus = bus();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&calls);

    bus.subscribe(
        EventPattern::exact("file.created"),
        handler_fn("capture", move |event| {
            let tx = tx.clone();
            let counted = Arc::clone(&counted);
            async move {
                counted.fetch_add(1, Ordering::SeqCst);
                tx.send(event.payload().clone()).ok();
                Ok(())
            }
        }),
    );

    let scheduled = bus.publish(Event::new("file.created", json!({"path": "/tmp/a.txt"})));
    assert_eq!(scheduled, 1);
    assert_eq!(recv(&mut rx).await, json!({"path": "/tmp/a.txt"}));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn publish_returns_before_handler_completes() {
    let bus = bus();
    let release = Arc::new(Notify::new());
    let finished = Arc::new(AtomicUsize::new(0));
    let (gate, done) = (Arc::clone(&release), Arc::clone(&finished));

    bus.subscribe(
        EventPattern::Any,
        handler_fn("slow", move |_| {
            let (gate, done) = (Arc::clone(&gate), Arc::clone(&done));
            async move {
                gate.notified().await;
                done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }),
    );

    assert_eq!(bus.publish(Event::new("tick", Value::Null)), 1);
    assert_eq!(finished.load(Ordering::SeqCst), 0);

    release.notify_one();
    tokio::time::timeout(Duration::from_secs(5), async {
        while finished.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn late_subscription_is_not_retroactive() {
    let bus = bus();
    bus.publish(Event::new("user.created", json!({"id": 1})));

    let (tx, mut rx) = mpsc::unbounded_channel();
    bus.subscribe(
        EventPattern::exact("user.created"),
        handler_fn("late", move |event| {
            let tx = tx.clone();
            async move {
                tx.send(event.payload().clone()).ok();
                Ok(())
            }
        }),
    );
    bus.publish(Event::new("user.created", json!({"id": 2})));

    assert_eq!(recv(&mut rx).await, json!({"id": 2}));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failing_handlers_are_isolated_and_reported() {
    let bus = bus();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (failures_tx, mut failures_rx) = mpsc::unbounded_channel();

    bus.subscribe(
        EventPattern::exact("order.placed"),
        handler_fn("errors", |_| async { Err(HandlerError::failed("db down")) }),
    );
    bus.subscribe(
        EventPattern::exact("order.placed"),
        handler_fn("panics", |event| async move {
            assert!(event.payload().is_null(), "boom");
            Ok(())
        }),
    );
    bus.subscribe(
        EventPattern::exact("order.placed"),
        handler_fn("healthy", move |event| {
            let tx = tx.clone();
            async move {
                tx.send(event.payload().clone()).ok();
                Ok(())
            }
        }),
    );
    bus.subscribe(
        EventPattern::exact(HANDLER_FAILED),
        handler_fn("failure-sink", move |event| {
            let failures_tx = failures_tx.clone();
            async move {
                failures_tx.send(event.payload().clone()).ok();
                Ok(())
            }
        }),
    );

    assert_eq!(bus.publish(Event::new("order.placed", json!({"order": 9}))), 3);
    assert_eq!(recv(&mut rx).await, json!({"order": 9}));

    let mut failed = vec![recv(&mut failures_rx).await, recv(&mut failures_rx).await];
    failed.sort_by_key(|payload| payload["handler"].as_str().unwrap_or_default().to_string());
    assert_eq!(failed[0]["handler"], "errors");
    assert_eq!(failed[0]["error"], "db down");
    assert_eq!(failed[1]["handler"], "panics");
    assert_eq!(failed[1]["error"], "handler panicked: boom");
    assert_eq!(failed[1]["eventKind"], "order.placed");
    assert_eq!(bus.failure_count(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failure_of_failure_handler_does_not_loop() {
    let bus = bus();
    bus.subscribe(
        EventPattern::exact(HANDLER_FAILED),
        handler_fn("broken-sink", |_| async { Err(HandlerError::failed("sink")) }),
    );
    bus.subscribe(
        EventPattern::exact("x"),
        handler_fn("broken", |_| async { Err(HandlerError::failed("x")) }),
    );

    bus.publish(Event::new("x", Value::Null));
    tokio::time::sleep(Duration::from_millis(100)).await;

    // One publish of "x" plus one failure event; the sink's own failure is
    // logged, not republished.
    assert_eq!(bus.published_count(), 2);
    assert_eq!(bus.failure_count(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn storing_a_list_yields_one_event_per_item() {
    let bus = bus();
    let repositories = Repositories::new(bus.clone());
    let (tx, mut rx) = mpsc::unbounded_channel();

    bus.subscribe(
        EventPattern::repository("orders"),
        handler_fn("per-item", move |event| {
            let tx = tx.clone();
            async move {
                tx.send(event.payload().clone()).ok();
                Ok(())
            }
        }),
    );

    let items: Vec<Value> = (0..10).map(|i| json!({"n": i})).collect();
    let ids = repositories
        .get_or_create("orders")
        .store(Value::Array(items.clone()));
    assert_eq!(ids.len(), 10);

    let mut seen = Vec::new();
    for _ in 0..10 {
        seen.push(recv(&mut rx).await);
    }
    seen.sort_by_key(|payload| payload["n"].as_i64());
    assert_eq!(seen, items);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err(), "one event per item, never a batch");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn storing_a_scalar_yields_one_event() {
    let bus = bus();
    let repositories = Repositories::new(bus.clone());
    let (tx, mut rx) = mpsc::unbounded_channel();

    bus.subscribe(
        EventPattern::parse("repository:counters:created").unwrap(),
        handler_fn("scalar", move |event| {
            let tx = tx.clone();
            async move {
                let change = event.change().cloned().ok_or_else(|| HandlerError::failed("no change"))?;
                tx.send(json!({
                    "repository": change.repository_name,
                    "value": change.new_value,
                }))
                .ok();
                Ok(())
            }
        }),
    );

    repositories.get_or_create("counters").store(json!(5));
    assert_eq!(
        recv(&mut rx).await,
        json!({"repository": "counters", "value": 5})
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ordered_delivery_completes_in_publish_order() {
    let bus = bus();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);

    bus.subscribe_with(
        EventPattern::exact("step"),
        handler_fn("ordered", move |event| {
            let sink = Arc::clone(&sink);
            async move {
                let n = event.payload().as_u64().unwrap_or_default();
                // Earlier events sleep longer; only serialized delivery keeps order.
                tokio::time::sleep(Duration::from_millis(20 - n)).await;
                sink.lock().push(n);
                Ok(())
            }
        }),
        Delivery::Ordered,
    );

    for n in 0..10_u64 {
        bus.publish(Event::new("step", json!(n)));
    }

    tokio::time::timeout(Duration::from_secs(5), async {
        while seen.lock().len() < 10 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(*seen.lock(), (0..10).collect::<Vec<u64>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn default_delivery_is_fifo_for_a_producer_on_a_worker() {
    let bus = bus();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);

    bus.subscribe(
        EventPattern::exact("tick"),
        handler_fn("record", move |event| {
            sink.lock().push(event.payload().as_u64().unwrap_or_default());
            async { Ok(()) }
        }),
    );

    let producer = bus.clone();
    tokio::spawn(async move {
        for i in 0..5_u64 {
            producer.publish(Event::new("tick", json!(i)));
        }
    })
    .await
    .unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while seen.lock().len() < 5 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(*seen.lock(), vec![0, 1, 2, 3, 4]);
}
