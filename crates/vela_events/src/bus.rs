//! Publish/subscribe hub.
//!
//! # Dispatch
//!
//! `publish()` snapshots the matching subscriptions under the table's read
//! lock, releases the lock, and hands one unit of work per match to the
//! [`Spawner`]. It returns once scheduling has been initiated; it never waits
//! for a handler to run. A subscription added after `publish()` took its
//! snapshot never receives that event.
//!
//! # Ordering
//!
//! Handlers of *different* subscriptions run with no ordering relative to
//! each other. Within one subscription, [`Delivery`] decides:
//!
//! - [`Delivery::Ordered`] (default) queues events on the subscription and
//!   drains them one at a time from a single task, so events published by one
//!   producer run and complete in publish order.
//! - [`Delivery::Concurrent`] spawns one task per event. Executions overlap
//!   and their start order is up to the executor.
//!
//! # Failure isolation
//!
//! A handler that errors or panics is caught inside its own task. The failure
//! is logged and republished as a [`HANDLER_FAILED`] event; the publisher and
//! sibling handlers are unaffected. Failures of handlers subscribed to
//! `HANDLER_FAILED` itself are only logged.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::FutureExt;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use vela_system::api::API;

use crate::error::HandlerError;
use crate::event::Event;
use crate::handler::EventHandler;
use crate::pattern::EventPattern;
use crate::spawn::Spawner;

/// Kind of the event published when a handler fails.
pub const HANDLER_FAILED: &str = "system.handler.failed";

/// Per-subscription delivery mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Delivery {
    /// Events are handled one at a time, in publish order (default).
    #[default]
    Ordered,
    /// Each event is dispatched as its own task, with no ordering.
    Concurrent,
}

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl core::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Subscription
// ─────────────────────────────────────────────────────────────────────────────

struct Subscription {
    id: SubscriptionId,
    pattern: EventPattern,
    handler: Arc<dyn EventHandler>,
    /// Present for [`Delivery::Ordered`] subscriptions.
    lane: Option<Mutex<Lane>>,
}

#[derive(Default)]
struct Lane {
    pending: VecDeque<Arc<Event>>,
    draining: bool,
}

/// Resets an ordered lane when its drain task is dropped early: rejected by
/// the spawner or cancelled mid-drain.
struct DrainGuard {
    sub: Arc<Subscription>,
    armed: bool,
}

impl Drop for DrainGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(lane) = &self.sub.lane {
            let mut lane = lane.lock();
            lane.draining = false;
            lane.pending.clear();
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// EventBus
// ─────────────────────────────────────────────────────────────────────────────

struct BusInner {
    subscriptions: RwLock<IndexMap<SubscriptionId, Arc<Subscription>>>,
    next_id: AtomicU64,
    spawner: Arc<dyn Spawner>,
    published: AtomicU64,
    failures: AtomicU64,
}

/// Process-wide publish/subscribe hub.
///
/// Cheap to clone; all clones share one subscription table.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl API for EventBus {}

impl core::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let patterns: Vec<String> = self
            .inner
            .subscriptions
            .read()
            .values()
            .map(|sub| sub.pattern.to_string())
            .collect();
        f.debug_struct("EventBus")
            .field("subscriptions", &patterns)
            .field("published", &self.published_count())
            .finish()
    }
}

impl EventBus {
    /// Creates a bus that schedules handlers through `spawner`.
    #[must_use]
    pub fn new(spawner: Arc<dyn Spawner>) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscriptions: RwLock::new(IndexMap::new()),
                next_id: AtomicU64::new(1),
                spawner,
                published: AtomicU64::new(0),
                failures: AtomicU64::new(0),
            }),
        }
    }

    /// The spawner handlers are scheduled on.
    ///
    /// Services that publish from background loops spawn those loops here so
    /// they are tracked and cancelled with everything else.
    #[must_use]
    pub fn spawner(&self) -> Arc<dyn Spawner> {
        Arc::clone(&self.inner.spawner)
    }

    /// Subscribes `handler` with the default [`Delivery::Ordered`].
    pub fn subscribe(&self, pattern: EventPattern, handler: impl EventHandler) -> SubscriptionId {
        self.subscribe_shared(pattern, Arc::new(handler), Delivery::default())
    }

    /// Subscribes `handler` with an explicit delivery mode.
    pub fn subscribe_with(
        &self,
        pattern: EventPattern,
        handler: impl EventHandler,
        delivery: Delivery,
    ) -> SubscriptionId {
        self.subscribe_shared(pattern, Arc::new(handler), delivery)
    }

    /// Subscribes an already shared handler.
    pub fn subscribe_shared(
        &self,
        pattern: EventPattern,
        handler: Arc<dyn EventHandler>,
        delivery: Delivery,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let lane = (delivery == Delivery::Ordered).then(|| Mutex::new(Lane::default()));
        tracing::debug!(
            subscription = %id,
            pattern = %pattern,
            handler = handler.name(),
            ?delivery,
            "subscribed"
        );
        let subscription = Arc::new(Subscription {
            id,
            pattern,
            handler,
            lane,
        });
        self.inner.subscriptions.write().insert(id, subscription);
        id
    }

    /// Removes a subscription. Returns false if it was not registered.
    ///
    /// Dispatches already scheduled for it still run.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.subscriptions.write().shift_remove(&id).is_some()
    }

    /// Publishes an event to every matching subscription.
    ///
    /// Returns the number of handler dispatches scheduled.
    pub fn publish(&self, event: Event) -> usize {
        let event = Arc::new(event);
        self.inner.published.fetch_add(1, Ordering::Relaxed);

        let matched: Vec<Arc<Subscription>> = self
            .inner
            .subscriptions
            .read()
            .values()
            .filter(|sub| sub.pattern.matches(&event))
            .cloned()
            .collect();

        let mut scheduled = 0;
        for sub in matched {
            if self.schedule(sub, Arc::clone(&event)) {
                scheduled += 1;
            }
        }
        tracing::trace!(kind = event.kind(), scheduled, "event published");
        scheduled
    }

    /// Publishes events in iteration order. Returns the total dispatch count.
    pub fn publish_all(&self, events: impl IntoIterator<Item = Event>) -> usize {
        events.into_iter().map(|event| self.publish(event)).sum()
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.read().len()
    }

    /// Number of events published since creation.
    #[must_use]
    pub fn published_count(&self) -> u64 {
        self.inner.published.load(Ordering::Relaxed)
    }

    /// Number of handler failures observed since creation.
    #[must_use]
    pub fn failure_count(&self) -> u64 {
        self.inner.failures.load(Ordering::Relaxed)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internal: scheduling
    // ─────────────────────────────────────────────────────────────────────────

    fn schedule(&self, sub: Arc<Subscription>, event: Arc<Event>) -> bool {
        if sub.lane.is_some() {
            return self.schedule_ordered(sub, event);
        }

        let bus = self.clone();
        let handler = Arc::clone(&sub.handler);
        let work = async move { bus.run_handler(&sub, event).await }.boxed();
        self.spawn(handler.name(), work)
    }

    fn schedule_ordered(&self, sub: Arc<Subscription>, event: Arc<Event>) -> bool {
        let Some(lane) = &sub.lane else {
            return false;
        };
        {
            let mut lane = lane.lock();
            lane.pending.push_back(event);
            if lane.draining {
                return true;
            }
            lane.draining = true;
        }

        let bus = self.clone();
        let guard = DrainGuard {
            sub: Arc::clone(&sub),
            armed: true,
        };
        let work = async move { bus.drain(guard).await }.boxed();
        // On rejection the guard inside `work` is dropped, resetting the lane.
        self.spawn(sub.handler.name(), work)
    }

    async fn drain(self, mut guard: DrainGuard) {
        loop {
            let next = {
                let Some(lane) = &guard.sub.lane else {
                    guard.armed = false;
                    return;
                };
                let mut lane = lane.lock();
                match lane.pending.pop_front() {
                    Some(event) => event,
                    None => {
                        // Cleared under the lock so a concurrent publish
                        // either sees this drainer or starts a new one.
                        lane.draining = false;
                        drop(lane);
                        guard.armed = false;
                        return;
                    }
                }
            };
            self.run_handler(&guard.sub, next).await;
        }
    }

    fn spawn(&self, name: &str, work: futures::future::BoxFuture<'static, ()>) -> bool {
        match self.inner.spawner.spawn_detached(name, work) {
            Ok(()) => true,
            Err(err) => {
                tracing::debug!(handler = name, error = %err, "dispatch dropped");
                false
            }
        }
    }

    async fn run_handler(&self, sub: &Subscription, event: Arc<Event>) {
        let outcome = AssertUnwindSafe(sub.handler.handle(Arc::clone(&event)))
            .catch_unwind()
            .await;
        let error = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(err)) => err,
            Err(panic) => HandlerError::Panicked(panic_message(panic.as_ref())),
        };

        self.inner.failures.fetch_add(1, Ordering::Relaxed);
        tracing::error!(
            handler = sub.handler.name(),
            subscription = %sub.id,
            kind = event.kind(),
            error = %error,
            "event handler failed"
        );

        if event.kind() != HANDLER_FAILED {
            self.publish(Event::new(
                HANDLER_FAILED,
                json!({
                    "handler": sub.handler.name(),
                    "subscription": sub.id.0,
                    "eventKind": event.kind(),
                    "error": error.to_string(),
                }),
            ));
        }
    }
}

fn panic_message(panic: &(dyn core::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
