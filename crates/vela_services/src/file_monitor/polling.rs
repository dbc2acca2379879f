//! Snapshot-diff polling backend.

use std::path::PathBuf;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use vela_events::EventBus;

use super::snapshot::Snapshot;

/// Rescans `root` every `interval` and publishes one event per difference
/// from the previous scan.
pub(crate) async fn run(
    root: PathBuf,
    mut previous: Snapshot,
    interval: Duration,
    bus: EventBus,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            () = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let scan_root = root.clone();
        let current = match tokio::task::spawn_blocking(move || Snapshot::scan(&scan_root)).await {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(err)) => {
                tracing::warn!(path = %root.display(), error = %err, "file scan failed");
                continue;
            }
            Err(err) => {
                tracing::warn!(path = %root.display(), error = %err, "file scan task failed");
                continue;
            }
        };
        if token.is_cancelled() {
            break;
        }

        for change in previous.diff(&current) {
            tracing::debug!(path = %change.path.display(), kind = change.kind.event_kind(), "file change");
            bus.publish(change.into_event());
        }
        previous = current;
    }
    tracing::debug!(path = %root.display(), "polling watch stopped");
}
