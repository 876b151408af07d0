use axum::extract::ws::Message;
use futures::{Sink, SinkExt};
use scribe_services::{TaskRegistry, TaskSnapshot};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::storage::{DeliveryMark, WsSender, WsStorage};

/// Longest the forwarder waits on one session before dropping it.
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(2);

pub fn snapshot_message(snapshot: &TaskSnapshot) -> serde_json::Value {
    serde_json::json!({
        "type": "task:status",
        "data": snapshot,
    })
}

pub fn error_message(message: &str) -> serde_json::Value {
    serde_json::json!({
        "type": "error",
        "message": message,
    })
}

/// Sends a JSON message to one connection. Returns `false` if the socket is gone.
pub async fn send_to_connection(sender: &WsSender, message: &serde_json::Value) -> bool {
    let text = serde_json::to_string(message).unwrap_or_default();
    let mut guard = sender.lock().await;
    match guard.send(Message::text(text)).await {
        Ok(()) => true,
        Err(e) => {
            debug!(%e, "Failed to send WS message");
            false
        }
    }
}

/// Sends a snapshot unless the session has already seen a newer one.
///
/// The mark is checked under the sender lock, so frames for a task leave in
/// non-decreasing progress order. Returns `false` only if the socket is gone.
pub async fn send_snapshot<S>(
    sender: &Mutex<S>,
    mark: &DeliveryMark,
    snapshot: &TaskSnapshot,
) -> bool
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let text = serde_json::to_string(&snapshot_message(snapshot)).unwrap_or_default();
    let mut guard = sender.lock().await;
    if !mark.advance(snapshot) {
        debug!(
            task_id = %snapshot.task_id,
            progress = snapshot.progress,
            "Skipping stale snapshot"
        );
        return true;
    }
    match guard.send(Message::text(text)).await {
        Ok(()) => true,
        Err(e) => {
            debug!(%e, "Failed to send WS message");
            false
        }
    }
}

/// Like [`send_snapshot`] but gives up after `limit`, counting that as a failed delivery.
pub async fn send_snapshot_within<S>(
    sender: &Mutex<S>,
    mark: &DeliveryMark,
    snapshot: &TaskSnapshot,
    limit: Duration,
) -> bool
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    match tokio::time::timeout(limit, send_snapshot(sender, mark, snapshot)).await {
        Ok(delivered) => delivered,
        Err(_) => {
            warn!(task_id = %snapshot.task_id, ?limit, "WS session stalled");
            false
        }
    }
}

/// Routes registry events to subscribed sessions until the registry goes away.
pub fn spawn_forwarder(registry: Arc<TaskRegistry>, storage: Arc<WsStorage>) -> JoinHandle<()> {
    let mut events = registry.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(snapshot) => deliver(&storage, &snapshot).await,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Task notifications lagged, resyncing subscribers");
                    resync(&registry, &storage).await;
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!("Task notification forwarder stopped");
    })
}

async fn deliver(storage: &WsStorage, snapshot: &TaskSnapshot) {
    let Some(subscriber) = storage.subscriber(&snapshot.task_id) else {
        return;
    };
    let delivered = send_snapshot_within(
        &*subscriber.sender,
        &subscriber.mark,
        snapshot,
        DELIVERY_TIMEOUT,
    )
    .await;
    if !delivered {
        // A dead or stalled session loses every subscription, not just this one
        let dropped = storage.remove_connection(&subscriber.connection_id);
        debug!(connection_id = %subscriber.connection_id, dropped, "Dropped WS subscriber");
    } else if snapshot.is_terminal() {
        storage.unsubscribe(&snapshot.task_id, &subscriber.connection_id);
    }
}

/// Pushes the current state of every subscribed task after missed events.
async fn resync(registry: &TaskRegistry, storage: &WsStorage) {
    for task_id in storage.subscribed_task_ids() {
        match registry.get_status(&task_id).await {
            Ok(snapshot) => deliver(storage, &snapshot).await,
            Err(e) => warn!(task_id = %task_id, error = %e, "Resync lookup failed"),
        }
    }
}
