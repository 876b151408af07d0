use axum::{
    extract::{State, WebSocketUpgrade, ws::{Message, WebSocket}},
    response::Response,
};
use futures::{SinkExt, StreamExt};
use scribe_services::background::RegistryError;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::dispatcher::{error_message, send_snapshot, send_to_connection, snapshot_message};
use super::storage::WsSender;
use crate::state::AppState;

/// Client frame registering interest in a task.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskInterest {
    task_id: String,
}

pub async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_id = Uuid::new_v4().to_string();
    info!(%connection_id, "WebSocket connected");

    let (sender, mut receiver) = socket.split();
    let sender: WsSender = Arc::new(Mutex::new(sender));

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                handle_client_message(&state, &connection_id, &sender, &text).await;
            }
            Ok(Message::Ping(data)) => {
                let mut guard = sender.lock().await;
                let _ = guard.send(Message::Pong(data)).await;
            }
            Ok(Message::Close(_)) => {
                break;
            }
            Err(e) => {
                warn!(%connection_id, %e, "WebSocket error");
                break;
            }
            _ => {}
        }
    }

    let dropped = state.ws_storage.remove_connection(&connection_id);
    info!(%connection_id, dropped, "WebSocket disconnected");
}

async fn handle_client_message(
    state: &AppState,
    connection_id: &str,
    sender: &WsSender,
    text: &str,
) {
    let interest: TaskInterest = match serde_json::from_str(text) {
        Ok(i) => i,
        Err(_) => {
            send_to_connection(sender, &error_message("Expected {\"taskId\": \"...\"}")).await;
            return;
        }
    };
    let task_id = interest.task_id;
    debug!(%connection_id, %task_id, "Task status requested");

    let snapshot = match state.registry.get_status(&task_id).await {
        Ok(snapshot) => snapshot,
        Err(RegistryError::UnknownTask(_)) => {
            send_to_connection(sender, &error_message(&format!("Unknown task {}", task_id))).await;
            return;
        }
        Err(e) => {
            warn!(%task_id, error = %e, "Task lookup failed");
            send_to_connection(sender, &error_message("Task lookup failed")).await;
            return;
        }
    };

    if snapshot.is_terminal() {
        send_to_connection(sender, &snapshot_message(&snapshot)).await;
        return;
    }

    let subscriber = state.ws_storage.subscribe(&task_id, connection_id, sender.clone());

    // Re-read so a transition between the lookup and the subscribe is not lost.
    // The mark keeps this frame from overtaking a newer one from the forwarder.
    let current = state.registry.get_status(&task_id).await.unwrap_or(snapshot);
    if current.is_terminal() {
        state.ws_storage.unsubscribe(&task_id, connection_id);
    }
    send_snapshot(&*subscriber.sender, &subscriber.mark, &current).await;
}
