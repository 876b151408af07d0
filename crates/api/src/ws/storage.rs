use axum::extract::ws::{Message, WebSocket};
use dashmap::DashMap;
use futures::stream::SplitSink;
use parking_lot::Mutex as SyncMutex;
use scribe_services::TaskSnapshot;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

pub type WsSender = Arc<Mutex<SplitSink<WebSocket, Message>>>;

/// What a session has already been told about one task.
#[derive(Debug, Default)]
pub struct DeliveryMark {
    inner: SyncMutex<MarkState>,
}

#[derive(Debug, Default)]
struct MarkState {
    progress: Option<f64>,
    finished: bool,
}

impl DeliveryMark {
    /// Records `snapshot` as delivered if it does not move the session's view
    /// backwards. Nothing is accepted after a terminal snapshot.
    pub fn advance(&self, snapshot: &TaskSnapshot) -> bool {
        let mut state = self.inner.lock();
        if state.finished {
            return false;
        }
        if snapshot.is_terminal() {
            state.finished = true;
            state.progress = Some(snapshot.progress);
            return true;
        }
        if state.progress.is_some_and(|sent| snapshot.progress < sent) {
            return false;
        }
        state.progress = Some(snapshot.progress);
        true
    }
}

#[derive(Clone)]
pub struct Subscriber {
    pub connection_id: String,
    pub sender: WsSender,
    pub mark: Arc<DeliveryMark>,
}

/// Tracks which WebSocket session wants updates for each task.
/// A task has at most one subscriber; the most recent session wins.
pub struct WsStorage {
    subscriptions: DashMap<String, Subscriber>,
}

impl WsStorage {
    pub fn new() -> Self {
        Self {
            subscriptions: DashMap::new(),
        }
    }

    /// Makes `connection_id` the subscriber for `task_id`. A session asking
    /// again keeps its delivery mark; a different session starts fresh.
    pub fn subscribe(&self, task_id: &str, connection_id: &str, sender: WsSender) -> Subscriber {
        let mut entry = self
            .subscriptions
            .entry(task_id.to_string())
            .or_insert_with(|| Subscriber {
                connection_id: connection_id.to_string(),
                sender: sender.clone(),
                mark: Arc::new(DeliveryMark::default()),
            });
        if entry.connection_id != connection_id {
            debug!(
                %task_id,
                previous = %entry.connection_id,
                "Subscription moved to newer session"
            );
            *entry = Subscriber {
                connection_id: connection_id.to_string(),
                sender,
                mark: Arc::new(DeliveryMark::default()),
            };
        }
        entry.clone()
    }

    /// Drops the subscription only if `connection_id` still owns it.
    pub fn unsubscribe(&self, task_id: &str, connection_id: &str) -> bool {
        self.subscriptions
            .remove_if(task_id, |_, s| s.connection_id == connection_id)
            .is_some()
    }

    pub fn subscriber(&self, task_id: &str) -> Option<Subscriber> {
        self.subscriptions.get(task_id).map(|s| s.clone())
    }

    /// Removes every subscription held by a closed session.
    pub fn remove_connection(&self, connection_id: &str) -> usize {
        let before = self.subscriptions.len();
        self.subscriptions
            .retain(|_, s| s.connection_id != connection_id);
        before.saturating_sub(self.subscriptions.len())
    }

    pub fn subscribed_task_ids(&self) -> Vec<String> {
        self.subscriptions.iter().map(|r| r.key().clone()).collect()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }
}

impl Default for WsStorage {
    fn default() -> Self {
        Self::new()
    }
}
