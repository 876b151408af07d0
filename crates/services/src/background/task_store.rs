use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use scribe_db::models::{Task, TaskStatus};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::dao::{DaoError, TaskRepository};

/// Buffered snapshots per subscriber before it starts lagging.
pub const EVENT_CAPACITY: usize = 256;

const SAVE_RETRY_DELAY: Duration = Duration::from_millis(200);

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("task {0} not found")]
    UnknownTask(String),
    #[error("task {0} is no longer processing")]
    AlreadyTerminal(String),
    #[error(transparent)]
    Dao(#[from] DaoError),
}

/// Point-in-time view of a task as reported to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskSnapshot {
    pub task_id: String,
    pub status: TaskStatus,
    pub progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    pub create_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_time: Option<String>,
}

impl TaskSnapshot {
    fn of(task: &Task, progress: f64) -> Self {
        Self {
            task_id: task.task_id.clone(),
            status: task.status,
            progress,
            // Stored results are JSON; keep anything else as a plain string
            result: task.result.as_deref().map(|raw| {
                serde_json::from_str(raw)
                    .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
            }),
            download_url: task.download_url.clone(),
            create_time: task.create_time.try_to_rfc3339_string().unwrap_or_default(),
            finish_time: task
                .finish_time
                .and_then(|t| t.try_to_rfc3339_string().ok()),
        }
    }

    /// Snapshot of a durable record with no live progress attached.
    fn durable(task: &Task) -> Self {
        let progress = if task.status.is_terminal() { 100.0 } else { 0.0 };
        Self::of(task, progress)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

struct LiveEntry {
    task: Task,
    progress: f64,
    /// Set once a terminal transition has started; later updates are ignored.
    finalizing: bool,
}

/// Tracks in-flight tasks in memory and mirrors lifecycle changes to the
/// repository.
///
/// A task is live from `create` until its terminal state is persisted, so
/// status lookups always find it in one place or the other. Every change is
/// published to subscribers.
pub struct TaskRegistry {
    repo: Arc<dyn TaskRepository>,
    live: DashMap<String, LiveEntry>,
    events: broadcast::Sender<TaskSnapshot>,
}

impl TaskRegistry {
    pub fn new(repo: Arc<dyn TaskRepository>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            repo,
            live: DashMap::new(),
            events,
        }
    }

    pub fn repository(&self) -> &Arc<dyn TaskRepository> {
        &self.repo
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskSnapshot> {
        self.events.subscribe()
    }

    pub fn is_live(&self, task_id: &str) -> bool {
        self.live.contains_key(task_id)
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Persists a new `PROCESSING` record and starts tracking it.
    pub async fn create(&self, task_id: &str) -> Result<TaskSnapshot, RegistryError> {
        let task = Task::processing(task_id);
        self.repo.save(&task).await?;

        let snapshot = TaskSnapshot::of(&task, 0.0);
        self.live.insert(
            task_id.to_string(),
            LiveEntry {
                task,
                progress: 0.0,
                finalizing: false,
            },
        );
        debug!(task_id, "Task registered");
        self.publish(snapshot.clone());
        Ok(snapshot)
    }

    /// Raises the progress of a live task. Values are clamped to 0..=100 and
    /// rounded to two decimals; anything not above the current value is
    /// ignored. Returns `true` when the progress changed.
    pub fn update_progress(&self, task_id: &str, progress: f64) -> bool {
        if !progress.is_finite() {
            return false;
        }
        let progress = (progress.clamp(0.0, 100.0) * 100.0).round() / 100.0;

        let snapshot = {
            let Some(mut entry) = self.live.get_mut(task_id) else {
                return false;
            };
            if entry.finalizing || progress <= entry.progress {
                return false;
            }
            entry.progress = progress;
            TaskSnapshot::of(&entry.task, progress)
        };
        self.publish(snapshot);
        true
    }

    pub async fn complete(
        &self,
        task_id: &str,
        result: String,
        download_url: String,
    ) -> Result<TaskSnapshot, RegistryError> {
        self.finalize(task_id, TaskStatus::Success, result, Some(download_url))
            .await
    }

    /// Fails a live task, recording `{"error": message}` as its result.
    pub async fn fail(&self, task_id: &str, message: &str) -> Result<TaskSnapshot, RegistryError> {
        let result = serde_json::json!({ "error": message }).to_string();
        self.finalize(task_id, TaskStatus::Failed, result, None).await
    }

    async fn finalize(
        &self,
        task_id: &str,
        status: TaskStatus,
        result: String,
        download_url: Option<String>,
    ) -> Result<TaskSnapshot, RegistryError> {
        let claimed = match self.live.get_mut(task_id) {
            Some(mut entry) if !entry.finalizing => {
                entry.finalizing = true;
                Some(entry.task.clone())
            }
            _ => None,
        };
        let Some(mut task) = claimed else {
            return Err(RegistryError::AlreadyTerminal(task_id.to_string()));
        };
        task.finish(status, Some(result), download_url);

        let persisted = match self.repo.save(&task).await {
            Ok(()) => Ok(()),
            Err(first) => {
                warn!(task_id, error = %first, "Saving terminal task failed, retrying");
                tokio::time::sleep(SAVE_RETRY_DELAY).await;
                self.repo.save(&task).await
            }
        };
        if let Err(e) = &persisted {
            error!(
                task_id,
                status = task.status.as_str(),
                error = %e,
                "Terminal task state was not persisted"
            );
        }

        self.live.remove(task_id);
        let snapshot = TaskSnapshot::of(&task, 100.0);
        self.publish(snapshot.clone());
        info!(task_id, status = task.status.as_str(), "Task finished");

        persisted?;
        Ok(snapshot)
    }

    /// Live view when the task is in flight, otherwise the durable record.
    pub async fn get_status(&self, task_id: &str) -> Result<TaskSnapshot, RegistryError> {
        if let Some(snapshot) = self.live_snapshot(task_id) {
            return Ok(snapshot);
        }
        match self.repo.find_by_task_id(task_id).await? {
            Some(task) => Ok(TaskSnapshot::durable(&task)),
            None => Err(RegistryError::UnknownTask(task_id.to_string())),
        }
    }

    fn live_snapshot(&self, task_id: &str) -> Option<TaskSnapshot> {
        self.live
            .get(task_id)
            .map(|entry| TaskSnapshot::of(&entry.task, entry.progress))
    }

    fn publish(&self, snapshot: TaskSnapshot) {
        // No subscribers is fine
        let _ = self.events.send(snapshot);
    }
}
