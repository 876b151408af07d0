use bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};

/// Durable record of one transcription job.
///
/// `finish_time` is set iff the status is terminal, and `download_url` only
/// ever accompanies `Success`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub task_id: String,
    #[serde(default)]
    pub status: TaskStatus,
    /// Serialized structured result, or `{"error": ...}` for failed tasks.
    pub result: Option<String>,
    pub download_url: Option<String>,
    pub create_time: DateTime,
    pub finish_time: Option<DateTime>,
    #[serde(default)]
    pub deleted: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    #[default]
    Processing,
    Success,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskStatus::Processing)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Processing => "PROCESSING",
            TaskStatus::Success => "SUCCESS",
            TaskStatus::Failed => "FAILED",
        }
    }
}

impl Task {
    pub const COLLECTION: &'static str = "tasks";

    pub fn processing(task_id: impl Into<String>) -> Self {
        Self {
            id: None,
            task_id: task_id.into(),
            status: TaskStatus::Processing,
            result: None,
            download_url: None,
            create_time: DateTime::now(),
            finish_time: None,
            deleted: false,
        }
    }

    /// Moves a processing task into a terminal state. Returns `false` and
    /// leaves the record untouched if the task was already terminal.
    pub fn finish(
        &mut self,
        status: TaskStatus,
        result: Option<String>,
        download_url: Option<String>,
    ) -> bool {
        if self.status.is_terminal() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        self.result = result;
        self.download_url = match status {
            TaskStatus::Success => download_url,
            _ => None,
        };
        self.finish_time = Some(DateTime::now());
        true
    }
}
