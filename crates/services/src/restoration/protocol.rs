//! Line-delimited JSON exchanged with restoration workers.
//!
//! Request: `{"text": ..., "taskId": ...}`.
//! Response: `{"taskId": ..., "isSuccess": ..., "restoredText"?: ..., "error"?: ...}`.
//! Anything on the worker's stdout that is not a response object is noise.

use serde::{Deserialize, Serialize};

use super::WorkerError;

/// Task id used for the liveness probe sent right after spawn.
pub const PROBE_TASK_ID: &str = "probe";
pub const PROBE_TEXT: &str = "test";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestLine<'a> {
    text: &'a str,
    task_id: &'a str,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerResponse {
    pub task_id: String,
    #[serde(default)]
    pub is_success: bool,
    pub restored_text: Option<String>,
    pub error: Option<String>,
}

impl WorkerResponse {
    pub fn into_result(self) -> Result<String, WorkerError> {
        if self.is_success {
            Ok(self.restored_text.unwrap_or_default())
        } else {
            Err(WorkerError::Rejected(
                self.error
                    .unwrap_or_else(|| "worker returned no error message".to_string()),
            ))
        }
    }
}

/// Encodes one request as a newline-terminated line.
pub fn encode_request(text: &str, task_id: &str) -> Result<String, WorkerError> {
    let mut line = serde_json::to_string(&RequestLine { text, task_id })
        .map_err(|e| WorkerError::Communication(format!("encode request: {}", e)))?;
    line.push('\n');
    Ok(line)
}

/// Parses a worker output line. `None` means the line is not a protocol response.
pub fn decode_line(line: &str) -> Option<WorkerResponse> {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}
