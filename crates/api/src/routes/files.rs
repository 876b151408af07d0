use axum::{
    body::Body,
    extract::{Path, State},
    http::header,
    response::Response,
};
use scribe_db::models::TaskStatus;
use scribe_services::dao::TaskRepository;
use scribe_services::export::{OutputFormat, task_id_from_file_name};

use crate::{error::ApiError, state::AppState};

/// Serves a rendered transcription output by file name.
pub async fn download(
    State(state): State<AppState>,
    Path(file_name): Path<String>,
) -> Result<Response, ApiError> {
    if file_name.contains(['/', '\\']) || file_name.contains("..") {
        return Err(ApiError::BadRequest("Invalid file name".to_string()));
    }
    let (Some(task_id), Some(format)) = (
        task_id_from_file_name(&file_name),
        OutputFormat::from_file_name(&file_name),
    ) else {
        return Err(ApiError::NotFound(format!("No output named {}", file_name)));
    };

    let path = state.transcription.output_dir().join(&file_name);
    match tokio::fs::read(&path).await {
        Ok(contents) => Response::builder()
            .header(header::CONTENT_TYPE, format.content_type())
            .header(
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", file_name),
            )
            .body(Body::from(contents))
            .map_err(|e| ApiError::Internal(format!("Failed to build response: {}", e))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(missing_output(&state, task_id).await)
        }
        Err(e) => Err(ApiError::Internal(format!("Failed to read output: {}", e))),
    }
}

/// Tells an expired output apart from one that never existed.
async fn missing_output(state: &AppState, task_id: &str) -> ApiError {
    let task = match state.registry.repository().find_by_task_id(task_id).await {
        Ok(task) => task,
        Err(e) => return e.into(),
    };
    match task {
        Some(task) if task.status == TaskStatus::Success => {
            let retention = chrono::Duration::from_std(state.settings.retention())
                .unwrap_or_else(|_| chrono::Duration::zero());
            let expired_at = task
                .finish_time
                .and_then(|finished| finished.to_chrono().checked_add_signed(retention))
                .map(|at| at.to_rfc3339());
            match expired_at {
                Some(at) => ApiError::NotFound(format!(
                    "Output for task {} expired at {}",
                    task_id, at
                )),
                None => ApiError::NotFound(format!("Output for task {} has expired", task_id)),
            }
        }
        _ => ApiError::NotFound(format!("No output for task {}", task_id)),
    }
}
