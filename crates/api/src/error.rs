use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use scribe_services::background::{RegistryError, SubmitError};
use scribe_services::dao::DaoError;

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
    Validation(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal", msg),
            ApiError::Validation(msg) => (StatusCode::UNPROCESSABLE_ENTITY, "validation", msg),
        };

        if status.is_server_error() {
            tracing::error!(%message, "Request failed");
        }

        let body = ErrorResponse {
            error: error_type.to_string(),
            message,
        };

        (status, Json(body)).into_response()
    }
}

impl From<DaoError> for ApiError {
    fn from(err: DaoError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::UnknownTask(id) => ApiError::NotFound(format!("Unknown task {}", id)),
            RegistryError::AlreadyTerminal(id) => {
                ApiError::BadRequest(format!("Task {} is no longer processing", id))
            }
            RegistryError::Dao(e) => e.into(),
        }
    }
}

impl From<SubmitError> for ApiError {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::EmptyFile
            | SubmitError::UnknownModel(_)
            | SubmitError::UnknownFormat(_) => {
                ApiError::Validation(err.to_string())
            }
            SubmitError::Io(e) => ApiError::Internal(format!("Failed to store upload: {}", e)),
            SubmitError::Registry(e) => e.into(),
        }
    }
}
