use axum::{
    Json,
    extract::{Multipart, State},
    http::{HeaderMap, header},
};
use serde::Serialize;
use scribe_services::background::SubmitRequest;

use crate::{error::ApiError, state::AppState};

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub task_id: String,
}

/// Accepts an audio upload for transcription.
/// Fields: `file` (binary), `model` (text), `format` (text, optional),
/// `include_segments` (bool, optional, default true)
pub async fn submit(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<SubmitResponse>, ApiError> {
    let mut file_data: Option<(String, Vec<u8>)> = None; // (filename, bytes)
    let mut model: Option<String> = None;
    let mut format: Option<String> = None;
    let mut include_segments = true;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        ApiError::BadRequest(format!("Multipart error: {}", e))
    })? {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or("upload").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Failed to read file: {}", e)))?;
                file_data = Some((filename, bytes.to_vec()));
            }
            "model" | "format" | "include_segments" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Failed to read field: {}", e)))?;
                match name.as_str() {
                    "model" => model = Some(text),
                    "format" => format = Some(text),
                    _ => include_segments = parse_flag(&text)?,
                }
            }
            _ => {}
        }
    }

    let (file_name, data) =
        file_data.ok_or_else(|| ApiError::BadRequest("Missing 'file' field".to_string()))?;
    let model = model
        .filter(|m| !m.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing 'model' field".to_string()))?;

    let task_id = state
        .transcription
        .submit(SubmitRequest {
            file_name,
            data,
            model,
            format,
            include_segments,
            base_url: base_url(&state, &headers),
        })
        .await?;

    Ok(Json(SubmitResponse { task_id }))
}

fn parse_flag(raw: &str) -> Result<bool, ApiError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(ApiError::BadRequest(format!(
            "Invalid include_segments value '{}'",
            other
        ))),
    }
}

/// Base for download links: the configured public URL, else the request host.
fn base_url(state: &AppState, headers: &HeaderMap) -> String {
    if let Some(url) = state.settings.app.public_url.as_deref().filter(|u| !u.is_empty()) {
        return url.trim_end_matches('/').to_string();
    }
    match headers.get(header::HOST).and_then(|h| h.to_str().ok()) {
        Some(host) => format!("http://{}", host),
        None => format!("http://{}:{}", state.settings.app.host, state.settings.app.port),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_accept_common_spellings() {
        assert!(parse_flag("TRUE").unwrap());
        assert!(parse_flag("").unwrap());
        assert!(!parse_flag(" false ").unwrap());
        assert!(!parse_flag("0").unwrap());
        assert!(parse_flag("maybe").is_err());
    }
}
