use axum::{Json, extract::State};
use scribe_config::ModelInfo;
use scribe_services::export::OutputFormat;

use crate::state::AppState;

/// Models that are configured and loadable by the recognizer backend.
pub async fn list_models(State(state): State<AppState>) -> Json<Vec<ModelInfo>> {
    Json(state.transcription.available_models())
}

pub async fn list_output_formats(State(state): State<AppState>) -> Json<Vec<OutputFormat>> {
    Json(state.transcription.output_formats().to_vec())
}
