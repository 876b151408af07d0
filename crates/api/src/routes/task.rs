use axum::{
    Json,
    extract::{Path, State},
};
use scribe_services::TaskSnapshot;

use crate::{error::ApiError, state::AppState};

pub async fn get(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskSnapshot>, ApiError> {
    Ok(Json(state.registry.get_status(&task_id).await?))
}
