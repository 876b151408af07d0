pub mod error;
pub mod routes;
pub mod state;
pub mod ws;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State},
    http::HeaderValue,
    routing::{get, post},
};
use scribe_services::background::RestorationMode;
use state::AppState;
use tokio::task::JoinHandle;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

/// Uploads larger than this are rejected before they reach the handler.
const MAX_UPLOAD_BYTES: usize = 512 * 1024 * 1024;

pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.settings.app.cors_origins);

    let api = Router::new()
        .route(
            "/transcription",
            post(routes::transcription::submit).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/task/{task_id}", get(routes::task::get))
        .route("/model", get(routes::catalog::list_models))
        .route("/output-format", get(routes::catalog::list_output_formats));

    Router::new()
        .nest("/api", api)
        .route("/files/{file_name}", get(routes::files::download))
        .route("/health", get(health_check))
        .route("/ws", get(ws::handler::ws_upgrade))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Starts routing task events to WebSocket subscribers.
pub fn start_notifications(state: &AppState) -> JoinHandle<()> {
    ws::dispatcher::spawn_forwarder(state.registry.clone(), state.ws_storage.clone())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(parsed)
}

async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    let restoration = match state.transcription.restoration() {
        RestorationMode::Pool(pool) => serde_json::json!({
            "mode": "pool",
            "workers": pool.size(),
            "live_workers": pool.live_workers(),
            "idle_permits": pool.available_permits(),
            "queued": pool.queued(),
        }),
        RestorationMode::PassThrough(reason) => serde_json::json!({
            "mode": "pass_through",
            "reason": reason,
        }),
    };

    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "live_tasks": state.registry.live_count(),
        "subscriptions": state.ws_storage.subscription_count(),
        "restoration": restoration,
    }))
}
