use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::api_state::ApiState;

/// Liveness probe: the process is up and serving.
pub async fn live() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status": "ok"})))
}

/// Readiness probe: returns 200 once the knowledge base can be searched, else 503.
pub async fn ready(State(state): State<ApiState>) -> impl IntoResponse {
    match state.answerer.ready().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "checks": { "index": "ok" }
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "error",
                "checks": { "index": "fail" },
                "reason": e.to_string()
            })),
        ),
    }
}
