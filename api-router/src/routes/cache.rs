use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use tracing::info;

use crate::api_state::ApiState;

/// Drop every cached answer, typically after the index has been rebuilt.
pub async fn invalidate_cache(State(state): State<ApiState>) -> impl IntoResponse {
    let evicted = state.answerer.invalidate_cache();
    info!(evicted, "Answer cache cleared via API");
    (
        StatusCode::OK,
        Json(json!({ "status": "ok", "evicted": evicted })),
    )
}
