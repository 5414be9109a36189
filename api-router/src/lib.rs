use std::path::Path;

use api_state::ApiState;
use axum::{
    extract::{DefaultBodyLimit, FromRef},
    routing::{get, post},
    Router,
};
use routes::{
    ask::ask_bot,
    cache::invalidate_cache,
    pages::{index_page, page},
    probes::{live, ready},
    transcribe::{record_and_transcribe, AUDIO_BODY_LIMIT},
};
use tower_http::services::ServeDir;

pub mod api_state;
pub mod error;
mod routes;

/// Router for API functionality, version 1
pub fn api_routes_v1<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    // Probes for k8s/systemd
    let probes = Router::new()
        .route("/ready", get(ready))
        .route("/live", get(live));

    let operations = Router::new().route("/cache/invalidate", post(invalidate_cache));

    probes.merge(operations)
}

/// Front-end routes: question endpoints, pages and static assets.
pub fn app_routes<S>(app_state: &ApiState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    let static_dir = Path::new(&app_state.config.static_dir);

    Router::new()
        .route("/", get(index_page))
        .route("/{page}", get(page))
        .route("/ask_bot/", post(ask_bot))
        .route(
            "/record_and_transcribe/",
            post(record_and_transcribe).layer(DefaultBodyLimit::max(AUDIO_BODY_LIMIT)),
        )
        .nest_service("/css", ServeDir::new(static_dir.join("css")))
        .nest_service("/js", ServeDir::new(static_dir.join("js")))
        .nest_service("/img", ServeDir::new(static_dir.join("img")))
        .nest_service("/html", ServeDir::new(static_dir.join("html")))
}
