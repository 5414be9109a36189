use std::path::{Path, PathBuf};

use axum::{
    extract::{Path as UrlPath, State},
    response::Html,
};
use tracing::debug;

use crate::{api_state::ApiState, error::ApiError};

const MAIN_PAGES: [&str; 2] = ["index1.html", "index.html"];

fn html_dir(state: &ApiState) -> PathBuf {
    Path::new(&state.config.static_dir).join("html")
}

async fn read_page(path: &Path) -> Option<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(body) => Some(body),
        Err(err) => {
            debug!(path = %path.display(), error = %err, "Page not readable");
            None
        }
    }
}

pub async fn index_page(State(state): State<ApiState>) -> Result<Html<String>, ApiError> {
    let dir = html_dir(&state);
    for name in MAIN_PAGES {
        if let Some(body) = read_page(&dir.join(name)).await {
            return Ok(Html(body));
        }
    }
    Err(ApiError::NotFound("Main page not found".to_string()))
}

pub async fn page(
    State(state): State<ApiState>,
    UrlPath(page_name): UrlPath<String>,
) -> Result<Html<String>, ApiError> {
    let valid = !page_name.is_empty()
        && !page_name.contains("..")
        && !page_name.contains(['/', '\\']);
    if !valid {
        return Err(ApiError::NotFound("Page not found".to_string()));
    }

    let path = html_dir(&state).join(format!("{page_name}.html"));
    read_page(&path)
        .await
        .map(Html)
        .ok_or_else(|| ApiError::NotFound("Page not found".to_string()))
}
