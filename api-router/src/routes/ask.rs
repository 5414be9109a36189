use std::collections::BTreeMap;

use axum::{
    extract::{FromRequest, Request, State},
    http::header,
    response::{IntoResponse, Response},
    Form, Json,
};
use axum_typed_multipart::{TryFromMultipart, TypedMultipart};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::api_state::ApiState;

#[derive(Debug, Deserialize, TryFromMultipart)]
pub struct AskParams {
    pub query: String,
}

/// `AskParams` from either a urlencoded or a multipart form body.
#[derive(Debug)]
pub struct AskForm(pub AskParams);

fn is_urlencoded(req: &Request) -> bool {
    req.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| {
            value
                .to_ascii_lowercase()
                .starts_with("application/x-www-form-urlencoded")
        })
}

impl<S> FromRequest<S> for AskForm
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        if is_urlencoded(&req) {
            let Form(params) = Form::<AskParams>::from_request(req, state)
                .await
                .map_err(IntoResponse::into_response)?;
            Ok(Self(params))
        } else {
            let TypedMultipart(params) = TypedMultipart::<AskParams>::from_request(req, state)
                .await
                .map_err(IntoResponse::into_response)?;
            Ok(Self(params))
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AskResponse {
    pub answer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect: Option<String>,
}

/// First configured page whose keyword occurs in the question.
pub fn find_redirect(redirects: &BTreeMap<String, String>, question: &str) -> Option<String> {
    let lowered = question.to_lowercase();
    redirects
        .iter()
        .filter(|(keyword, _)| !keyword.trim().is_empty())
        .find(|(keyword, _)| lowered.contains(&keyword.to_lowercase()))
        .map(|(_, page)| page.clone())
}

pub async fn ask_bot(
    State(state): State<ApiState>,
    AskForm(input): AskForm,
) -> impl IntoResponse {
    info!(chars = input.query.chars().count(), "Received text question");

    let result = state.answerer.answer(&input.query).await;
    let redirect = find_redirect(&state.config.page_redirects, &input.query);

    Json(AskResponse {
        answer: result.answer,
        redirect,
    })
}
