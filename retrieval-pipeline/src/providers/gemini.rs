use async_trait::async_trait;
use common::error::ProviderError;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ChatPrompt, ChatProvider};

/// Google Generative Language `generateContent` adapter.
pub struct GeminiProvider {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
}

impl GeminiProvider {
    pub fn new(
        http: reqwest::Client,
        base_url: String,
        model: String,
        api_key: Option<String>,
        temperature: f32,
    ) -> Self {
        Self {
            http,
            base_url,
            model,
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            temperature,
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    system_instruction: Content<'a>,
    contents: [Content<'a>; 1],
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

#[async_trait]
impl ChatProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn complete(&self, prompt: &ChatPrompt) -> Result<String, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(ProviderError::MissingCredential)?;

        let request = GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: [Part {
                    text: &prompt.system,
                }],
            },
            contents: [Content {
                role: Some("user"),
                parts: [Part { text: &prompt.user }],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
            },
        };

        debug!(model = %self.model, "Sending generateContent request");
        let response = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", api_key)
            .json(&request)
            .send()
            .await
            .map_err(|err| ProviderError::Network(err.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| ProviderError::Network(err.to_string()))?;

        if !status.is_success() {
            return Err(classify_failure(status, &body));
        }

        parse_generate_response(&body)
    }
}

/// Map a non-success HTTP reply onto a provider error kind.
fn classify_failure(status: StatusCode, body: &str) -> ProviderError {
    let (api_status, message) = match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => (envelope.error.status, envelope.error.message),
        Err(_) => (String::new(), body.chars().take(200).collect()),
    };
    let detail = format!("HTTP {}: {message}", status.as_u16());

    if status == StatusCode::TOO_MANY_REQUESTS || api_status == "RESOURCE_EXHAUSTED" {
        ProviderError::RateLimited(detail)
    } else if status == StatusCode::UNAUTHORIZED
        || status == StatusCode::FORBIDDEN
        || matches!(api_status.as_str(), "UNAUTHENTICATED" | "PERMISSION_DENIED")
    {
        ProviderError::AuthFailed(detail)
    } else {
        ProviderError::Network(detail)
    }
}

fn parse_generate_response(body: &str) -> Result<String, ProviderError> {
    let parsed: GenerateResponse =
        serde_json::from_str(body).map_err(|err| ProviderError::Malformed(err.to_string()))?;

    let text: String = parsed
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect()
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(ProviderError::Malformed(
            "response contained no candidate text".to_string(),
        ));
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_candidate_parts() {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"MBA fee "},{"text":"is 5 lakh."}],"role":"model"}}]}"#;
        assert_eq!(
            parse_generate_response(body).expect("parse"),
            "MBA fee is 5 lakh."
        );
    }

    #[test]
    fn empty_candidates_are_malformed() {
        assert!(matches!(
            parse_generate_response(r#"{"candidates":[]}"#),
            Err(ProviderError::Malformed(_))
        ));
        assert!(matches!(
            parse_generate_response("not json"),
            Err(ProviderError::Malformed(_))
        ));
    }

    #[test]
    fn classifies_quota_auth_and_other_failures() {
        let quota = r#"{"error":{"code":429,"message":"Quota exceeded","status":"RESOURCE_EXHAUSTED"}}"#;
        assert!(matches!(
            classify_failure(StatusCode::TOO_MANY_REQUESTS, quota),
            ProviderError::RateLimited(_)
        ));

        let denied = r#"{"error":{"code":403,"message":"denied","status":"PERMISSION_DENIED"}}"#;
        assert!(matches!(
            classify_failure(StatusCode::FORBIDDEN, denied),
            ProviderError::AuthFailed(_)
        ));

        // A server error that merely mentions quota is not a quota signal.
        assert!(matches!(
            classify_failure(StatusCode::INTERNAL_SERVER_ERROR, "quota service down"),
            ProviderError::Network(_)
        ));
    }

    #[tokio::test]
    async fn missing_key_fails_without_request() {
        let provider = GeminiProvider::new(
            reqwest::Client::new(),
            "http://127.0.0.1:9".into(),
            "gemini-1.5-flash".into(),
            Some("  ".into()),
            0.3,
        );
        let prompt = ChatPrompt {
            system: "s".into(),
            user: "u".into(),
        };
        assert_eq!(
            provider.complete(&prompt).await,
            Err(ProviderError::MissingCredential)
        );
    }
}
