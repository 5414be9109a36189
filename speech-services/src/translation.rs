use async_trait::async_trait;
use common::error::{AppError, ProviderError};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Text translation between language codes such as `en-IN` and `hi-IN`.
#[async_trait]
pub trait TranslationProvider: Send + Sync {
    async fn translate(&self, text: &str, source: &str, target: &str) -> Result<String, AppError>;
}

/// Translate `text`, falling back to the original on any failure.
pub async fn translate_or_original(
    provider: &dyn TranslationProvider,
    text: &str,
    source: &str,
    target: &str,
) -> String {
    if text.trim().is_empty() || source == target {
        return text.to_string();
    }

    match provider.translate(text, source, target).await {
        Ok(translated) if !translated.trim().is_empty() => translated,
        Ok(_) => {
            warn!(target_language = target, "Translation came back empty; keeping original text");
            text.to_string()
        }
        Err(err) => {
            warn!(error = %err, target_language = target, "Translation failed; keeping original text");
            text.to_string()
        }
    }
}

#[derive(Serialize)]
struct TranslateRequest<'a> {
    input: &'a str,
    source_language_code: &'a str,
    target_language_code: &'a str,
    speaker_gender: &'a str,
}

#[derive(Deserialize)]
struct TranslateResponse {
    translated_text: String,
}

/// Sarvam `translate` adapter.
pub struct SarvamTranslator {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl SarvamTranslator {
    pub fn new(http: reqwest::Client, base_url: String, api_key: Option<String>) -> Self {
        Self {
            http,
            base_url,
            api_key: api_key.filter(|key| !key.trim().is_empty()),
        }
    }
}

#[async_trait]
impl TranslationProvider for SarvamTranslator {
    async fn translate(&self, text: &str, source: &str, target: &str) -> Result<String, AppError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(ProviderError::MissingCredential)?;

        debug!(
            source_language = source,
            target_language = target,
            chars = text.chars().count(),
            "Requesting translation"
        );
        let response = self
            .http
            .post(format!("{}/translate", self.base_url.trim_end_matches('/')))
            .header("api-subscription-key", api_key)
            .json(&TranslateRequest {
                input: text,
                source_language_code: source,
                target_language_code: target,
                speaker_gender: "Male",
            })
            .send()
            .await
            .map_err(|err| AppError::Translation(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Translation(format!(
                "HTTP {}: {}",
                status.as_u16(),
                body.chars().take(200).collect::<String>()
            )));
        }

        let parsed: TranslateResponse = response
            .json()
            .await
            .map_err(|err| AppError::Translation(err.to_string()))?;
        Ok(parsed.translated_text)
    }
}
