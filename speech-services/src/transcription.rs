use async_trait::async_trait;
use common::error::{AppError, ProviderError};
use regex::Regex;
use reqwest::multipart::{Form, Part};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::language::normalize_language_code;

/// Uploaded or recorded audio handed to a transcription provider.
#[derive(Debug, Clone)]
pub struct AudioClip {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub content_type: Option<String>,
}

/// Reply of a transcription provider, classified by shape.
#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptionResponse {
    /// A JSON object.
    Structured(Value),
    /// Unstructured text, possibly a `key=value` rendering of a response object.
    Text(String),
    /// A provider error payload.
    Error(Value),
}

type Extractor = fn(&Value) -> Option<String>;

/// Tried in order against structured replies.
const TRANSCRIPT_STRATEGIES: [Extractor; 3] = [
    top_level_transcript,
    data_transcript,
    first_alternative_transcript,
];

const LANGUAGE_STRATEGIES: [Extractor; 3] =
    [top_level_language, nested_language, alternative_language];

const TOP_LEVEL_TRANSCRIPT_KEYS: [&str; 4] = ["transcript", "text", "result", "transcription"];
const DATA_TRANSCRIPT_KEYS: [&str; 3] = ["transcript", "text", "transcription"];
const LANGUAGE_KEYS: [&str; 5] = [
    "language_code",
    "language",
    "detected_language",
    "lang",
    "detectedLang",
];
const LANGUAGE_PARENTS: [&str; 2] = ["data", "metadata"];

/// Fields that follow `transcript=` in a rendered response object.
const STOP_TOKENS: [&str; 4] = [
    " timestamps",
    " language_code",
    " diarized_transcript",
    " request_id",
];

impl TranscriptionResponse {
    /// Classify a raw HTTP reply body.
    pub fn from_reply(success: bool, body: &str) -> Self {
        let parsed = serde_json::from_str::<Value>(body).ok();

        match (success, parsed) {
            (_, Some(Value::Object(mut map))) => match map.remove("error") {
                Some(error) => Self::Error(error),
                None if success => Self::Structured(Value::Object(map)),
                None => Self::Error(Value::Object(map)),
            },
            (false, Some(other)) => Self::Error(other),
            (false, None) => Self::Error(json!({ "message": body })),
            (true, Some(Value::String(text))) => Self::Text(text),
            (true, _) => Self::Text(body.to_string()),
        }
    }

    pub fn transcript(&self) -> Option<String> {
        match self {
            Self::Structured(value) => TRANSCRIPT_STRATEGIES
                .iter()
                .find_map(|strategy| strategy(value)),
            Self::Text(text) => scan_transcript(text),
            Self::Error(_) => None,
        }
    }

    /// Detected language, normalized to an allowed code.
    pub fn detected_language(&self) -> Option<&'static str> {
        let raw = match self {
            Self::Structured(value) => LANGUAGE_STRATEGIES
                .iter()
                .find_map(|strategy| strategy(value)),
            Self::Text(text) => capture(
                r#"(?:language_code|language|detected_language|lang)\s*=\s*['"]?([a-z]{2}(?:-[A-Za-z]{2})?)['"]?"#,
                text,
            ),
            Self::Error(_) => None,
        }?;
        normalize_language_code(&raw)
    }

    /// The reply as JSON, for error payloads returned to clients.
    pub fn raw(&self) -> Value {
        match self {
            Self::Structured(value) => value.clone(),
            Self::Text(text) => Value::String(text.clone()),
            Self::Error(error) => json!({ "error": error }),
        }
    }
}

fn non_empty_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)?
        .as_str()
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

fn first_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| non_empty_field(value, key))
}

fn top_level_transcript(value: &Value) -> Option<String> {
    first_field(value, &TOP_LEVEL_TRANSCRIPT_KEYS)
}

fn data_transcript(value: &Value) -> Option<String> {
    first_field(value.get("data")?, &DATA_TRANSCRIPT_KEYS)
}

fn first_alternative_transcript(value: &Value) -> Option<String> {
    non_empty_field(value.get("alternatives")?.as_array()?.first()?, "transcript")
}

fn top_level_language(value: &Value) -> Option<String> {
    first_field(value, &LANGUAGE_KEYS)
}

fn nested_language(value: &Value) -> Option<String> {
    LANGUAGE_PARENTS
        .iter()
        .filter_map(|parent| value.get(*parent))
        .find_map(|nested| first_field(nested, &LANGUAGE_KEYS))
}

fn alternative_language(value: &Value) -> Option<String> {
    value
        .get("alternatives")?
        .as_array()?
        .iter()
        .find_map(|alternative| first_field(alternative, &LANGUAGE_KEYS))
}

fn capture(pattern: &str, text: &str) -> Option<String> {
    let found = Regex::new(pattern).ok()?.captures(text)?.get(1)?.as_str().trim();
    (!found.is_empty()).then(|| found.to_string())
}

/// Last resort for replies rendered as `transcript='...' language_code=...`.
fn scan_transcript(text: &str) -> Option<String> {
    let text = text.trim();
    if let Some(found) = capture(r"transcript\s*=\s*'([^']*)'", text)
        .or_else(|| capture(r#"transcript\s*=\s*"([^"]*)""#, text))
    {
        return Some(found);
    }

    let (_, tail) = text.split_once("transcript=")?;
    if tail.starts_with(['\'', '"']) {
        // Unterminated quote; the patterns above already handled closed ones.
        return None;
    }

    let candidate = match STOP_TOKENS.iter().filter_map(|token| tail.find(token)).min() {
        Some(stop) => tail.get(..stop).unwrap_or(tail).trim().to_string(),
        None => tail.trim().chars().take(200).collect(),
    };
    (!candidate.is_empty()).then_some(candidate)
}

/// Speech-to-text provider.
#[async_trait]
pub trait TranscriptionProvider: Send + Sync {
    /// `language_code` is an allowed code; `unknown` requests auto-detection.
    async fn transcribe(
        &self,
        audio: AudioClip,
        language_code: &str,
    ) -> Result<TranscriptionResponse, AppError>;
}

/// Sarvam `speech-to-text` adapter.
pub struct SarvamTranscriber {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl SarvamTranscriber {
    pub fn new(
        http: reqwest::Client,
        base_url: String,
        api_key: Option<String>,
        model: String,
    ) -> Self {
        Self {
            http,
            base_url,
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            model,
        }
    }
}

#[async_trait]
impl TranscriptionProvider for SarvamTranscriber {
    async fn transcribe(
        &self,
        audio: AudioClip,
        language_code: &str,
    ) -> Result<TranscriptionResponse, AppError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(ProviderError::MissingCredential)?;

        info!(
            bytes = audio.bytes.len(),
            file_name = %audio.file_name,
            language_code,
            model = %self.model,
            "Sending audio for transcription"
        );

        let mut part = Part::bytes(audio.bytes).file_name(audio.file_name);
        if let Some(content_type) = audio.content_type.as_deref() {
            part = part
                .mime_str(content_type)
                .map_err(|err| AppError::Validation(format!("invalid audio content type: {err}")))?;
        }
        let form = Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("language_code", language_code.to_string());

        let response = self
            .http
            .post(format!(
                "{}/speech-to-text",
                self.base_url.trim_end_matches('/')
            ))
            .header("api-subscription-key", api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|err| AppError::Transcription(err.to_string()))?;

        let status = response.status();
        let body = response.text().await?;
        debug!(status = status.as_u16(), "Transcription reply received");

        Ok(TranscriptionResponse::from_reply(status.is_success(), &body))
    }
}
