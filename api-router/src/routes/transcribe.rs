use axum::{body::Bytes, extract::State, response::IntoResponse, Json};
use axum_typed_multipart::{FieldData, TryFromMultipart, TypedMultipart};
use serde_json::json;
use speech_services::{
    answer_from_transcript,
    language::{DEFAULT_LANGUAGE, UNKNOWN_LANGUAGE},
    AudioClip,
};
use tracing::{info, warn};

use crate::{api_state::ApiState, error::ApiError};

/// Upload limit for recorded audio.
pub const AUDIO_BODY_LIMIT: usize = 25_000_000;

#[derive(Debug, TryFromMultipart)]
pub struct TranscribeParams {
    #[form_data(limit = "25000000")]
    pub file: FieldData<Bytes>,
}

/// Keeps the uploaded extension so the provider can pick a decoder.
fn clip_file_name(uploaded: Option<&str>) -> String {
    match uploaded.map(str::trim).filter(|name| !name.is_empty()) {
        Some(name) if name.contains('.') => name.to_string(),
        Some(name) => format!("{name}.webm"),
        None => "upload.webm".to_string(),
    }
}

pub async fn record_and_transcribe(
    State(state): State<ApiState>,
    TypedMultipart(input): TypedMultipart<TranscribeParams>,
) -> Result<impl IntoResponse, ApiError> {
    let clip = AudioClip {
        file_name: clip_file_name(input.file.metadata.file_name.as_deref()),
        content_type: input.file.metadata.content_type.clone(),
        bytes: input.file.contents.to_vec(),
    };
    info!(
        bytes = clip.bytes.len(),
        file_name = %clip.file_name,
        content_type = ?clip.content_type,
        "Received audio upload"
    );

    let response = state
        .transcriber
        .transcribe(clip, UNKNOWN_LANGUAGE)
        .await?;

    let Some(transcript) = response.transcript() else {
        warn!(raw = %response.raw(), "No transcript in provider reply");
        return Ok(Json(json!({
            "error": "No transcript returned by STT",
            "raw": response.raw(),
        })));
    };
    let detected_language = response.detected_language().unwrap_or(DEFAULT_LANGUAGE);
    info!(
        chars = transcript.chars().count(),
        detected_language, "Transcript extracted"
    );

    let result = answer_from_transcript(
        state.answerer.as_ref(),
        state.translator.as_ref(),
        &transcript,
        detected_language,
    )
    .await;

    Ok(Json(json!({
        "transcript": transcript,
        "answer": result.answer,
        "detected_language": detected_language,
    })))
}
