use retrieval_pipeline::{AnswerResult, QuestionAnswering};
use tracing::{debug, instrument};

use crate::{
    language::{needs_translation, normalize_language_code, DEFAULT_LANGUAGE},
    translation::{translate_or_original, TranslationProvider},
};

pub const EMPTY_TRANSCRIPT: &str = "⚠️ Empty transcript.";

/// Answer a spoken question and translate the answer for the listener.
///
/// Unsupported targets are treated as `en-IN`. Model replies are translated,
/// including the not-in-context reply; notices and failures stay in English.
#[instrument(skip(answerer, translator, transcript))]
pub async fn answer_from_transcript(
    answerer: &dyn QuestionAnswering,
    translator: &dyn TranslationProvider,
    transcript: &str,
    target: &str,
) -> AnswerResult {
    let question = transcript.trim();
    if question.is_empty() {
        return AnswerResult::failed(EMPTY_TRANSCRIPT, Vec::new());
    }

    let mut result = answerer.answer(question).await;

    let target = normalize_language_code(target).unwrap_or(DEFAULT_LANGUAGE);
    if result.is_translatable() && needs_translation(target) {
        debug!(language = target, "Translating answer");
        result.answer =
            translate_or_original(translator, &result.answer, DEFAULT_LANGUAGE, target).await;
    }
    result
}
