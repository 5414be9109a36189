use std::sync::Arc;

use common::{error::ProviderError, storage::types::chunk::Chunk};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::providers::{ChatPrompt, ChatProvider};

/// Phrase the model is instructed to reply with when the context has no answer.
pub const NOT_IN_CONTEXT: &str = "answer is not available in the context";
pub const NO_RELEVANT_INFORMATION: &str = "⚠️ No relevant information found in the knowledge base.";
pub const NO_KNOWLEDGE_BASE: &str =
    "⚠️ No knowledge base found. Please upload and process PDFs first.";
pub const EMPTY_QUESTION: &str = "⚠️ Please enter a question.";
pub const QUOTA_EXCEEDED: &str = "⚠️ Answer service quota exceeded. Please wait for your quota to reset or try again later.";

pub const SYSTEM_PROMPT: &str = "You answer questions about university programs using only the \
provided context. Answer as thoroughly as the context allows. If the answer is not in the \
context, reply exactly \"answer is not available in the context\". After the answer, list the \
distinct sources you used.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerStatus {
    /// The model produced an answer from the context.
    Answered,
    /// The model replied with the not-in-context phrase.
    NotInContext,
    /// Retrieval found nothing; no provider was called.
    NoContext,
    /// Retrieval or every eligible provider failed; `answer` holds the notice.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerResult {
    pub answer: String,
    pub sources: Vec<String>,
    pub status: AnswerStatus,
}

impl AnswerResult {
    pub fn failed(answer: impl Into<String>, sources: Vec<String>) -> Self {
        Self {
            answer: answer.into(),
            sources,
            status: AnswerStatus::Failed,
        }
    }

    pub fn no_context() -> Self {
        Self {
            answer: NO_RELEVANT_INFORMATION.to_string(),
            sources: Vec::new(),
            status: AnswerStatus::NoContext,
        }
    }

    fn from_model(answer: String, sources: Vec<String>) -> Self {
        let status = if answer.to_lowercase().contains(NOT_IN_CONTEXT) {
            AnswerStatus::NotInContext
        } else {
            AnswerStatus::Answered
        };
        Self {
            answer,
            sources,
            status,
        }
    }

    /// Whether the answer is a model reply the listener should hear translated.
    /// Notices and failures stay in English.
    pub fn is_translatable(&self) -> bool {
        matches!(
            self.status,
            AnswerStatus::Answered | AnswerStatus::NotInContext
        )
    }
}

pub fn create_user_message(context: &str, question: &str) -> String {
    format!(
        r"
        Context:
        ==================
        {context}

        Question:
        ==================
        {question}

        Answer:
        "
    )
}

/// Join chunks into a prompt context, each preceded by its source line when known.
pub fn format_context(chunks: &[Chunk]) -> String {
    chunks
        .iter()
        .map(|chunk| match (chunk.source(), chunk.page()) {
            (Some(source), Some(page)) => {
                format!("Source: {source} (page {page})\n{}", chunk.content)
            }
            (Some(source), None) => format!("Source: {source}\n{}", chunk.content),
            _ => chunk.content.clone(),
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Distinct source identifiers in first-seen order.
pub fn collect_sources(chunks: &[Chunk]) -> Vec<String> {
    let mut sources: Vec<String> = Vec::new();
    for source in chunks.iter().filter_map(Chunk::source) {
        if !sources.iter().any(|seen| seen == source) {
            sources.push(source.to_string());
        }
    }
    sources
}

/// Grounded answer generation with quota-driven provider fallback.
pub struct AnswerSynthesizer {
    primary: Arc<dyn ChatProvider>,
    secondary: Option<Arc<dyn ChatProvider>>,
    context_chunks: usize,
}

impl AnswerSynthesizer {
    pub fn new(
        primary: Arc<dyn ChatProvider>,
        secondary: Option<Arc<dyn ChatProvider>>,
        context_chunks: usize,
    ) -> Self {
        Self {
            primary,
            secondary,
            context_chunks: context_chunks.max(1),
        }
    }

    #[instrument(skip_all, fields(candidates = candidates.len()))]
    pub async fn synthesize(&self, question: &str, candidates: &[Chunk]) -> AnswerResult {
        if candidates.is_empty() {
            return AnswerResult::no_context();
        }

        let window = candidates
            .get(..self.context_chunks.min(candidates.len()))
            .unwrap_or(candidates);
        let sources = collect_sources(window);
        let prompt = ChatPrompt {
            system: SYSTEM_PROMPT.to_string(),
            user: create_user_message(&format_context(window), question),
        };

        let primary_err = match self.primary.complete(&prompt).await {
            Ok(answer) => return AnswerResult::from_model(answer, sources),
            Err(err) => err,
        };

        warn!(
            provider = self.primary.name(),
            error = %primary_err,
            "Primary answer provider failed"
        );

        match (&self.secondary, primary_err.allows_fallback()) {
            (Some(secondary), true) => {
                info!(provider = secondary.name(), "Falling back to secondary answer provider");
                match secondary.complete(&prompt).await {
                    Ok(answer) => AnswerResult::from_model(answer, sources),
                    Err(secondary_err) => {
                        warn!(
                            provider = secondary.name(),
                            error = %secondary_err,
                            "Secondary answer provider failed"
                        );
                        AnswerResult::failed(
                            format!(
                                "⚠️ Both answer providers failed. {}: {primary_err}. {}: {secondary_err}.",
                                self.primary.name(),
                                secondary.name()
                            ),
                            sources,
                        )
                    }
                }
            }
            _ => AnswerResult::failed(failure_message(&primary_err), sources),
        }
    }
}

fn failure_message(err: &ProviderError) -> String {
    if err.is_quota() {
        QUOTA_EXCEEDED.to_string()
    } else {
        format!("⚠️ Error retrieving answer: {err}")
    }
}
