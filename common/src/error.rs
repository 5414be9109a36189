use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

/// Classified failure of a hosted provider call.
///
/// Adapters translate transport and API failures into one of these kinds at
/// the call boundary, so callers decide fallback behavior by matching on the
/// kind instead of inspecting error text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("rate limit or quota exceeded: {0}")]
    RateLimited(String),
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("malformed provider response: {0}")]
    Malformed(String),
    #[error("no credential configured")]
    MissingCredential,
}

impl ProviderError {
    /// Whether a failure of the primary provider may be retried on the secondary one.
    pub const fn allows_fallback(&self) -> bool {
        matches!(self, Self::RateLimited(_) | Self::MissingCredential)
    }

    pub const fn is_quota(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }
}

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("No knowledge base found. Please upload and process PDFs first.")]
    IndexUnavailable,
    #[error("Index was built with embedding model '{indexed}' but '{configured}' is configured")]
    IndexModelMismatch { indexed: String, configured: String },
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("Reranker unavailable: {0}")]
    RerankUnavailable(String),
    #[error("Translation error: {0}")]
    Translation(String),
    #[error("Transcription error: {0}")]
    Transcription(String),
    #[error("Empty input")]
    EmptyInput,
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_quota_and_missing_credential_allow_fallback() {
        assert!(ProviderError::RateLimited("429".into()).allows_fallback());
        assert!(ProviderError::MissingCredential.allows_fallback());
        assert!(!ProviderError::Network("connection reset".into()).allows_fallback());
        assert!(!ProviderError::AuthFailed("bad key".into()).allows_fallback());
        // Free text mentioning quota does not change the classification.
        assert!(!ProviderError::Malformed("quota field missing".into()).allows_fallback());
    }

    #[test]
    fn index_unavailable_message_is_user_facing() {
        let message = AppError::IndexUnavailable.to_string().to_lowercase();
        assert!(message.contains("no knowledge base"));
    }
}
