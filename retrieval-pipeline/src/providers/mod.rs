pub mod gemini;
pub mod openai;

use std::sync::Arc;

use async_trait::async_trait;
use common::{error::ProviderError, utils::config::AppConfig};

pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;

/// System instruction plus user turn sent to a chat model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatPrompt {
    pub system: String,
    pub user: String,
}

/// Chat-completion style answer provider.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Short label used in logs and composed failure messages.
    fn name(&self) -> &str;

    async fn complete(&self, prompt: &ChatPrompt) -> Result<String, ProviderError>;
}

/// Primary (Gemini) provider and, when an OpenAI credential is configured,
/// the secondary provider used on quota exhaustion.
pub fn providers_from_config(
    config: &AppConfig,
    http: reqwest::Client,
) -> (Arc<dyn ChatProvider>, Option<Arc<dyn ChatProvider>>) {
    let primary: Arc<dyn ChatProvider> = Arc::new(GeminiProvider::new(
        http,
        config.primary_base_url.clone(),
        config.primary_model.clone(),
        config.google_api_key.clone(),
        config.primary_temperature,
    ));

    let secondary = config
        .openai_api_key
        .as_deref()
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(|key| {
            Arc::new(OpenAiProvider::new(
                key,
                &config.openai_base_url,
                config.secondary_model.clone(),
                config.primary_temperature,
            )) as Arc<dyn ChatProvider>
        });

    (primary, secondary)
}
