use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs, CreateChatCompletionResponse,
    },
    Client,
};
use async_trait::async_trait;
use common::error::ProviderError;
use tracing::debug;

use super::{ChatPrompt, ChatProvider};

/// OpenAI-compatible chat completion adapter, used as the fallback provider.
pub struct OpenAiProvider {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: f32,
}

impl OpenAiProvider {
    pub fn new(api_key: &str, base_url: &str, model: String, temperature: f32) -> Self {
        let config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(base_url);
        Self {
            client: Client::with_config(config),
            model,
            temperature,
        }
    }
}

pub fn create_chat_request(
    prompt: &ChatPrompt,
    model: &str,
    temperature: f32,
) -> Result<CreateChatCompletionRequest, OpenAIError> {
    CreateChatCompletionRequestArgs::default()
        .model(model)
        .temperature(temperature)
        .messages([
            ChatCompletionRequestSystemMessage::from(prompt.system.clone()).into(),
            ChatCompletionRequestUserMessage::from(prompt.user.clone()).into(),
        ])
        .build()
}

pub fn process_llm_response(response: CreateChatCompletionResponse) -> Result<String, ProviderError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or_else(|| ProviderError::Malformed("No content found in LLM response".into()))
}

/// Classify an async-openai failure by its API error code and type.
pub fn classify_openai_error(err: OpenAIError) -> ProviderError {
    match err {
        OpenAIError::ApiError(api) => {
            let code = api.code.as_deref().unwrap_or_default();
            let kind = api.r#type.as_deref().unwrap_or_default();
            if matches!(code, "rate_limit_exceeded" | "insufficient_quota")
                || matches!(kind, "rate_limit_exceeded" | "insufficient_quota" | "requests")
            {
                ProviderError::RateLimited(api.message)
            } else if matches!(code, "invalid_api_key" | "invalid_organization")
                || kind == "authentication_error"
            {
                ProviderError::AuthFailed(api.message)
            } else {
                ProviderError::Network(api.message)
            }
        }
        OpenAIError::Reqwest(err) => ProviderError::Network(err.to_string()),
        OpenAIError::JSONDeserialize(err) => ProviderError::Malformed(err.to_string()),
        other => ProviderError::Network(other.to_string()),
    }
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, prompt: &ChatPrompt) -> Result<String, ProviderError> {
        let request = create_chat_request(prompt, &self.model, self.temperature)
            .map_err(|err| ProviderError::Malformed(err.to_string()))?;

        debug!(model = %self.model, "Sending chat completion request");
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(classify_openai_error)?;

        process_llm_response(response)
    }
}
