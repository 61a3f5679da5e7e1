pub mod clean;
pub mod content;
pub mod question;

use async_openai::{
    Client,
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
};
use futures::{FutureExt, future::BoxFuture};
use tracing::{debug, warn};

use crate::{config::AiConfig, error::ProducerError};

pub use content::{ContentProducer, GeneratedContent};
pub use question::{Question, QuestionProducer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub max_tokens: u32,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            prompt: prompt.into(),
            max_tokens,
        }
    }
}

/// The external generative capability: one prompt in, raw text out.
pub trait TextGenerator: Send + Sync {
    fn generate(&self, request: GenerationRequest) -> BoxFuture<'_, Result<String, ProducerError>>;
}

pub struct OpenAiGenerator {
    client: Client<OpenAIConfig>,
    config: AiConfig,
}

impl OpenAiGenerator {
    pub fn new(config: AiConfig) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_base(&config.base_url)
            .with_api_key(&config.api_key);
        Self {
            client: Client::with_config(openai_config),
            config,
        }
    }

    async fn chat(&self, request: GenerationRequest) -> Result<String, ProducerError> {
        let message = ChatCompletionRequestUserMessageArgs::default()
            .content(request.prompt)
            .build()
            .map_err(|e| ProducerError::Unreachable(e.to_string()))?;
        let request = CreateChatCompletionRequestArgs::default()
            .model(self.config.model.as_str())
            .messages(vec![ChatCompletionRequestMessage::User(message)])
            .temperature(self.config.temperature)
            .top_p(self.config.top_p)
            .max_tokens(request.max_tokens)
            .build()
            .map_err(|e| ProducerError::Unreachable(e.to_string()))?;
        debug!(model = %self.config.model, "sending chat completion request");
        let response = self.client.chat().create(request).await.map_err(|e| {
            warn!("chat completion failed: {}", e);
            ProducerError::Unreachable(e.to_string())
        })?;
        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or(ProducerError::EmptyResponse)?;
        Ok(content)
    }
}

impl TextGenerator for OpenAiGenerator {
    fn generate(&self, request: GenerationRequest) -> BoxFuture<'_, Result<String, ProducerError>> {
        let timeout = self.config.request_timeout();
        async move {
            tokio::time::timeout(timeout, self.chat(request))
                .await
                .map_err(|_| ProducerError::TimedOut(timeout))?
        }
        .boxed()
    }
}

/// Escape quotes and flatten line breaks before a label is embedded in a prompt.
pub fn sanitize_prompt_input(text: &str) -> String {
    text.replace('"', "\\\"").replace(['\n', '\r'], " ")
}
