use crate::anthropic::AnthropicClient;
use crate::error::{LlmError, Result};
use crate::openai::OpenAiClient;
use crate::types::{ChatMessage, ChatResponse};

const DEFAULT_MAX_TOKENS: u32 = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAI,
    Anthropic,
}

#[derive(Clone)]
pub struct LlmClient {
    provider: Provider,
    api_key: String,
    model: String,
    max_tokens: u32,
    client: reqwest::Client,
}

impl LlmClient {
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn new(api_key: &str, model: &str) -> Self {
        let provider = detect_provider(model);
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(%e, "reqwest client build failed; falling back to default client");
                reqwest::Client::new()
            });
        Self {
            provider,
            api_key: api_key.to_string(),
            model: model.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            client,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    #[tracing::instrument(level = "info", skip_all, fields(provider = ?self.provider))]
    pub async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatResponse> {
        if self.api_key.trim().is_empty() {
            return Err(LlmError::InvalidInput(format!(
                "no api key configured for model {}",
                self.model
            )));
        }
        match self.provider {
            Provider::OpenAI => {
                let c = OpenAiClient::new(self.client.clone(), &self.api_key, &self.model);
                c.chat(messages, self.max_tokens).await
            }
            Provider::Anthropic => {
                let c = AnthropicClient::new(self.client.clone(), &self.api_key, &self.model);
                c.chat(messages, self.max_tokens).await
            }
        }
    }
}

pub fn detect_provider(model: &str) -> Provider {
    let m = model.to_ascii_lowercase();
    if m.starts_with("claude-") {
        return Provider::Anthropic;
    }
    Provider::OpenAI
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_follows_model_prefix() {
        assert_eq!(detect_provider("gpt-4o-mini"), Provider::OpenAI);
        assert_eq!(detect_provider("Claude-3-5-Haiku-latest"), Provider::Anthropic);
        assert_eq!(detect_provider("o3-mini"), Provider::OpenAI);
    }

    #[tokio::test]
    async fn chat_without_key_fails_before_any_request() {
        let client = LlmClient::new("  ", "gpt-4o-mini");
        let err = client
            .chat(&[ChatMessage::user("hello")])
            .await
            .expect_err("empty key must be rejected");
        assert!(matches!(err, LlmError::InvalidInput(_)));
    }
}
