use crate::error::{LlmError, Result};
use crate::types::{ChatMessage, ChatResponse, Role, Usage};
use serde::{Deserialize, Serialize};

const ANTHROPIC_MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Clone)]
pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl AnthropicClient {
    pub fn new(http: reqwest::Client, api_key: &str, model: &str) -> Self {
        Self {
            http,
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }

    #[tracing::instrument(level = "info", skip_all, fields(model = %self.model))]
    pub async fn chat(&self, messages: &[ChatMessage], max_tokens: u32) -> Result<ChatResponse> {
        let req = AnthropicRequest::new(&self.model, messages, max_tokens)?;

        let response = self
            .http
            .post(ANTHROPIC_MESSAGES_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&req)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(LlmError::Http(format!(
                "anthropic chat status={status} body={body}"
            )));
        }

        let parsed: AnthropicResponse = serde_json::from_str(&body)?;
        Ok(parsed.into())
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "String::is_empty")]
    system: String,
    messages: Vec<AnthropicMessage>,
}

impl AnthropicRequest {
    pub(crate) fn new(model: &str, messages: &[ChatMessage], max_tokens: u32) -> Result<Self> {
        let mut system = String::new();
        let mut out_messages = Vec::new();

        for m in messages {
            match m.role {
                Role::System => {
                    if !system.is_empty() {
                        system.push('\n');
                    }
                    system.push_str(m.content.trim());
                }
                Role::User => out_messages.push(AnthropicMessage::text("user", &m.content)),
                Role::Assistant => {
                    out_messages.push(AnthropicMessage::text("assistant", &m.content))
                }
            }
        }

        if out_messages.is_empty() {
            return Err(LlmError::InvalidInput(
                "anthropic requests need at least one user message".to_string(),
            ));
        }

        Ok(Self {
            model: model.to_string(),
            max_tokens,
            system,
            messages: out_messages,
        })
    }
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: Vec<AnthropicContentBlock>,
}

impl AnthropicMessage {
    fn text(role: &'static str, text: &str) -> Self {
        Self {
            role,
            content: vec![AnthropicContentBlock::Text {
                text: text.to_string(),
            }],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicContentBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AnthropicResponse {
    #[serde(default)]
    content: Vec<AnthropicContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: AnthropicUsage,
}

#[derive(Debug, Default, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

impl From<AnthropicResponse> for ChatResponse {
    fn from(v: AnthropicResponse) -> Self {
        let mut content = String::new();
        for block in v.content {
            if let AnthropicContentBlock::Text { text } = block {
                content.push_str(&text);
            }
        }

        ChatResponse {
            message: ChatMessage {
                role: Role::Assistant,
                content,
            },
            usage: Usage {
                prompt_tokens: v.usage.input_tokens as u32,
                completion_tokens: v.usage.output_tokens as u32,
            },
            finish_reason: v.stop_reason.unwrap_or_else(|| "unknown".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn system_messages_are_hoisted_out_of_the_message_list() {
        let req = AnthropicRequest::new(
            "claude-3-5-haiku-latest",
            &[
                ChatMessage::system(" first "),
                ChatMessage::system("second"),
                ChatMessage::user("fine."),
            ],
            16,
        )
        .expect("build request");
        let v = serde_json::to_value(&req).expect("serialize request");
        assert_eq!(v["system"], "first\nsecond");
        assert_eq!(v["messages"].as_array().map(Vec::len), Some(1));
        assert_eq!(v["messages"][0]["role"], "user");
        assert_eq!(v["messages"][0]["content"][0]["text"], "fine.");
    }

    #[test]
    fn request_without_user_turns_is_rejected() {
        let err = AnthropicRequest::new("claude-3-5-haiku-latest", &[ChatMessage::system("x")], 16)
            .expect_err("system-only request must fail");
        assert!(matches!(err, LlmError::InvalidInput(_)));
    }

    #[test]
    fn response_text_blocks_are_concatenated() {
        let parsed: AnthropicResponse = serde_json::from_value(json!({
            "content": [
                { "type": "text", "text": "Sar" },
                { "type": "thinking", "thinking": "..." },
                { "type": "text", "text": "castic" }
            ],
            "stop_reason": "end_turn",
            "usage": { "input_tokens": 12, "output_tokens": 3 }
        }))
        .expect("parse response");
        let resp = ChatResponse::from(parsed);
        assert_eq!(resp.text(), "Sarcastic");
        assert_eq!(resp.usage.prompt_tokens, 12);
        assert_eq!(resp.usage.completion_tokens, 3);
        assert_eq!(resp.finish_reason, "end_turn");
    }
}
