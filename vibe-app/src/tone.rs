//! LLM-backed tone analysis.

use async_trait::async_trait;
use vibe_clarify::ToneAnalyzer;
use vibe_llm::{ChatMessage, LlmClient};

pub const TONE_UNAVAILABLE: &str = "Unknown error - can't generate the tone at the moment";

const TONE_SYSTEM_PROMPT: &str = "Humans are unpredictable beings. A text message can be read as \
passive aggressive or cheerful depending on how the reader hears it, which leads to \
misunderstandings. You are an expert in understanding human emotions in text messages. Reply \
to each text with your best guess of what the writer was feeling when they wrote it: sad, mad, \
happy, neutral, or any other emotion the text conveys. Reply in 1-2 words naming the emotion. \
The text may contain a tag for the bot (\"@vibecheque\" or \"<@...>\"); ignore it and analyze \
only the rest of the text.";

const EXPLAIN_SYSTEM_PROMPT: &str = "You are an expert in understanding human emotions in text \
messages. In two or three short sentences, explain the tone of the following message and which \
words or phrasing give it that tone. Ignore any tag for the bot (\"@vibecheque\" or \"<@...>\").";

const MOOD_COLOR_SYSTEM_PROMPT: &str = "You pick colors for moods. Reply with only the hex color \
code (six hex digits, no # and no other text) that best represents the mood you are given.";

/// Used when no color can be read from the model's answer.
pub const DEFAULT_MOOD_COLOR: u32 = 0x99AAB5;

pub struct LlmToneAnalyzer {
    llm: LlmClient,
}

impl LlmToneAnalyzer {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }

    /// Raw 1-2 word label; empty when the model returned nothing.
    #[tracing::instrument(level = "debug", skip_all, fields(model = %self.llm.model()))]
    pub async fn tone(&self, text: &str) -> anyhow::Result<String> {
        let response = self.llm.chat(&tone_messages(text)).await?;
        Ok(response.text().to_string())
    }
}

/// Tone features shown to users as-is.
#[async_trait]
pub trait ToneReporter: Send + Sync {
    /// Label for a reply; never empty.
    async fn tone_for_display(&self, text: &str) -> anyhow::Result<String>;

    /// A few sentences on why the text reads the way it does.
    async fn explain(&self, text: &str) -> anyhow::Result<String>;

    /// 0xRRGGBB color for a mood name.
    async fn mood_color(&self, mood: &str) -> anyhow::Result<u32>;
}

#[async_trait]
impl ToneReporter for LlmToneAnalyzer {
    async fn tone_for_display(&self, text: &str) -> anyhow::Result<String> {
        Ok(or_unavailable(self.tone(text).await?))
    }

    #[tracing::instrument(level = "debug", skip_all, fields(model = %self.llm.model()))]
    async fn explain(&self, text: &str) -> anyhow::Result<String> {
        let messages = [
            ChatMessage::system(EXPLAIN_SYSTEM_PROMPT),
            ChatMessage::user(text),
        ];
        let response = self.llm.chat(&messages).await?;
        Ok(or_unavailable(response.text().to_string()))
    }

    #[tracing::instrument(level = "debug", skip_all, fields(model = %self.llm.model()))]
    async fn mood_color(&self, mood: &str) -> anyhow::Result<u32> {
        let messages = [
            ChatMessage::system(MOOD_COLOR_SYSTEM_PROMPT),
            ChatMessage::user(mood),
        ];
        let response = self.llm.chat(&messages).await?;
        parse_hex_color(response.text())
            .ok_or_else(|| anyhow::anyhow!("no hex color in model output {:?}", response.text()))
    }
}

#[async_trait]
impl ToneAnalyzer for LlmToneAnalyzer {
    async fn analyze(&self, text: &str) -> anyhow::Result<String> {
        self.tone(text).await
    }
}

fn tone_messages(text: &str) -> Vec<ChatMessage> {
    vec![ChatMessage::system(TONE_SYSTEM_PROMPT), ChatMessage::user(text)]
}

fn or_unavailable(label: String) -> String {
    if label.trim().is_empty() {
        TONE_UNAVAILABLE.to_string()
    } else {
        label
    }
}

/// First run of six hex digits, with or without a leading `#`.
fn parse_hex_color(text: &str) -> Option<u32> {
    let bytes = text.as_bytes();
    let mut start = 0;
    while start < bytes.len() {
        if !bytes[start].is_ascii_hexdigit() {
            start += 1;
            continue;
        }
        let end = bytes[start..]
            .iter()
            .position(|b| !b.is_ascii_hexdigit())
            .map_or(bytes.len(), |len| start + len);
        if end - start == 6 {
            return u32::from_str_radix(&text[start..end], 16).ok();
        }
        start = end;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use vibe_llm::Role;

    #[test]
    fn tone_prompt_is_system_then_user_text() {
        let messages = tone_messages("<@42> you ok?");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[0].content.contains("1-2 words"));
        assert_eq!(messages[1].role, Role::User);
        assert_eq!(messages[1].content, "<@42> you ok?");
    }

    #[test]
    fn empty_label_becomes_unavailable_notice() {
        assert_eq!(or_unavailable(String::new()), TONE_UNAVAILABLE);
        assert_eq!(or_unavailable("  ".to_string()), TONE_UNAVAILABLE);
        assert_eq!(or_unavailable("Happy".to_string()), "Happy");
    }

    #[test]
    fn hex_colors_are_read_from_loose_answers() {
        assert_eq!(parse_hex_color("FFB347"), Some(0xFFB347));
        assert_eq!(parse_hex_color("#1e90ff"), Some(0x1E90FF));
        assert_eq!(parse_hex_color("Sure! The color is 7FFFD4."), Some(0x7FFFD4));
        assert_eq!(parse_hex_color("ABC or 12345678"), None);
        assert_eq!(parse_hex_color(""), None);
    }
}
