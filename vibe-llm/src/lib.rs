//! BYO-key LLM client for the vibecheque bot.
//!
//! Pure HTTP client: one-shot chat completions against OpenAI or Anthropic.
//! Knows nothing about Discord, tones, or clarification queues.

mod anthropic;
mod client;
mod error;
mod openai;
mod types;

pub use client::{LlmClient, Provider, detect_provider};
pub use error::{LlmError, Result};
pub use types::{ChatMessage, ChatResponse, Role, Usage};
