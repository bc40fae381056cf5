use crate::collector::{CollectOptions, ReplyCollector};
use anyhow::Result;
use async_trait::async_trait;
use vibe_channels::UserId;

/// Labels the emotional intent of a text. May fail or return an empty label.
#[async_trait]
pub trait ToneAnalyzer: Send + Sync {
    async fn analyze(&self, text: &str) -> Result<String>;
}

/// Private one-to-one messaging with a user, addressed by user id.
#[async_trait]
pub trait DirectChannel: Send + Sync {
    /// Send `text` to the user's private channel.
    async fn send(&self, user_id: &UserId, text: &str) -> Result<()>;

    /// Start collecting the user's replies in their private channel.
    /// Fails when the private channel cannot be resolved.
    async fn collect(&self, user_id: &UserId, options: CollectOptions) -> Result<ReplyCollector>;
}
