use crate::types::{
    ChannelId, GuildId, GuildRole, InboundMessage, MessageId, OutboundMessage, RoleId, UserId,
};
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Unique channel identifier, e.g. "discord".
    fn channel_id(&self) -> &str;

    /// Start receiving messages. Push to tx for each inbound message.
    async fn start(&self, tx: mpsc::Sender<InboundMessage>) -> Result<()>;

    /// Send a message into a platform channel (server channel or DM channel).
    async fn send(&self, channel_id: &ChannelId, message: OutboundMessage) -> Result<()>;

    /// Resolve (opening if needed) the private channel between the bot and a user.
    /// Fails when the platform refuses, e.g. the user does not accept direct messages.
    async fn open_direct(&self, user_id: &UserId) -> Result<ChannelId>;

    /// Send a message to a user's private channel.
    async fn send_direct(&self, user_id: &UserId, message: OutboundMessage) -> Result<()> {
        let channel_id = self.open_direct(user_id).await?;
        self.send(&channel_id, message).await
    }

    /// Delete a message. Adapters without moderation support keep the default.
    async fn delete_message(&self, _channel_id: &ChannelId, _message_id: &MessageId) -> Result<()> {
        Err(unsupported("delete_message"))
    }

    /// Roles currently defined in a server.
    async fn list_roles(&self, _guild_id: &GuildId) -> Result<Vec<GuildRole>> {
        Err(unsupported("list_roles"))
    }

    /// Create a server role; `color` is 0xRRGGBB.
    async fn create_role(&self, _guild_id: &GuildId, _name: &str, _color: u32) -> Result<RoleId> {
        Err(unsupported("create_role"))
    }

    async fn delete_role(&self, _guild_id: &GuildId, _role_id: &RoleId) -> Result<()> {
        Err(unsupported("delete_role"))
    }

    async fn add_member_role(
        &self,
        _guild_id: &GuildId,
        _user_id: &UserId,
        _role_id: &RoleId,
    ) -> Result<()> {
        Err(unsupported("add_member_role"))
    }

    async fn remove_member_role(
        &self,
        _guild_id: &GuildId,
        _user_id: &UserId,
        _role_id: &RoleId,
    ) -> Result<()> {
        Err(unsupported("remove_member_role"))
    }
}

fn unsupported(operation: &str) -> anyhow::Error {
    anyhow::anyhow!("{operation} is not supported by this channel")
}
