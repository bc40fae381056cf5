use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }

        impl Deref for $name {
            type Target = str;

            fn deref(&self) -> &Self::Target {
                self.as_str()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

id_newtype!(MessageId);
id_newtype!(ChannelId);
id_newtype!(GuildId);
id_newtype!(UserId);
id_newtype!(RoleId);

impl UserId {
    /// Platform mention markup for this user.
    pub fn mention(&self) -> String {
        format!("<@{}>", self.0)
    }
}

/// The message an inbound message replies to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferencedMessage {
    pub message_id: MessageId,
    pub author_id: UserId,
    pub author_is_bot: bool,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub message_id: MessageId,
    pub channel_id: ChannelId,
    #[serde(default)]
    pub guild_id: Option<GuildId>,
    pub author_id: UserId,
    /// The author's server roles; empty in direct messages.
    #[serde(default)]
    pub author_roles: Vec<RoleId>,
    /// True for the private channel between the bot and the author.
    pub is_direct: bool,
    pub content: String,
    /// The bot is in the message's mention list (includes reply pings).
    #[serde(default)]
    pub mentions_bot: bool,
    /// The bot's tag appears literally in the content.
    #[serde(default)]
    pub tags_bot: bool,
    #[serde(default)]
    pub referenced: Option<ReferencedMessage>,
    /// The bot's own user id, once the gateway has reported it.
    #[serde(default)]
    pub bot_user_id: Option<UserId>,
    pub received_at: DateTime<Utc>,
}

/// A server role as listed by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildRole {
    pub id: RoleId,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub content: String,
    #[serde(default)]
    pub reply_to_message_id: Option<MessageId>,
}

impl OutboundMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            reply_to_message_id: None,
        }
    }

    pub fn reply(content: impl Into<String>, reply_to: MessageId) -> Self {
        Self {
            content: content.into(),
            reply_to_message_id: Some(reply_to),
        }
    }
}
