//! Channel adapters for the vibecheque bot.
//!
//! Adapters are pure I/O: they convert platform messages to/from
//! `InboundMessage` / `OutboundMessage`, manage server roles on request, and
//! know nothing about tones, moods or clarification queues.

mod discord;
mod traits;
mod types;

pub use discord::DiscordAdapter;
pub use traits::ChannelAdapter;
pub use types::{
    ChannelId, GuildId, GuildRole, InboundMessage, MessageId, OutboundMessage, ReferencedMessage,
    RoleId, UserId,
};
