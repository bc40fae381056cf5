//! Server-channel command parser and mention handling.

use crate::moods::MAX_MOOD_NAME_CHARS;
use vibe_channels::{InboundMessage, UserId};

pub const HELP_TEXT: &str = "Commands:\n\
`!tone` (reply to a message): analyze its tone\n\
`!explain` (reply to a message): get a private explanation of its tone\n\
`!clarify` (reply to a message): anonymously ask the author to clarify their tone\n\
`!mood <name>`: wear a role for your current mood\n\
`!toggle`: enable or disable the bot in this server (anyone can, unless a toggle role is configured)\n\
`!help`: show this message\n\
Tag me in a message, or in a reply, to analyze its tone.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotCommand {
    Toggle,
    Tone,
    Explain,
    Clarify,
    Mood,
    Help,
}

pub fn parse_command(input: &str) -> Option<BotCommand> {
    let trimmed = input.trim();
    if !trimmed.starts_with('!') {
        return None;
    }
    let name = trimmed.split_whitespace().next()?;
    match name.to_ascii_lowercase().as_str() {
        "!toggle" => Some(BotCommand::Toggle),
        "!tone" => Some(BotCommand::Tone),
        "!explain" => Some(BotCommand::Explain),
        "!clarify" => Some(BotCommand::Clarify),
        "!mood" => Some(BotCommand::Mood),
        "!help" => Some(BotCommand::Help),
        _ => None,
    }
}

/// The mood name after `!mood`, if it is usable as a role name.
pub fn mood_name(input: &str) -> Option<&str> {
    let trimmed = input.trim();
    let (_, rest) = trimmed.split_once(char::is_whitespace)?;
    let name = rest.trim();
    let length = name.chars().count();
    (1..=MAX_MOOD_NAME_CHARS).contains(&length).then_some(name)
}

/// What a message that mentions the bot should have analyzed.
#[derive(Debug, PartialEq, Eq)]
pub enum MentionAction<'a> {
    Ignore,
    Analyze(&'a str),
}

pub fn mention_action(msg: &InboundMessage) -> MentionAction<'_> {
    if !msg.mentions_bot && !msg.tags_bot {
        return MentionAction::Ignore;
    }
    let Some(parent) = msg.referenced.as_ref() else {
        return MentionAction::Analyze(&msg.content);
    };
    // A reply to the bot pings it without a tag in the text.
    if !msg.tags_bot {
        return MentionAction::Ignore;
    }
    if is_only_bot_tag(&msg.content, msg.bot_user_id.as_ref()) {
        MentionAction::Analyze(&parent.content)
    } else {
        MentionAction::Analyze(&msg.content)
    }
}

/// The content is the bot's own tag and nothing else.
fn is_only_bot_tag(content: &str, bot_user_id: Option<&UserId>) -> bool {
    let Some(bot_user_id) = bot_user_id else {
        return false;
    };
    let trimmed = content.trim();
    trimmed == format!("<@{bot_user_id}>") || trimmed == format!("<@!{bot_user_id}>")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use vibe_channels::{ChannelId, MessageId, ReferencedMessage};

    fn message(content: &str, mentions_bot: bool, tags_bot: bool) -> InboundMessage {
        InboundMessage {
            message_id: MessageId::new("m"),
            channel_id: ChannelId::new("general"),
            guild_id: None,
            author_id: UserId::new("alice"),
            author_roles: Vec::new(),
            is_direct: false,
            content: content.to_string(),
            mentions_bot,
            tags_bot,
            referenced: None,
            bot_user_id: Some(UserId::new("42")),
            received_at: Utc::now(),
        }
    }

    fn replying_to(mut msg: InboundMessage, parent: &str) -> InboundMessage {
        msg.referenced = Some(ReferencedMessage {
            message_id: MessageId::new("parent"),
            author_id: UserId::new("bob"),
            author_is_bot: false,
            content: parent.to_string(),
        });
        msg
    }

    #[test]
    fn parses_known_commands() {
        assert_eq!(parse_command("!toggle"), Some(BotCommand::Toggle));
        assert_eq!(parse_command("  !TONE  "), Some(BotCommand::Tone));
        assert_eq!(parse_command("!clarify please"), Some(BotCommand::Clarify));
        assert_eq!(parse_command("!explain"), Some(BotCommand::Explain));
        assert_eq!(parse_command("!help"), Some(BotCommand::Help));
        assert_eq!(parse_command("!mood Sleepy"), Some(BotCommand::Mood));
        assert_eq!(parse_command("!unknown"), None);
        assert_eq!(parse_command("tone"), None);
        assert_eq!(parse_command("!"), None);
    }

    #[test]
    fn mention_analyzes_own_text() {
        let msg = message("<@42> I can't believe it", true, true);
        assert_eq!(mention_action(&msg), MentionAction::Analyze("<@42> I can't believe it"));
        assert_eq!(mention_action(&message("hi", false, false)), MentionAction::Ignore);
    }

    #[test]
    fn bare_tag_in_reply_analyzes_parent() {
        let msg = replying_to(message(" <@!42> ", true, true), "fine.");
        assert_eq!(mention_action(&msg), MentionAction::Analyze("fine."));

        let msg = replying_to(message("<@42> what about this", true, true), "fine.");
        assert_eq!(mention_action(&msg), MentionAction::Analyze("<@42> what about this"));
    }

    #[test]
    fn reply_ping_without_tag_is_ignored() {
        let msg = replying_to(message("thanks bot", true, false), "Happy");
        assert_eq!(mention_action(&msg), MentionAction::Ignore);
    }

    #[test]
    fn only_the_bots_own_tag_counts_as_bare() {
        let msg = replying_to(message("<@7> <@42>", true, true), "fine.");
        assert_eq!(mention_action(&msg), MentionAction::Analyze("<@7> <@42>"));

        let msg = replying_to(message("<@7>", true, true), "fine.");
        assert_eq!(mention_action(&msg), MentionAction::Analyze("<@7>"));

        let mut msg = replying_to(message("<@42>", true, true), "fine.");
        msg.bot_user_id = None;
        assert_eq!(mention_action(&msg), MentionAction::Analyze("<@42>"));
    }

    #[test]
    fn mood_names_follow_the_command() {
        assert_eq!(mood_name("!mood Sleepy"), Some("Sleepy"));
        assert_eq!(mood_name("  !mood   Quietly hopeful  "), Some("Quietly hopeful"));
        assert_eq!(mood_name("!mood"), None);
        assert_eq!(mood_name("!mood    "), None);
        assert_eq!(mood_name(&format!("!mood {}", "x".repeat(MAX_MOOD_NAME_CHARS + 1))), None);
    }
}
