//! Inbound dispatch: direct messages feed reply collectors, server messages
//! run commands and mention analysis.

use crate::commands::{self, BotCommand, MentionAction};
use crate::moods::MoodStore;
use crate::server_settings::ServerSettings;
use crate::tone::{DEFAULT_MOOD_COLOR, ToneReporter};
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use vibe_channels::{ChannelAdapter, GuildId, InboundMessage, OutboundMessage, RoleId};
use vibe_clarify::{ClarificationEngine, CollectorHub, DirectReply};

pub const CLARIFY_ACK: &str = "Your request for anonymous clarification has been sent.";
const CLARIFY_BOT_TARGET: &str = "Messages from bots can't be clarified.";
const SOMETHING_WENT_WRONG: &str = "Something went wrong.";
const EXPLAIN_DM_FAILED: &str = "I couldn't send you a direct message. Do you accept DMs from server members?";
const MOOD_USAGE: &str = "Tell me your mood: `!mood <name>`.";
const MOOD_ROLE_TAKEN: &str = "That is a preexisting role in this server! Please select a new mood.";
const MOOD_UPDATED: &str = "Thanks for updating your mood!";

/// What `!mood` did for the caller.
#[derive(Debug, PartialEq, Eq)]
enum MoodChange {
    Applied,
    RoleTaken,
}

pub struct Gateway {
    adapter: Arc<dyn ChannelAdapter>,
    hub: CollectorHub,
    engine: Arc<ClarificationEngine>,
    tone: Arc<dyn ToneReporter>,
    settings: Arc<ServerSettings>,
    moods: Arc<MoodStore>,
    toggle_role: Option<RoleId>,
    inbound_rx: tokio::sync::Mutex<mpsc::Receiver<InboundMessage>>,
}

impl Gateway {
    pub fn new(
        adapter: Arc<dyn ChannelAdapter>,
        hub: CollectorHub,
        engine: Arc<ClarificationEngine>,
        tone: Arc<dyn ToneReporter>,
        settings: Arc<ServerSettings>,
        moods: Arc<MoodStore>,
        inbound_rx: mpsc::Receiver<InboundMessage>,
    ) -> Self {
        Self {
            adapter,
            hub,
            engine,
            tone,
            settings,
            moods,
            toggle_role: None,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
        }
    }

    /// Restrict `!toggle` to members holding `role_id`.
    pub fn with_toggle_role(mut self, role_id: Option<RoleId>) -> Self {
        self.toggle_role = role_id;
        self
    }

    pub fn start(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.run_loop(shutdown).await {
                tracing::error!(%e, "gateway loop exited");
            }
        })
    }

    #[tracing::instrument(level = "info", skip_all)]
    async fn run_loop(self: Arc<Self>, shutdown: CancellationToken) -> Result<()> {
        let mut rx = self.inbound_rx.lock().await;
        loop {
            let inbound = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                msg = rx.recv() => match msg {
                    Some(inbound) => inbound,
                    None => return Ok(()),
                },
            };

            if inbound.is_direct {
                self.route_direct(inbound);
                continue;
            }
            // Analysis and clarification can take minutes; keep the loop free.
            let gateway = self.clone();
            tokio::spawn(async move {
                if let Err(e) = gateway.handle_server_message(inbound).await {
                    tracing::warn!(%e, "handle_server_message failed");
                }
            });
        }
    }

    fn route_direct(&self, inbound: InboundMessage) {
        let author_id = inbound.author_id.clone();
        let routed = self.hub.dispatch(DirectReply {
            message_id: inbound.message_id,
            channel_id: inbound.channel_id,
            author_id: inbound.author_id,
            content: inbound.content,
        });
        if !routed {
            tracing::debug!(author_id = %author_id, "ignoring direct message with no active collector");
        }
    }

    #[tracing::instrument(
        level = "info",
        skip_all,
        fields(message_id = %inbound.message_id, author_id = %inbound.author_id)
    )]
    pub(crate) async fn handle_server_message(&self, inbound: InboundMessage) -> Result<()> {
        let Some(guild_id) = inbound.guild_id.clone() else {
            return Ok(());
        };
        let command = commands::parse_command(&inbound.content);

        if command == Some(BotCommand::Toggle) {
            return self.toggle(&guild_id, &inbound).await;
        }
        if !self.settings.is_enabled(&guild_id) {
            tracing::debug!(guild_id = %guild_id, "bot disabled in this server");
            return Ok(());
        }

        match command {
            Some(BotCommand::Toggle) => Ok(()),
            Some(BotCommand::Help) => self.reply(&inbound, commands::HELP_TEXT).await,
            Some(BotCommand::Tone) => self.tone_of_referenced(&inbound).await,
            Some(BotCommand::Explain) => self.explain_referenced(&inbound).await,
            Some(BotCommand::Clarify) => self.request_clarification(&inbound).await,
            Some(BotCommand::Mood) => self.set_mood(&guild_id, &inbound).await,
            None => self.analyze_mention(&inbound).await,
        }
    }

    async fn toggle(&self, guild_id: &GuildId, inbound: &InboundMessage) -> Result<()> {
        let missing_role = self
            .toggle_role
            .as_ref()
            .filter(|role_id| !inbound.author_roles.contains(role_id));
        if let Some(role_id) = missing_role {
            tracing::info!(guild_id = %guild_id, "toggle refused; caller lacks the toggle role");
            let text = format!("You need the <@&{role_id}> role to toggle the bot.");
            return self.reply(inbound, &text).await;
        }
        let setting = self.settings.toggle(guild_id, &inbound.author_id).await;
        let state = if setting.is_enabled {
            "enabled ✅"
        } else {
            "disabled ❌"
        };
        let toggled_by = setting
            .toggled_by
            .as_ref()
            .map(|u| u.mention())
            .unwrap_or_else(|| "Unknown".to_string());
        let toggled_at = setting
            .last_toggled
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "Never".to_string());
        let text = format!(
            "Bot is now {state} in this server.\nToggled by: {toggled_by}\nLast toggled: {toggled_at}"
        );
        self.reply(inbound, &text).await
    }

    async fn analyze_mention(&self, inbound: &InboundMessage) -> Result<()> {
        let MentionAction::Analyze(text) = commands::mention_action(inbound) else {
            return Ok(());
        };
        let reply = match self.tone.tone_for_display(text).await {
            Ok(tone) => tone,
            Err(e) => {
                tracing::warn!(%e, "tone analysis failed");
                SOMETHING_WENT_WRONG.to_string()
            }
        };
        self.reply(inbound, &reply).await
    }

    async fn tone_of_referenced(&self, inbound: &InboundMessage) -> Result<()> {
        let Some(target) = inbound.referenced.as_ref() else {
            return self
                .reply(inbound, "Reply to a message with `!tone` to analyze it.")
                .await;
        };
        let reply = match self.tone.tone_for_display(&target.content).await {
            Ok(tone) => tone,
            Err(e) => {
                tracing::warn!(%e, "tone analysis failed");
                SOMETHING_WENT_WRONG.to_string()
            }
        };
        self.reply(inbound, &reply).await
    }

    async fn explain_referenced(&self, inbound: &InboundMessage) -> Result<()> {
        let Some(target) = inbound.referenced.as_ref() else {
            return self
                .reply(inbound, "Reply to a message with `!explain` to get an explanation.")
                .await;
        };
        let explanation = match self.tone.explain(&target.content).await {
            Ok(text) => format!("Explanation for \"{}\":\n{text}", target.content),
            Err(e) => {
                tracing::warn!(%e, "tone explanation failed");
                return self.reply(inbound, SOMETHING_WENT_WRONG).await;
            }
        };
        if let Err(e) = self
            .adapter
            .send_direct(&inbound.author_id, OutboundMessage::text(explanation))
            .await
        {
            tracing::warn!(%e, "could not deliver explanation");
            return self.reply(inbound, EXPLAIN_DM_FAILED).await;
        }
        Ok(())
    }

    /// Anonymous: the command message is removed and all feedback to the
    /// requester goes through direct messages.
    async fn request_clarification(&self, inbound: &InboundMessage) -> Result<()> {
        let Some(target) = inbound.referenced.clone() else {
            return self
                .reply(inbound, "Reply to a message with `!clarify` to request a clarification.")
                .await;
        };

        if let Err(e) = self
            .adapter
            .delete_message(&inbound.channel_id, &inbound.message_id)
            .await
        {
            tracing::warn!(%e, "could not delete clarify command message");
        }

        let requester_id = inbound.author_id.clone();
        let notice = if target.author_is_bot {
            CLARIFY_BOT_TARGET
        } else {
            CLARIFY_ACK
        };
        if let Err(e) = self
            .adapter
            .send_direct(&requester_id, OutboundMessage::text(notice))
            .await
        {
            tracing::warn!(%e, requester_id = %requester_id, "could not notify requester");
        }
        if target.author_is_bot {
            return Ok(());
        }

        let engine = self.engine.clone();
        tokio::spawn(async move {
            let outcome = engine
                .enqueue_and_process(
                    target.author_id,
                    requester_id,
                    target.message_id,
                    target.content,
                )
                .await;
            tracing::debug!(inserted = outcome.inserted, run = ?outcome.run, "clarification request handled");
        });
        Ok(())
    }

    async fn set_mood(&self, guild_id: &GuildId, inbound: &InboundMessage) -> Result<()> {
        let Some(name) = commands::mood_name(&inbound.content) else {
            return self.reply(inbound, MOOD_USAGE).await;
        };
        let text = match self.change_mood(guild_id, inbound, name).await {
            Ok(MoodChange::Applied) => MOOD_UPDATED,
            Ok(MoodChange::RoleTaken) => MOOD_ROLE_TAKEN,
            Err(e) => {
                tracing::warn!(%e, guild_id = %guild_id, mood = %name, "mood change failed");
                SOMETHING_WENT_WRONG
            }
        };
        self.reply(inbound, text).await
    }

    /// Server roles the bot did not create for a mood are never handed out.
    #[tracing::instrument(level = "info", skip_all, fields(guild_id = %guild_id, mood = %name))]
    async fn change_mood(
        &self,
        guild_id: &GuildId,
        inbound: &InboundMessage,
        name: &str,
    ) -> Result<MoodChange> {
        let roles = self.adapter.list_roles(guild_id).await?;
        let known = self.moods.mood_role(guild_id, name);
        let role_id = match roles.iter().find(|r| r.name == name) {
            Some(existing) if known.as_ref() == Some(&existing.id) => existing.id.clone(),
            Some(existing) => {
                tracing::info!(role_id = %existing.id, "mood refused; role is not a mood role");
                return Ok(MoodChange::RoleTaken);
            }
            None => {
                let color = match self.tone.mood_color(name).await {
                    Ok(color) => color,
                    Err(e) => {
                        tracing::warn!(%e, "mood color unavailable; using default");
                        DEFAULT_MOOD_COLOR
                    }
                };
                self.adapter.create_role(guild_id, name, color).await?
            }
        };

        let user_id = &inbound.author_id;
        self.adapter
            .add_member_role(guild_id, user_id, &role_id)
            .await?;
        let previous = self
            .moods
            .record_mood(guild_id, user_id, name, role_id.clone())
            .await;
        if let Some(previous) = previous.filter(|p| *p != role_id) {
            if let Err(e) = self
                .adapter
                .remove_member_role(guild_id, user_id, &previous)
                .await
            {
                tracing::warn!(%e, role_id = %previous, "could not remove previous mood role");
            }
        }
        Ok(MoodChange::Applied)
    }

    async fn reply(&self, inbound: &InboundMessage, text: &str) -> Result<()> {
        self.adapter
            .send(
                &inbound.channel_id,
                OutboundMessage::reply(text, inbound.message_id.clone()),
            )
            .await
    }
}
