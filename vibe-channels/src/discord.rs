use crate::traits::ChannelAdapter;
use crate::types::{
    ChannelId, GuildId, GuildRole, InboundMessage, MessageId, OutboundMessage, ReferencedMessage,
    RoleId, UserId,
};
use anyhow::Result;
use chrono::Utc;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio_tungstenite::tungstenite::Message;

const DISCORD_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";
const DISCORD_API_BASE: &str = "https://discord.com/api/v10";
/// GUILD_MESSAGES | DIRECT_MESSAGES | MESSAGE_CONTENT
const DISCORD_DEFAULT_INTENTS: u64 = (1 << 9) | (1 << 12) | (1 << 15);
const DISCORD_MAX_CONTENT_CHARS: usize = 2000;
const DISCORD_RETRY_BASE_MS: u64 = 250;
const DISCORD_RETRY_MAX_MS: u64 = 30_000;
/// A session that stayed up this long resets the reconnect backoff.
const DISCORD_STABLE_SESSION: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct DiscordAdapter {
    http: reqwest::Client,
    bot_token: String,
    gateway_intents: u64,
    dm_channels: Arc<DashMap<UserId, ChannelId>>,
}

impl DiscordAdapter {
    pub fn new(bot_token: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            http,
            bot_token: bot_token.to_string(),
            gateway_intents: DISCORD_DEFAULT_INTENTS,
            dm_channels: Arc::new(DashMap::new()),
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{DISCORD_API_BASE}{path}")
    }

    fn auth_header(&self) -> String {
        format!("Bot {}", self.bot_token)
    }

    pub fn with_gateway_intents(mut self, gateway_intents: u64) -> Self {
        self.gateway_intents = gateway_intents;
        self
    }
}

#[async_trait::async_trait]
impl ChannelAdapter for DiscordAdapter {
    fn channel_id(&self) -> &str {
        "discord"
    }

    async fn start(&self, tx: mpsc::Sender<InboundMessage>) -> Result<()> {
        let adapter = self.clone();
        tokio::spawn(async move {
            if let Err(e) = adapter.run_gateway_loop(tx).await {
                tracing::error!(%e, "discord gateway loop exited");
            }
        });
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip_all, fields(channel_id = %channel_id))]
    async fn send(&self, channel_id: &ChannelId, message: OutboundMessage) -> Result<()> {
        let url = self.api_url(&format!("/channels/{channel_id}/messages"));
        let body = build_create_message_body(&message);
        let resp = self
            .http
            .post(url)
            .header("Authorization", self.auth_header())
            .json(&body)
            .send()
            .await?;
        ensure_success(resp, "send").await?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip_all, fields(user_id = %user_id))]
    async fn open_direct(&self, user_id: &UserId) -> Result<ChannelId> {
        if let Some(channel_id) = self.dm_channels.get(user_id) {
            return Ok(channel_id.clone());
        }

        let url = self.api_url("/users/@me/channels");
        let body = serde_json::json!({ "recipient_id": user_id.as_str() });
        let resp = self
            .http
            .post(url)
            .header("Authorization", self.auth_header())
            .json(&body)
            .send()
            .await?;
        let channel: DiscordChannel = ensure_success(resp, "open dm").await?.json().await?;
        let channel_id = ChannelId::new(channel.id);
        self.dm_channels
            .insert(user_id.clone(), channel_id.clone());
        Ok(channel_id)
    }

    #[tracing::instrument(level = "debug", skip_all, fields(channel_id = %channel_id, message_id = %message_id))]
    async fn delete_message(&self, channel_id: &ChannelId, message_id: &MessageId) -> Result<()> {
        let url = self.api_url(&format!("/channels/{channel_id}/messages/{message_id}"));
        let resp = self
            .http
            .delete(url)
            .header("Authorization", self.auth_header())
            .send()
            .await?;
        ensure_success(resp, "delete").await?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip_all, fields(guild_id = %guild_id))]
    async fn list_roles(&self, guild_id: &GuildId) -> Result<Vec<GuildRole>> {
        let url = self.api_url(&format!("/guilds/{guild_id}/roles"));
        let resp = self
            .http
            .get(url)
            .header("Authorization", self.auth_header())
            .send()
            .await?;
        let roles: Vec<DiscordRole> = ensure_success(resp, "list roles").await?.json().await?;
        Ok(roles.into_iter().map(GuildRole::from).collect())
    }

    #[tracing::instrument(level = "debug", skip_all, fields(guild_id = %guild_id, name = %name))]
    async fn create_role(&self, guild_id: &GuildId, name: &str, color: u32) -> Result<RoleId> {
        let url = self.api_url(&format!("/guilds/{guild_id}/roles"));
        let resp = self
            .http
            .post(url)
            .header("Authorization", self.auth_header())
            .json(&build_create_role_body(name, color))
            .send()
            .await?;
        let role: DiscordRole = ensure_success(resp, "create role").await?.json().await?;
        Ok(RoleId::new(role.id))
    }

    #[tracing::instrument(level = "debug", skip_all, fields(guild_id = %guild_id, role_id = %role_id))]
    async fn delete_role(&self, guild_id: &GuildId, role_id: &RoleId) -> Result<()> {
        let url = self.api_url(&format!("/guilds/{guild_id}/roles/{role_id}"));
        let resp = self
            .http
            .delete(url)
            .header("Authorization", self.auth_header())
            .header("X-Audit-Log-Reason", "Role out of use")
            .send()
            .await?;
        ensure_success(resp, "delete role").await?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip_all, fields(guild_id = %guild_id, user_id = %user_id, role_id = %role_id))]
    async fn add_member_role(
        &self,
        guild_id: &GuildId,
        user_id: &UserId,
        role_id: &RoleId,
    ) -> Result<()> {
        let url = self.api_url(&format!("/guilds/{guild_id}/members/{user_id}/roles/{role_id}"));
        let resp = self
            .http
            .put(url)
            .header("Authorization", self.auth_header())
            .header("Content-Length", "0")
            .send()
            .await?;
        ensure_success(resp, "add member role").await?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip_all, fields(guild_id = %guild_id, user_id = %user_id, role_id = %role_id))]
    async fn remove_member_role(
        &self,
        guild_id: &GuildId,
        user_id: &UserId,
        role_id: &RoleId,
    ) -> Result<()> {
        let url = self.api_url(&format!("/guilds/{guild_id}/members/{user_id}/roles/{role_id}"));
        let resp = self
            .http
            .delete(url)
            .header("Authorization", self.auth_header())
            .send()
            .await?;
        ensure_success(resp, "remove member role").await?;
        Ok(())
    }
}

async fn ensure_success(resp: reqwest::Response, operation: &str) -> Result<reqwest::Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let text = resp.text().await?;
    Err(anyhow::anyhow!(
        "discord {operation} failed: status={status} body={text}"
    ))
}

impl DiscordAdapter {
    #[tracing::instrument(level = "info", skip_all)]
    async fn run_gateway_loop(&self, tx: mpsc::Sender<InboundMessage>) -> Result<()> {
        let mut attempt: u32 = 0;
        loop {
            let started = Instant::now();
            match self.run_gateway_once(&tx).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    if tx.is_closed() {
                        return Err(e);
                    }
                    if started.elapsed() >= DISCORD_STABLE_SESSION {
                        attempt = 0;
                    }
                    attempt = attempt.saturating_add(1);
                    let delay = transient_retry_delay(attempt);
                    tracing::warn!(
                        %e,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "discord gateway disconnected; reconnecting"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Runs one gateway session. `Ok(())` means the inbound queue closed and the
    /// adapter should stop; every other exit is an error worth reconnecting on.
    async fn run_gateway_once(&self, tx: &mpsc::Sender<InboundMessage>) -> Result<()> {
        let (ws, _) = tokio_tungstenite::connect_async(DISCORD_GATEWAY_URL).await?;
        let (write, mut read) = ws.split();
        let write = Arc::new(Mutex::new(write));

        // HELLO.
        let heartbeat_interval_ms: u64 = if let Some(msg) = read.next().await {
            let msg = msg?;
            let v: serde_json::Value = serde_json::from_str(msg.to_text()?)?;
            v.get("d")
                .and_then(|d| d.get("heartbeat_interval"))
                .and_then(|x| x.as_u64())
                .ok_or_else(|| anyhow::anyhow!("discord HELLO missing heartbeat_interval"))?
        } else {
            return Err(anyhow::anyhow!("discord gateway closed before HELLO"));
        };

        // IDENTIFY.
        let identify = serde_json::json!({
            "op": 2,
            "d": {
                "token": self.auth_header(),
                "intents": self.gateway_intents,
                "properties": { "os": "linux", "browser": "vibecheque", "device": "vibecheque" }
            }
        });
        write
            .lock()
            .await
            .send(Message::Text(identify.to_string().into()))
            .await?;

        let seq: Arc<RwLock<Option<i64>>> = Arc::new(RwLock::new(None));
        let mut bot_user_id: Option<String> = None;

        let heartbeat = {
            let write = write.clone();
            let seq = seq.clone();
            tokio::spawn(async move {
                let mut interval =
                    tokio::time::interval(Duration::from_millis(heartbeat_interval_ms));
                loop {
                    interval.tick().await;
                    let s = *seq.read().await;
                    let payload = serde_json::json!({ "op": 1, "d": s });
                    if write
                        .lock()
                        .await
                        .send(Message::Text(payload.to_string().into()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            })
        };

        let result = async {
            while let Some(msg) = read.next().await {
                let msg = msg?;
                if msg.is_close() {
                    return Err(anyhow::anyhow!("discord gateway sent close frame: {msg}"));
                }
                let txt = msg.to_text()?;
                if txt.is_empty() {
                    continue;
                }
                let v: serde_json::Value = serde_json::from_str(txt)?;

                if let Some(s) = v.get("s").and_then(|s| s.as_i64()) {
                    *seq.write().await = Some(s);
                }

                let op = v
                    .get("op")
                    .and_then(|o| o.as_i64())
                    .ok_or_else(|| anyhow::anyhow!("discord payload missing op"))?;
                match op {
                    // Heartbeat ACK.
                    11 => continue,
                    // Heartbeat request.
                    1 => {
                        let s = *seq.read().await;
                        let payload = serde_json::json!({ "op": 1, "d": s });
                        write
                            .lock()
                            .await
                            .send(Message::Text(payload.to_string().into()))
                            .await?;
                        continue;
                    }
                    7 => return Err(anyhow::anyhow!("discord requested reconnect")),
                    9 => return Err(anyhow::anyhow!("discord invalidated the session")),
                    _ => {}
                }

                match v.get("t").and_then(|t| t.as_str()) {
                    Some("READY") => {
                        bot_user_id = v
                            .get("d")
                            .and_then(|d| d.get("user"))
                            .and_then(|u| u.get("id"))
                            .and_then(|id| id.as_str())
                            .map(|s| s.to_string());
                        tracing::info!(bot_user_id = ?bot_user_id, "discord gateway ready");
                    }
                    Some("MESSAGE_CREATE") => {
                        let event_payload = v.get("d").cloned().ok_or_else(|| {
                            anyhow::anyhow!("discord MESSAGE_CREATE missing payload")
                        })?;
                        let event: DiscordMessageCreate = serde_json::from_value(event_payload)?;
                        let Some(inbound) =
                            build_inbound_message(event, bot_user_id.as_deref())
                        else {
                            continue;
                        };
                        if tx.send(inbound).await.is_err() {
                            tracing::info!("discord inbound queue closed; stopping gateway");
                            return Ok(());
                        }
                    }
                    Some(_) | None => {}
                }
            }
            Err::<(), anyhow::Error>(anyhow::anyhow!(
                "discord gateway stream ended unexpectedly"
            ))
        }
        .await;

        heartbeat.abort();
        result
    }
}

fn transient_retry_delay(attempt: u32) -> Duration {
    let multiplier = 1_u64 << attempt.saturating_sub(1).min(10);
    Duration::from_millis((DISCORD_RETRY_BASE_MS * multiplier).min(DISCORD_RETRY_MAX_MS))
}

fn build_create_message_body(message: &OutboundMessage) -> serde_json::Value {
    let content = truncate_content(&message.content);
    match &message.reply_to_message_id {
        Some(reply_to) => serde_json::json!({
            "content": content,
            "message_reference": {
                "message_id": reply_to.as_str(),
                "fail_if_not_exists": false,
            },
        }),
        None => serde_json::json!({ "content": content }),
    }
}

fn build_create_role_body(name: &str, color: u32) -> serde_json::Value {
    serde_json::json!({
        "name": name,
        "color": color & 0x00FF_FFFF,
        "mentionable": false,
        "hoist": false,
    })
}

fn truncate_content(content: &str) -> String {
    if content.chars().count() <= DISCORD_MAX_CONTENT_CHARS {
        return content.to_string();
    }
    let mut out: String = content
        .chars()
        .take(DISCORD_MAX_CONTENT_CHARS - 1)
        .collect();
    out.push('…');
    out
}

/// Maps a gateway MESSAGE_CREATE to an inbound message. Bot-authored
/// messages (including our own) are dropped.
fn build_inbound_message(
    event: DiscordMessageCreate,
    bot_user_id: Option<&str>,
) -> Option<InboundMessage> {
    if event.author.bot {
        return None;
    }

    let (mentions_bot, tags_bot) = match bot_user_id {
        Some(bot_id) => {
            let tagged = event.content.contains(&format!("<@{bot_id}>"))
                || event.content.contains(&format!("<@!{bot_id}>"));
            let mentioned = tagged || event.mentions.iter().any(|m| m.id == bot_id);
            (mentioned, tagged)
        }
        None => (false, false),
    };

    let referenced = event.referenced_message.map(|r| ReferencedMessage {
        message_id: MessageId::new(r.id),
        author_id: UserId::new(r.author.id),
        author_is_bot: r.author.bot,
        content: r.content,
    });

    Some(InboundMessage {
        message_id: MessageId::new(event.id),
        channel_id: ChannelId::new(event.channel_id),
        is_direct: event.guild_id.is_none(),
        guild_id: event.guild_id.map(GuildId::new),
        author_id: UserId::new(event.author.id),
        author_roles: event
            .member
            .map(|m| m.roles.into_iter().map(RoleId::new).collect())
            .unwrap_or_default(),
        content: event.content,
        mentions_bot,
        tags_bot,
        referenced,
        bot_user_id: bot_user_id.map(UserId::new),
        received_at: Utc::now(),
    })
}

#[derive(Debug, Deserialize)]
struct DiscordChannel {
    id: String,
}

#[derive(Debug, Deserialize)]
struct DiscordRole {
    id: String,
    #[serde(default)]
    name: String,
}

impl From<DiscordRole> for GuildRole {
    fn from(role: DiscordRole) -> Self {
        GuildRole {
            id: RoleId::new(role.id),
            name: role.name,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DiscordMessageCreate {
    id: String,
    channel_id: String,
    #[serde(default)]
    guild_id: Option<String>,
    #[serde(default)]
    content: String,
    author: DiscordAuthor,
    #[serde(default)]
    member: Option<DiscordMember>,
    #[serde(default)]
    mentions: Vec<DiscordAuthor>,
    #[serde(default)]
    referenced_message: Option<DiscordReferencedMessage>,
}

#[derive(Debug, Deserialize)]
struct DiscordReferencedMessage {
    id: String,
    #[serde(default)]
    content: String,
    author: DiscordAuthor,
}

#[derive(Debug, Deserialize)]
struct DiscordMember {
    #[serde(default)]
    roles: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DiscordAuthor {
    id: String,
    #[serde(default)]
    bot: bool,
}
