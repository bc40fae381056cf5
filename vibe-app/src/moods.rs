//! Mood roles: which server roles the bot created for moods, and who wears
//! which one. Backed by a JSON file.

use crate::state_file;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use vibe_channels::{ChannelAdapter, GuildId, RoleId, UserId};

/// Discord's limit on role names.
pub const MAX_MOOD_NAME_CHARS: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoodRole {
    pub role_id: RoleId,
    /// Last time the role was handed out or given up.
    pub touched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberMood {
    pub role_id: RoleId,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GuildMoods {
    /// Keyed by role name.
    #[serde(default)]
    roles: BTreeMap<String, MoodRole>,
    #[serde(default)]
    members: BTreeMap<UserId, MemberMood>,
}

impl GuildMoods {
    fn holders(&self, role_id: &RoleId) -> usize {
        self.members.values().filter(|m| &m.role_id == role_id).count()
    }
}

/// A mood role nobody has worn for at least the minimum lifespan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleMood {
    pub guild_id: GuildId,
    pub name: String,
    pub role: MoodRole,
}

pub struct MoodStore {
    path: PathBuf,
    guilds: DashMap<GuildId, GuildMoods>,
    write_lock: tokio::sync::Mutex<()>,
}

impl MoodStore {
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let saved: BTreeMap<GuildId, GuildMoods> = state_file::load_json(&path).await;
        let guilds = DashMap::new();
        for (guild_id, moods) in saved {
            guilds.insert(guild_id, moods);
        }
        Self {
            path,
            guilds,
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The role id if `name` is a mood role this bot created.
    pub fn mood_role(&self, guild_id: &GuildId, name: &str) -> Option<RoleId> {
        self.guilds
            .get(guild_id)
            .and_then(|g| g.roles.get(name).map(|r| r.role_id.clone()))
    }

    pub fn current_mood(&self, guild_id: &GuildId, user_id: &UserId) -> Option<RoleId> {
        self.guilds
            .get(guild_id)
            .and_then(|g| g.members.get(user_id).map(|m| m.role_id.clone()))
    }

    /// Record that `user_id` now wears mood `name`. Returns the role they wore
    /// before, if any.
    #[tracing::instrument(level = "info", skip_all, fields(guild_id = %guild_id, user_id = %user_id, mood = %name))]
    pub async fn record_mood(
        &self,
        guild_id: &GuildId,
        user_id: &UserId,
        name: &str,
        role_id: RoleId,
    ) -> Option<RoleId> {
        let now = Utc::now();
        let previous = {
            let mut guild = self.guilds.entry(guild_id.clone()).or_default();
            let previous = guild.members.insert(
                user_id.clone(),
                MemberMood {
                    role_id: role_id.clone(),
                    updated_at: now,
                },
            );
            if let Some(old) = previous.as_ref().filter(|old| old.role_id != role_id) {
                for role in guild.roles.values_mut() {
                    if role.role_id == old.role_id {
                        role.touched_at = now;
                    }
                }
            }
            guild.roles.insert(
                name.to_string(),
                MoodRole {
                    role_id,
                    touched_at: now,
                },
            );
            previous.map(|m| m.role_id)
        };
        self.persist().await;
        previous
    }

    /// Remove and return every mood role with no wearers whose last use is at
    /// least `lifespan` before `now`.
    pub async fn take_unused(&self, now: DateTime<Utc>, lifespan: Duration) -> Vec<StaleMood> {
        let mut stale = Vec::new();
        for mut guild in self.guilds.iter_mut() {
            let guild_id = guild.key().clone();
            let unused: Vec<String> = guild
                .roles
                .iter()
                .filter(|(_, role)| guild.holders(&role.role_id) == 0)
                .filter(|(_, role)| aged_past(role.touched_at, now, lifespan))
                .map(|(name, _)| name.clone())
                .collect();
            for name in unused {
                if let Some(role) = guild.roles.remove(&name) {
                    stale.push(StaleMood {
                        guild_id: guild_id.clone(),
                        name,
                        role,
                    });
                }
            }
        }
        if !stale.is_empty() {
            self.persist().await;
        }
        stale
    }

    /// Put back a role whose deletion failed, unless the name was reused.
    pub async fn restore(&self, stale: StaleMood) {
        {
            let mut guild = self.guilds.entry(stale.guild_id).or_default();
            guild.roles.entry(stale.name).or_insert(stale.role);
        }
        self.persist().await;
    }

    async fn persist(&self) {
        if let Err(e) = self.save().await {
            tracing::warn!(%e, path = %self.path.display(), "could not persist moods");
        }
    }

    async fn save(&self) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        let snapshot: BTreeMap<GuildId, GuildMoods> = self
            .guilds
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        state_file::save_json(&self.path, &snapshot).await
    }
}

fn aged_past(since: DateTime<Utc>, now: DateTime<Utc>, lifespan: Duration) -> bool {
    (now - since).to_std().is_ok_and(|age| age >= lifespan)
}

/// Delete unused mood roles from the platform. Returns how many went away.
#[tracing::instrument(level = "debug", skip_all)]
pub async fn sweep_unused(adapter: &dyn ChannelAdapter, store: &MoodStore, lifespan: Duration) -> usize {
    let mut removed = 0;
    for stale in store.take_unused(Utc::now(), lifespan).await {
        match adapter.delete_role(&stale.guild_id, &stale.role.role_id).await {
            Ok(()) => {
                tracing::info!(guild_id = %stale.guild_id, role_id = %stale.role.role_id, mood = %stale.name, "removed unused mood role");
                removed += 1;
            }
            Err(e) => {
                tracing::warn!(%e, guild_id = %stale.guild_id, role_id = %stale.role.role_id, "could not remove mood role");
                store.restore(stale).await;
            }
        }
    }
    removed
}

pub fn spawn_sweeper(
    adapter: Arc<dyn ChannelAdapter>,
    store: Arc<MoodStore>,
    lifespan: Duration,
    every: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = interval.tick() => {}
            }
            let removed = sweep_unused(adapter.as_ref(), &store, lifespan).await;
            if removed > 0 {
                tracing::debug!(removed, "mood sweep finished");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::sync::mpsc;
    use vibe_channels::{ChannelId, InboundMessage, OutboundMessage};

    const LIFESPAN: Duration = Duration::from_secs(180);

    fn g() -> GuildId {
        GuildId::new("g1")
    }

    async fn store(dir: &tempfile::TempDir) -> MoodStore {
        MoodStore::load(dir.path().join("moods.json")).await
    }

    struct RoleDeleter {
        deleted: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl ChannelAdapter for RoleDeleter {
        fn channel_id(&self) -> &str {
            "test"
        }

        async fn start(&self, _tx: mpsc::Sender<InboundMessage>) -> Result<()> {
            Ok(())
        }

        async fn send(&self, _channel_id: &ChannelId, _message: OutboundMessage) -> Result<()> {
            Ok(())
        }

        async fn open_direct(&self, user_id: &UserId) -> Result<ChannelId> {
            Ok(ChannelId::new(format!("dm-{user_id}")))
        }

        async fn delete_role(&self, _guild_id: &GuildId, role_id: &RoleId) -> Result<()> {
            if self.fail {
                anyhow::bail!("missing permissions");
            }
            self.deleted.lock().unwrap().push(role_id.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn switching_moods_reports_the_previous_role() {
        let dir = tempfile::tempdir().expect("tempdir");
        let moods = store(&dir).await;
        let alice = UserId::new("alice");

        assert_eq!(moods.record_mood(&g(), &alice, "Sleepy", RoleId::new("r1")).await, None);
        assert_eq!(moods.mood_role(&g(), "Sleepy"), Some(RoleId::new("r1")));
        assert_eq!(moods.current_mood(&g(), &alice), Some(RoleId::new("r1")));

        let previous = moods.record_mood(&g(), &alice, "Hyped", RoleId::new("r2")).await;
        assert_eq!(previous, Some(RoleId::new("r1")));
        assert_eq!(moods.current_mood(&g(), &alice), Some(RoleId::new("r2")));
        assert_eq!(moods.mood_role(&GuildId::new("g2"), "Hyped"), None);

        let reloaded = store(&dir).await;
        assert_eq!(reloaded.current_mood(&g(), &alice), Some(RoleId::new("r2")));
        assert_eq!(reloaded.mood_role(&g(), "Sleepy"), Some(RoleId::new("r1")));
    }

    #[tokio::test]
    async fn only_unworn_roles_past_their_lifespan_are_taken() {
        let dir = tempfile::tempdir().expect("tempdir");
        let moods = store(&dir).await;
        moods.record_mood(&g(), &UserId::new("alice"), "Sleepy", RoleId::new("r1")).await;
        moods.record_mood(&g(), &UserId::new("alice"), "Hyped", RoleId::new("r2")).await;

        let soon = Utc::now() + chrono::Duration::seconds(10);
        assert!(moods.take_unused(soon, LIFESPAN).await.is_empty(), "too young to remove");

        let later = Utc::now() + chrono::Duration::seconds(600);
        let stale = moods.take_unused(later, LIFESPAN).await;
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].name, "Sleepy");
        assert_eq!(moods.mood_role(&g(), "Sleepy"), None);
        assert_eq!(moods.mood_role(&g(), "Hyped"), Some(RoleId::new("r2")), "still worn");
    }

    #[tokio::test]
    async fn sweep_deletes_roles_and_keeps_failures_for_later() {
        let dir = tempfile::tempdir().expect("tempdir");
        let moods = store(&dir).await;
        moods.record_mood(&g(), &UserId::new("alice"), "Sleepy", RoleId::new("r1")).await;
        moods.record_mood(&g(), &UserId::new("alice"), "Hyped", RoleId::new("r2")).await;

        let failing = RoleDeleter {
            deleted: Mutex::new(Vec::new()),
            fail: true,
        };
        assert_eq!(sweep_unused(&failing, &moods, Duration::ZERO).await, 0);
        assert_eq!(moods.mood_role(&g(), "Sleepy"), Some(RoleId::new("r1")));

        let working = RoleDeleter {
            deleted: Mutex::new(Vec::new()),
            fail: false,
        };
        assert_eq!(sweep_unused(&working, &moods, Duration::ZERO).await, 1);
        assert_eq!(working.deleted.lock().unwrap().clone(), vec!["r1".to_string()]);
        assert_eq!(moods.mood_role(&g(), "Sleepy"), None);
    }
}
