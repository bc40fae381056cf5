//! Per-server enable flag, backed by a JSON file.

use crate::state_file;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use vibe_channels::{GuildId, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerSetting {
    pub is_enabled: bool,
    pub last_toggled: Option<DateTime<Utc>>,
    pub toggled_by: Option<UserId>,
}

impl Default for ServerSetting {
    fn default() -> Self {
        Self {
            is_enabled: true,
            last_toggled: None,
            toggled_by: None,
        }
    }
}

pub struct ServerSettings {
    path: PathBuf,
    states: DashMap<GuildId, ServerSetting>,
    write_lock: tokio::sync::Mutex<()>,
}

impl ServerSettings {
    /// A missing or unreadable file starts every server enabled.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let saved: BTreeMap<GuildId, ServerSetting> = state_file::load_json(&path).await;
        let states = DashMap::new();
        for (guild_id, setting) in saved {
            states.insert(guild_id, setting);
        }
        Self {
            path,
            states,
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_enabled(&self, guild_id: &GuildId) -> bool {
        self.states
            .get(guild_id)
            .map(|s| s.is_enabled)
            .unwrap_or(true)
    }

    /// Flip the flag in memory, then persist. A failed write is logged; the
    /// in-memory state still applies for this process.
    #[tracing::instrument(level = "info", skip_all, fields(guild_id = %guild_id, toggled_by = %toggled_by))]
    pub async fn toggle(&self, guild_id: &GuildId, toggled_by: &UserId) -> ServerSetting {
        let updated = {
            let mut entry = self.states.entry(guild_id.clone()).or_default();
            let is_enabled = !entry.is_enabled;
            *entry = ServerSetting {
                is_enabled,
                last_toggled: Some(Utc::now()),
                toggled_by: Some(toggled_by.clone()),
            };
            entry.clone()
        };
        tracing::info!(is_enabled = updated.is_enabled, "server setting toggled");
        if let Err(e) = self.save().await {
            tracing::warn!(%e, path = %self.path.display(), "could not persist server settings");
        }
        updated
    }

    async fn save(&self) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        let snapshot: BTreeMap<GuildId, ServerSetting> = self
            .states
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        state_file::save_json(&self.path, &snapshot).await
    }
}
