//! vibecheque configuration loader.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use vibe_channels::RoleId;
use vibe_clarify::EngineSettings;

#[derive(Debug, Clone, Deserialize)]
pub struct VibeConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub keys: KeysConfig,
    #[serde(default)]
    pub discord: DiscordConfig,
    #[serde(default)]
    pub clarification: ClarificationConfig,
    #[serde(default)]
    pub moods: MoodsConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_model")]
    pub model: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
        }
    }
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct KeysConfig {
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiscordConfig {
    #[serde(default)]
    pub bot_token: String,
    /// Role id required to run `!toggle`; anyone may toggle when unset.
    #[serde(default)]
    pub toggle_role: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClarificationConfig {
    #[serde(default = "default_reply_timeout_seconds")]
    pub reply_timeout_seconds: u64,
    #[serde(default = "default_fallback_tone")]
    pub fallback_tone: String,
    #[serde(default = "default_true")]
    pub acknowledge_clarifier: bool,
}

impl Default for ClarificationConfig {
    fn default() -> Self {
        Self {
            reply_timeout_seconds: default_reply_timeout_seconds(),
            fallback_tone: default_fallback_tone(),
            acknowledge_clarifier: true,
        }
    }
}

fn default_reply_timeout_seconds() -> u64 {
    60
}

fn default_fallback_tone() -> String {
    "Neutral".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct MoodsConfig {
    /// An unworn mood role is kept at least this long after its last use.
    #[serde(default = "default_min_lifespan_seconds")]
    pub min_lifespan_seconds: u64,
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
}

impl Default for MoodsConfig {
    fn default() -> Self {
        Self {
            min_lifespan_seconds: default_min_lifespan_seconds(),
            sweep_interval_seconds: default_sweep_interval_seconds(),
        }
    }
}

fn default_min_lifespan_seconds() -> u64 {
    180
}

fn default_sweep_interval_seconds() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_http_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_http_max_in_flight")]
    pub max_in_flight: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_addr: default_bind_addr(),
            timeout_seconds: default_http_timeout_seconds(),
            max_in_flight: default_http_max_in_flight(),
        }
    }
}

fn default_bind_addr() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_http_timeout_seconds() -> u64 {
    30
}

fn default_http_max_in_flight() -> usize {
    64
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    /// Defaults to `~/.vibecheque/data`.
    #[serde(default)]
    pub data_dir: Option<String>,
}

impl VibeConfig {
    pub async fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        Ok(Self::load_with_path(path).await?.0)
    }

    pub async fn load_with_path(path: Option<PathBuf>) -> anyhow::Result<(Self, PathBuf)> {
        let path = path.unwrap_or_else(default_config_path);
        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| anyhow::anyhow!("read config {}: {e}", path.display()))?;

        let mut cfg = Self::parse(&contents)
            .map_err(|e| anyhow::anyhow!("parse config {}: {e}", path.display()))?;
        cfg.apply_overrides(|name| std::env::var(name).ok());
        cfg.validate()?;
        Ok((cfg, path))
    }

    fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Non-empty values from `lookup` win over the file.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        if let Some(v) = get("VIBECHEQUE_MODEL") {
            self.general.model = v;
        }
        if let Some(v) = get("OPENAI_API_KEY") {
            self.keys.openai_api_key = Some(v);
        }
        if let Some(v) = get("ANTHROPIC_API_KEY") {
            self.keys.anthropic_api_key = Some(v);
        }
        if let Some(v) = get("DISCORD_TOKEN") {
            self.discord.bot_token = v;
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.general.model.trim().is_empty() {
            return Err(anyhow::anyhow!("general.model is required"));
        }
        if self.clarification.reply_timeout_seconds == 0 {
            return Err(anyhow::anyhow!(
                "clarification.reply_timeout_seconds must be > 0"
            ));
        }
        if self.clarification.fallback_tone.trim().is_empty() {
            return Err(anyhow::anyhow!("clarification.fallback_tone must not be empty"));
        }
        if self.moods.sweep_interval_seconds == 0 {
            return Err(anyhow::anyhow!("moods.sweep_interval_seconds must be > 0"));
        }
        if self.http.enabled {
            self.http_bind_addr()?;
            if self.http.timeout_seconds == 0 || self.http.max_in_flight == 0 {
                return Err(anyhow::anyhow!(
                    "http.timeout_seconds and http.max_in_flight must be > 0"
                ));
            }
        }
        Ok(())
    }

    pub fn http_bind_addr(&self) -> anyhow::Result<SocketAddr> {
        self.http
            .bind_addr
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid http.bind_addr {:?}: {e}", self.http.bind_addr))
    }

    pub fn api_key_for_model(&self) -> Option<String> {
        let model = self.general.model.to_ascii_lowercase();
        if model.starts_with("claude-") {
            return self
                .keys
                .anthropic_api_key
                .clone()
                .filter(|s| !s.is_empty());
        }
        self.keys.openai_api_key.clone().filter(|s| !s.is_empty())
    }

    pub fn require_api_key(&self) -> anyhow::Result<String> {
        self.api_key_for_model().ok_or_else(|| {
            anyhow::anyhow!("no API key configured for model {}", self.general.model)
        })
    }

    pub fn require_discord_token(&self) -> anyhow::Result<&str> {
        let token = self.discord.bot_token.trim();
        if token.is_empty() {
            return Err(anyhow::anyhow!(
                "discord.bot_token is required (or set DISCORD_TOKEN)"
            ));
        }
        Ok(token)
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            reply_timeout: Duration::from_secs(self.clarification.reply_timeout_seconds),
            fallback_tone: self.clarification.fallback_tone.clone(),
            acknowledge_clarifier: self.clarification.acknowledge_clarifier,
        }
    }

    pub fn toggle_role(&self) -> Option<RoleId> {
        self.discord
            .toggle_role
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(RoleId::new)
    }

    pub fn mood_lifespan(&self) -> Duration {
        Duration::from_secs(self.moods.min_lifespan_seconds)
    }

    pub fn mood_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.moods.sweep_interval_seconds)
    }

    pub fn data_dir_path(&self) -> anyhow::Result<PathBuf> {
        match self.storage.data_dir.as_deref() {
            Some(dir) if !dir.trim().is_empty() => expand_home(dir),
            _ => Ok(default_data_dir()),
        }
    }

    pub fn server_settings_path(&self) -> anyhow::Result<PathBuf> {
        Ok(self.data_dir_path()?.join("server-settings.json"))
    }

    pub fn moods_path(&self) -> anyhow::Result<PathBuf> {
        Ok(self.data_dir_path()?.join("moods.json"))
    }
}

pub fn default_config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".vibecheque").join("config.toml")
}

pub fn default_data_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".vibecheque").join("data")
}

fn expand_home(path: &str) -> anyhow::Result<PathBuf> {
    let trimmed = path.trim();
    let Some(rest) = trimmed.strip_prefix("~/") else {
        return Ok(PathBuf::from(trimmed));
    };
    let home = std::env::var("HOME").map_err(|_| anyhow::anyhow!("HOME is not set"))?;
    Ok(Path::new(&home).join(rest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_file_takes_defaults() {
        let cfg = VibeConfig::parse("").expect("parse");
        assert_eq!(cfg.general.model, "gpt-4o-mini");
        assert_eq!(cfg.clarification.reply_timeout_seconds, 60);
        assert_eq!(cfg.clarification.fallback_tone, "Neutral");
        assert!(cfg.clarification.acknowledge_clarifier);
        assert!(cfg.http.enabled);
        assert_eq!(cfg.mood_lifespan(), Duration::from_secs(180));
        assert_eq!(cfg.toggle_role(), None);
        assert!(cfg.validate().is_ok());

        let settings = cfg.engine_settings();
        assert_eq!(settings.reply_timeout, Duration::from_secs(60));
    }

    #[test]
    fn file_values_are_read() {
        let cfg = VibeConfig::parse(
            r#"
            [general]
            model = "claude-3-5-haiku-latest"

            [keys]
            anthropic_api_key = "sk-ant"

            [discord]
            bot_token = "abc"
            toggle_role = "555"

            [moods]
            min_lifespan_seconds = 30

            [clarification]
            reply_timeout_seconds = 120
            fallback_tone = "Unclear"
            acknowledge_clarifier = false

            [http]
            enabled = false

            [storage]
            data_dir = "/var/lib/vibecheque"
            "#,
        )
        .expect("parse");
        assert_eq!(cfg.api_key_for_model().as_deref(), Some("sk-ant"));
        assert_eq!(cfg.require_discord_token().ok(), Some("abc"));
        assert_eq!(cfg.clarification.reply_timeout_seconds, 120);
        assert!(!cfg.engine_settings().acknowledge_clarifier);
        assert!(!cfg.http.enabled);
        assert_eq!(cfg.toggle_role(), Some(RoleId::new("555")));
        assert_eq!(cfg.mood_lifespan(), Duration::from_secs(30));
        assert_eq!(
            cfg.server_settings_path().ok(),
            Some(PathBuf::from("/var/lib/vibecheque/server-settings.json"))
        );
        assert_eq!(
            cfg.moods_path().ok(),
            Some(PathBuf::from("/var/lib/vibecheque/moods.json"))
        );
    }

    #[test]
    fn env_overrides_win_when_non_empty() {
        let mut cfg = VibeConfig::parse("[discord]\nbot_token = \"from-file\"").expect("parse");
        let env: HashMap<&str, &str> = HashMap::from([
            ("VIBECHEQUE_MODEL", "gpt-4o"),
            ("OPENAI_API_KEY", "sk-openai"),
            ("DISCORD_TOKEN", "  "),
        ]);
        cfg.apply_overrides(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(cfg.general.model, "gpt-4o");
        assert_eq!(cfg.api_key_for_model().as_deref(), Some("sk-openai"));
        assert_eq!(cfg.discord.bot_token, "from-file");
    }

    #[test]
    fn validation_rejects_bad_values() {
        let bad = [
            "[general]\nmodel = \" \"",
            "[clarification]\nreply_timeout_seconds = 0",
            "[clarification]\nfallback_tone = \"\"",
            "[http]\nbind_addr = \"not-an-addr\"",
            "[moods]\nsweep_interval_seconds = 0",
        ];
        for contents in bad {
            let cfg = VibeConfig::parse(contents).expect("parse");
            assert!(cfg.validate().is_err(), "{contents} should be rejected");
        }

        let cfg = VibeConfig::parse("[http]\nenabled = false\nbind_addr = \"nope\"").expect("parse");
        assert!(cfg.validate().is_ok(), "bind address is unused when http is off");
    }

    #[test]
    fn missing_credentials_are_reported() {
        let cfg = VibeConfig::parse("").expect("parse");
        assert!(cfg.require_api_key().is_err());
        assert!(cfg.require_discord_token().is_err());
    }
}
