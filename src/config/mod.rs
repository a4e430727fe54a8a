use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use chrono::Duration;
use serde::Deserialize;

use crate::error::{Error, Result};

/// Environment variable consulted when `[github].token` is not set.
pub const GITHUB_TOKEN_ENV: &str = "DECKHAND_GITHUB_TOKEN";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub server: ServerConfig,
    pub github: GitHubConfig,
    pub nats: NatsConfig,
    pub sync: SyncConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            server: ServerConfig::default(),
            github: GitHubConfig::default(),
            nats: NatsConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl Settings {
    /// Reads a TOML file; missing sections and fields fall back to defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let mut settings = Self::from_toml(&raw)?;
        if settings.github.token.is_none() {
            settings.github.token = std::env::var(GITHUB_TOKEN_ENV).ok();
        }
        Ok(settings)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let settings: Self = toml::from_str(raw).map_err(|e| Error::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.sync.timeframe_days == 0 {
            return Err(Error::Config("sync.timeframe_days must be positive".into()));
        }
        if self.nats.ack_wait_secs == 0 {
            return Err(Error::Config("nats.ack_wait_secs must be positive".into()));
        }
        for repo in &self.sync.repositories {
            if repo.split('/').filter(|s| !s.is_empty()).count() != 2 {
                return Err(Error::Config(format!(
                    "sync.repositories entry '{repo}' is not owner/name"
                )));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("deckhand.db")
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> std::result::Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
    pub api_url: String,
    pub token: Option<String>,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.github.com".to_string(),
            token: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    pub url: String,
    pub stream: String,
    pub subject_prefix: String,
    /// Absent means an ephemeral consumer.
    pub durable_name: Option<String>,
    pub ack_wait_secs: u64,
    pub inactive_threshold_minutes: u64,
}

impl NatsConfig {
    #[must_use]
    pub fn ack_wait(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.ack_wait_secs)
    }

    #[must_use]
    pub fn inactive_threshold(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.inactive_threshold_minutes * 60)
    }
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            stream: "github".to_string(),
            subject_prefix: "github".to_string(),
            durable_name: Some("deckhand".to_string()),
            ack_wait_secs: 60,
            inactive_threshold_minutes: 24 * 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub timeframe_days: u32,
    pub cooldown_minutes: u32,
    /// Zero disables the scheduled resync.
    pub interval_minutes: u32,
    pub run_on_startup: bool,
    /// `owner/name` entries; also narrows the event subscription.
    pub repositories: Vec<String>,
}

impl SyncConfig {
    #[must_use]
    pub fn timeframe(&self) -> Duration {
        Duration::days(i64::from(self.timeframe_days))
    }

    #[must_use]
    pub fn cooldown(&self) -> Duration {
        Duration::minutes(i64::from(self.cooldown_minutes))
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            timeframe_days: 7,
            cooldown_minutes: 60,
            interval_minutes: 60,
            run_on_startup: true,
            repositories: Vec::new(),
        }
    }
}
