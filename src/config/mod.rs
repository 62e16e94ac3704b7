use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Base URL of the hosted auth service, e.g. `https://abc123.supabase.co`
    pub url: Option<String>,
    /// Public (anon) API key sent with every auth request
    pub anon_key: Option<String>,
    /// Project id used in the `sb-<project-id>-auth-token` mirror key.
    /// Derived from the first label of the URL host when unset.
    pub project_id: Option<String>,
    /// Where password recovery emails link back to
    pub redirect_url: Option<String>,
    /// Storage key the auth client persists its own session under
    #[serde(default = "default_session_key")]
    pub session_key: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            url: None,
            anon_key: None,
            project_id: None,
            redirect_url: None,
            session_key: default_session_key(),
        }
    }
}

fn default_session_key() -> String {
    "guadzefie.auth.session".to_string()
}

/// Project id used when neither the config nor the URL provides one
const FALLBACK_PROJECT_ID: &str = "local";

impl AuthConfig {
    pub fn is_configured(&self) -> bool {
        self.url.as_deref().is_some_and(|url| !url.trim().is_empty())
    }

    pub fn project_id(&self) -> String {
        if let Some(id) = self.project_id.as_deref().filter(|id| !id.trim().is_empty()) {
            return id.trim().to_string();
        }

        self.url
            .as_deref()
            .and_then(|url| reqwest::Url::parse(url).ok())
            .and_then(|url| {
                url.host_str()
                    .and_then(|host| host.split('.').next())
                    .map(str::to_string)
            })
            .filter(|label| !label.is_empty())
            .unwrap_or_else(|| FALLBACK_PROJECT_ID.to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    /// Interval between legacy user checks in seconds (default: 5)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Lifetime of a synthesized session in seconds (default: 24h)
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: i64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            session_ttl_secs: default_session_ttl(),
        }
    }
}

/// Longest accepted poll interval (1 day)
pub const MAX_POLL_INTERVAL_SECS: u64 = 24 * 60 * 60;

/// Longest accepted synthetic session lifetime (10 years)
pub const MAX_SESSION_TTL_SECS: i64 = 10 * 365 * 24 * 60 * 60;

fn default_poll_interval() -> u64 {
    5
}

fn default_session_ttl() -> i64 {
    24 * 60 * 60
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// JSON file backing durable storage
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("./data/storage.json")
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            info!("Loading configuration from {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| "Failed to parse configuration file")?;
            Ok(config)
        } else {
            info!("No config file found, using defaults");
            Ok(Config::default())
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.bridge.poll_interval_secs == 0
            || self.bridge.poll_interval_secs > MAX_POLL_INTERVAL_SECS
        {
            bail!(
                "bridge.poll_interval_secs must be between 1 and {}",
                MAX_POLL_INTERVAL_SECS
            );
        }

        if self.bridge.session_ttl_secs <= 0 || self.bridge.session_ttl_secs > MAX_SESSION_TTL_SECS {
            bail!(
                "bridge.session_ttl_secs must be between 1 and {}",
                MAX_SESSION_TTL_SECS
            );
        }

        if self.auth.session_key.trim().is_empty() {
            bail!("auth.session_key cannot be empty");
        }

        if let Some(url) = self.auth.url.as_deref().filter(|url| !url.trim().is_empty()) {
            reqwest::Url::parse(url).with_context(|| format!("Invalid auth.url: {}", url))?;

            if self.auth.anon_key.as_deref().map_or(true, |key| key.trim().is_empty()) {
                bail!("auth.anon_key is required when auth.url is set");
            }
        }

        Ok(())
    }
}
