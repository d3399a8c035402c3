use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Path of the config file unless `CALMIRROR_CONFIG` overrides it.
const DEFAULT_CONFIG_PATH: &str = "calmirror.toml";

#[derive(Debug, Deserialize)]
pub struct Config {
    /// Address the HTTP server binds to.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// SQLite database file.
    #[serde(default = "default_database")]
    pub database: PathBuf,

    pub google: GoogleSection,

    #[serde(default)]
    pub sync: SyncSection,
}

/// OAuth credentials and the publicly reachable webhook callback URL.
#[derive(Debug, Deserialize)]
pub struct GoogleSection {
    pub client_id: String,
    pub client_secret: String,
    /// Where Google delivers push notifications. Must be HTTPS and
    /// reachable from the public internet.
    pub callback_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SyncSection {
    /// Periodic full-sync interval, in seconds.
    pub interval_secs: u64,
    /// How often the channel renewal sweep runs, in seconds. Channels
    /// expiring within one sweep interval are renewed.
    pub renewal_interval_secs: u64,
    /// Lifetime requested for webhook channels, in seconds.
    pub channel_ttl_secs: u64,
    /// Bound on every Google API call, in seconds.
    pub remote_timeout_secs: u64,
    /// Cross-user concurrency bound for reconciliation runs.
    pub max_concurrent_syncs: usize,
}

impl Default for SyncSection {
    fn default() -> Self {
        SyncSection {
            interval_secs: 15 * 60,
            renewal_interval_secs: 60 * 60,
            channel_ttl_secs: 24 * 60 * 60,
            remote_timeout_secs: 10,
            max_concurrent_syncs: 4,
        }
    }
}

impl SyncSection {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn renewal_interval(&self) -> Duration {
        Duration::from_secs(self.renewal_interval_secs)
    }

    pub fn channel_ttl(&self) -> Duration {
        Duration::from_secs(self.channel_ttl_secs)
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout_secs)
    }
}

fn default_listen() -> SocketAddr {
    ([127, 0, 0, 1], 4280).into()
}

fn default_database() -> PathBuf {
    PathBuf::from("calmirror.db")
}

/// Resolve the config file path from the environment.
pub fn config_path() -> PathBuf {
    std::env::var_os("CALMIRROR_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Load and parse the config file.
pub fn load(path: &Path) -> Result<Config> {
    if !path.exists() {
        anyhow::bail!(
            "Config file not found at {}\n\n\
            Create it with your Google OAuth credentials:\n\n\
            [google]\n\
            client_id = \"your-client-id.apps.googleusercontent.com\"\n\
            client_secret = \"your-client-secret\"\n\
            callback_url = \"https://your-host/api/webhook/calendar\"",
            path.display()
        );
    }

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;

    let config: Config = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;

    Ok(config)
}
