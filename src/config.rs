//! Persistent dashboard configuration.
//!
//! Stored as JSON in the app data directory. Every field has a default so a
//! partial or missing file still yields a usable configuration; environment
//! variables override the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::snapshot::RecordKind;

/// Payload contract of a remote endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    /// `{recentWinners, totalRaces, totalPrizes, lastUpdated}`.
    RaceSummary,
    /// Array of race wins.
    Winners,
    /// Array of holder entries.
    Holders,
    /// Totals and the last-update marker, no items.
    Stats,
}

impl EndpointKind {
    /// Kind of record this endpoint contributes, if any.
    pub fn record_kind(&self) -> Option<RecordKind> {
        match self {
            EndpointKind::RaceSummary | EndpointKind::Winners => Some(RecordKind::RaceWin),
            EndpointKind::Holders => Some(RecordKind::Holder),
            EndpointKind::Stats => None,
        }
    }
}

impl std::fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndpointKind::RaceSummary => write!(f, "race_summary"),
            EndpointKind::Winners => write!(f, "winners"),
            EndpointKind::Holders => write!(f, "holders"),
            EndpointKind::Stats => write!(f, "stats"),
        }
    }
}

/// One remote resource contributing to the snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Name used in logs and events.
    pub name: String,
    pub kind: EndpointKind,
    /// Path appended to `api_base_url`, or an absolute URL.
    pub path: String,
}

/// Dashboard configuration persisted to disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL the endpoint paths are resolved against.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Endpoints polled on every refresh, in merge order.
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<EndpointConfig>,

    /// Base URL of the holders API used for wallet checks.
    #[serde(default)]
    pub holders_api_url: Option<String>,

    /// Seconds between two scheduled refreshes.
    #[serde(default = "default_update_interval_secs")]
    pub update_interval_secs: u64,

    /// Per-request timeout. `None` keeps the HTTP client default.
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,

    /// Send the header that skips the tunnel provider's browser warning page.
    #[serde(default)]
    pub bypass_tunnel_warning: bool,

    /// Storage key holding the cached snapshot.
    #[serde(default = "default_storage_key")]
    pub storage_key: String,

    /// Directory for the snapshot cache (default: app data directory).
    #[serde(default)]
    pub cache_dir: Option<String>,
}

fn default_api_base_url() -> String {
    "http://localhost:3000".into()
}
fn default_endpoints() -> Vec<EndpointConfig> {
    vec![EndpointConfig {
        name: "races".into(),
        kind: EndpointKind::RaceSummary,
        path: "/api/races".into(),
    }]
}
fn default_update_interval_secs() -> u64 {
    30
}
fn default_storage_key() -> String {
    "derbyPublicData".into()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            endpoints: default_endpoints(),
            holders_api_url: None,
            update_interval_secs: default_update_interval_secs(),
            request_timeout_secs: None,
            bypass_tunnel_warning: false,
            storage_key: default_storage_key(),
            cache_dir: None,
        }
    }
}

/// Get the app data directory.
pub fn app_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("com.derbyscan.app")
}

/// Default location of the config file.
pub fn default_config_path() -> PathBuf {
    app_data_dir().join("config.json")
}

impl Config {
    /// Load config from a JSON file. Returns defaults if the file doesn't exist
    /// or can't be parsed.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file: {} — using defaults", e);
                Self::default()
            }),
            Err(_) => {
                tracing::info!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Save config to a JSON file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!("Config saved to {}", path.display());
        Ok(())
    }

    /// Apply `DERBYSCAN_*` environment overrides.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (environment in production).
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(url) = lookup("DERBYSCAN_API_URL") {
            self.api_base_url = url;
        }
        if let Some(url) = lookup("DERBYSCAN_HOLDERS_API_URL") {
            self.holders_api_url = Some(url);
        }
        if let Some(raw) = lookup("DERBYSCAN_UPDATE_INTERVAL_SECS") {
            self.update_interval_secs = parse_secs("DERBYSCAN_UPDATE_INTERVAL_SECS", &raw)?;
        }
        if let Some(raw) = lookup("DERBYSCAN_REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs =
                Some(parse_secs("DERBYSCAN_REQUEST_TIMEOUT_SECS", &raw)?);
        }
        Ok(self)
    }

    /// Reject configurations the sync manager cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.api_base_url.trim().is_empty() {
            return Err(SyncError::Config("api_base_url is empty".into()));
        }
        if self.endpoints.is_empty() {
            return Err(SyncError::Config("no endpoints configured".into()));
        }
        if self.update_interval_secs == 0 {
            return Err(SyncError::Config(
                "update_interval_secs must be positive".into(),
            ));
        }
        if self.storage_key.trim().is_empty() {
            return Err(SyncError::Config("storage_key is empty".into()));
        }
        Ok(())
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    /// Directory the snapshot cache lives in.
    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(app_data_dir)
    }
}

fn parse_secs(var: &str, raw: &str) -> Result<u64> {
    raw.trim()
        .parse()
        .map_err(|_| SyncError::Config(format!("{} is not a number of seconds: {:?}", var, raw)))
}
