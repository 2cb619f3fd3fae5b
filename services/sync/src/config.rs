//! Service configuration.
//!
//! Loaded from a YAML file; secrets (store token, solar API credentials)
//! may be overridden from the environment.

use std::path::Path;

use chrono::NaiveDate;
use serde::Deserialize;
use tracing::debug;

use sync_common::{DateCursor, SyncError, SyncResult};

/// Root configuration for the sync service.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    pub store: StoreConfig,
    pub service: ServiceConfig,
}

/// Store connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Scheme + host of the store, e.g. `https://store.example.org`.
    pub domain: String,
    #[serde(default)]
    pub token: String,
}

/// Service behavior settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Seconds between incremental poll cycles.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Whether the incremental poller runs at all.
    #[serde(default = "default_polling")]
    pub polling: bool,

    /// Fixed "current date" used as the fetch end date. Unset means today
    /// (UTC); setting it makes poll windows deterministic for testing and
    /// simulated time.
    #[serde(default)]
    pub current_date: Option<NaiveDate>,

    #[serde(default)]
    pub solar_api_key: String,

    #[serde(default)]
    pub solar_email: String,
}

fn default_poll_interval() -> u64 {
    3600
}

fn default_polling() -> bool {
    true
}

impl SyncConfig {
    /// Load configuration from a YAML file, then apply environment
    /// overrides.
    pub fn load(path: &Path) -> SyncResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SyncError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;

        let mut config: SyncConfig = serde_yaml::from_str(&content).map_err(|e| {
            SyncError::Config(format!("failed to parse {}: {}", path.display(), e))
        })?;
        config.apply_env();

        debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(token) = std::env::var("STORE_TOKEN") {
            self.store.token = token;
        }
        if let Ok(key) = std::env::var("SOLAR_API_KEY") {
            self.service.solar_api_key = key;
        }
        if let Ok(email) = std::env::var("SOLAR_EMAIL") {
            self.service.solar_email = email;
        }
    }

    /// The configured end-date cursor.
    pub fn cursor(&self) -> DateCursor {
        match self.service.current_date {
            Some(date) => DateCursor::Fixed(date),
            None => DateCursor::Today,
        }
    }
}
