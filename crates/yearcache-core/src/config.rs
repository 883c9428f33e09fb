//! Application configuration management.
//!
//! Configuration is stored at `~/.config/yearcache/config.json`. Missing
//! fields fall back to defaults, and a few environment variables override
//! the file:
//!
//! - `YEARCACHE_DATA_URL`: base URL of the direct `/dapi` endpoint
//! - `YEARCACHE_HUB_URL`: base URL the hub fetches from
//! - `YEARCACHE_TIMEOUT_SECS`: HTTP request timeout

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::hub::coordinator::{DEFAULT_CHANNEL_BUFFER_SIZE, DEFAULT_SWEEP_INTERVAL_SECS};
use crate::hub::HubOptions;
use crate::provider::client::DEFAULT_REQUEST_TIMEOUT_SECS;

/// Application name used for config directory paths
const APP_NAME: &str = "yearcache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const ENV_DATA_URL: &str = "YEARCACHE_DATA_URL";
const ENV_HUB_URL: &str = "YEARCACHE_HUB_URL";
const ENV_TIMEOUT_SECS: &str = "YEARCACHE_TIMEOUT_SECS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Origin serving `/dapi` for direct per-context fetches.
    pub data_base_url: String,
    /// Origin the hub fetches `{status, data}` envelopes from.
    pub hub_upstream_url: String,
    pub request_timeout_secs: u64,
    /// Refetch the current year after this many minutes; None never refetches.
    pub current_year_stale_minutes: Option<i64>,
    pub channel_buffer_size: usize,
    pub sweep_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_base_url: "http://localhost:8080".to_string(),
            hub_upstream_url: "http://localhost:8081".to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            current_year_stale_minutes: Some(60),
            channel_buffer_size: DEFAULT_CHANNEL_BUFFER_SIZE,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
        }
    }
}

impl Config {
    /// Load from the default path, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_env_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = lookup(ENV_DATA_URL) {
            self.data_base_url = url;
        }
        if let Some(url) = lookup(ENV_HUB_URL) {
            self.hub_upstream_url = url;
        }
        if let Some(secs) = lookup(ENV_TIMEOUT_SECS) {
            self.request_timeout_secs = secs
                .trim()
                .parse()
                .with_context(|| format!("{} must be a number of seconds, got {:?}", ENV_TIMEOUT_SECS, secs))?;
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn hub_options(&self) -> HubOptions {
        HubOptions {
            channel_buffer_size: self.channel_buffer_size,
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
        }
    }
}
