//! User configuration at `~/.dashsync/config.json`.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::DashError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Background revalidation interval for synced collections.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// IANA name of the timezone the server reads offset-less timestamps in.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_base_url() -> String {
    "http://localhost:8000/dashboard".to_string()
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            poll_interval_secs: default_poll_interval_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            timezone: default_timezone(),
        }
    }
}

impl SyncConfig {
    pub fn tz(&self) -> Result<Tz, DashError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| DashError::ConfigurationError(format!("unknown timezone {}: {}", self.timezone, e)))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

/// Canonical config file path (~/.dashsync/config.json)
pub fn config_path() -> Result<PathBuf, DashError> {
    let home = dirs::home_dir()
        .ok_or_else(|| DashError::ConfigurationError("Could not find home directory".to_string()))?;
    Ok(home.join(".dashsync").join("config.json"))
}

/// Load the user config, falling back to defaults when none has been saved.
pub fn load_config() -> Result<SyncConfig, DashError> {
    load_config_from(&config_path()?)
}

pub fn load_config_from(path: &Path) -> Result<SyncConfig, DashError> {
    if !path.exists() {
        log::debug!("Config: {} not found, using defaults", path.display());
        return Ok(SyncConfig::default());
    }
    let content = fs::read_to_string(path)?;
    let config: SyncConfig = serde_json::from_str(&content)?;
    config.tz()?;
    Ok(config)
}

pub fn save_config(config: &SyncConfig) -> Result<(), DashError> {
    save_config_to(&config_path()?, config)
}

/// Write `config` atomically, creating the parent directory if needed.
pub fn save_config_to(path: &Path, config: &SyncConfig) -> Result<(), DashError> {
    let parent = path
        .parent()
        .ok_or_else(|| DashError::ConfigurationError(format!("no parent directory for {}", path.display())))?;
    fs::create_dir_all(parent)?;

    let content = serde_json::to_string_pretty(config)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(content.as_bytes())?;
    tmp.persist(path).map_err(|e| DashError::Io(e.to_string()))?;
    log::info!("Config: saved to {}", path.display());
    Ok(())
}
