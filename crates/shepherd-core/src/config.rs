//! Application configuration.
//!
//! Stored at `<config_dir>/shepherd/config.json`. Environment variables
//! (`SHEPHERD_*`, optionally from a `.env` file loaded by the binary) take
//! precedence over the file.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::broadcast::{BroadcastOptions, DEFAULT_BATCH_DELAY_MS, DEFAULT_BATCH_SIZE};

/// Application name used for config/cache directory paths
pub const APP_NAME: &str = "shepherd";

const CONFIG_FILE: &str = "config.json";

pub const ENV_PROJECT_ID: &str = "SHEPHERD_PROJECT_ID";
pub const ENV_FUNCTIONS_URL: &str = "SHEPHERD_FUNCTIONS_URL";
pub const ENV_MAPS_API_KEY: &str = "SHEPHERD_MAPS_API_KEY";
pub const ENV_ACCESS_TOKEN: &str = "SHEPHERD_ACCESS_TOKEN";
pub const ENV_CACHE_PASSPHRASE: &str = "SHEPHERD_CACHE_PASSPHRASE";

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Firebase project holding the church database
    pub project_id: Option<String>,
    /// Base URL of the deployed cloud functions (payments)
    pub functions_url: Option<String>,
    pub maps_api_key: Option<String>,
    /// Override for the Firestore REST root (emulator)
    pub firestore_base_url: Option<String>,
    pub org_name: Option<String>,
    pub email_from_name: Option<String>,
    pub email_from_address: Option<String>,
    pub broadcast_batch_size: Option<usize>,
    pub broadcast_delay_ms: Option<u64>,
    pub last_user: Option<String>,
}

impl Config {
    /// Load from disk and apply environment overrides
    pub fn load() -> Result<Self> {
        let mut config = Self::load_file()?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn load_file() -> Result<Self> {
        let path = Self::config_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(&path).context("Failed to read config file")?;
        serde_json::from_str(&contents).context("Failed to parse config file")
    }

    /// Persist the file-backed settings. Environment overrides are not
    /// written back.
    pub fn save(&self) -> Result<()> {
        let mut on_disk = Self::load_file()?;
        on_disk.last_user = self.last_user.clone();
        on_disk.project_id = on_disk.project_id.or_else(|| self.project_id.clone());

        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&on_disk)?)?;
        Ok(())
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| var(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = get(ENV_PROJECT_ID) {
            self.project_id = Some(v);
        }
        if let Some(v) = get(ENV_FUNCTIONS_URL) {
            self.functions_url = Some(v);
        }
        if let Some(v) = get(ENV_MAPS_API_KEY) {
            self.maps_api_key = Some(v);
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("Could not find config directory")?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir().context("Could not find cache directory")?;
        let mut path = cache_dir.join(APP_NAME);
        if let Some(ref project) = self.project_id {
            path = path.join(project);
        }
        Ok(path)
    }

    pub fn require_project_id(&self) -> Result<&str> {
        self.project_id
            .as_deref()
            .with_context(|| format!("No project configured; set {} or project_id in config.json", ENV_PROJECT_ID))
    }

    pub fn broadcast_options(&self) -> BroadcastOptions {
        BroadcastOptions {
            batch_size: self.broadcast_batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
            batch_delay: Duration::from_millis(self.broadcast_delay_ms.unwrap_or(DEFAULT_BATCH_DELAY_MS)),
        }
    }

    pub fn org_name(&self) -> &str {
        self.org_name.as_deref().unwrap_or("Shepherd")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_env_overrides_file_values() {
        let mut config = Config {
            project_id: Some("from-file".into()),
            maps_api_key: Some("file-key".into()),
            ..Default::default()
        };
        let env: HashMap<&str, &str> = [(ENV_PROJECT_ID, "from-env"), (ENV_MAPS_API_KEY, " ")].into();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.project_id.as_deref(), Some("from-env"));
        // Blank values do not override
        assert_eq!(config.maps_api_key.as_deref(), Some("file-key"));
        assert_eq!(config.functions_url, None);
    }

    #[test]
    fn test_broadcast_options_defaults() {
        let options = Config::default().broadcast_options();
        assert_eq!(options.batch_size, 10);
        assert_eq!(options.batch_delay, Duration::from_millis(2000));

        let tuned = Config {
            broadcast_batch_size: Some(25),
            broadcast_delay_ms: Some(500),
            ..Default::default()
        };
        assert_eq!(tuned.broadcast_options().batch_size, 25);
    }

    #[test]
    fn test_partial_config_file_parses() {
        let config: Config = serde_json::from_str(r#"{"project_id": "grace-church"}"#).unwrap();
        assert_eq!(config.require_project_id().unwrap(), "grace-church");
        assert!(Config::default().require_project_id().is_err());
    }
}
