//! Application configuration management.
//!
//! This module handles loading and saving the application configuration:
//! request timeout, retry policy, session lifetime assumptions, which
//! credential backend to use, and a free-form key/value settings map.
//!
//! Configuration is stored at `~/.config/enteliscript/config.json`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::api::RetryPolicy;

/// Application name used for config/data directory paths
pub const APP_NAME: &str = "enteliscript";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Where secrets are kept between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CredentialBackend {
    #[default]
    File,
    Keyring,
}

impl CredentialBackend {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" | "plaintext" => Some(CredentialBackend::File),
            "keyring" | "keychain" => Some(CredentialBackend::Keyring),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Session lifetime to assume when the server does not report one.
    /// Zero means the expiry is unknown.
    pub assumed_session_minutes: i64,
    /// Sessions this close to expiry are refreshed before use.
    pub refresh_buffer_secs: i64,
    pub credential_backend: CredentialBackend,
    pub settings: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            assumed_session_minutes: 30,
            refresh_buffer_secs: 60,
            credential_backend: CredentialBackend::File,
            settings: BTreeMap::new(),
        }
    }
}

impl Config {
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(config)
    }

    /// Reject values that cannot be represented as time spans.
    fn validate(&self) -> Result<()> {
        if TimeDelta::try_minutes(self.assumed_session_minutes).is_none() {
            anyhow::bail!(
                "assumedSessionMinutes is out of range: {}",
                self.assumed_session_minutes
            );
        }
        if TimeDelta::try_seconds(self.refresh_buffer_secs).is_none() {
            anyhow::bail!(
                "refreshBufferSecs is out of range: {}",
                self.refresh_buffer_secs
            );
        }
        Ok(())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config file {}", path.display()))?;
        Ok(())
    }

    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME))
    }

    /// `~/.config/enteliscript/config.json`
    pub fn path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join(CONFIG_FILE))
    }

    /// Directory for rolling log files.
    pub fn log_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME).join("logs"))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }

    pub fn assumed_session_lifetime(&self) -> Option<TimeDelta> {
        if self.assumed_session_minutes <= 0 {
            return None;
        }
        TimeDelta::try_minutes(self.assumed_session_minutes)
    }

    pub fn refresh_buffer(&self) -> TimeDelta {
        TimeDelta::try_seconds(self.refresh_buffer_secs.max(0)).unwrap_or(TimeDelta::zero())
    }

    pub fn get_value(&self, key: &str) -> Option<&str> {
        self.settings.get(key).map(String::as_str)
    }

    pub fn set_value(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.settings.insert(key.into(), value.into());
    }
}

/// The config file as a live settings store.
///
/// `setting` commands read and update the free-form `settings` map; every
/// update is written back before it becomes visible.
pub struct SettingsFile {
    path: PathBuf,
    config: Mutex<Config>,
}

impl SettingsFile {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let config = Config::load_from(&path)?;
        Ok(Self {
            path,
            config: Mutex::new(config),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of the whole configuration.
    pub fn config(&self) -> Config {
        self.lock().clone()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.lock().get_value(key).map(str::to_string)
    }

    pub fn entries(&self) -> Vec<(String, String)> {
        self.lock()
            .settings
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Set `key` and save. On a failed save the previous value is kept.
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut config = self.lock();
        let mut updated = config.clone();
        updated.set_value(key, value);
        updated.save_to(&self.path)?;
        *config = updated;
        info!(key, "Setting saved");
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Config> {
        self.config.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("nope.json")).unwrap();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.credential_backend, CredentialBackend::File);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"maxRetries": 5, "credentialBackend": "keyring"}"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.credential_backend, CredentialBackend::Keyring);
        assert_eq!(config.request_timeout_secs, 30);
    }

    #[test]
    fn test_save_and_reload_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = Config::default();
        config.set_value("lastSite", "MainCampus");
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.get_value("lastSite"), Some("MainCampus"));
    }

    #[test]
    fn test_out_of_range_durations_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, format!(r#"{{"assumedSessionMinutes": {}}}"#, i64::MAX)).unwrap();
        let err = Config::load_from(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("assumedSessionMinutes"));

        std::fs::write(&path, format!(r#"{{"refreshBufferSecs": {}}}"#, i64::MAX)).unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_settings_file_set_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"maxRetries": 5}"#).unwrap();

        let settings = SettingsFile::open(&path).unwrap();
        assert_eq!(settings.get("lastSite"), None);
        settings.set("lastSite", "MainCampus").unwrap();
        assert_eq!(settings.get("lastSite").as_deref(), Some("MainCampus"));
        assert_eq!(
            settings.entries(),
            vec![("lastSite".to_string(), "MainCampus".to_string())]
        );

        // Other fields survive the rewrite
        let reopened = SettingsFile::open(&path).unwrap();
        assert_eq!(reopened.config().max_retries, 5);
        assert_eq!(reopened.get("lastSite").as_deref(), Some("MainCampus"));
    }

    #[test]
    fn test_settings_file_failed_save_keeps_old_value() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should be makes every write fail
        let path = dir.path().join("config.json");
        std::fs::create_dir(&path).unwrap();
        let settings = SettingsFile {
            path,
            config: Mutex::new(Config::default()),
        };

        assert!(settings.set("lastSite", "MainCampus").is_err());
        assert_eq!(settings.get("lastSite"), None);
    }

    #[test]
    fn test_zero_lifetime_means_unknown_expiry() {
        let config = Config {
            assumed_session_minutes: 0,
            ..Config::default()
        };
        assert!(config.assumed_session_lifetime().is_none());
    }

    #[test]
    fn test_backend_parse() {
        assert_eq!(CredentialBackend::parse("Keyring"), Some(CredentialBackend::Keyring));
        assert_eq!(CredentialBackend::parse("plaintext"), Some(CredentialBackend::File));
        assert_eq!(CredentialBackend::parse("vault"), None);
    }
}
