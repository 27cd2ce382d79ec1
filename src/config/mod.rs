// Configuration management for skipwatch
// Handles loading/saving settings, with sensible defaults when config is missing

use crate::behavior::SkipSettings;
use crate::monitor::MonitorConfig;
use anyhow::{Context, Result};
use dirs::{config_dir, data_local_dir};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "skipwatch";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database_path: PathBuf,
    pub log_dir: PathBuf,
    pub spotify: SpotifyConfig,
    pub skips: SkipSettings,     // seeds the settings table on first run
    pub monitor: MonitorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpotifyConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub redirect_uri: String,
    pub access_token: Option<String>,  // written by `skipwatch login`
    pub refresh_token: Option<String>,
}

impl Default for SpotifyConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            redirect_uri: "http://localhost:8888/callback".to_string(),
            access_token: None,
            refresh_token: None,
        }
    }
}

impl SpotifyConfig {
    /// Both halves of the client credentials, if configured.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.client_id.as_deref(), self.client_secret.as_deref()) {
            (Some(id), Some(secret)) if !id.trim().is_empty() && !secret.trim().is_empty() => Some((id, secret)),
            _ => None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let config_dir = config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR);
        let data_dir = data_local_dir()
            .map(|d| d.join(APP_DIR))
            .unwrap_or_else(|| config_dir.clone());

        Self {
            database_path: config_dir.join("skipwatch.db"),
            log_dir: data_dir.join("logs"),
            spotify: SpotifyConfig::default(),
            skips: SkipSettings::default(),
            monitor: MonitorConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Read `path`, writing defaults there first if it does not exist yet.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Invalid config in {}", path.display()))?;
            config.monitor.validate()?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;

        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?
            .join(APP_DIR);

        Ok(config_dir.join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_writes_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.monitor, MonitorConfig::default());
        assert!(config.spotify.credentials().is_none());
    }

    #[test]
    fn test_partial_file_fills_in_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
[spotify]
client_id = "abc"
client_secret = "xyz"

[skips]
skip_threshold = 0.5
auto_unlike = true

[monitor]
polling_interval_ms = 2000
"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.spotify.credentials(), Some(("abc", "xyz")));
        assert_eq!(config.spotify.redirect_uri, "http://localhost:8888/callback");
        assert_eq!(config.skips.skip_threshold, 0.5);
        assert!(config.skips.auto_unlike);
        assert_eq!(config.skips.skip_count_threshold, 5);
        assert_eq!(config.monitor.polling_interval_ms, 2_000);
        assert_eq!(config.monitor.progress_interval_ms, 250);
    }

    #[test]
    fn test_invalid_monitor_section_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[monitor]\nbackoff_multiplier = 0.5\n").unwrap();

        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_save_round_trips_tokens() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = Config::default();
        config.spotify.refresh_token = Some("refresh".into());
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.spotify.refresh_token.as_deref(), Some("refresh"));
    }
}
