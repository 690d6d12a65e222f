// Configuration management for tubepipe
// Handles loading/saving settings, with sensible defaults when config is missing

use crate::audio::{DownloaderConfig, PlayerConfig};
use anyhow::{Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache_dir: PathBuf,
    pub data_dir: PathBuf,
    pub player: PlayerConfig,
    pub downloader: DownloaderConfig,
    pub ui: UiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    pub tick_rate_ms: u64,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self { tick_rate_ms: 100 }
    }
}

impl UiConfig {
    pub fn tick_rate(&self) -> Duration {
        Duration::from_millis(self.tick_rate_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        let cache_dir = dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tubepipe");
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tubepipe");

        Self {
            cache_dir,
            data_dir,
            player: PlayerConfig::default(),
            downloader: DownloaderConfig::default(),
            ui: UiConfig::default(),
        }
    }
}

impl Config {
    /// Load from the standard location, writing defaults there on first run
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config {}", path.display()))?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;

        Ok(())
    }

    pub fn playlists_dir(&self) -> PathBuf {
        self.data_dir.join("playlists")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?
            .join("tubepipe");

        Ok(config_dir.join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::PlayerBackend;
    use tempfile::TempDir;

    #[test]
    fn test_first_load_writes_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.player.min_playable_bytes, 512 * 1024);
        assert_eq!(config.downloader.command, vec!["yt-dlp".to_string()]);

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.cache_dir, config.cache_dir);
    }

    #[test]
    fn test_partial_config_fills_in_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        fs::write(
            &path,
            r#"
cache_dir = "/srv/tubepipe/cache"

[player]
backend = "afplay"
readiness_timeout_ms = 250
"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.cache_dir, PathBuf::from("/srv/tubepipe/cache"));
        assert_eq!(config.player.backend, Some(PlayerBackend::Afplay));
        assert_eq!(config.player.readiness_timeout(), Duration::from_millis(250));
        assert_eq!(config.player.readiness_poll_ms, 200);
        assert_eq!(config.ui.tick_rate_ms, 100);
    }

    #[test]
    fn test_bad_toml_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        fs::write(&path, "cache_dir = [").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_derived_dirs() {
        let config = Config {
            data_dir: PathBuf::from("/data/tp"),
            ..Config::default()
        };
        assert_eq!(config.playlists_dir(), PathBuf::from("/data/tp/playlists"));
        assert_eq!(config.log_dir(), PathBuf::from("/data/tp/logs"));
    }
}
