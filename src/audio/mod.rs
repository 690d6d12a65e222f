pub mod cache;
pub mod downloader;
pub mod metadata;
pub mod player;
pub mod playlist;
pub mod queue;
pub mod system;
pub mod track;

pub use cache::{format_bytes, Cache};
pub use downloader::{DownloadEvent, DownloadProgress, Downloader};
pub use metadata::{MetadataResolver, VideoMetadata};
pub use player::{PlaybackState, Player, PlayerBackend, PlayerEvent};
pub use playlist::{Playlist, PlaylistStore, PlaylistTrack};
pub use queue::QueueManager;
pub use track::{Track, TrackStatus, TrackUpdate};

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub backend: Option<PlayerBackend>, // None = pick whatever the system has
    pub program: Option<String>,        // override the backend's binary
    pub min_playable_bytes: u64,        // progressive playback threshold
    pub readiness_timeout_ms: u64,
    pub readiness_poll_ms: u64,
    pub progress_interval_ms: u64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            backend: None,
            program: None,
            min_playable_bytes: 512 * 1024,
            readiness_timeout_ms: 5000,
            readiness_poll_ms: 200,
            progress_interval_ms: 1000,
        }
    }
}

impl PlayerConfig {
    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_millis(self.readiness_timeout_ms)
    }

    pub fn readiness_poll(&self) -> Duration {
        Duration::from_millis(self.readiness_poll_ms.max(1))
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloaderConfig {
    /// Resolver invocation: program followed by any leading args,
    /// e.g. ["python3", "-m", "yt_dlp"]
    pub command: Vec<String>,
    pub audio_format: String,
    pub fallback_extension: String,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            command: vec!["yt-dlp".to_string()],
            audio_format: "bestaudio".to_string(),
            fallback_extension: "opus".to_string(),
        }
    }
}

impl DownloaderConfig {
    pub fn program(&self) -> &str {
        self.command.first().map(String::as_str).unwrap_or("yt-dlp")
    }

    pub fn leading_args(&self) -> &[String] {
        self.command.get(1..).unwrap_or(&[])
    }

    /// A ready-to-extend resolver command
    pub fn resolver_command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(self.program());
        cmd.args(self.leading_args());
        cmd
    }
}
