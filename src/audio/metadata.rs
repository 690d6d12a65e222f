// Metadata lookups through yt-dlp
// One line back per video: id|||title|||duration|||ext

use super::DownloaderConfig;
use crate::error::ResolveError;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use tracing::{debug, warn};

/// `--print` template; the resolver fills each field in
pub const METADATA_TEMPLATE: &str = "%(id)s|||%(title)s|||%(duration)s|||%(ext)s";
const FIELD_DELIMITER: &str = "|||";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub id: String,
    pub title: String,
    pub duration_secs: u64,
    pub ext: String,
}

impl VideoMetadata {
    /// Parse the resolver's printed record. Missing or unparsable fields fall
    /// back to: empty id, "Unknown" title, zero duration, `fallback_ext`.
    pub fn parse(record: &str, fallback_ext: &str) -> Self {
        let line = record
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or("");
        let mut fields = line.split(FIELD_DELIMITER).map(str::trim);

        let id = fields.next().unwrap_or("").to_string();
        let title = fields
            .next()
            .filter(|title| !title.is_empty())
            .unwrap_or("Unknown")
            .to_string();
        let duration_secs = fields.next().map(parse_duration).unwrap_or(0);
        let ext = fields
            .next()
            .filter(|ext| !ext.is_empty() && *ext != "NA")
            .unwrap_or(fallback_ext)
            .to_string();

        Self {
            id,
            title,
            duration_secs,
            ext,
        }
    }
}

// yt-dlp prints "NA" for unknown durations and sometimes a fractional value
fn parse_duration(field: &str) -> u64 {
    field
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(|secs| secs as u64)
        .unwrap_or(0)
}

#[derive(Debug, Clone)]
pub struct MetadataResolver {
    config: DownloaderConfig,
}

impl MetadataResolver {
    pub fn new(config: DownloaderConfig) -> Self {
        Self { config }
    }

    /// Ask the resolver for title/duration/extension without downloading.
    /// The child is killed if this future is dropped early.
    pub async fn resolve(&self, url: &str) -> Result<VideoMetadata, ResolveError> {
        debug!(url, "resolving metadata");

        let output = self
            .config
            .resolver_command()
            .args(["--print", METADATA_TEMPLATE, "-f", self.config.audio_format.as_str()])
            .arg("--no-playlist")
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ResolveError::Spawn {
                program: self.config.program().to_string(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(url, status = %output.status, "metadata lookup failed");
            return Err(ResolveError::Failed(if stderr.is_empty() {
                "Failed to fetch metadata".to_string()
            } else {
                stderr
            }));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(VideoMetadata::parse(&stdout, &self.config.fallback_extension))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_record() {
        let meta = VideoMetadata::parse("dQw4w9WgXcQ|||Never Gonna Give You Up|||212|||webm\n", "opus");
        assert_eq!(
            meta,
            VideoMetadata {
                id: "dQw4w9WgXcQ".to_string(),
                title: "Never Gonna Give You Up".to_string(),
                duration_secs: 212,
                ext: "webm".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_falls_back_on_missing_fields() {
        let meta = VideoMetadata::parse("abc|||", "opus");
        assert_eq!(meta.id, "abc");
        assert_eq!(meta.title, "Unknown");
        assert_eq!(meta.duration_secs, 0);
        assert_eq!(meta.ext, "opus");

        let meta = VideoMetadata::parse("", "m4a");
        assert_eq!(meta.ext, "m4a");
    }

    #[test]
    fn test_parse_odd_durations() {
        assert_eq!(VideoMetadata::parse("a|||t|||NA|||webm", "opus").duration_secs, 0);
        assert_eq!(VideoMetadata::parse("a|||t|||212.7|||webm", "opus").duration_secs, 212);
        assert_eq!(VideoMetadata::parse("a|||t|||-5|||webm", "opus").duration_secs, 0);
    }

    #[test]
    fn test_parse_keeps_pipes_inside_title_fields_apart() {
        // A single pipe in a title is not the delimiter
        let meta = VideoMetadata::parse("a|||Live | Remastered|||60|||m4a", "opus");
        assert_eq!(meta.title, "Live | Remastered");
        assert_eq!(meta.ext, "m4a");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_resolve_reports_stderr_on_failure() {
        let config = DownloaderConfig {
            command: vec![
                "sh".to_string(),
                "-c".to_string(),
                "echo 'ERROR: Video unavailable' >&2; exit 1".to_string(),
            ],
            ..DownloaderConfig::default()
        };
        let err = MetadataResolver::new(config)
            .resolve("https://youtu.be/abc")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "ERROR: Video unavailable");
    }

    #[tokio::test]
    async fn test_resolve_missing_binary() {
        let config = DownloaderConfig {
            command: vec!["/definitely/not/a/real/yt-dlp".to_string()],
            ..DownloaderConfig::default()
        };
        let err = MetadataResolver::new(config)
            .resolve("https://youtu.be/abc")
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Spawn { .. }));
    }
}
