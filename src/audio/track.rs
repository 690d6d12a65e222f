use crate::error::QueueError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

const CANONICAL_HOSTS: [&str; 2] = ["www.youtube.com", "youtube.com"];
const SHORT_LINK_HOST: &str = "youtu.be";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackStatus {
    Pending,
    Downloading,
    Ready,
    Playing,
    Error,
}

/// One queue entry. Fields are read-only from the outside; changes go through
/// [`TrackUpdate`] so the file/error invariants can't drift.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    url: String,
    video_id: String,
    title: Option<String>,
    duration_secs: Option<u64>,
    status: TrackStatus,
    file_path: Option<PathBuf>,
    error: Option<String>,
}

impl Track {
    /// Parse a link into a pending track
    pub fn from_url(url: &str) -> Result<Self, QueueError> {
        let video_id = extract_video_id(url)?;
        Ok(Self {
            url: url.to_string(),
            video_id,
            title: None,
            duration_secs: None,
            status: TrackStatus::Pending,
            file_path: None,
            error: None,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn video_id(&self) -> &str {
        &self.video_id
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn duration_secs(&self) -> Option<u64> {
        self.duration_secs
    }

    pub fn status(&self) -> TrackStatus {
        self.status
    }

    pub fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Title if we know it, otherwise the bare id
    pub fn display_title(&self) -> String {
        self.title.clone().unwrap_or_else(|| self.video_id.clone())
    }

    pub fn duration_string(&self) -> String {
        self.duration_secs
            .map(format_duration)
            .unwrap_or_else(|| "--:--".to_string())
    }

    /// Returns a new track with the update merged in.
    ///
    /// A file path only exists for ready/playing tracks and an error message
    /// only for errored ones. Asking a track without a file to start playing
    /// leaves its status alone.
    pub fn apply(&self, update: &TrackUpdate) -> Track {
        let mut next = self.clone();

        if let Some(title) = &update.title {
            next.title = Some(title.clone());
        }
        if let Some(duration) = update.duration_secs {
            next.duration_secs = Some(duration);
        }

        match &update.status {
            None => {}
            Some(StatusChange::Pending) => {
                next.status = TrackStatus::Pending;
                next.file_path = None;
                next.error = None;
            }
            Some(StatusChange::Downloading) => {
                next.status = TrackStatus::Downloading;
                next.file_path = None;
                next.error = None;
            }
            Some(StatusChange::Ready(path)) => {
                next.status = TrackStatus::Ready;
                next.file_path = Some(path.clone());
                next.error = None;
            }
            Some(StatusChange::Playing) => {
                if next.file_path.is_some() {
                    next.status = TrackStatus::Playing;
                    next.error = None;
                }
            }
            Some(StatusChange::Failed(message)) => {
                next.status = TrackStatus::Error;
                next.file_path = None;
                next.error = Some(message.clone());
            }
        }

        next
    }
}

#[derive(Debug, Clone, PartialEq)]
enum StatusChange {
    Pending,
    Downloading,
    Ready(PathBuf),
    Playing,
    Failed(String),
}

/// A partial change to a [`Track`], keyed by video id at the queue level
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackUpdate {
    title: Option<String>,
    duration_secs: Option<u64>,
    status: Option<StatusChange>,
}

impl TrackUpdate {
    pub fn metadata(title: impl Into<String>, duration_secs: u64) -> Self {
        Self::default().with_title(title).with_duration(duration_secs)
    }

    pub fn pending() -> Self {
        Self::with_status(StatusChange::Pending)
    }

    pub fn downloading() -> Self {
        Self::with_status(StatusChange::Downloading)
    }

    pub fn ready(file_path: impl Into<PathBuf>) -> Self {
        Self::with_status(StatusChange::Ready(file_path.into()))
    }

    pub fn playing() -> Self {
        Self::with_status(StatusChange::Playing)
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::with_status(StatusChange::Failed(message.into()))
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_duration(mut self, duration_secs: u64) -> Self {
        self.duration_secs = Some(duration_secs);
        self
    }

    fn with_status(status: StatusChange) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

/// Pull the video id out of a watch link or a short link.
///
/// Accepted: `http(s)://[www.]youtube.com/...?v=<id>` and `http(s)://youtu.be/<id>`.
pub fn extract_video_id(raw: &str) -> Result<String, QueueError> {
    let invalid = || QueueError::InvalidUrl(raw.to_string());

    let url = Url::parse(raw.trim()).map_err(|_| invalid())?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid());
    }

    let host = url.host_str().ok_or_else(invalid)?;

    let id = if CANONICAL_HOSTS.contains(&host) {
        url.query_pairs()
            .find(|(key, _)| key == "v")
            .map(|(_, value)| value.into_owned())
    } else if host == SHORT_LINK_HOST {
        url.path_segments()
            .and_then(|mut segments| segments.next())
            .map(str::to_string)
    } else {
        None
    };

    id.filter(|id| !id.is_empty()).ok_or_else(invalid)
}

/// `m:ss`, or `h:mm:ss` once past the hour
pub fn format_duration(total_secs: u64) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_from_watch_links() {
        assert_eq!(
            extract_video_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ").unwrap(),
            "dQw4w9WgXcQ"
        );
        assert_eq!(
            extract_video_id("https://youtube.com/watch?list=PL1&v=abc123&t=42").unwrap(),
            "abc123"
        );
    }

    #[test]
    fn test_extract_from_short_links() {
        assert_eq!(extract_video_id("https://youtu.be/dQw4w9WgXcQ").unwrap(), "dQw4w9WgXcQ");
        assert_eq!(extract_video_id("https://youtu.be/dQw4w9WgXcQ?t=10").unwrap(), "dQw4w9WgXcQ");
    }

    #[test]
    fn test_rejects_off_host_and_garbage() {
        for bad in [
            "not a url",
            "https://vimeo.com/12345",
            "https://www.youtube.com/watch",
            "https://www.youtube.com/watch?v=",
            "https://youtu.be/",
            "ftp://youtu.be/abc",
            "https://m.youtube.com/watch?v=abc",
        ] {
            assert!(
                matches!(extract_video_id(bad), Err(QueueError::InvalidUrl(_))),
                "{} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_ready_sets_path_and_failure_clears_it() {
        let track = Track::from_url("https://youtu.be/abc").unwrap();
        assert_eq!(track.status(), TrackStatus::Pending);

        let ready = track.apply(&TrackUpdate::ready("/tmp/abc.opus"));
        assert_eq!(ready.status(), TrackStatus::Ready);
        assert_eq!(ready.file_path(), Some(Path::new("/tmp/abc.opus")));

        let failed = ready.apply(&TrackUpdate::failed("boom"));
        assert_eq!(failed.status(), TrackStatus::Error);
        assert_eq!(failed.file_path(), None);
        assert_eq!(failed.error(), Some("boom"));

        let retry = failed.apply(&TrackUpdate::downloading());
        assert_eq!(retry.error(), None);
    }

    #[test]
    fn test_playing_requires_a_file() {
        let track = Track::from_url("https://youtu.be/abc").unwrap();
        let still_pending = track.apply(&TrackUpdate::playing());
        assert_eq!(still_pending.status(), TrackStatus::Pending);

        let playing = track
            .apply(&TrackUpdate::ready("/tmp/abc.opus"))
            .apply(&TrackUpdate::playing());
        assert_eq!(playing.status(), TrackStatus::Playing);
        assert!(playing.file_path().is_some());
    }

    #[test]
    fn test_apply_leaves_original_untouched() {
        let track = Track::from_url("https://youtu.be/abc").unwrap();
        let updated = track.apply(&TrackUpdate::metadata("Song", 212));

        assert_eq!(track.title(), None);
        assert_eq!(updated.title(), Some("Song"));
        assert_eq!(updated.duration_string(), "3:32");
        assert_eq!(updated.status(), TrackStatus::Pending);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "0:00");
        assert_eq!(format_duration(65), "1:05");
        assert_eq!(format_duration(3725), "1:02:05");
    }
}
