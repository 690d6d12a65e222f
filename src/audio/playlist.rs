use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::track::Track;
use crate::error::PlaylistError;

/// One saved entry. Only titled tracks are stored, so `title` is required.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistTrack {
    pub url: String,
    pub video_id: String,
    pub title: String,
    pub duration: Option<u64>,
}

impl PlaylistTrack {
    fn from_track(track: &Track) -> Option<Self> {
        let title = track.title().filter(|title| !title.is_empty())?;
        Some(Self {
            url: track.url().to_string(),
            video_id: track.video_id().to_string(),
            title: title.to_string(),
            duration: track.duration_secs(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Playlist {
    pub name: String,
    pub tracks: Vec<PlaylistTrack>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Named playlists as pretty-printed JSON files in one directory
pub struct PlaylistStore {
    dir: PathBuf,
    disallowed: Option<Regex>,
    whitespace: Option<Regex>,
}

impl PlaylistStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            disallowed: Regex::new(r"[^a-zA-Z0-9_\-\s]").ok(),
            whitespace: Regex::new(r"\s+").ok(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Filename stem for a playlist name: punctuation dropped, whitespace runs
    /// turned into underscores. "Road Trip!" -> "Road_Trip"
    pub fn sanitize(&self, name: &str) -> String {
        let mut cleaned = name.to_string();
        if let Some(regex) = &self.disallowed {
            cleaned = regex.replace_all(&cleaned, "").into_owned();
        }
        if let Some(regex) = &self.whitespace {
            cleaned = regex.replace_all(&cleaned, "_").into_owned();
        }
        cleaned
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, PlaylistError> {
        let stem = self.sanitize(name);
        if stem.is_empty() || stem.chars().all(|c| c == '_') {
            return Err(PlaylistError::InvalidName(name.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", stem)))
    }

    /// Save the titled tracks under `name`, overwriting any playlist with the
    /// same file name
    pub fn save(&self, name: &str, tracks: &[Track]) -> Result<Playlist, PlaylistError> {
        let tracks = Self::titled(tracks)?;
        let now = Utc::now();
        let playlist = Playlist {
            name: name.to_string(),
            tracks,
            created_at: now,
            updated_at: now,
        };

        self.write(&playlist)?;
        info!(name, tracks = playlist.tracks.len(), "saved playlist");
        Ok(playlist)
    }

    pub fn load(&self, name: &str) -> Result<Playlist, PlaylistError> {
        let path = self.path_for(name)?;
        let content = fs::read_to_string(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => PlaylistError::NotFound(name.to_string()),
            _ => PlaylistError::Io(e),
        })?;

        let playlist: Playlist = serde_json::from_str(&content)?;
        debug!(name, tracks = playlist.tracks.len(), "loaded playlist");
        Ok(playlist)
    }

    /// File stems of every saved playlist, sorted. A missing directory is an
    /// empty list.
    pub fn list(&self) -> Result<Vec<String>, PlaylistError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .filter(|path| path.extension().map_or(false, |ext| ext == "json"))
            .filter_map(|path| {
                path.file_stem()
                    .and_then(|stem| stem.to_str())
                    .map(str::to_string)
            })
            .collect();

        names.sort();
        Ok(names)
    }

    pub fn delete(&self, name: &str) -> Result<(), PlaylistError> {
        let path = self.path_for(name)?;
        fs::remove_file(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => PlaylistError::NotFound(name.to_string()),
            _ => PlaylistError::Io(e),
        })?;
        info!(name, "deleted playlist");
        Ok(())
    }

    /// Replace the tracks of an existing playlist, keeping its creation time
    pub fn update(&self, name: &str, tracks: &[Track]) -> Result<Playlist, PlaylistError> {
        let existing = self.load(name)?;
        let playlist = Playlist {
            name: name.to_string(),
            tracks: Self::titled(tracks)?,
            created_at: existing.created_at,
            updated_at: Utc::now(),
        };

        self.write(&playlist)?;
        info!(name, tracks = playlist.tracks.len(), "updated playlist");
        Ok(playlist)
    }

    fn titled(tracks: &[Track]) -> Result<Vec<PlaylistTrack>, PlaylistError> {
        let titled: Vec<PlaylistTrack> = tracks.iter().filter_map(PlaylistTrack::from_track).collect();
        if titled.is_empty() {
            return Err(PlaylistError::NothingToSave);
        }
        Ok(titled)
    }

    fn write(&self, playlist: &Playlist) -> Result<(), PlaylistError> {
        let path = self.path_for(&playlist.name)?;
        fs::create_dir_all(&self.dir)?;
        let content = serde_json::to_string_pretty(playlist)?;
        fs::write(&path, content)?;
        Ok(())
    }
}
