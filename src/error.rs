// Error types for the library side of tubepipe
// Binaries stay on anyhow; components hand back these so callers can match on them

use std::path::PathBuf;
use thiserror::Error;

/// Problems with user input against the queue
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("Invalid YouTube URL: {0}")]
    InvalidUrl(String),

    #[error("Video already in queue: {0}")]
    DuplicateTrack(String),

    #[error("No track at position {index} (queue has {len})")]
    IndexOutOfRange { index: usize, len: usize },
}

/// Failures of a single play attempt
#[derive(Error, Debug)]
pub enum PlayerError {
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("File did not become available for playback: {}", .0.display())]
    FileUnavailable(PathBuf),

    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// stop() was called while the file was still buffering
    #[error("Playback was stopped before it started")]
    Interrupted,
}

#[derive(Error, Debug)]
pub enum PlaylistError {
    #[error("No tracks with titles to save")]
    NothingToSave,

    #[error("Playlist not found: {0}")]
    NotFound(String),

    #[error("Playlist name has no usable characters: {0:?}")]
    InvalidName(String),

    #[error("Playlist I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Playlist JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Metadata lookup failures. `Failed` carries the resolver's own diagnostics.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Failed(String),
}
