// tubepipe library - queue, download, cache and playback for YouTube audio
// The binary is a thin TUI over the Controller; everything else lives here

pub mod audio; // queue, cache, yt-dlp downloads, external player
pub mod config; // settings and directories
pub mod controller; // wires the audio pieces into one playback loop
pub mod error; // typed errors for the library side
#[cfg(feature = "tui")]
pub mod ui; // terminal interface

pub use audio::{
    Cache, DownloadEvent, Downloader, PlaybackState, Player, PlayerBackend, PlayerEvent,
    QueueManager, Track, TrackStatus, TrackUpdate,
};
pub use config::Config;
pub use controller::Controller;
pub use error::{PlayerError, PlaylistError, QueueError};
