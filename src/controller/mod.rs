// Controller - glues the queue, cache, downloader and player together
// The only thing that mutates the queue; everything async reports back over channels

use crate::audio::{
    Cache, DownloadEvent, Downloader, MetadataResolver, PlaybackState, Player, PlayerBackend,
    PlayerEvent, Playlist, PlaylistStore, QueueManager, Track, TrackStatus, TrackUpdate,
    VideoMetadata,
};
use crate::config::Config;
use crate::error::{PlayerError, PlaylistError, QueueError};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Results of work the controller spawned itself
#[derive(Debug)]
enum Internal {
    MetadataResolved {
        video_id: String,
        result: Result<VideoMetadata, String>,
    },
    PlaybackFailed {
        video_id: String,
        error: PlayerError,
    },
}

enum PlayerAction {
    Play(PathBuf),
    Resume,
}

pub struct Controller {
    queue: QueueManager,
    cache: Cache,
    downloader: Downloader,
    player: Player,
    resolver: MetadataResolver,
    playlists: PlaylistStore,

    download_tx: mpsc::UnboundedSender<(u64, DownloadEvent)>,
    download_rx: mpsc::UnboundedReceiver<(u64, DownloadEvent)>,
    player_rx: mpsc::UnboundedReceiver<PlayerEvent>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,

    // spawned play requests carry a ticket; anything that stops playback
    // bumps it so a request that hasn't run yet is dropped
    play_ticket: Arc<AtomicU64>,

    // each download's events are tagged with its ticket; only the ticket
    // stored for a video id counts, so a cancelled run can't touch a re-add
    download_tickets: HashMap<String, u64>,
    next_download_ticket: u64,

    // the last track finished (or failed) with nothing after it
    queue_ended: bool,

    download_percent: HashMap<String, f32>,
    playback_secs: u64,
    notice: Option<String>,
}

impl Controller {
    pub fn new(config: &Config, backend: PlayerBackend) -> Self {
        Self::with_queue(config, backend, QueueManager::new())
    }

    pub fn with_queue(config: &Config, backend: PlayerBackend, queue: QueueManager) -> Self {
        let cache = Cache::new(&config.cache_dir);
        let (download_tx, download_rx) = mpsc::unbounded_channel();
        let (player_tx, player_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        let player = Player::new(backend, config.player.clone());
        player.set_event_sender(player_tx);

        Self {
            queue,
            downloader: Downloader::new(config.downloader.clone(), cache.clone()),
            cache,
            player,
            resolver: MetadataResolver::new(config.downloader.clone()),
            playlists: PlaylistStore::new(config.playlists_dir()),
            download_tx,
            download_rx,
            player_rx,
            internal_tx,
            internal_rx,
            play_ticket: Arc::new(AtomicU64::new(0)),
            download_tickets: HashMap::new(),
            next_download_ticket: 0,
            queue_ended: false,
            download_percent: HashMap::new(),
            playback_secs: 0,
            notice: None,
        }
    }

    // -- user actions --

    /// Queue a link, look up its title in the background, and start playing
    /// if nothing else is
    pub fn add_url(&mut self, url: &str) -> Result<String, QueueError> {
        let video_id = self.queue.add(url)?;
        info!(video_id = %video_id, "queued");

        let resolver = self.resolver.clone();
        let internal = self.internal_tx.clone();
        let url = url.trim().to_string();
        let id = video_id.clone();
        tokio::spawn(async move {
            let result = resolver.resolve(&url).await.map_err(|e| e.to_string());
            let _ = internal.send(Internal::MetadataResolved {
                video_id: id,
                result,
            });
        });

        if !self.player_active() {
            // don't replay the track that just ended
            if self.queue_ended && self.queue.next().is_some() {
                debug!(video_id = %video_id, "resuming after the end of the queue");
            }
            self.play_current();
        }
        Ok(video_id)
    }

    /// Get the current track onto the speakers, downloading it first if needed
    pub fn play_current(&mut self) {
        let Some(track) = self.queue.current() else {
            return;
        };
        self.queue_ended = false;
        let video_id = track.video_id().to_string();

        match track.status() {
            TrackStatus::Ready => {
                let Some(path) = track.file_path().map(|p| p.to_path_buf()) else {
                    return;
                };
                self.queue.update_track(&video_id, &TrackUpdate::playing());
                self.playback_secs = 0;
                self.start_player(video_id, PlayerAction::Play(path));
            }
            TrackStatus::Pending => {
                if let Some(path) = self.cache.cached_path(&video_id) {
                    debug!(video_id = %video_id, "cache hit");
                    self.queue.update_track(&video_id, &TrackUpdate::ready(path));
                    self.play_current();
                } else {
                    self.queue.update_track(&video_id, &TrackUpdate::downloading());
                    self.start_download(&track);
                }
            }
            TrackStatus::Error => self.advance(),
            // already on its way
            TrackStatus::Downloading | TrackStatus::Playing => {}
        }
    }

    pub fn next(&mut self) -> bool {
        self.halt();
        self.release_current();
        if self.queue.next().is_some() {
            self.play_current();
            true
        } else {
            self.queue_ended = !self.queue.is_empty();
            false
        }
    }

    pub fn previous(&mut self) -> bool {
        self.halt();
        self.release_current();
        if self.queue.previous().is_some() {
            self.play_current();
            true
        } else {
            false
        }
    }

    pub fn toggle_play_pause(&mut self) {
        match self.player.state() {
            PlaybackState::Playing | PlaybackState::Buffering => {
                self.play_ticket.fetch_add(1, Ordering::SeqCst);
                self.player.pause();
            }
            PlaybackState::Paused => {
                if let Some(track) = self.queue.current() {
                    self.start_player(track.video_id().to_string(), PlayerAction::Resume);
                }
            }
            PlaybackState::Idle | PlaybackState::Finished => {
                // a play that never got going leaves the track marked Playing
                self.release_current();
                self.play_current();
            }
        }
    }

    /// Stop everything and empty the queue. Shuffle mode stays as it was.
    pub fn clear(&mut self) {
        self.halt();
        self.downloader.cancel_all();
        self.download_tickets.clear();
        self.queue.clear();
        self.queue_ended = false;
        self.download_percent.clear();
        self.playback_secs = 0;
        info!("queue cleared");
    }

    pub fn remove(&mut self, index: usize) -> Result<Track, QueueError> {
        let len = self.queue.len();
        let was_current = self.queue.current_index() == Some(index);
        // a current track still downloading would have started on its own
        let was_underway = was_current
            && (self.player_active()
                || self.queue.current().map_or(false, |t| {
                    matches!(t.status(), TrackStatus::Downloading | TrackStatus::Playing)
                }));

        let track = self
            .queue
            .remove(index)
            .ok_or(QueueError::IndexOutOfRange { index, len })?;

        self.downloader.cancel(track.video_id());
        self.download_tickets.remove(track.video_id());
        self.download_percent.remove(track.video_id());

        if was_underway {
            self.halt();
            self.play_current();
        }

        info!(video_id = %track.video_id(), index, "removed from queue");
        Ok(track)
    }

    pub fn toggle_shuffle(&mut self) -> bool {
        let enabled = self.queue.toggle_shuffle();
        info!(enabled, "shuffle toggled");
        enabled
    }

    pub fn save_playlist(&mut self, name: &str) -> Result<Playlist, PlaylistError> {
        self.playlists.save(name, &self.queue.tracks())
    }

    /// Replace the queue with a saved playlist and start playing it.
    /// Returns how many tracks were queued.
    pub fn load_playlist(&mut self, name: &str) -> Result<usize, PlaylistError> {
        let playlist = self.playlists.load(name)?;
        self.clear();

        let mut added = 0;
        for entry in &playlist.tracks {
            match self.queue.add(&entry.url) {
                Ok(video_id) => {
                    let mut update = TrackUpdate::default().with_title(entry.title.as_str());
                    if let Some(duration) = entry.duration {
                        update = update.with_duration(duration);
                    }
                    self.queue.update_track(&video_id, &update);
                    added += 1;
                }
                Err(e) => warn!(url = %entry.url, error = %e, "skipping playlist entry"),
            }
        }

        info!(name, added, "playlist loaded");
        if added > 0 {
            self.play_current();
        }
        Ok(added)
    }

    pub fn delete_playlist(&mut self, name: &str) -> Result<(), PlaylistError> {
        self.playlists.delete(name)
    }

    pub fn playlists(&self) -> Result<Vec<String>, PlaylistError> {
        self.playlists.list()
    }

    /// Stop playback and downloads, e.g. on quit
    pub fn shutdown(&mut self) {
        self.halt();
        self.downloader.cancel_all();
    }

    // -- event plumbing --

    /// Wait for the next event from any source and handle it
    pub async fn process_next(&mut self) {
        tokio::select! {
            Some((ticket, event)) = self.download_rx.recv() => self.handle_download_event(ticket, event),
            Some(event) = self.player_rx.recv() => self.handle_player_event(event),
            Some(message) = self.internal_rx.recv() => self.handle_internal(message),
        }
    }

    /// Apply an event from the download started with `ticket`. Events from
    /// a download that was cancelled or superseded are dropped.
    pub fn handle_download_event(&mut self, ticket: u64, event: DownloadEvent) {
        let video_id = event.video_id();
        if self.download_tickets.get(video_id) != Some(&ticket) {
            debug!(video_id, ticket, "ignoring event from a stale download");
            return;
        }
        if event.is_terminal() {
            self.download_tickets.remove(video_id);
        }

        match event {
            DownloadEvent::Metadata { video_id, metadata } => {
                self.queue.update_track(
                    &video_id,
                    &TrackUpdate::metadata(metadata.title, metadata.duration_secs),
                );
            }
            DownloadEvent::Progress { video_id, progress } => {
                self.download_percent.insert(video_id, progress.percent);
            }
            DownloadEvent::Complete {
                video_id,
                file_path,
            } => {
                self.download_percent.remove(&video_id);
                let downloading = self
                    .queue
                    .track(&video_id)
                    .map_or(false, |t| t.status() == TrackStatus::Downloading);
                if !downloading {
                    return;
                }

                self.queue
                    .update_track(&video_id, &TrackUpdate::ready(file_path));
                if self.is_current(&video_id) && !self.player_active() {
                    self.play_current();
                }
            }
            DownloadEvent::Error { video_id, message } => {
                self.download_percent.remove(&video_id);
                if !self
                    .queue
                    .update_track(&video_id, &TrackUpdate::failed(message.as_str()))
                {
                    return;
                }

                self.notice = Some(message);
                if self.is_current(&video_id) {
                    self.advance();
                }
            }
        }
    }

    pub fn handle_player_event(&mut self, event: PlayerEvent) {
        match event {
            PlayerEvent::Progress { elapsed_secs } => self.playback_secs = elapsed_secs,
            PlayerEvent::Finished { file } => {
                let finished = self.queue.tracks().into_iter().find(|t| {
                    t.status() == TrackStatus::Playing && t.file_path() == Some(file.as_path())
                });
                let Some(track) = finished else {
                    return;
                };

                debug!(video_id = %track.video_id(), "track finished");
                self.queue
                    .update_track(track.video_id(), &TrackUpdate::ready(file));
                self.playback_secs = 0;

                if self.is_current(track.video_id()) {
                    self.advance();
                }
            }
        }
    }

    fn handle_internal(&mut self, message: Internal) {
        match message {
            Internal::MetadataResolved { video_id, result } => match result {
                Ok(metadata) => {
                    self.queue.update_track(
                        &video_id,
                        &TrackUpdate::metadata(metadata.title, metadata.duration_secs),
                    );
                }
                Err(e) => debug!(video_id = %video_id, error = %e, "title lookup failed"),
            },
            Internal::PlaybackFailed { video_id, error } => {
                if matches!(error, PlayerError::Interrupted) {
                    return;
                }
                warn!(video_id = %video_id, error = %error, "playback failed");

                let playing = self
                    .queue
                    .track(&video_id)
                    .map_or(false, |t| t.status() == TrackStatus::Playing);
                if !playing {
                    return;
                }

                self.queue
                    .update_track(&video_id, &TrackUpdate::failed(error.to_string()));
                self.notice = Some(error.to_string());
                if self.is_current(&video_id) {
                    self.advance();
                }
            }
        }
    }

    // -- helpers --

    // Move on after the current track is done with; flags the end of the queue
    fn advance(&mut self) {
        if self.queue.next().is_some() {
            self.play_current();
        } else {
            self.queue_ended = true;
            info!("reached the end of the queue");
        }
    }

    fn start_download(&mut self, track: &Track) {
        self.next_download_ticket += 1;
        let ticket = self.next_download_ticket;
        self.download_tickets
            .insert(track.video_id().to_string(), ticket);

        let downloader = self.downloader.clone();
        let events = self.download_tx.clone();
        let url = track.url().to_string();
        let video_id = track.video_id().to_string();
        info!(video_id = %video_id, ticket, "starting download");
        tokio::spawn(async move {
            let (tx, mut rx) = mpsc::unbounded_channel();
            let forward = async {
                while let Some(event) = rx.recv().await {
                    let _ = events.send((ticket, event));
                }
            };
            futures::join!(downloader.download(&url, &video_id, tx), forward);
        });
    }

    fn start_player(&self, video_id: String, action: PlayerAction) {
        let ticket = self.play_ticket.fetch_add(1, Ordering::SeqCst) + 1;
        let current_ticket = Arc::clone(&self.play_ticket);
        let player = self.player.clone();
        let internal = self.internal_tx.clone();

        tokio::spawn(async move {
            if current_ticket.load(Ordering::SeqCst) != ticket {
                return;
            }
            let result = match action {
                PlayerAction::Play(path) => player.play(&path).await,
                PlayerAction::Resume => player.resume().await,
            };
            if let Err(error) = result {
                let _ = internal.send(Internal::PlaybackFailed { video_id, error });
            }
        });
    }

    fn halt(&mut self) {
        self.play_ticket.fetch_add(1, Ordering::SeqCst);
        self.player.stop();
        self.playback_secs = 0;
    }

    // The track we're leaving keeps its file; a download in flight keeps going
    fn release_current(&mut self) {
        if let Some(track) = self.queue.current() {
            if track.status() == TrackStatus::Playing {
                if let Some(path) = track.file_path() {
                    self.queue
                        .update_track(track.video_id(), &TrackUpdate::ready(path));
                }
            }
        }
    }

    fn is_current(&self, video_id: &str) -> bool {
        self.queue
            .current()
            .map_or(false, |t| t.video_id() == video_id)
    }

    fn player_active(&self) -> bool {
        matches!(
            self.player.state(),
            PlaybackState::Playing | PlaybackState::Buffering | PlaybackState::Paused
        )
    }

    // -- read side for the UI --

    pub fn tracks(&self) -> Vec<Track> {
        self.queue.tracks()
    }

    pub fn current_track(&self) -> Option<Track> {
        self.queue.current()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.queue.current_index()
    }

    pub fn is_shuffled(&self) -> bool {
        self.queue.is_shuffled()
    }

    pub fn player_state(&self) -> PlaybackState {
        self.player.state()
    }

    pub fn download_percent(&self, video_id: &str) -> Option<f32> {
        self.download_percent.get(video_id).copied()
    }

    pub fn playback_secs(&self) -> u64 {
        self.playback_secs
    }

    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn clear_notice(&mut self) {
        self.notice = None;
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }
}
