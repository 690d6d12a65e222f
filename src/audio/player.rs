// Playback through an external player process (ffplay or afplay)
// There is no decoding in-process: pause stops the process, resume starts the file over

use super::PlayerConfig;
use crate::error::PlayerError;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PlayerBackend {
    Ffplay,
    Afplay,
}

impl PlayerBackend {
    pub fn program(&self) -> &'static str {
        match self {
            PlayerBackend::Ffplay => "ffplay",
            PlayerBackend::Afplay => "afplay",
        }
    }

    pub fn args(&self, file: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = match self {
            PlayerBackend::Ffplay => ["-nodisp", "-autoexit", "-loglevel", "quiet"]
                .iter()
                .map(OsString::from)
                .collect(),
            PlayerBackend::Afplay => Vec::new(),
        };
        args.push(file.as_os_str().to_owned());
        args
    }
}

impl std::fmt::Display for PlayerBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.program())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Buffering,
    Playing,
    Paused,
    Finished,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    Progress { elapsed_secs: u64 },
    Finished { file: PathBuf },
}

struct Shared {
    state: PlaybackState,
    current_file: Option<PathBuf>,
    started_at: Option<Instant>,
    // bumped by every play/stop; stale monitors and tickers check it
    generation: u64,
    kill: Option<oneshot::Sender<()>>,
    ticker: Option<JoinHandle<()>>,
    events: Option<mpsc::UnboundedSender<PlayerEvent>>,
}

impl Shared {
    fn send(&self, event: PlayerEvent) {
        if let Some(sender) = &self.events {
            let _ = sender.send(event);
        }
    }

    // Tear down whatever is running without touching state or file
    fn release(&mut self) {
        self.generation += 1;
        self.started_at = None;
        // dropping the sender is enough for the monitor to kill the child
        self.kill.take();
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }
}

#[derive(Clone)]
pub struct Player {
    backend: PlayerBackend,
    config: PlayerConfig,
    shared: Arc<Mutex<Shared>>,
}

impl Player {
    pub fn new(backend: PlayerBackend, config: PlayerConfig) -> Self {
        Self {
            backend,
            config,
            shared: Arc::new(Mutex::new(Shared {
                state: PlaybackState::Idle,
                current_file: None,
                started_at: None,
                generation: 0,
                kill: None,
                ticker: None,
                events: None,
            })),
        }
    }

    pub fn set_event_sender(&self, sender: mpsc::UnboundedSender<PlayerEvent>) {
        self.lock().events = Some(sender);
    }

    pub fn backend(&self) -> PlayerBackend {
        self.backend
    }

    fn program(&self) -> &str {
        self.config
            .program
            .as_deref()
            .unwrap_or_else(|| self.backend.program())
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start playing `path`, replacing anything already playing.
    ///
    /// Waits (bounded) for the file to hold enough bytes so a download that
    /// is still running can be played progressively. Returns once the player
    /// process is running; completion arrives as `PlayerEvent::Finished`.
    pub async fn play(&self, path: &Path) -> Result<(), PlayerError> {
        self.stop();

        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(PlayerError::FileNotFound(path.to_path_buf()));
        }

        let generation = {
            let mut shared = self.lock();
            shared.generation += 1;
            shared.state = PlaybackState::Buffering;
            shared.current_file = Some(path.to_path_buf());
            shared.generation
        };

        if let Err(e) = self.wait_until_playable(path, generation).await {
            self.reset_if_current(generation);
            return Err(e);
        }

        let child = Command::new(self.program())
            .args(self.backend.args(path))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(source) => {
                warn!(program = self.program(), error = %source, "failed to start player");
                self.reset_if_current(generation);
                return Err(PlayerError::Spawn {
                    program: self.program().to_string(),
                    source,
                });
            }
        };

        let (kill, killed) = oneshot::channel();
        {
            let mut shared = self.lock();
            if shared.generation != generation {
                // stop() won the race; the child dies with this handle
                return Err(PlayerError::Interrupted);
            }
            shared.state = PlaybackState::Playing;
            shared.started_at = Some(Instant::now());
            shared.kill = Some(kill);
            shared.ticker = Some(tokio::spawn(tick(
                Arc::clone(&self.shared),
                generation,
                self.config.progress_interval(),
            )));
        }

        info!(file = %path.display(), backend = %self.backend, "playback started");
        tokio::spawn(monitor(
            child,
            killed,
            Arc::clone(&self.shared),
            generation,
            path.to_path_buf(),
        ));

        Ok(())
    }

    /// Kill the player process if any and go Idle. Safe to call at any time.
    pub fn stop(&self) {
        let mut shared = self.lock();
        shared.release();
        shared.current_file = None;
        if shared.state != PlaybackState::Idle {
            debug!(from = ?shared.state, "playback stopped");
        }
        shared.state = PlaybackState::Idle;
    }

    /// Stop, remembering the file so `resume` can start it again.
    /// Always ends up Paused; with nothing remembered `resume` does nothing.
    pub fn pause(&self) {
        let mut shared = self.lock();
        shared.release();
        shared.state = PlaybackState::Paused;
        debug!(file = ?shared.current_file, "playback paused");
    }

    /// Replay the paused file from the beginning. No-op unless Paused.
    pub async fn resume(&self) -> Result<(), PlayerError> {
        let file = {
            let shared = self.lock();
            match (&shared.state, &shared.current_file) {
                (PlaybackState::Paused, Some(file)) => file.clone(),
                _ => return Ok(()),
            }
        };
        self.play(&file).await
    }

    pub fn state(&self) -> PlaybackState {
        self.lock().state
    }

    pub fn is_playing(&self) -> bool {
        self.state() == PlaybackState::Playing
    }

    pub fn current_file(&self) -> Option<PathBuf> {
        self.lock().current_file.clone()
    }

    /// Seconds since the current play started
    pub fn elapsed_secs(&self) -> Option<u64> {
        self.lock().started_at.map(|at| at.elapsed().as_secs())
    }

    async fn wait_until_playable(&self, path: &Path, generation: u64) -> Result<(), PlayerError> {
        let deadline = Instant::now() + self.config.readiness_timeout();

        loop {
            if self.lock().generation != generation {
                return Err(PlayerError::Interrupted);
            }

            if let Ok(meta) = tokio::fs::metadata(path).await {
                if meta.len() >= self.config.min_playable_bytes {
                    return Ok(());
                }
            }

            if Instant::now() >= deadline {
                break;
            }
            time::sleep(self.config.readiness_poll()).await;
        }

        if self.lock().generation != generation {
            return Err(PlayerError::Interrupted);
        }

        // Out of time: a short file is still worth a try, a missing one isn't
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            debug!(file = %path.display(), "readiness deadline passed, playing anyway");
            Ok(())
        } else {
            Err(PlayerError::FileUnavailable(path.to_path_buf()))
        }
    }

    fn reset_if_current(&self, generation: u64) {
        let mut shared = self.lock();
        if shared.generation == generation {
            shared.release();
            shared.current_file = None;
            shared.state = PlaybackState::Idle;
        }
    }
}

async fn monitor(
    mut child: Child,
    killed: oneshot::Receiver<()>,
    shared: Arc<Mutex<Shared>>,
    generation: u64,
    file: PathBuf,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = killed => {
            if let Err(e) = child.kill().await {
                debug!(error = %e, "player process already gone");
            }
            return;
        }
    };

    let mut guard = shared.lock().unwrap_or_else(PoisonError::into_inner);
    if guard.generation != generation || guard.state != PlaybackState::Playing {
        return;
    }

    match status {
        Ok(status) => debug!(%status, file = %file.display(), "player exited"),
        Err(e) => warn!(error = %e, "failed waiting on player"),
    }

    guard.release();
    guard.current_file = None;
    guard.state = PlaybackState::Finished;
    guard.send(PlayerEvent::Finished { file });
}

async fn tick(shared: Arc<Mutex<Shared>>, generation: u64, period: std::time::Duration) {
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval.tick().await;

    loop {
        interval.tick().await;
        let guard = shared.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.generation != generation || guard.state != PlaybackState::Playing {
            break;
        }
        let elapsed_secs = guard
            .started_at
            .map(|at| at.elapsed().as_secs())
            .unwrap_or(0);
        guard.send(PlayerEvent::Progress { elapsed_secs });
    }
}
