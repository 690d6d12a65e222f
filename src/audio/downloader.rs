// Download pipeline - metadata lookup, then a streaming yt-dlp download into the cache
// Everything that happens is reported as DownloadEvents on a channel, in order:
// Metadata? Progress* (Complete | Error)

use super::cache::Cache;
use super::metadata::{MetadataResolver, VideoMetadata};
use super::DownloaderConfig;
use regex::Regex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

pub const CANCELLED_MESSAGE: &str = "Download cancelled";
pub const IN_PROGRESS_MESSAGE: &str = "Download already in progress";

/// Our own progress line so every field comes through, not just the ones
/// yt-dlp's default line happens to show
pub const PROGRESS_TEMPLATE: &str = "download:[progress] %(progress._percent_str)s|%(progress._downloaded_bytes_str)s|%(progress._total_bytes_str)s|%(progress._speed_str)s|%(progress._eta_str)s";

#[derive(Debug, Clone, PartialEq)]
pub struct DownloadProgress {
    pub percent: f32,
    // display strings, passed through as the tool printed them
    pub downloaded: String,
    pub total: String,
    pub speed: String,
    pub eta: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DownloadEvent {
    Metadata { video_id: String, metadata: VideoMetadata },
    Progress { video_id: String, progress: DownloadProgress },
    Complete { video_id: String, file_path: PathBuf },
    Error { video_id: String, message: String },
}

impl DownloadEvent {
    pub fn video_id(&self) -> &str {
        match self {
            DownloadEvent::Metadata { video_id, .. }
            | DownloadEvent::Progress { video_id, .. }
            | DownloadEvent::Complete { video_id, .. }
            | DownloadEvent::Error { video_id, .. } => video_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DownloadEvent::Complete { .. } | DownloadEvent::Error { .. })
    }
}

/// Pulls progress out of yt-dlp's stdout lines
#[derive(Debug, Clone)]
pub struct ProgressParser {
    templated: Option<Regex>,
    classic: Option<Regex>,
}

impl ProgressParser {
    pub fn new() -> Self {
        // Pattern 1: our --progress-template line
        // Example: "[progress]  45.0%|1.57MiB|3.50MiB|1.23MiB/s|00:02"
        let templated =
            Regex::new(r"^\[progress\]\s*(\d+(?:\.\d+)?)%\|([^|]*)\|([^|]*)\|([^|]*)\|([^|]*)$").ok();

        // Pattern 2: yt-dlp's stock line, in case the template isn't honoured
        // Example: "[download]  45.0% of    3.50MiB at    1.23MiB/s ETA 00:02"
        let classic = Regex::new(
            r"^\[download\]\s+(\d+(?:\.\d+)?)%.*?of\s+~?\s*([\d.]+\s*\w+).*?at\s+([\d.]+\s*\w+/s).*?ETA\s+([\d:]+)",
        )
        .ok();

        Self { templated, classic }
    }

    pub fn parse(&self, line: &str) -> Option<DownloadProgress> {
        let line = line.trim();

        if let Some(caps) = self.templated.as_ref().and_then(|re| re.captures(line)) {
            return Some(DownloadProgress {
                percent: caps[1].parse().ok()?,
                downloaded: caps[2].trim().to_string(),
                total: caps[3].trim().to_string(),
                speed: caps[4].trim().to_string(),
                eta: caps[5].trim().to_string(),
            });
        }

        let caps = self.classic.as_ref()?.captures(line)?;
        Some(DownloadProgress {
            percent: caps[1].parse().ok()?,
            downloaded: String::new(),
            total: caps[2].to_string(),
            speed: caps[3].to_string(),
            eta: caps[4].to_string(),
        })
    }
}

impl Default for ProgressParser {
    fn default() -> Self {
        Self::new()
    }
}

// One in-flight download. Dropping `cancel` wakes the task so it kills its child.
struct InFlight {
    generation: u64,
    _cancel: oneshot::Sender<()>,
}

type InFlightMap = Arc<Mutex<HashMap<String, InFlight>>>;

/// Releases the in-flight slot however the download ends, including a
/// dropped future. Only touches the slot it reserved.
struct InFlightGuard {
    in_flight: InFlightMap,
    video_id: String,
    generation: u64,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut in_flight = lock(&self.in_flight);
        if in_flight
            .get(&self.video_id)
            .map_or(false, |entry| entry.generation == self.generation)
        {
            in_flight.remove(&self.video_id);
        }
    }
}

fn lock(in_flight: &InFlightMap) -> MutexGuard<'_, HashMap<String, InFlight>> {
    in_flight.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone)]
pub struct Downloader {
    config: DownloaderConfig,
    cache: Cache,
    resolver: MetadataResolver,
    parser: ProgressParser,
    in_flight: InFlightMap,
    generations: Arc<AtomicU64>,
}

impl Downloader {
    pub fn new(config: DownloaderConfig, cache: Cache) -> Self {
        Self {
            resolver: MetadataResolver::new(config.clone()),
            config,
            cache,
            parser: ProgressParser::new(),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            generations: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Fetch one video into the cache, reporting through `events`.
    ///
    /// Exactly one terminal event is sent. A second call for an id that is
    /// already downloading gets an immediate error and spawns nothing.
    pub async fn download(
        &self,
        url: &str,
        video_id: &str,
        events: mpsc::UnboundedSender<DownloadEvent>,
    ) {
        // Reserve before the first await so concurrent duplicates can't both pass
        let Some((guard, mut cancelled)) = self.reserve(video_id) else {
            warn!(video_id, "download already in progress");
            let _ = events.send(DownloadEvent::Error {
                video_id: video_id.to_string(),
                message: IN_PROGRESS_MESSAGE.to_string(),
            });
            return;
        };

        let terminal = match self.run(url, video_id, &events, &mut cancelled).await {
            Ok(file_path) => {
                info!(video_id, path = %file_path.display(), "download complete");
                DownloadEvent::Complete {
                    video_id: video_id.to_string(),
                    file_path,
                }
            }
            Err(message) => {
                warn!(video_id, error = %message, "download failed");
                DownloadEvent::Error {
                    video_id: video_id.to_string(),
                    message,
                }
            }
        };

        // Free the slot first so a retry triggered by this event is accepted
        drop(guard);
        let _ = events.send(terminal);
    }

    /// Stop an in-flight download. The running task reports
    /// `Error { message: "Download cancelled" }`. Unknown ids are ignored.
    pub fn cancel(&self, video_id: &str) {
        if lock(&self.in_flight).remove(video_id).is_some() {
            info!(video_id, "cancelling download");
        }
    }

    pub fn cancel_all(&self) {
        let drained: Vec<String> = lock(&self.in_flight).drain().map(|(id, _)| id).collect();
        if !drained.is_empty() {
            info!(count = drained.len(), "cancelled all downloads");
        }
    }

    pub fn is_downloading(&self, video_id: &str) -> bool {
        lock(&self.in_flight).contains_key(video_id)
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    fn reserve(&self, video_id: &str) -> Option<(InFlightGuard, oneshot::Receiver<()>)> {
        let mut in_flight = lock(&self.in_flight);
        if in_flight.contains_key(video_id) {
            return None;
        }

        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let (cancel, cancelled) = oneshot::channel();
        in_flight.insert(
            video_id.to_string(),
            InFlight {
                generation,
                _cancel: cancel,
            },
        );

        let guard = InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
            video_id: video_id.to_string(),
            generation,
        };
        Some((guard, cancelled))
    }

    async fn run(
        &self,
        url: &str,
        video_id: &str,
        events: &mpsc::UnboundedSender<DownloadEvent>,
        cancelled: &mut oneshot::Receiver<()>,
    ) -> Result<PathBuf, String> {
        // 1. Metadata first - it tells us the extension we'll end up with
        let metadata = tokio::select! {
            result = self.resolver.resolve(url) => result.map_err(|e| e.to_string())?,
            _ = &mut *cancelled => return Err(CANCELLED_MESSAGE.to_string()),
        };
        let _ = events.send(DownloadEvent::Metadata {
            video_id: video_id.to_string(),
            metadata: metadata.clone(),
        });

        // 2. The download itself
        let output_template = self.cache.output_template(video_id);
        let mut child = self
            .config
            .resolver_command()
            .args(["-f", self.config.audio_format.as_str(), "-o"])
            .arg(&output_template)
            .args(["--newline", "--progress", "--no-playlist"])
            .args(["--progress-template", PROGRESS_TEMPLATE])
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("Failed to start {}: {}", self.config.program(), e))?;

        debug!(video_id, pid = ?child.id(), "download process started");

        // 3. Stream progress while draining stderr; the child dies with this
        // future if cancellation wins the race below
        let exchange = async move {
            let stdout = child.stdout.take();
            let stderr = child.stderr.take();

            let read_progress = async {
                let Some(stdout) = stdout else { return };
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if let Some(progress) = self.parser.parse(&line) {
                        let _ = events.send(DownloadEvent::Progress {
                            video_id: video_id.to_string(),
                            progress,
                        });
                    }
                }
            };

            let ((), diagnostics) = futures::join!(read_progress, read_all(stderr));
            (child.wait().await, diagnostics)
        };

        let (status, diagnostics) = tokio::select! {
            outcome = exchange => outcome,
            _ = &mut *cancelled => return Err(CANCELLED_MESSAGE.to_string()),
        };

        // 4. Exit status decides the terminal event
        match status {
            Ok(status) if status.success() => Ok(self.cache.path_for(video_id, &metadata.ext)),
            Ok(status) => {
                let diagnostics = diagnostics.trim();
                Err(if diagnostics.is_empty() {
                    format!("Download failed ({})", status)
                } else {
                    diagnostics.to_string()
                })
            }
            Err(e) => Err(format!("Download process error: {}", e)),
        }
    }
}

async fn read_all<R: AsyncRead + Unpin>(reader: Option<R>) -> String {
    let mut buffer = Vec::new();
    if let Some(mut reader) = reader {
        let _ = reader.read_to_end(&mut buffer).await;
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_template_line() {
        let parser = ProgressParser::new();
        let progress = parser
            .parse("[progress]  45.0%|1.57MiB|3.50MiB|1.23MiB/s|00:02")
            .unwrap();
        assert_eq!(progress.percent, 45.0);
        assert_eq!(progress.downloaded, "1.57MiB");
        assert_eq!(progress.total, "3.50MiB");
        assert_eq!(progress.speed, "1.23MiB/s");
        assert_eq!(progress.eta, "00:02");
    }

    #[test]
    fn test_parse_stock_line() {
        let parser = ProgressParser::new();
        let progress = parser
            .parse("[download]  45.0% of    3.50MiB at    1.23MiB/s ETA 00:02")
            .unwrap();
        assert_eq!(progress.percent, 45.0);
        assert_eq!(progress.total, "3.50MiB");
        assert_eq!(progress.speed, "1.23MiB/s");
        assert_eq!(progress.eta, "00:02");
        assert_eq!(progress.downloaded, "");

        let estimated = parser
            .parse("[download]   7.3% of ~  10.02MiB at  512.00KiB/s ETA 00:18")
            .unwrap();
        assert_eq!(estimated.total, "10.02MiB");
    }

    #[test]
    fn test_parse_ignores_other_lines() {
        let parser = ProgressParser::new();
        assert!(parser.parse("[youtube] abc: Downloading webpage").is_none());
        assert!(parser.parse("[download] Destination: /tmp/abc.webm").is_none());
        assert!(parser.parse("[progress] N/A|N/A|N/A|N/A|N/A").is_none());
        assert!(parser.parse("").is_none());
    }

    #[test]
    fn test_event_helpers() {
        let event = DownloadEvent::Complete {
            video_id: "abc".to_string(),
            file_path: PathBuf::from("/tmp/abc.webm"),
        };
        assert_eq!(event.video_id(), "abc");
        assert!(event.is_terminal());
        assert!(!DownloadEvent::Progress {
            video_id: "abc".to_string(),
            progress: ProgressParser::new().parse("[progress] 1.0%|a|b|c|d").unwrap(),
        }
        .is_terminal());
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use std::fs;
        use std::time::Duration;
        use tempfile::TempDir;

        // Stand-in for yt-dlp: answers --print with a record, otherwise
        // prints progress and writes the file named by -o
        const FAKE_YTDLP: &str = r#"
case "$*" in
  *--print*)
    [ -n "$META_DELAY" ] && sleep "$META_DELAY"
    if [ -n "$META_FAIL" ]; then echo "ERROR: Video unavailable" >&2; exit 1; fi
    echo "abc|||Fake Song|||212|||webm"
    exit 0;;
esac
out=""
prev=""
for arg in "$@"; do
  [ "$prev" = "-o" ] && out="$arg"
  prev="$arg"
done
file=$(printf '%s' "$out" | sed 's/%(ext)s/webm/')
echo "[youtube] abc: Downloading webpage"
echo "[progress]  10.0%|100.00KiB|1.00MiB|500.00KiB/s|00:02"
echo "[download]  50.0% of    1.00MiB at  500.00KiB/s ETA 00:01"
[ -n "$DL_DELAY" ] && sleep "$DL_DELAY"
if [ -n "$DL_FAIL" ]; then echo "ERROR: fragment 3 not found" >&2; exit 2; fi
echo "[progress] 100.0%|1.00MiB|1.00MiB|500.00KiB/s|00:00"
printf 'audio' > "$file"
exit 0
"#;

        // env-driven behaviour, wrapped with `sh -c` so nothing has to be chmod'ed
        fn downloader(tmp: &TempDir, env: &str) -> Downloader {
            let script = tmp.path().join("fake-yt-dlp.sh");
            fs::write(&script, FAKE_YTDLP).unwrap();
            let config = DownloaderConfig {
                command: vec![
                    "sh".to_string(),
                    "-c".to_string(),
                    format!("{} sh {} \"$@\"", env, script.display()),
                    "fake-yt-dlp".to_string(),
                ],
                ..DownloaderConfig::default()
            };
            let cache = Cache::new(tmp.path().join("cache"));
            cache.init().unwrap();
            Downloader::new(config, cache)
        }

        fn drain(rx: &mut mpsc::UnboundedReceiver<DownloadEvent>) -> Vec<DownloadEvent> {
            let mut events = Vec::new();
            while let Ok(event) = rx.try_recv() {
                events.push(event);
            }
            events
        }

        fn assert_well_ordered(events: &[DownloadEvent]) {
            let terminal: Vec<_> = events.iter().filter(|e| e.is_terminal()).collect();
            assert_eq!(terminal.len(), 1, "exactly one terminal event: {:?}", events);
            assert!(events.last().unwrap().is_terminal());

            let metadata_at: Vec<usize> = events
                .iter()
                .enumerate()
                .filter(|(_, e)| matches!(e, DownloadEvent::Metadata { .. }))
                .map(|(i, _)| i)
                .collect();
            assert!(metadata_at.len() <= 1);
            if let Some(&at) = metadata_at.first() {
                assert_eq!(at, 0, "metadata must come first: {:?}", events);
            }
        }

        #[tokio::test]
        async fn test_successful_download_event_order() {
            let tmp = TempDir::new().unwrap();
            let downloader = downloader(&tmp, "");
            let (tx, mut rx) = mpsc::unbounded_channel();

            downloader.download("https://youtu.be/abc", "abc", tx).await;
            let events = drain(&mut rx);
            assert_well_ordered(&events);

            match &events[0] {
                DownloadEvent::Metadata { metadata, .. } => {
                    assert_eq!(metadata.title, "Fake Song");
                    assert_eq!(metadata.duration_secs, 212);
                }
                other => panic!("expected metadata, got {:?}", other),
            }

            let percents: Vec<f32> = events
                .iter()
                .filter_map(|e| match e {
                    DownloadEvent::Progress { progress, .. } => Some(progress.percent),
                    _ => None,
                })
                .collect();
            assert_eq!(percents, vec![10.0, 50.0, 100.0]);

            let expected = downloader.cache().path_for("abc", "webm");
            assert_eq!(
                events.last().unwrap(),
                &DownloadEvent::Complete {
                    video_id: "abc".to_string(),
                    file_path: expected.clone(),
                }
            );
            assert_eq!(fs::read_to_string(expected).unwrap(), "audio");
            assert!(downloader.cache().is_cached("abc"));
            assert!(!downloader.is_downloading("abc"));
        }

        #[tokio::test]
        async fn test_metadata_failure_reports_stderr() {
            let tmp = TempDir::new().unwrap();
            let downloader = downloader(&tmp, "META_FAIL=1");
            let (tx, mut rx) = mpsc::unbounded_channel();

            downloader.download("https://youtu.be/abc", "abc", tx).await;
            let events = drain(&mut rx);

            assert_eq!(
                events,
                vec![DownloadEvent::Error {
                    video_id: "abc".to_string(),
                    message: "ERROR: Video unavailable".to_string(),
                }]
            );
            assert!(!downloader.is_downloading("abc"));
        }

        #[tokio::test]
        async fn test_download_failure_after_metadata() {
            let tmp = TempDir::new().unwrap();
            let downloader = downloader(&tmp, "DL_FAIL=1");
            let (tx, mut rx) = mpsc::unbounded_channel();

            downloader.download("https://youtu.be/abc", "abc", tx).await;
            let events = drain(&mut rx);
            assert_well_ordered(&events);

            assert!(matches!(events[0], DownloadEvent::Metadata { .. }));
            match events.last().unwrap() {
                DownloadEvent::Error { message, .. } => {
                    assert_eq!(message, "ERROR: fragment 3 not found")
                }
                other => panic!("expected error, got {:?}", other),
            }
            assert!(!downloader.cache().is_cached("abc"));
        }

        #[tokio::test]
        async fn test_concurrent_duplicate_is_rejected() {
            let tmp = TempDir::new().unwrap();
            let downloader = downloader(&tmp, "META_DELAY=0.3");
            let (first_tx, mut first_rx) = mpsc::unbounded_channel();
            let (second_tx, mut second_rx) = mpsc::unbounded_channel();

            tokio::join!(
                downloader.download("https://youtu.be/abc", "abc", first_tx),
                downloader.download("https://youtu.be/abc", "abc", second_tx),
            );

            assert_eq!(
                drain(&mut second_rx),
                vec![DownloadEvent::Error {
                    video_id: "abc".to_string(),
                    message: IN_PROGRESS_MESSAGE.to_string(),
                }]
            );
            let first = drain(&mut first_rx);
            assert_well_ordered(&first);
            assert!(matches!(first.last(), Some(DownloadEvent::Complete { .. })));
        }

        #[tokio::test]
        async fn test_slot_is_released_for_retry() {
            let tmp = TempDir::new().unwrap();
            let downloader = downloader(&tmp, "DL_FAIL=1");
            let (tx, mut rx) = mpsc::unbounded_channel();

            downloader.download("https://youtu.be/abc", "abc", tx.clone()).await;
            downloader.download("https://youtu.be/abc", "abc", tx).await;

            let errors: Vec<String> = drain(&mut rx)
                .into_iter()
                .filter_map(|e| match e {
                    DownloadEvent::Error { message, .. } => Some(message),
                    _ => None,
                })
                .collect();
            assert_eq!(errors.len(), 2);
            assert!(errors.iter().all(|m| m != IN_PROGRESS_MESSAGE));
        }

        #[tokio::test]
        async fn test_cancel_reports_cancelled() {
            let tmp = TempDir::new().unwrap();
            let downloader = downloader(&tmp, "DL_DELAY=30");
            let (tx, mut rx) = mpsc::unbounded_channel();

            let task = {
                let downloader = downloader.clone();
                tokio::spawn(async move {
                    downloader.download("https://youtu.be/abc", "abc", tx).await;
                })
            };

            // wait until the download process is underway
            loop {
                match rx.recv().await {
                    Some(DownloadEvent::Progress { .. }) => break,
                    Some(_) => continue,
                    None => panic!("channel closed early"),
                }
            }
            assert!(downloader.is_downloading("abc"));

            downloader.cancel("abc");
            assert!(!downloader.is_downloading("abc"));

            let terminal = tokio::time::timeout(Duration::from_secs(5), async {
                loop {
                    match rx.recv().await {
                        Some(event) if event.is_terminal() => return event,
                        Some(_) => continue,
                        None => panic!("no terminal event"),
                    }
                }
            })
            .await
            .expect("cancel should end the download promptly");

            assert_eq!(
                terminal,
                DownloadEvent::Error {
                    video_id: "abc".to_string(),
                    message: CANCELLED_MESSAGE.to_string(),
                }
            );
            task.await.unwrap();
        }

        #[tokio::test]
        async fn test_cancel_unknown_is_noop() {
            let tmp = TempDir::new().unwrap();
            let downloader = downloader(&tmp, "");
            downloader.cancel("nothing-here");
            downloader.cancel_all();
            assert!(!downloader.is_downloading("nothing-here"));
        }
    }
}
