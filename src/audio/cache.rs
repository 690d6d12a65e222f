// On-disk audio cache - one flat directory, files named <video_id>.<ext>
// No index file: a directory scan is the source of truth

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const PARTIAL_SUFFIXES: [&str; 2] = [".part", ".ytdl"];

#[derive(Debug, Clone)]
pub struct Cache {
    dir: PathBuf,
}

impl Cache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Create the cache directory if it isn't there yet
    pub fn init(&self) -> std::io::Result<()> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir)?;
            info!("Created cache directory: {}", self.dir.display());
        }
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where a finished download for this id and extension lands
    pub fn path_for(&self, video_id: &str, ext: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", video_id, ext))
    }

    /// yt-dlp output template for this id - it fills in the extension itself
    pub fn output_template(&self, video_id: &str) -> PathBuf {
        self.dir.join(format!("{}.%(ext)s", video_id))
    }

    /// First cached file whose name starts with the id.
    /// Prefix match so any container extension counts; yt-dlp's in-progress
    /// files (`.part`, `.ytdl`) don't.
    pub fn cached_path(&self, video_id: &str) -> Option<PathBuf> {
        if video_id.is_empty() {
            return None;
        }

        let found = self
            .entries()
            .into_iter()
            .find(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .map_or(false, |name| {
                        name.starts_with(video_id) && !is_partial(name)
                    })
            });

        if let Some(path) = &found {
            debug!(video_id, path = %path.display(), "cache hit");
        }
        found
    }

    pub fn is_cached(&self, video_id: &str) -> bool {
        self.cached_path(video_id).is_some()
    }

    /// Total bytes on disk. A missing directory counts as empty.
    pub fn size(&self) -> u64 {
        self.entries()
            .iter()
            .filter_map(|path| fs::metadata(path).ok())
            .map(|metadata| metadata.len())
            .sum()
    }

    /// Delete every cached file. Failures are logged, never raised.
    pub fn clear(&self) {
        let mut removed = 0;
        for path in self.entries() {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove cached file {}: {}", path.display(), e),
            }
        }
        info!("Cleared {} cached files from {}", removed, self.dir.display());
    }

    // Regular files directly inside the cache dir, sorted by name
    fn entries(&self) -> Vec<PathBuf> {
        if !self.dir.exists() {
            return Vec::new();
        }

        WalkDir::new(&self.dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .collect()
    }
}

fn is_partial(name: &str) -> bool {
    PARTIAL_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

/// Human-readable size: base 1024, up to two decimals, trailing zeros dropped
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];

    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut exponent = 0;
    let mut scaled = bytes;
    while scaled >= 1024 && exponent < UNITS.len() - 1 {
        scaled /= 1024;
        exponent += 1;
    }
    let value = bytes as f64 / 1024f64.powi(exponent as i32);

    // Round to two places, then let the float formatter drop what's left over
    let rounded = (value * 100.0).round() / 100.0;
    format!("{} {}", rounded, UNITS[exponent])
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1024), "1 KB");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(1234), "1.21 KB");
        assert_eq!(format_bytes(1048576), "1 MB");
        assert_eq!(format_bytes(1572864), "1.5 MB");
        assert_eq!(format_bytes(52428800), "50 MB");
        assert_eq!(format_bytes(1073741824), "1 GB");
    }

    #[test]
    fn test_format_bytes_caps_at_gigabytes() {
        assert_eq!(format_bytes(2 * 1024 * 1024 * 1024 * 1024), "2048 GB");
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let tmp = TempDir::new().unwrap();
        let cache = Cache::new(tmp.path().join("nope"));

        assert_eq!(cache.cached_path("abc"), None);
        assert!(!cache.is_cached("abc"));
        assert_eq!(cache.size(), 0);
        cache.clear(); // must not panic
    }

    #[test]
    fn test_prefix_lookup_and_size() {
        let tmp = TempDir::new().unwrap();
        let cache = Cache::new(tmp.path().join("cache"));
        cache.init().unwrap();

        fs::write(cache.path_for("abc", "webm"), vec![0u8; 100]).unwrap();
        fs::write(cache.path_for("xyz", "opus"), vec![0u8; 50]).unwrap();

        assert_eq!(cache.cached_path("abc"), Some(cache.dir().join("abc.webm")));
        assert!(cache.is_cached("xyz"));
        assert!(!cache.is_cached("qqq"));
        assert_eq!(cache.size(), 150);

        cache.clear();
        assert_eq!(cache.size(), 0);
        assert!(!cache.is_cached("abc"));
        assert!(cache.dir().exists());
    }

    #[test]
    fn test_in_progress_download_is_not_a_hit() {
        let tmp = TempDir::new().unwrap();
        let cache = Cache::new(tmp.path());
        fs::write(cache.dir().join("abc.webm.part"), b"half").unwrap();

        assert!(!cache.is_cached("abc"));
        // still counted and cleared
        assert_eq!(cache.size(), 4);
    }

    #[test]
    fn test_output_template() {
        let cache = Cache::new("/tmp/c");
        assert_eq!(cache.output_template("abc"), PathBuf::from("/tmp/c/abc.%(ext)s"));
    }
}
