// External tool detection
// tubepipe shells out for everything, so check what's installed before starting

use super::player::PlayerBackend;
use super::DownloaderConfig;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemCheck {
    pub ytdlp: bool,
    pub audio_player: Option<PlayerBackend>,
    pub ffmpeg: bool,
}

impl SystemCheck {
    /// Everything needed to download and play
    pub fn is_ready(&self) -> bool {
        self.ytdlp && self.audio_player.is_some()
    }
}

/// Check for the resolver, a player and ffmpeg concurrently
pub async fn check_system_requirements(downloader: &DownloaderConfig) -> SystemCheck {
    let mut ytdlp = downloader.resolver_command();
    ytdlp.arg("--version");

    let (ytdlp, audio_player, ffmpeg) = futures::join!(
        succeeds(ytdlp),
        detect_player(),
        succeeds(tool_command("ffmpeg", &["-version"])),
    );

    let check = SystemCheck {
        ytdlp,
        audio_player,
        ffmpeg,
    };
    debug!(?check, "system requirements");
    check
}

/// ffplay wherever it exists, afplay (macOS) as the fallback
pub async fn detect_player() -> Option<PlayerBackend> {
    if succeeds(tool_command("ffplay", &["-version"])).await {
        return Some(PlayerBackend::Ffplay);
    }
    if succeeds(tool_command("which", &["afplay"])).await {
        return Some(PlayerBackend::Afplay);
    }
    None
}

/// Human-readable fixes for whatever is missing; empty when all is well
pub fn installation_instructions(check: &SystemCheck) -> Vec<String> {
    let mut instructions = Vec::new();

    if !check.ytdlp {
        instructions.push(
            "❌ yt-dlp not found. Install with: brew install yt-dlp (or pipx install yt-dlp)"
                .to_string(),
        );
    }

    if check.audio_player.is_none() {
        instructions.push(
            "❌ No audio player found. Install ffmpeg (provides ffplay) with: brew install ffmpeg"
                .to_string(),
        );
    }

    if !check.ffmpeg {
        instructions.push(
            "⚠️  ffmpeg not found. Some formats may not play. Install with: brew install ffmpeg"
                .to_string(),
        );
    }

    instructions
}

fn tool_command(program: &str, args: &[&str]) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd
}

async fn succeeds(mut cmd: Command) -> bool {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status()
        .await
        .map(|status| status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instructions_when_all_present() {
        let check = SystemCheck {
            ytdlp: true,
            audio_player: Some(PlayerBackend::Ffplay),
            ffmpeg: true,
        };
        assert!(check.is_ready());
        assert!(installation_instructions(&check).is_empty());
    }

    #[test]
    fn test_instructions_for_missing_tools() {
        let check = SystemCheck {
            ytdlp: false,
            audio_player: None,
            ffmpeg: false,
        };
        assert!(!check.is_ready());

        let instructions = installation_instructions(&check);
        assert_eq!(instructions.len(), 3);
        assert!(instructions[0].contains("yt-dlp"));
        assert!(instructions[1].contains("audio player"));
        assert!(instructions[2].contains("ffmpeg"));
    }

    #[test]
    fn test_missing_ffmpeg_alone_is_only_a_warning() {
        let check = SystemCheck {
            ytdlp: true,
            audio_player: Some(PlayerBackend::Afplay),
            ffmpeg: false,
        };
        assert!(check.is_ready());
        assert_eq!(installation_instructions(&check).len(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_resolver_check_uses_configured_command() {
        let working = DownloaderConfig {
            command: vec!["true".to_string()],
            ..DownloaderConfig::default()
        };
        assert!(check_system_requirements(&working).await.ytdlp);

        let missing = DownloaderConfig {
            command: vec!["/definitely/not/yt-dlp".to_string()],
            ..DownloaderConfig::default()
        };
        assert!(!check_system_requirements(&missing).await.ytdlp);
    }
}
