// tubepipe - paste YouTube links, get a playing queue
// Bootstrap only: config, logging, dependency checks, then hand over to the TUI

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tubepipe::audio::system::{check_system_requirements, installation_instructions, SystemCheck};
use tubepipe::audio::{format_bytes, Cache, PlayerBackend};
use tubepipe::ui::App;
use tubepipe::Config;

#[derive(Parser)]
#[command(name = "tubepipe", version)]
#[command(about = "Terminal audio player for YouTube links - downloads progressively and keeps the queue playing")]
struct Args {
    /// Links to queue at start-up
    urls: Vec<String>,

    /// Check for yt-dlp, an audio player and ffmpeg, then exit
    #[arg(long)]
    check: bool,

    /// Enable developer logging (debug level for everything)
    #[arg(long)]
    dev: bool,

    /// Config file to use instead of the default location
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Audio player to use; detected when not given
    #[arg(long, value_enum)]
    player: Option<PlayerBackend>,

    /// Print cache location and size, then exit
    #[arg(long)]
    cache_info: bool,

    /// Delete every cached download, then exit
    #[arg(long)]
    clear_cache: bool,
}

fn init_logging(log_dir: &Path, dev: bool) -> Result<()> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    // Daily rotating file; the terminal belongs to the TUI
    let file_appender = tracing_appender::rolling::daily(log_dir, "tubepipe.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let default_filter = if dev { "debug" } else { "info,tubepipe=debug" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let subscriber = tracing_subscriber::fmt()
        .with_writer(file_writer)
        .with_target(true)
        .with_level(true)
        .with_ansi(false)
        .with_env_filter(filter)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    // Keep the writer alive for the whole run
    std::mem::forget(guard);

    Ok(())
}

fn print_report(check: &SystemCheck) {
    let mark = |ok: bool| if ok { "✅" } else { "❌" };
    println!("{} yt-dlp", mark(check.ytdlp));
    match check.audio_player {
        Some(backend) => println!("✅ audio player: {}", backend),
        None => println!("❌ audio player"),
    }
    println!("{} ffmpeg", mark(check.ffmpeg));
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load config - first run writes the defaults out
    let config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    init_logging(&config.log_dir(), args.dev)?;
    info!(cache = %config.cache_dir.display(), "tubepipe starting up");

    let cache = Cache::new(&config.cache_dir);
    if args.cache_info || args.clear_cache {
        if args.clear_cache {
            let freed = cache.size();
            cache.clear();
            println!("🗑️  Cleared {} from {}", format_bytes(freed), cache.dir().display());
        }
        if args.cache_info {
            println!("📁 Cache: {}", cache.dir().display());
            println!("💾 Size:  {}", format_bytes(cache.size()));
        }
        return Ok(());
    }

    let check = check_system_requirements(&config.downloader).await;
    let instructions = installation_instructions(&check);

    if args.check {
        print_report(&check);
        for line in &instructions {
            println!("{}", line);
        }
        if !check.is_ready() {
            std::process::exit(1);
        }
        return Ok(());
    }

    if !check.ytdlp {
        for line in &instructions {
            eprintln!("{}", line);
        }
        bail!("yt-dlp is required");
    }

    let backend = match args.player.or(config.player.backend).or(check.audio_player) {
        Some(backend) => backend,
        None => {
            for line in &instructions {
                eprintln!("{}", line);
            }
            bail!("No audio player available");
        }
    };
    info!(%backend, "using audio player");

    cache
        .init()
        .with_context(|| format!("Failed to create cache directory {}", cache.dir().display()))?;

    let mut app = App::new(&config, backend)?;
    app.queue_urls(&args.urls);
    app.run().await?;
    // restore the terminal before printing
    drop(app);

    println!("👋 Bye!");
    Ok(())
}
