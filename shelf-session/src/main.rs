//! Shelf session runner (shelf-session) - Main entry point
//!
//! Headless runner for the session engine: loads a book (a directory of audio
//! files or an explicit file list) into the clock-driven virtual engine, resumes
//! the saved position, prints every session event as one JSON line on stdout and
//! saves the position on Ctrl+C / SIGTERM.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use shelf_session::config::{Config, ConfigOverrides};
use shelf_session::engine::{EngineHandle, VirtualEngine};
use shelf_session::model::{PlaylistMetadata, TrackRef};
use shelf_session::persistence::SqliteSettingsStore;
use shelf_session::{SessionService, SetPlaylistRequest};
use shelf_common::events::EventBus;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// File extensions picked up when scanning a book directory
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "m4a", "m4b", "aac", "ogg", "opus", "flac", "wav"];

/// Engine pump cadence of the virtual engine
const ENGINE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Command-line arguments for shelf-session
#[derive(Parser, Debug)]
#[command(name = "shelf-session")]
#[command(about = "Headless audiobook playback session runner")]
#[command(version)]
struct Args {
    /// Book directory, or the book's audio files in order
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Configuration file (TOML)
    #[arg(short, long, env = "SHELF_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database path
    #[arg(long, env = "SHELF_DATABASE")]
    database: Option<PathBuf>,

    /// Data folder
    #[arg(long)]
    data_folder: Option<PathBuf>,

    /// Book identifier (derived from the title or directory if omitted)
    #[arg(long)]
    group_id: Option<String>,

    /// Book title
    #[arg(long)]
    title: Option<String>,

    /// Start at this track instead of the saved position
    #[arg(long)]
    track: Option<usize>,

    /// Offset inside the start track, in seconds
    #[arg(long)]
    position_secs: Option<u64>,

    /// Duration assumed for every track by the virtual engine, in seconds
    #[arg(long, default_value = "600")]
    track_secs: u64,

    /// Virtual playback speed
    #[arg(long, default_value = "1.0")]
    speed: f32,

    /// Sleep timer in minutes
    #[arg(long)]
    sleep_minutes: Option<u64>,

    /// Enable the inactivity timer
    #[arg(long)]
    inactivity: bool,

    /// Load paused
    #[arg(long)]
    paused: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args
        .config
        .clone()
        .or_else(|| shelf_common::config::default_config_path().ok());
    let config = Config::load(
        config_path.as_deref(),
        ConfigOverrides {
            database_path: args.database.clone(),
            data_folder: args.data_folder.clone(),
        },
    )
    .await
    .context("Failed to load configuration")?;

    init_tracing(&config)?;
    info!(
        "Starting shelf-session {} ({}, built {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP")
    );
    info!("Database: {}", config.database_path.display());

    let tracks = collect_tracks(&args.inputs, args.track_secs * 1000)
        .await
        .context("Failed to collect tracks")?;
    if tracks.is_empty() {
        anyhow::bail!("No audio files found in {:?}", args.inputs);
    }
    info!("Found {} tracks", tracks.len());

    let mut engine = VirtualEngine::new();
    engine.set_speed(args.speed);
    let engine = EngineHandle::spawn(engine, ENGINE_POLL_INTERVAL);

    let events = Arc::new(EventBus::new(1000));
    let store = Arc::new(SqliteSettingsStore::new(config.db_pool.clone()));
    let session = SessionService::new(engine, store, Arc::clone(&events), config.runtime.clone())
        .start()
        .await;

    let mut rx = session.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => println!("{}", line),
                    Err(e) => warn!("Failed to encode event: {}", e),
                },
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Event printer lagged by {} events", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let request = SetPlaylistRequest {
        group_id: args.group_id.clone(),
        tracks,
        metadata: PlaylistMetadata {
            title: args.title.clone(),
            ..PlaylistMetadata::default()
        },
        target_index: args.track,
        target_position_ms: args.position_secs.map(|s| s * 1000),
    };
    session
        .set_playlist(request)
        .await
        .context("Failed to load playlist")?;

    if let Some(minutes) = args.sleep_minutes {
        session
            .start_sleep_timer(Duration::from_secs(minutes * 60))
            .await;
    }
    if args.inactivity {
        session.start_inactivity_timer(None);
    }
    if !args.paused {
        session.play().await.context("Failed to start playback")?;
    }

    shutdown_signal().await;

    session.shutdown().await;
    printer.abort();
    config.db_pool.close().await;

    info!("Shutdown complete");
    Ok(())
}

/// Registry + EnvFilter + fmt, to stderr or the configured log file
fn init_tracing(config: &Config) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("shelf_session={0},shelf_common={0}", config.logging.level).into());

    let file_layer = match &config.logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(std::sync::Mutex::new(file)),
            )
        }
        None => None,
    };
    let stderr_layer = file_layer
        .is_none()
        .then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .init();
    Ok(())
}

fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| AUDIO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Expand directories (sorted by file name) and keep explicit files in order
async fn collect_tracks(inputs: &[PathBuf], duration_ms: u64) -> Result<Vec<TrackRef>> {
    let mut paths = Vec::new();
    for input in inputs {
        if tokio::fs::metadata(input).await?.is_dir() {
            let mut found = Vec::new();
            let mut entries = tokio::fs::read_dir(input).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if is_audio_file(&path) {
                    found.push(path);
                }
            }
            found.sort();
            paths.extend(found);
        } else {
            paths.push(input.clone());
        }
    }

    Ok(paths
        .into_iter()
        .map(|path| {
            let title = path.file_stem().map(|s| s.to_string_lossy().to_string());
            let track = TrackRef::new(path.to_string_lossy().to_string()).with_duration(duration_ms);
            match title {
                Some(title) => track.with_title(title),
                None => track,
            }
        })
        .collect())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
