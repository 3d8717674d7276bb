//! Error types for shelf-session
//!
//! Defines module-specific error types using thiserror for clear error propagation.
//! Only [`LoadError`] is ever surfaced to the host; every other failure kind is
//! logged and absorbed at the task boundary that produced it.

use thiserror::Error;

/// Main error type for shelf-session
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database connection or query errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Playlist could not be loaded
    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    /// Playback engine errors
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Primary persistence channel errors
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Durable store errors
    #[error("Store error: {0}")]
    Store(String),
}

/// Convenience Result type using shelf-session Error
pub type Result<T> = std::result::Result<T, Error>;

/// Hard playlist-load failures (the only failure kind reported to the host)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    /// Host supplied no tracks
    #[error("playlist is empty")]
    EmptyPlaylist,

    /// The first track could not be turned into a playable source
    #[error("first track {id} could not be prepared: {reason}")]
    FirstTrack { id: String, reason: String },

    /// The engine failed while the load was being set up
    #[error("engine failed during load: {0}")]
    Engine(String),
}

/// Failures building a media source for one track
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// Local file does not exist
    #[error("file not found: {0}")]
    Missing(String),

    /// URI scheme the engine cannot play
    #[error("unsupported source: {0}")]
    Unsupported(String),

    /// I/O failure while checking the source
    #[error("source I/O error: {0}")]
    Io(String),
}

/// Failures reported by the playback engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Insert/seek outside the current playlist
    #[error("index {index} out of range for playlist of {len}")]
    IndexOutOfRange { index: usize, len: usize },

    /// Engine resources were released
    #[error("engine released")]
    Released,

    /// Engine owner task has stopped
    #[error("engine task closed")]
    Closed,
}

/// Failures of the primary (host) persistence channel
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// Host does not implement position saving
    #[error("host does not implement position saving")]
    Unimplemented,

    /// Host answered with an error
    #[error("host rejected save: {0}")]
    Rejected(String),

    /// No acknowledgement within the ack window
    #[error("no acknowledgement within {0} ms")]
    Timeout(u64),

    /// Host side of the channel is gone
    #[error("channel closed")]
    Closed,
}
