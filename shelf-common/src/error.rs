//! Common error types for the shelf crates

use thiserror::Error;

/// Common result type for shelf operations
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file missing or unreadable
    #[error("Configuration error: {0}")]
    Config(String),
}
