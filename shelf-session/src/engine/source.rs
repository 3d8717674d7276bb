//! Media sources
//!
//! The core does not build audio byte sources itself; it only decides between a
//! network and a local strategy from the URI scheme and checks that local files
//! exist before handing them to the engine.

use crate::error::SourceError;
use crate::model::TrackRef;
use async_trait::async_trait;
use std::path::PathBuf;

/// Byte transport strategy for a source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Streamed over HTTP(S)
    Network,
    /// Read from the local filesystem or a local content provider
    Local,
}

/// A source ready to be inserted into the engine playlist
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSource {
    /// Track id the source was built from
    pub uri: String,
    pub kind: SourceKind,
    /// Host-supplied duration, if any
    pub duration_ms: Option<u64>,
    pub title: Option<String>,
}

/// Builds engine sources for tracks
///
/// Called concurrently from loader worker tasks.
#[async_trait]
pub trait SourceFactory: Send + Sync {
    async fn build(&self, track: &TrackRef) -> Result<MediaSource, SourceError>;
}

/// Scheme-routing source factory
///
/// - `http://`, `https://` -> [`SourceKind::Network`], no probing
/// - `file://`, bare paths -> [`SourceKind::Local`], file must exist
/// - `content://` -> [`SourceKind::Local`], resolved by the engine
/// - anything else -> [`SourceError::Unsupported`]
#[derive(Debug, Clone, Default)]
pub struct DefaultSourceFactory;

impl DefaultSourceFactory {
    pub fn new() -> Self {
        Self
    }

    /// Classify an id by scheme; returns the local path for filesystem ids
    fn classify(id: &str) -> Result<(SourceKind, Option<PathBuf>), SourceError> {
        let lower = id.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            return Ok((SourceKind::Network, None));
        }
        if lower.starts_with("content://") {
            return Ok((SourceKind::Local, None));
        }
        if let Some(path) = id.strip_prefix("file://") {
            return Ok((SourceKind::Local, Some(PathBuf::from(path))));
        }
        match id.find("://") {
            Some(_) => Err(SourceError::Unsupported(id.to_string())),
            None => Ok((SourceKind::Local, Some(PathBuf::from(id)))),
        }
    }
}

#[async_trait]
impl SourceFactory for DefaultSourceFactory {
    async fn build(&self, track: &TrackRef) -> Result<MediaSource, SourceError> {
        let (kind, path) = Self::classify(&track.id)?;

        if let Some(path) = path {
            match tokio::fs::metadata(&path).await {
                Ok(meta) if meta.is_file() => {}
                Ok(_) => return Err(SourceError::Unsupported(track.id.clone())),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(SourceError::Missing(track.id.clone()))
                }
                Err(e) => return Err(SourceError::Io(e.to_string())),
            }
        }

        Ok(MediaSource {
            uri: track.id.clone(),
            kind,
            duration_ms: track.duration_ms,
            title: track.title.clone(),
        })
    }
}
