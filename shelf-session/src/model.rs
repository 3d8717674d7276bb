//! Session data model
//!
//! Tracks, playlist sessions and saved position records. These types carry no
//! behaviour beyond construction-time validation and identity comparison.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// One playable track of a book
///
/// Identity is the `id` string (absolute path or URL). Metadata fields are
/// explicit optionals; an absent field is `None`, never a missing key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackRef {
    /// Absolute path or URL
    pub id: String,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    /// Artwork path or URL
    pub artwork: Option<String>,
    /// Duration if already known to the host
    pub duration_ms: Option<u64>,
}

impl TrackRef {
    /// Track with an id and no metadata
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: None,
            artist: None,
            album: None,
            artwork: None,
            duration_ms: None,
        }
    }

    /// Builder-style duration setter
    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Builder-style title setter
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// True when `other_id` names the same track as this one
    pub fn same_track(&self, other_id: &str) -> bool {
        ids_match(&self.id, other_id)
    }
}

/// Compare two track identifiers
///
/// Identifiers match when they are equal, or when the shorter one is a path
/// suffix of the longer one (`file:///books/a.mp3` vs `/books/a.mp3`). A suffix
/// only counts on a path-segment boundary, so `ab.mp3` never matches `b.mp3`.
pub fn ids_match(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    let (long, short) = if a.len() >= b.len() { (a, b) } else { (b, a) };
    if short.is_empty() || !long.ends_with(short) {
        return false;
    }
    let head = &long[..long.len() - short.len()];
    short.starts_with('/') || head.ends_with('/')
}

/// Book-level metadata supplied with a playlist
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub artwork: Option<String>,
}

/// Loading lifecycle of a playlist session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadingState {
    NotLoading,
    Loading,
    Loaded,
}

/// The active playlist and its loading bookkeeping
///
/// `confirmed_count` only equals the number of engine tracks once the loader's
/// stability check has passed; cross-track seeks wait for that.
#[derive(Debug, Clone)]
pub struct PlaylistSession {
    /// Group (book) identifier
    pub group_id: String,
    /// Tracks in host order, shared read-only with loader tasks
    pub tracks: Arc<[TrackRef]>,
    pub metadata: PlaylistMetadata,
    pub requested_target_index: Option<usize>,
    pub requested_target_position_ms: Option<u64>,
    pub loading_state: LoadingState,
    pub confirmed_count: usize,
}

impl PlaylistSession {
    pub fn new(
        group_id: String,
        tracks: Arc<[TrackRef]>,
        metadata: PlaylistMetadata,
        requested_target_index: Option<usize>,
        requested_target_position_ms: Option<u64>,
    ) -> Self {
        Self {
            group_id,
            tracks,
            metadata,
            requested_target_index,
            requested_target_position_ms,
            loading_state: LoadingState::NotLoading,
            confirmed_count: 0,
        }
    }

    /// Index of the track whose id matches `content_id`
    pub fn resolve_index(&self, content_id: &str) -> Option<usize> {
        resolve_index(&self.tracks, content_id)
    }
}

/// Index of the first track whose id matches `content_id`
///
/// Exact matches win over suffix matches.
pub fn resolve_index(tracks: &[TrackRef], content_id: &str) -> Option<usize> {
    tracks
        .iter()
        .position(|t| t.id == content_id)
        .or_else(|| tracks.iter().position(|t| t.same_track(content_id)))
}

/// A saved playback position
///
/// Only constructed through [`PositionRecord::validated`], so a record always
/// satisfies `track_index < track_count` and `position_ms >= 0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionRecord {
    pub group_id: String,
    pub track_index: usize,
    pub position_ms: u64,
    pub saved_at: Instant,
}

impl PositionRecord {
    /// Build a record, or `None` if it would violate the position invariants
    pub fn validated(
        group_id: &str,
        track_index: usize,
        position_ms: i64,
        track_count: usize,
        saved_at: Instant,
    ) -> Option<Self> {
        if track_index >= track_count || position_ms < 0 {
            return None;
        }
        Some(Self {
            group_id: group_id.to_string(),
            track_index,
            position_ms: position_ms as u64,
            saved_at,
        })
    }
}
