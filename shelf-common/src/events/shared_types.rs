//! Shared type definitions for event data
//!
//! Common structs used across multiple event types.

use serde::{Deserialize, Serialize};

/// Point-in-time view of the playback engine, published to the host
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaybackSnapshot {
    /// Whether audio is audibly progressing
    pub is_playing: bool,
    /// Offset inside the current track in milliseconds
    pub position_ms: u64,
    /// Duration of the current track, if known
    pub duration_ms: Option<u64>,
    /// Current track index in the host's playlist coordinates
    pub current_index: Option<usize>,
    /// Playback speed multiplier
    pub speed: f32,
    /// Buffered position in milliseconds
    pub buffered_ms: u64,
}
