//! Playback-related type definitions

use serde::{Deserialize, Serialize};

/// Playback state enumeration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Playing,
    Paused,
}

impl PlaybackState {
    /// Map an engine `is_playing` flag to a state
    pub fn from_playing(is_playing: bool) -> Self {
        if is_playing {
            PlaybackState::Playing
        } else {
            PlaybackState::Paused
        }
    }
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackState::Playing => write!(f, "playing"),
            PlaybackState::Paused => write!(f, "paused"),
        }
    }
}

/// Which persistence path accepted a saved position
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SavePath {
    /// Host application acknowledged the save
    Primary,
    /// Written directly into the durable key/value store
    Fallback,
}

impl std::fmt::Display for SavePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SavePath::Primary => write!(f, "primary"),
            SavePath::Fallback => write!(f, "fallback"),
        }
    }
}

/// Sleep timer flavour
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SleepTimerMode {
    /// Counts down a fixed duration of audible playback
    Fixed,
    /// Fires when the current chapter finishes
    EndOfChapter,
}
