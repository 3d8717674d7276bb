//! Playback engine boundary
//!
//! **Module Structure:**
//! - `mod.rs`: the [`MediaEngine`] trait consumed by the session core, engine events and status
//! - `source.rs`: media sources and the network-vs-local source strategy
//! - `handle.rs`: [`EngineHandle`], the single owner task that serialises every engine mutation
//! - `virtual_engine.rs`: clock-driven headless engine
//!
//! The decode/render engine itself is an external collaborator. The core never
//! touches it directly: all calls go through [`EngineHandle`], which owns the
//! (non thread-safe) engine on one task.

mod handle;
mod source;
mod virtual_engine;

pub use handle::EngineHandle;
pub use source::{DefaultSourceFactory, MediaSource, SourceFactory, SourceKind};
pub use virtual_engine::VirtualEngine;

use crate::error::EngineError;
use tokio::sync::broadcast;

/// Why the engine's current index changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionReason {
    /// Previous track finished and playback moved on
    Auto,
    /// Caller seeked to another track
    Seek,
    /// Playlist contents changed under the current index
    PlaylistChanged,
}

/// Notifications published by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Active track pointer changed
    IndexTransitioned {
        index: usize,
        reason: TransitionReason,
    },
    /// Audible playback started or stopped
    PlaybackStateChanged { is_playing: bool },
    /// A track played to its end
    TrackCompleted { index: usize },
}

/// Sender the engine publishes its events on
pub type EngineEventSink = broadcast::Sender<EngineEvent>;

/// Point-in-time engine readout
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineStatus {
    pub current_index: Option<usize>,
    pub current_offset_ms: u64,
    pub duration_ms: Option<u64>,
    pub is_playing: bool,
    pub track_count: usize,
    /// Id (URI/path) of the source at the current index
    pub content_id: Option<String>,
    pub speed: f32,
    pub buffered_ms: u64,
}

/// Decode/render engine surface consumed by the session core
///
/// Implementations need not be `Sync`: the engine is only ever touched from the
/// [`EngineHandle`] owner task.
pub trait MediaEngine: Send + 'static {
    /// Give the engine the sink to publish [`EngineEvent`]s on
    fn attach(&mut self, sink: EngineEventSink);

    /// Insert a source at `index` (0..=track_count)
    fn insert_track_at(&mut self, index: usize, source: MediaSource) -> Result<(), EngineError>;

    /// Seek to `offset_ms` inside the track at `index`
    fn seek_to(&mut self, index: usize, offset_ms: u64);

    /// Seek to the default (start) position of the track at `index`
    fn seek_to_default_position(&mut self, index: usize);

    /// Remove every source
    fn clear(&mut self);

    /// Acquire decode resources for the current playlist
    fn prepare(&mut self);

    /// Start (true) or hold (false) playback once prepared
    fn set_play_when_ready(&mut self, play_when_ready: bool);

    /// Release decode resources; the playlist is dropped
    fn release(&mut self);

    fn current_index(&self) -> Option<usize>;
    fn current_offset_ms(&self) -> u64;
    fn duration_ms(&self) -> Option<u64>;
    fn is_playing(&self) -> bool;
    fn track_count(&self) -> usize;
    fn current_content_id(&self) -> Option<String>;

    fn speed(&self) -> f32 {
        1.0
    }

    fn buffered_ms(&self) -> u64 {
        0
    }

    /// Periodic pump from the owner task for engines that need one
    fn poll(&mut self) {}

    /// Full readout in one call
    fn status(&self) -> EngineStatus {
        EngineStatus {
            current_index: self.current_index(),
            current_offset_ms: self.current_offset_ms(),
            duration_ms: self.duration_ms(),
            is_playing: self.is_playing(),
            track_count: self.track_count(),
            content_id: self.current_content_id(),
            speed: self.speed(),
            buffered_ms: self.buffered_ms(),
        }
    }
}
