//! Clock-driven headless engine
//!
//! Plays nothing; advances a position clock from the wall clock and the playback
//! speed. Used by the headless runner and the integration tests, and as the
//! reference for how a real engine is expected to publish events.
//!
//! Position model: `offset = anchor_offset + elapsed_since_anchor * speed`, clamped
//! to the track duration. The anchor is re-based on every seek, pause, resume and
//! speed change.

use super::{EngineEvent, EngineEventSink, MediaEngine, MediaSource, TransitionReason};
use crate::error::EngineError;
use std::time::Instant;
use tracing::{debug, warn};

/// Headless [`MediaEngine`]
#[derive(Debug)]
pub struct VirtualEngine {
    tracks: Vec<MediaSource>,
    current: Option<usize>,
    /// Offset at `anchor_at`
    anchor_offset_ms: u64,
    /// Set only while playing
    anchor_at: Option<Instant>,
    speed: f32,
    prepared: bool,
    play_when_ready: bool,
    /// Last track played to its end
    ended: bool,
    released: bool,
    playing: bool,
    sink: Option<EngineEventSink>,
}

impl Default for VirtualEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualEngine {
    pub fn new() -> Self {
        Self {
            tracks: Vec::new(),
            current: None,
            anchor_offset_ms: 0,
            anchor_at: None,
            speed: 1.0,
            prepared: false,
            play_when_ready: false,
            ended: false,
            released: false,
            playing: false,
            sink: None,
        }
    }

    /// Change playback speed; non-positive or non-finite values are ignored
    pub fn set_speed(&mut self, speed: f32) {
        if !speed.is_finite() || speed <= 0.0 {
            warn!("Ignoring invalid playback speed {}", speed);
            return;
        }
        self.rebase(Instant::now());
        self.speed = speed;
    }

    fn emit(&self, event: EngineEvent) {
        if let Some(sink) = &self.sink {
            // No subscribers is fine
            let _ = sink.send(event);
        }
    }

    fn current_duration(&self) -> Option<u64> {
        self.current
            .and_then(|i| self.tracks.get(i))
            .and_then(|t| t.duration_ms)
    }

    fn offset_at(&self, now: Instant) -> u64 {
        let offset = match self.anchor_at {
            Some(anchor) => {
                let elapsed = now.saturating_duration_since(anchor).as_millis() as f64;
                self.anchor_offset_ms + (elapsed * self.speed as f64) as u64
            }
            None => self.anchor_offset_ms,
        };
        match self.current_duration() {
            Some(duration) => offset.min(duration),
            None => offset,
        }
    }

    /// Fold elapsed time into the anchor
    fn rebase(&mut self, now: Instant) {
        self.anchor_offset_ms = self.offset_at(now);
        if self.anchor_at.is_some() {
            self.anchor_at = Some(now);
        }
    }

    fn should_play(&self) -> bool {
        self.prepared && self.play_when_ready && !self.ended && self.current.is_some()
    }

    /// Recompute the playing flag and publish a change
    fn sync_playing(&mut self) {
        let should = self.should_play();
        if should == self.playing {
            return;
        }
        let now = Instant::now();
        if should {
            self.anchor_at = Some(now);
        } else {
            self.anchor_offset_ms = self.offset_at(now);
            self.anchor_at = None;
        }
        self.playing = should;
        self.emit(EngineEvent::PlaybackStateChanged { is_playing: should });
    }

    fn reset(&mut self) {
        self.tracks.clear();
        self.current = None;
        self.anchor_offset_ms = 0;
        self.anchor_at = None;
        self.ended = false;
        self.sync_playing();
    }
}

impl MediaEngine for VirtualEngine {
    fn attach(&mut self, sink: EngineEventSink) {
        self.sink = Some(sink);
    }

    fn insert_track_at(&mut self, index: usize, source: MediaSource) -> Result<(), EngineError> {
        if self.released {
            return Err(EngineError::Released);
        }
        if index > self.tracks.len() {
            return Err(EngineError::IndexOutOfRange {
                index,
                len: self.tracks.len(),
            });
        }

        debug!("Inserting {} at {}", source.uri, index);
        self.tracks.insert(index, source);

        match self.current {
            None => {
                self.current = Some(0);
                self.anchor_offset_ms = 0;
                self.sync_playing();
            }
            Some(current) if index <= current => {
                // Same track, new index
                self.current = Some(current + 1);
                self.emit(EngineEvent::IndexTransitioned {
                    index: current + 1,
                    reason: TransitionReason::PlaylistChanged,
                });
            }
            Some(_) => {}
        }
        Ok(())
    }

    fn seek_to(&mut self, index: usize, offset_ms: u64) {
        if index >= self.tracks.len() {
            warn!(
                "Ignoring seek to {} in playlist of {}",
                index,
                self.tracks.len()
            );
            return;
        }

        let changed = self.current != Some(index);
        self.current = Some(index);
        self.anchor_offset_ms = match self.current_duration() {
            Some(duration) => offset_ms.min(duration),
            None => offset_ms,
        };
        if self.anchor_at.is_some() {
            self.anchor_at = Some(Instant::now());
        }
        self.ended = false;

        if changed {
            self.emit(EngineEvent::IndexTransitioned {
                index,
                reason: TransitionReason::Seek,
            });
        }
        self.sync_playing();
    }

    fn seek_to_default_position(&mut self, index: usize) {
        self.seek_to(index, 0);
    }

    fn clear(&mut self) {
        self.released = false;
        self.reset();
    }

    fn prepare(&mut self) {
        self.released = false;
        self.prepared = true;
        self.sync_playing();
    }

    fn set_play_when_ready(&mut self, play_when_ready: bool) {
        self.play_when_ready = play_when_ready;
        self.sync_playing();
    }

    fn release(&mut self) {
        self.prepared = false;
        self.play_when_ready = false;
        self.reset();
        self.released = true;
    }

    fn current_index(&self) -> Option<usize> {
        self.current
    }

    fn current_offset_ms(&self) -> u64 {
        self.offset_at(Instant::now())
    }

    fn duration_ms(&self) -> Option<u64> {
        self.current_duration()
    }

    fn is_playing(&self) -> bool {
        self.playing
    }

    fn track_count(&self) -> usize {
        self.tracks.len()
    }

    fn current_content_id(&self) -> Option<String> {
        self.current
            .and_then(|i| self.tracks.get(i))
            .map(|t| t.uri.clone())
    }

    fn speed(&self) -> f32 {
        self.speed
    }

    fn poll(&mut self) {
        if !self.playing {
            return;
        }
        let (Some(index), Some(duration)) = (self.current, self.current_duration()) else {
            return;
        };
        if self.offset_at(Instant::now()) < duration {
            return;
        }

        self.emit(EngineEvent::TrackCompleted { index });

        if index + 1 < self.tracks.len() {
            self.current = Some(index + 1);
            self.anchor_offset_ms = 0;
            self.anchor_at = Some(Instant::now());
            self.emit(EngineEvent::IndexTransitioned {
                index: index + 1,
                reason: TransitionReason::Auto,
            });
        } else {
            debug!("Reached end of playlist");
            self.ended = true;
            self.sync_playing();
        }
    }
}
