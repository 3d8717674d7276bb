//! Best-effort track duration cache
//!
//! Maps track id to the duration measured by the engine: the built source's
//! duration when the loader inserts a track, refreshed from the engine status
//! on every save. Consulted by the position persistence index correction, with
//! the host-supplied duration as fallback.

use crate::model::TrackRef;
use std::collections::HashMap;
use std::sync::RwLock;

/// Guarded map of track id -> duration in milliseconds
#[derive(Debug, Default)]
pub struct DurationCache {
    inner: RwLock<HashMap<String, u64>>,
}

impl DurationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Known duration for a track id (zero durations are never stored)
    pub fn get(&self, track_id: &str) -> Option<u64> {
        match self.inner.read() {
            Ok(map) => map.get(track_id).copied(),
            Err(poisoned) => poisoned.into_inner().get(track_id).copied(),
        }
    }

    /// Record a duration; zero is ignored because it means "not measured"
    pub fn insert(&self, track_id: &str, duration_ms: u64) {
        if duration_ms == 0 {
            return;
        }
        let mut map = match self.inner.write() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.insert(track_id.to_string(), duration_ms);
    }

    /// Duration of a track, preferring the cache over the host-supplied value
    pub fn duration_of(&self, track: &TrackRef) -> Option<u64> {
        self.get(&track.id)
            .or(track.duration_ms.filter(|d| *d > 0))
    }

    pub fn len(&self) -> usize {
        match self.inner.read() {
            Ok(map) => map.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
