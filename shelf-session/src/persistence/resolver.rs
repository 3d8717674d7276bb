//! Index correction
//!
//! Decides which track index (and offset) a save should record. Priority:
//!
//! 1. The actual index from index-transition events, else the engine's raw index
//! 2. The index the engine's current content id resolves to in the track list;
//!    this overrides (1) whenever it resolves
//! 3. Only when the content id does not resolve: a duration-accumulation
//!    estimate, applied when the offset overruns the candidate track's known
//!    duration
//!
//! All indices here are in requested-list coordinates.

use crate::duration_cache::DurationCache;
use crate::model::{resolve_index, TrackRef};

/// Which rule produced a resolved index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexSource {
    Actual,
    Raw,
    Uri,
    DurationEstimate,
}

/// Inputs for one resolution
#[derive(Debug, Clone, Copy)]
pub struct ResolveInput<'a> {
    pub tracks: &'a [TrackRef],
    /// From index-transition events
    pub actual_index: Option<usize>,
    /// Engine-reported current index
    pub raw_index: Option<usize>,
    /// Engine-reported id of the playing source
    pub content_id: Option<&'a str>,
    pub offset_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedPosition {
    pub index: usize,
    pub position_ms: u64,
    pub source: IndexSource,
}

#[derive(Debug, Clone, Copy)]
pub struct IndexResolver {
    tolerance_ms: u64,
}

impl IndexResolver {
    pub fn new(tolerance_ms: u64) -> Self {
        Self { tolerance_ms }
    }

    /// Resolve the position to save, or `None` when nothing identifies a track
    pub fn resolve(&self, input: &ResolveInput<'_>, durations: &DurationCache) -> Option<ResolvedPosition> {
        if let Some(index) = input
            .content_id
            .and_then(|id| resolve_index(input.tracks, id))
        {
            return Some(ResolvedPosition {
                index,
                position_ms: input.offset_ms,
                source: IndexSource::Uri,
            });
        }

        let (candidate, source) = match (input.actual_index, input.raw_index) {
            (Some(index), _) => (index, IndexSource::Actual),
            (None, Some(index)) => (index, IndexSource::Raw),
            (None, None) => return None,
        };

        Some(
            self.estimate_by_duration(input.tracks, candidate, input.offset_ms, durations)
                .unwrap_or(ResolvedPosition {
                    index: candidate,
                    position_ms: input.offset_ms,
                    source,
                }),
        )
    }

    /// Re-locate `offset_ms` when it runs past the candidate track's end
    ///
    /// Tracks without a known duration are skipped when accumulating. Returns
    /// `None` when the candidate's duration is unknown, the offset fits it, or
    /// the absolute position lies beyond every known duration.
    fn estimate_by_duration(
        &self,
        tracks: &[TrackRef],
        candidate: usize,
        offset_ms: u64,
        durations: &DurationCache,
    ) -> Option<ResolvedPosition> {
        let candidate_duration = durations.duration_of(tracks.get(candidate)?)?;
        if offset_ms <= candidate_duration.saturating_add(self.tolerance_ms) {
            return None;
        }

        let before = tracks[..candidate]
            .iter()
            .filter_map(|t| durations.duration_of(t))
            .fold(0u64, u64::saturating_add);
        let absolute = before.saturating_add(offset_ms);
        let threshold = absolute.saturating_sub(self.tolerance_ms);

        let mut running = 0u64;
        for (index, track) in tracks.iter().enumerate() {
            let Some(duration) = durations.duration_of(track) else {
                continue;
            };
            if running.saturating_add(duration) > threshold {
                return Some(ResolvedPosition {
                    index,
                    position_ms: absolute.saturating_sub(running).min(duration),
                    source: IndexSource::DurationEstimate,
                });
            }
            running = running.saturating_add(duration);
        }
        None
    }
}
