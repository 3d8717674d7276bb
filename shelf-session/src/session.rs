//! Shared session context
//!
//! Thread-safe session state shared between the loader, the track switch
//! coordinator, position persistence and the timers.
//!
//! **Responsibilities:**
//! - Own the active [`PlaylistSession`] (replaced wholesale on every new playlist)
//! - Hand out a generation number per playlist so stale background work can
//!   detect that it has been superseded
//! - Track the engine-slot -> requested-index table (slots shift when a track is
//!   skipped during loading)
//! - Track the "actual" engine slot reported by index-transition events
//!
//! Collaborators that only read depend on the [`SessionView`] trait, never on the
//! concrete context.

use crate::model::{LoadingState, PlaylistSession, TrackRef};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Read-only view of the active session
pub trait SessionView: Send + Sync {
    /// Group id of the active session
    fn group_id(&self) -> Option<String>;

    /// Requested tracks in host order (empty when no session)
    fn tracks(&self) -> Arc<[TrackRef]>;

    fn loading_state(&self) -> LoadingState;

    /// True while the track switch protocol is moving the engine
    fn switch_in_progress(&self) -> bool;

    /// Engine slot last reported by an index-transition event
    fn actual_slot(&self) -> Option<usize>;

    /// Host playlist index of the track at an engine slot
    fn requested_index_for_slot(&self, slot: usize) -> Option<usize>;

    /// Engine slot holding a host playlist index, if that track was loaded
    fn slot_for_requested_index(&self, index: usize) -> Option<usize>;

    /// Track count confirmed stable by the loader
    fn confirmed_count(&self) -> usize;
}

#[derive(Debug, Default)]
struct SessionState {
    session: Option<PlaylistSession>,
    /// slots[engine_slot] = requested index
    slots: Vec<usize>,
    actual_slot: Option<usize>,
    switching: bool,
}

/// Explicitly passed session context
#[derive(Debug, Default)]
pub struct SessionContext {
    state: RwLock<SessionState>,
    generation: AtomicU64,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, SessionState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Install a new session in the Loading state and return its generation
    ///
    /// Any previous session is discarded; work tagged with an older generation
    /// becomes stale.
    pub fn begin(&self, mut session: PlaylistSession) -> u64 {
        session.loading_state = LoadingState::Loading;
        session.confirmed_count = 0;
        let mut state = self.write();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *state = SessionState {
            session: Some(session),
            ..SessionState::default()
        };
        generation
    }

    /// Drop the active session (teardown)
    pub fn clear(&self) {
        let mut state = self.write();
        self.generation.fetch_add(1, Ordering::SeqCst);
        *state = SessionState::default();
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation() == generation
    }

    /// Record that the track at `requested_index` now lives at `slot`
    ///
    /// Returns false (and records nothing) for a stale generation.
    pub fn record_insert(&self, generation: u64, slot: usize, requested_index: usize) -> bool {
        let mut state = self.write();
        if !self.is_current(generation) {
            return false;
        }
        let slot = slot.min(state.slots.len());
        state.slots.insert(slot, requested_index);
        true
    }

    /// Mark loading complete with a stable track count
    pub fn mark_loaded(&self, generation: u64, confirmed_count: usize) -> bool {
        let mut state = self.write();
        if !self.is_current(generation) {
            return false;
        }
        match state.session.as_mut() {
            Some(session) => {
                session.loading_state = LoadingState::Loaded;
                session.confirmed_count = confirmed_count;
                true
            }
            None => false,
        }
    }

    /// Mark loading as no longer in progress without confirming a count
    pub fn mark_not_loading(&self, generation: u64) {
        let mut state = self.write();
        if !self.is_current(generation) {
            return;
        }
        if let Some(session) = state.session.as_mut() {
            session.loading_state = LoadingState::NotLoading;
        }
    }

    /// Update the actual engine slot from an index-transition event
    pub fn set_actual_slot(&self, slot: Option<usize>) {
        self.write().actual_slot = slot;
    }

    pub fn set_switching(&self, switching: bool) {
        self.write().switching = switching;
    }

    /// Copy of the active session
    pub fn snapshot(&self) -> Option<PlaylistSession> {
        self.read().session.clone()
    }

    /// Number of tracks recorded as inserted into the engine
    pub fn inserted_count(&self) -> usize {
        self.read().slots.len()
    }
}

impl SessionView for SessionContext {
    fn group_id(&self) -> Option<String> {
        self.read().session.as_ref().map(|s| s.group_id.clone())
    }

    fn tracks(&self) -> Arc<[TrackRef]> {
        self.read()
            .session
            .as_ref()
            .map(|s| Arc::clone(&s.tracks))
            .unwrap_or_else(|| Arc::from(Vec::new()))
    }

    fn loading_state(&self) -> LoadingState {
        self.read()
            .session
            .as_ref()
            .map(|s| s.loading_state)
            .unwrap_or(LoadingState::NotLoading)
    }

    fn switch_in_progress(&self) -> bool {
        self.read().switching
    }

    fn actual_slot(&self) -> Option<usize> {
        self.read().actual_slot
    }

    fn requested_index_for_slot(&self, slot: usize) -> Option<usize> {
        self.read().slots.get(slot).copied()
    }

    fn slot_for_requested_index(&self, index: usize) -> Option<usize> {
        self.read().slots.iter().position(|i| *i == index)
    }

    fn confirmed_count(&self) -> usize {
        self.read()
            .session
            .as_ref()
            .map(|s| s.confirmed_count)
            .unwrap_or(0)
    }
}
