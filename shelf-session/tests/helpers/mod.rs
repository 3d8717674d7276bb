//! Test helper modules for shelf-session integration tests
//!
//! Provides reusable test infrastructure components:
//! - `ScriptedSourceFactory`: per-track build delays and failures
//! - `RecordingEngine`: virtual engine that records inserts and can drop
//!   index-transition events
//! - Primary channel doubles (ack, unimplemented, never answers)
//! - In-memory settings store and event waiting helpers

#![allow(dead_code)]

use async_trait::async_trait;
use shelf_common::events::ShelfEvent;
use shelf_session::config::RuntimeSettings;
use shelf_session::engine::{
    EngineEvent, EngineEventSink, EngineHandle, MediaEngine, MediaSource, SourceFactory, SourceKind,
    VirtualEngine,
};
use shelf_session::error::{ChannelError, EngineError, SourceError};
use shelf_session::model::TrackRef;
use shelf_session::persistence::{
    KeyValueStore, PrimaryChannel, SavePositionRequest, SqliteSettingsStore,
};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

/// Every track of a test book lasts this long
pub const TRACK_MS: u64 = 600_000;

/// Engine pump cadence used in tests
pub const POLL: Duration = Duration::from_millis(10);

/// Track ids `/book/00.mp3`, `/book/01.mp3`, ...
pub fn track_id(index: usize) -> String {
    format!("/book/{:02}.mp3", index)
}

/// A book of `len` tracks of [`TRACK_MS`] each
pub fn book(len: usize) -> Vec<TrackRef> {
    (0..len)
        .map(|i| TrackRef::new(track_id(i)).with_duration(TRACK_MS))
        .collect()
}

/// Settings with short loops so tests finish quickly
pub fn fast_settings() -> RuntimeSettings {
    RuntimeSettings {
        loader_build_timeout_ms: 2_000,
        stability_check_interval_ms: 10,
        stability_timeout_ms: 3_000,
        switch_event_timeout_ms: 200,
        switch_poll_interval_ms: 10,
        switch_poll_attempts: 20,
        save_debounce_ms: 1_500,
        save_ack_timeout_ms: 200,
        sleep_tick_ms: 20,
        snapshot_interval_ms: 50,
        ..RuntimeSettings::default()
    }
}

/// Source factory with scripted delays and failures
#[derive(Default)]
pub struct ScriptedSourceFactory {
    delays: HashMap<String, Duration>,
    failing: HashSet<String>,
    measured_ms: Option<u64>,
    builds: AtomicUsize,
}

impl ScriptedSourceFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay the build of one track
    pub fn delay(mut self, index: usize, delay: Duration) -> Self {
        self.delays.insert(track_id(index), delay);
        self
    }

    /// Make one track fail to build
    pub fn fail(mut self, index: usize) -> Self {
        self.failing.insert(track_id(index));
        self
    }

    /// Report this duration for every built source, whatever the track says
    pub fn measured(mut self, duration_ms: u64) -> Self {
        self.measured_ms = Some(duration_ms);
        self
    }

    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceFactory for ScriptedSourceFactory {
    async fn build(&self, track: &TrackRef) -> Result<MediaSource, SourceError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delays.get(&track.id) {
            tokio::time::sleep(*delay).await;
        }
        if self.failing.contains(&track.id) {
            return Err(SourceError::Missing(track.id.clone()));
        }
        Ok(MediaSource {
            uri: track.id.clone(),
            kind: SourceKind::Local,
            duration_ms: self.measured_ms.or(track.duration_ms),
            title: track.title.clone(),
        })
    }
}

/// Shared view into a [`RecordingEngine`] after it moved into its owner task
#[derive(Clone, Default)]
pub struct EngineRecorder {
    inserts: Arc<Mutex<Vec<(usize, String)>>>,
    suppress_transitions: Arc<AtomicBool>,
    fail_on_clear: Arc<AtomicBool>,
}

impl EngineRecorder {
    /// `(slot, uri)` of every successful insert, in call order
    pub fn inserts(&self) -> Vec<(usize, String)> {
        self.inserts.lock().unwrap().clone()
    }

    /// Drop index-transition events instead of publishing them
    pub fn suppress_transitions(&self, suppress: bool) {
        self.suppress_transitions.store(suppress, Ordering::SeqCst);
    }

    /// Make the next `clear` bring down the engine task
    pub fn fail_on_clear(&self) {
        self.fail_on_clear.store(true, Ordering::SeqCst);
    }
}

/// [`VirtualEngine`] wrapper that records inserts
pub struct RecordingEngine {
    inner: VirtualEngine,
    recorder: EngineRecorder,
}

impl RecordingEngine {
    pub fn new() -> (Self, EngineRecorder) {
        let recorder = EngineRecorder::default();
        (
            Self {
                inner: VirtualEngine::new(),
                recorder: recorder.clone(),
            },
            recorder,
        )
    }

    /// Spawn onto an [`EngineHandle`]
    pub fn spawn() -> (EngineHandle, EngineRecorder) {
        let (engine, recorder) = Self::new();
        (EngineHandle::spawn(engine, POLL), recorder)
    }
}

impl MediaEngine for RecordingEngine {
    fn attach(&mut self, sink: EngineEventSink) {
        let (inner_tx, mut inner_rx) = broadcast::channel(256);
        self.inner.attach(inner_tx);
        let suppress = Arc::clone(&self.recorder.suppress_transitions);
        tokio::spawn(async move {
            loop {
                match inner_rx.recv().await {
                    Ok(EngineEvent::IndexTransitioned { .. }) if suppress.load(Ordering::SeqCst) => {}
                    Ok(event) => {
                        let _ = sink.send(event);
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    fn insert_track_at(&mut self, index: usize, source: MediaSource) -> Result<(), EngineError> {
        let uri = source.uri.clone();
        self.inner.insert_track_at(index, source)?;
        self.recorder.inserts.lock().unwrap().push((index, uri));
        Ok(())
    }

    fn seek_to(&mut self, index: usize, offset_ms: u64) {
        self.inner.seek_to(index, offset_ms);
    }

    fn seek_to_default_position(&mut self, index: usize) {
        self.inner.seek_to_default_position(index);
    }

    fn clear(&mut self) {
        if self.recorder.fail_on_clear.load(Ordering::SeqCst) {
            panic!("engine lost while clearing");
        }
        self.inner.clear();
    }

    fn prepare(&mut self) {
        self.inner.prepare();
    }

    fn set_play_when_ready(&mut self, play_when_ready: bool) {
        self.inner.set_play_when_ready(play_when_ready);
    }

    fn release(&mut self) {
        self.inner.release();
    }

    fn current_index(&self) -> Option<usize> {
        self.inner.current_index()
    }

    fn current_offset_ms(&self) -> u64 {
        self.inner.current_offset_ms()
    }

    fn duration_ms(&self) -> Option<u64> {
        self.inner.duration_ms()
    }

    fn is_playing(&self) -> bool {
        self.inner.is_playing()
    }

    fn track_count(&self) -> usize {
        self.inner.track_count()
    }

    fn current_content_id(&self) -> Option<String> {
        self.inner.current_content_id()
    }

    fn poll(&mut self) {
        self.inner.poll();
    }
}

/// Primary channel that acknowledges every save
#[derive(Default)]
pub struct AckChannel {
    pub requests: Mutex<Vec<SavePositionRequest>>,
}

#[async_trait]
impl PrimaryChannel for AckChannel {
    async fn save_current_position(&self, request: SavePositionRequest) -> Result<(), ChannelError> {
        self.requests.lock().unwrap().push(request);
        Ok(())
    }
}

/// Host without a save implementation
pub struct UnimplementedChannel;

#[async_trait]
impl PrimaryChannel for UnimplementedChannel {
    async fn save_current_position(&self, _request: SavePositionRequest) -> Result<(), ChannelError> {
        Err(ChannelError::Unimplemented)
    }
}

/// Host that never answers
pub struct SilentChannel;

#[async_trait]
impl PrimaryChannel for SilentChannel {
    async fn save_current_position(&self, _request: SavePositionRequest) -> Result<(), ChannelError> {
        std::future::pending().await
    }
}

/// Host whose first save never answers and whose later saves fail at once
#[derive(Default)]
pub struct StallingChannel {
    calls: AtomicUsize,
}

#[async_trait]
impl PrimaryChannel for StallingChannel {
    async fn save_current_position(&self, _request: SavePositionRequest) -> Result<(), ChannelError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            std::future::pending::<()>().await;
        }
        Err(ChannelError::Unimplemented)
    }
}

/// In-memory SQLite settings table as a key/value store
pub async fn memory_store() -> (Arc<dyn KeyValueStore>, SqlitePool) {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    shelf_session::db::init::create_schema(&pool).await.unwrap();
    (Arc::new(SqliteSettingsStore::new(pool.clone())), pool)
}

/// Wait for the first event matching `predicate`
pub async fn wait_for_event<F>(
    rx: &mut broadcast::Receiver<ShelfEvent>,
    timeout: Duration,
    mut predicate: F,
) -> Option<ShelfEvent>
where
    F: FnMut(&ShelfEvent) -> bool,
{
    tokio::time::timeout(timeout, async {
        loop {
            match rx.recv().await {
                Ok(event) if predicate(&event) => return Some(event),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
}

/// Wait for `LoadComplete`
pub async fn wait_for_load_complete(rx: &mut broadcast::Receiver<ShelfEvent>) -> Option<(usize, usize)> {
    match wait_for_event(rx, Duration::from_secs(5), |e| {
        matches!(e, ShelfEvent::LoadComplete { .. })
    })
    .await
    {
        Some(ShelfEvent::LoadComplete {
            loaded, requested, ..
        }) => Some((loaded, requested)),
        _ => None,
    }
}
