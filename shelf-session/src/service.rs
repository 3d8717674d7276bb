//! Session service
//!
//! Wires the loader, track switch coordinator, position persistence and timers
//! around one [`EngineHandle`] and exposes the host command surface as
//! [`SessionHandle`].
//!
//! **Background tasks (one set per service):**
//! - Engine event pump: actual-index tracking, `TrackTransitioned` events, saves
//!   on transition and pause, timer coupling
//! - Timer signal handler: releases the engine on inactivity expiry
//! - Periodic position saves
//! - Playback snapshot emitter

use crate::config::RuntimeSettings;
use crate::duration_cache::DurationCache;
use crate::engine::{DefaultSourceFactory, EngineEvent, EngineHandle, SourceFactory, TransitionReason};
use crate::error::{EngineError, LoadError};
use crate::model::{PlaylistMetadata, PlaylistSession, TrackRef};
use crate::persistence::{
    KeyValueStore, PositionPersistence, PositionStore, PrimaryChannel, SaveReason, SaveReport,
};
use crate::playback::{LoadOutcome, PlaylistLoader, SwitchOutcome, TrackSwitchCoordinator};
use crate::session::{SessionContext, SessionView};
use crate::timers::{TimerEngine, TimerSignal};
use shelf_common::events::{EventBus, PlaybackSnapshot, PlaybackState, ShelfEvent};
use shelf_common::keys::sanitize_group_id;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Group id used when neither metadata nor track paths name the book
const FALLBACK_GROUP_ID: &str = "default";

/// Host request to load a playlist
#[derive(Debug, Clone, Default)]
pub struct SetPlaylistRequest {
    /// Book identifier; derived from the metadata or track paths when absent
    pub group_id: Option<String>,
    pub tracks: Vec<TrackRef>,
    pub metadata: PlaylistMetadata,
    /// Track to resume (host playlist index)
    pub target_index: Option<usize>,
    /// Offset to resume inside the target track
    pub target_position_ms: Option<u64>,
}

/// Group id for a playlist without one
///
/// Metadata title first, else the parent directory of the first track,
/// sanitized with the shared key scheme.
pub fn derive_group_id(metadata: &PlaylistMetadata, tracks: &[TrackRef]) -> String {
    let from_title = metadata
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string);

    let from_path = || {
        let first = tracks.first()?;
        let path = first.id.strip_prefix("file://").unwrap_or(&first.id);
        let parent = Path::new(path).parent()?.file_name()?.to_str()?;
        Some(parent.to_string())
    };

    from_title
        .or_else(from_path)
        .map(|name| sanitize_group_id(&name))
        .unwrap_or_else(|| FALLBACK_GROUP_ID.to_string())
}

/// Builder for a running session engine
pub struct SessionService {
    engine: EngineHandle,
    factory: Arc<dyn SourceFactory>,
    store: Arc<dyn KeyValueStore>,
    primary: Option<Arc<dyn PrimaryChannel>>,
    events: Arc<EventBus>,
    settings: RuntimeSettings,
}

impl SessionService {
    pub fn new(
        engine: EngineHandle,
        store: Arc<dyn KeyValueStore>,
        events: Arc<EventBus>,
        settings: RuntimeSettings,
    ) -> Self {
        Self {
            engine,
            factory: Arc::new(DefaultSourceFactory::new()),
            store,
            primary: None,
            events,
            settings: settings.sanitized(),
        }
    }

    /// Replace the default scheme-routing source factory
    pub fn with_source_factory(mut self, factory: Arc<dyn SourceFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Save positions through the host first
    pub fn with_primary_channel(mut self, primary: Arc<dyn PrimaryChannel>) -> Self {
        self.primary = Some(primary);
        self
    }

    /// Start the background tasks and return the host handle
    pub async fn start(self) -> SessionHandle {
        let session = Arc::new(SessionContext::new());
        let durations = Arc::new(DurationCache::new());
        let cancel = CancellationToken::new();

        let loader = Arc::new(PlaylistLoader::new(
            self.engine.clone(),
            Arc::clone(&self.factory),
            Arc::clone(&session),
            Arc::clone(&durations),
            Arc::clone(&self.events),
            self.settings.clone(),
        ));
        let persistence = PositionPersistence::new(
            self.engine.clone(),
            Arc::clone(&session),
            Arc::clone(&durations),
            self.primary.clone(),
            PositionStore::new(Arc::clone(&self.store)),
            Arc::clone(&self.events),
            self.settings.clone(),
        );
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let timers = TimerEngine::new(
            self.engine.clone(),
            Arc::clone(&self.events),
            Some(Arc::clone(&self.store)),
            &self.settings,
            signal_tx,
        );

        let playing = match self.engine.status().await {
            Ok(status) => status.is_playing,
            Err(e) => {
                warn!("Engine status unavailable at startup: {}", e);
                false
            }
        };
        timers.restore(playing).await;

        let handle = SessionHandle {
            inner: Arc::new(ServiceInner {
                engine: self.engine,
                session,
                loader,
                persistence,
                timers,
                events: self.events,
                settings: self.settings,
                cancel,
                tasks: Mutex::new(Vec::new()),
                switch_task: Mutex::new(None),
            }),
        };

        let engine_events = handle.inner.engine.subscribe();
        let tasks = vec![
            tokio::spawn(Arc::clone(&handle.inner).run_event_pump(engine_events)),
            tokio::spawn(Arc::clone(&handle.inner).run_signal_handler(signal_rx)),
            handle
                .inner
                .persistence
                .spawn_periodic(handle.inner.cancel.child_token()),
            tokio::spawn(Arc::clone(&handle.inner).run_snapshot_emitter()),
        ];
        *handle.inner.lock_tasks() = tasks;

        info!("Session service started");
        handle
    }
}

struct ServiceInner {
    engine: EngineHandle,
    session: Arc<SessionContext>,
    loader: Arc<PlaylistLoader>,
    persistence: PositionPersistence,
    timers: TimerEngine,
    events: Arc<EventBus>,
    settings: RuntimeSettings,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    /// Initial-position application for the current playlist
    switch_task: Mutex<Option<JoinHandle<SwitchOutcome>>>,
}

/// Host command surface of a running session engine
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<ServiceInner>,
}

impl SessionHandle {
    /// Load a playlist, resuming its saved position when no target is given
    ///
    /// Returns once the first track is in the engine. The initial position is
    /// applied in the background after the loader confirms the playlist.
    pub async fn set_playlist(&self, request: SetPlaylistRequest) -> Result<LoadOutcome, LoadError> {
        let inner = &self.inner;
        let group_id = match request.group_id {
            Some(id) if !id.trim().is_empty() => id,
            _ => derive_group_id(&request.metadata, &request.tracks),
        };
        let track_count = request.tracks.len();

        let (target_index, target_position_ms) = match (request.target_index, request.target_position_ms) {
            (None, None) => match inner.persistence.saved_position(&group_id).await {
                Some(saved) if saved.track_index < track_count => {
                    info!(
                        "Resuming group {} at track {} / {} ms",
                        group_id, saved.track_index, saved.position_ms
                    );
                    (Some(saved.track_index), Some(saved.position_ms))
                }
                Some(saved) => {
                    warn!(
                        "Saved track {} out of range for group {} ({} tracks); starting at 0",
                        saved.track_index, group_id, track_count
                    );
                    (None, None)
                }
                None => (None, None),
            },
            (index, position) => (index.filter(|i| *i < track_count), position),
        };

        let same_group = inner.session.group_id().as_deref() == Some(group_id.as_str());
        if !same_group && !inner.session.tracks().is_empty() {
            inner.save_and_wait(SaveReason::Teardown).await;
        }

        let playlist = PlaylistSession::new(
            group_id.clone(),
            Arc::from(request.tracks),
            request.metadata,
            target_index,
            target_position_ms,
        );
        let outcome = inner.loader.load_playlist(playlist).await?;

        if let LoadOutcome::Started { .. } = outcome {
            inner.abort_switch();
            let index = target_index.unwrap_or(0);
            let position_ms = target_position_ms.unwrap_or(0);
            if index > 0 || position_ms > 0 {
                let coordinator = TrackSwitchCoordinator::new(
                    inner.engine.clone(),
                    Arc::clone(&inner.session),
                    inner.loader.subscribe_progress(),
                    inner.settings.clone(),
                );
                let task = tokio::spawn(async move {
                    let outcome = coordinator
                        .apply_initial_position(index, position_ms, track_count)
                        .await;
                    debug!("Initial position for {}: {:?}", group_id, outcome);
                    outcome
                });
                *inner.switch_task.lock().unwrap_or_else(|e| e.into_inner()) = Some(task);
            }
        }

        Ok(outcome)
    }

    /// Wait for the background initial-position application, if one is running
    pub async fn initial_position(&self) -> Option<SwitchOutcome> {
        let task = self
            .inner
            .switch_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()?;
        task.await.ok()
    }

    pub async fn play(&self) -> Result<(), EngineError> {
        self.inner.engine.prepare().await?;
        self.inner.engine.set_play_when_ready(true).await
    }

    pub async fn pause(&self) -> Result<(), EngineError> {
        self.inner.engine.set_play_when_ready(false).await
    }

    /// Seek inside the host playlist and record the new position
    pub async fn seek(&self, track_index: usize, position_ms: u64) -> Result<(), EngineError> {
        let Some(slot) = self.inner.session.slot_for_requested_index(track_index) else {
            return Err(EngineError::IndexOutOfRange {
                index: track_index,
                len: self.inner.session.inserted_count(),
            });
        };
        self.inner.engine.seek_to(slot, position_ms).await?;
        let _ = self.inner.persistence.save_position(SaveReason::Seek);
        Ok(())
    }

    pub async fn start_sleep_timer(&self, duration: Duration) {
        self.inner.timers.start_sleep_fixed(duration).await;
    }

    pub async fn start_sleep_timer_end_of_chapter(&self) {
        self.inner.timers.start_sleep_end_of_chapter().await;
    }

    pub async fn cancel_sleep_timer(&self) {
        self.inner.timers.cancel_sleep().await;
    }

    pub fn start_inactivity_timer(&self, timeout: Option<Duration>) {
        self.inner.timers.start_inactivity(timeout);
    }

    pub fn cancel_inactivity_timer(&self) {
        self.inner.timers.cancel_inactivity();
    }

    pub fn timers(&self) -> &TimerEngine {
        &self.inner.timers
    }

    /// Save now and wait for the result
    ///
    /// Manual saves are not critical, so a save inside the debounce window is
    /// dropped and `None` is returned.
    pub async fn save_position_now(&self) -> Option<SaveReport> {
        self.inner.save_and_wait(SaveReason::Manual).await
    }

    /// Host moved to the background
    pub async fn on_app_backgrounded(&self) -> Option<SaveReport> {
        self.inner.save_and_wait(SaveReason::AppBackgrounded).await
    }

    /// Host is being stopped
    pub async fn on_app_stopped(&self) -> Option<SaveReport> {
        self.inner.save_and_wait(SaveReason::AppStopped).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ShelfEvent> {
        self.inner.events.subscribe()
    }

    pub fn session(&self) -> &Arc<SessionContext> {
        &self.inner.session
    }

    pub fn engine(&self) -> &EngineHandle {
        &self.inner.engine
    }

    /// Current playback snapshot in host playlist coordinates
    pub async fn snapshot(&self) -> Result<PlaybackSnapshot, EngineError> {
        self.inner.snapshot().await
    }

    /// Tear the session down
    ///
    /// Saves the position (critical), stops every background task and releases
    /// the engine.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        inner.save_and_wait(SaveReason::Teardown).await;

        inner.cancel.cancel();
        inner.abort_switch();
        inner.loader.cancel().await;
        inner.timers.shutdown();

        let tasks: Vec<JoinHandle<()>> = inner.lock_tasks().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Session task ended abnormally: {}", e);
            }
        }

        if let Err(e) = inner.engine.release().await {
            debug!("Engine already gone at shutdown: {}", e);
        }
        inner.session.clear();
        info!("Session service stopped");
    }
}

impl ServiceInner {
    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn abort_switch(&self) {
        if let Some(task) = self.switch_task.lock().unwrap_or_else(|e| e.into_inner()).take() {
            task.abort();
        }
    }

    async fn save_and_wait(&self, reason: SaveReason) -> Option<SaveReport> {
        let task = self.persistence.save_position(reason)?;
        match task.await {
            Ok(report) => report,
            Err(e) => {
                warn!("{} save task failed: {}", reason, e);
                None
            }
        }
    }

    async fn snapshot(&self) -> Result<PlaybackSnapshot, EngineError> {
        let status = self.engine.status().await?;
        Ok(PlaybackSnapshot {
            is_playing: status.is_playing,
            position_ms: status.current_offset_ms,
            duration_ms: status.duration_ms,
            current_index: status
                .current_index
                .and_then(|slot| self.session.requested_index_for_slot(slot)),
            speed: status.speed,
            buffered_ms: status.buffered_ms,
        })
    }

    async fn run_event_pump(self: Arc<Self>, mut rx: broadcast::Receiver<EngineEvent>) {
        loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => break,
                event = rx.recv() => event,
            };

            match event {
                Ok(EngineEvent::IndexTransitioned { index, reason }) => {
                    self.on_index_transition(index, reason);
                }
                Ok(EngineEvent::PlaybackStateChanged { is_playing }) => {
                    self.events.emit_lossy(ShelfEvent::PlaybackStateChanged {
                        old_state: PlaybackState::from_playing(!is_playing),
                        new_state: PlaybackState::from_playing(is_playing),
                        timestamp: shelf_common::time::now(),
                    });
                    self.timers.on_playback_state(is_playing).await;
                    if !is_playing {
                        let _ = self.persistence.save_position(SaveReason::Paused);
                    }
                }
                Ok(EngineEvent::TrackCompleted { index }) => {
                    debug!("Track at slot {} completed", index);
                    self.timers.on_track_completed().await;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Engine event pump lagged by {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        debug!("Engine event pump stopped");
    }

    fn on_index_transition(&self, slot: usize, reason: TransitionReason) {
        self.session.set_actual_slot(Some(slot));
        if reason == TransitionReason::PlaylistChanged {
            return;
        }

        if let (Some(group_id), Some(track_index)) = (
            self.session.group_id(),
            self.session.requested_index_for_slot(slot),
        ) {
            self.events.emit_lossy(ShelfEvent::TrackTransitioned {
                group_id,
                track_index,
                timestamp: shelf_common::time::now(),
            });
        }
        let _ = self.persistence.save_position(SaveReason::TrackTransition);
    }

    async fn run_signal_handler(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<TimerSignal>) {
        loop {
            let signal = tokio::select! {
                _ = self.cancel.cancelled() => break,
                signal = rx.recv() => signal,
            };
            match signal {
                Some(TimerSignal::InactivityExpired) => self.release_for_inactivity().await,
                None => break,
            }
        }
    }

    async fn release_for_inactivity(&self) {
        info!("Releasing engine after inactivity");
        self.save_and_wait(SaveReason::Teardown).await;
        self.abort_switch();
        self.loader.cancel().await;
        if let Err(e) = self.engine.release().await {
            warn!("Failed to release engine after inactivity: {}", e);
        }
        self.session.clear();
        self.events.emit_lossy(ShelfEvent::InactivityExpired {
            timestamp: shelf_common::time::now(),
        });
    }

    async fn run_snapshot_emitter(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.settings.snapshot_interval());
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            match self.snapshot().await {
                Ok(snapshot) if snapshot.current_index.is_some() => {
                    self.events.emit_lossy(ShelfEvent::PlaybackProgress {
                        snapshot,
                        timestamp: shelf_common::time::now(),
                    });
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("Snapshot emitter stopping: {}", e);
                    break;
                }
            }
        }
    }
}
