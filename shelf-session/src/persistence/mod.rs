//! Position persistence
//!
//! **Module Structure:**
//! - `reason.rs`: [`SaveReason`] and the [`Debouncer`]
//! - `resolver.rs`: [`IndexResolver`], which index/offset a save records
//! - `channel.rs`: [`PrimaryChannel`] to the host and the in-process [`HostChannel`]
//! - `store.rs`: [`KeyValueStore`], the SQLite-backed store and [`PositionStore`]
//!
//! **Save pipeline:** guards (no tracks, loading, switching) -> debounce ->
//! spawned task: engine readout -> index correction -> record validation ->
//! primary channel (bounded ack) -> fallback store -> `PositionSaved` event.
//! A failure of both paths drops the save with an error log.
//!
//! Commits run one at a time in admission order: every admitted save takes a
//! sequence number, and a save that reaches the store after a newer one has
//! committed is dropped instead of overwriting it.

mod channel;
mod reason;
mod resolver;
mod store;

pub use channel::{HostChannel, HostSaveCall, PrimaryChannel, SavePositionRequest};
pub use reason::{Debouncer, SaveReason};
pub use resolver::{IndexResolver, IndexSource, ResolveInput, ResolvedPosition};
pub use store::{KeyValueStore, PositionStore, SavedPosition, SqliteSettingsStore};

use crate::config::RuntimeSettings;
use crate::duration_cache::DurationCache;
use crate::engine::{EngineHandle, EngineStatus};
use crate::error::ChannelError;
use crate::model::{resolve_index, LoadingState, PositionRecord, TrackRef};
use crate::session::{SessionContext, SessionView};
use shelf_common::events::{EventBus, SavePath, ShelfEvent};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Outcome of a completed save
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveReport {
    pub record: PositionRecord,
    pub path: SavePath,
}

/// Periodic save cadence for the current offset
///
/// Near either end of a track (inside `periodic_save_edge_fraction` of its
/// duration) saves are frequent; elsewhere they are sparse. Unknown durations
/// use the sparse cadence.
pub fn periodic_interval(offset_ms: u64, duration_ms: Option<u64>, settings: &RuntimeSettings) -> Duration {
    let edge = Duration::from_millis(settings.periodic_save_edge_ms);
    let normal = Duration::from_millis(settings.periodic_save_interval_ms);

    match duration_ms {
        Some(duration) if duration > 0 => {
            let zone = (duration as f64 * settings.periodic_save_edge_fraction) as u64;
            if offset_ms <= zone || offset_ms >= duration.saturating_sub(zone) {
                edge
            } else {
                normal
            }
        }
        _ => normal,
    }
}

struct Inner {
    engine: EngineHandle,
    session: Arc<SessionContext>,
    durations: Arc<DurationCache>,
    primary: Option<Arc<dyn PrimaryChannel>>,
    store: PositionStore,
    events: Arc<EventBus>,
    settings: RuntimeSettings,
    resolver: IndexResolver,
    debouncer: Mutex<Debouncer>,
    /// Sequence number of the last admitted save
    admitted: AtomicU64,
    /// Sequence number of the last committed save; held across a commit
    committed: tokio::sync::Mutex<u64>,
}

/// Debounced dual-path position persistence
#[derive(Clone)]
pub struct PositionPersistence {
    inner: Arc<Inner>,
}

impl PositionPersistence {
    pub fn new(
        engine: EngineHandle,
        session: Arc<SessionContext>,
        durations: Arc<DurationCache>,
        primary: Option<Arc<dyn PrimaryChannel>>,
        store: PositionStore,
        events: Arc<EventBus>,
        settings: RuntimeSettings,
    ) -> Self {
        let resolver = IndexResolver::new(settings.duration_tolerance_ms);
        let debouncer = Mutex::new(Debouncer::new(settings.save_debounce()));
        Self {
            inner: Arc::new(Inner {
                engine,
                session,
                durations,
                primary,
                store,
                events,
                settings,
                resolver,
                debouncer,
                admitted: AtomicU64::new(0),
                committed: tokio::sync::Mutex::new(0),
            }),
        }
    }

    /// Request a save
    ///
    /// Never blocks on I/O. Returns the handle of the spawned save, or `None`
    /// when the request was skipped by a guard or the debouncer.
    pub fn save_position(&self, reason: SaveReason) -> Option<JoinHandle<Option<SaveReport>>> {
        if let Some(skip) = self.inner.precondition_skip() {
            debug!("Skipping {} save: {}", reason, skip);
            return None;
        }

        let sequence = {
            let mut debouncer = self.inner.debouncer.lock().unwrap_or_else(|e| e.into_inner());
            if !debouncer.admit(reason, Instant::now()) {
                debug!("Skipping {} save: debounced", reason);
                return None;
            }
            self.inner.admitted.fetch_add(1, Ordering::SeqCst) + 1
        };

        let inner = Arc::clone(&self.inner);
        Some(tokio::spawn(async move { inner.persist(reason, sequence).await }))
    }

    /// Last position saved in the fallback store for a group
    pub async fn saved_position(&self, group_id: &str) -> Option<SavedPosition> {
        match self.inner.store.read_position(group_id).await {
            Ok(saved) => saved,
            Err(e) => {
                debug!("No usable saved position for {}: {}", group_id, e);
                None
            }
        }
    }

    /// Run periodic saves until `cancel` fires
    ///
    /// Saves only while the engine is playing.
    pub fn spawn_periodic(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut delay = Duration::from_millis(this.inner.settings.periodic_save_interval_ms);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }

                match this.inner.engine.status().await {
                    Ok(status) => {
                        this.inner.note_duration(&this.inner.session.tracks(), &status);
                        delay = periodic_interval(
                            status.current_offset_ms,
                            status.duration_ms,
                            &this.inner.settings,
                        );
                        if status.is_playing {
                            let _ = this.save_position(SaveReason::Periodic);
                        }
                    }
                    Err(e) => {
                        debug!("Periodic save loop stopping: {}", e);
                        break;
                    }
                }
            }
        })
    }
}

impl Inner {
    fn precondition_skip(&self) -> Option<&'static str> {
        if self.session.tracks().is_empty() {
            Some("no tracks loaded")
        } else if self.session.loading_state() == LoadingState::Loading {
            Some("playlist load in progress")
        } else if self.session.switch_in_progress() {
            Some("track switch in progress")
        } else {
            None
        }
    }

    /// Record the engine-measured duration of the playing track
    fn note_duration(&self, tracks: &[TrackRef], status: &EngineStatus) {
        let (Some(content_id), Some(duration_ms)) = (status.content_id.as_deref(), status.duration_ms) else {
            return;
        };
        if let Some(index) = resolve_index(tracks, content_id) {
            self.durations.insert(&tracks[index].id, duration_ms);
        }
    }

    async fn persist(&self, reason: SaveReason, sequence: u64) -> Option<SaveReport> {
        let status = match self.engine.status().await {
            Ok(status) => status,
            Err(e) => {
                debug!("Skipping {} save: {}", reason, e);
                return None;
            }
        };
        if status.track_count == 0 {
            debug!("Skipping {} save: engine playlist empty", reason);
            return None;
        }
        if let Some(skip) = self.precondition_skip() {
            debug!("Skipping {} save: {}", reason, skip);
            return None;
        }

        let group_id = self.session.group_id()?;
        let tracks = self.session.tracks();
        self.note_duration(&tracks, &status);
        let to_requested = |slot: usize| self.session.requested_index_for_slot(slot);

        let input = ResolveInput {
            tracks: &tracks,
            actual_index: self.session.actual_slot().and_then(to_requested),
            raw_index: status.current_index.and_then(to_requested),
            content_id: status.content_id.as_deref(),
            offset_ms: status.current_offset_ms,
        };
        let Some(resolved) = self.resolver.resolve(&input, &self.durations) else {
            debug!("Skipping {} save: current track unknown", reason);
            return None;
        };

        let position_ms = i64::try_from(resolved.position_ms).unwrap_or(-1);
        let Some(record) = PositionRecord::validated(
            &group_id,
            resolved.index,
            position_ms,
            tracks.len(),
            Instant::now(),
        ) else {
            debug!(
                "Skipping {} save: index {} / position {} out of bounds",
                reason, resolved.index, resolved.position_ms
            );
            return None;
        };

        let mut committed = self.committed.lock().await;
        if *committed > sequence {
            debug!(
                "Dropping {} save {}:{} ms: superseded by a newer save",
                reason, record.track_index, record.position_ms
            );
            return None;
        }
        let path = self.commit(&record).await?;
        *committed = sequence;
        drop(committed);
        debug!(
            "Saved {} position {}:{} ms via {} ({:?})",
            reason, record.track_index, record.position_ms, path, resolved.source
        );

        self.events.emit_lossy(ShelfEvent::PositionSaved {
            group_id: record.group_id.clone(),
            track_index: record.track_index,
            position_ms: record.position_ms,
            path,
            timestamp: shelf_common::time::now(),
        });

        Some(SaveReport { record, path })
    }

    /// Primary channel first, fallback store second
    async fn commit(&self, record: &PositionRecord) -> Option<SavePath> {
        if let Some(primary) = &self.primary {
            let request =
                SavePositionRequest::new(&record.group_id, record.track_index, record.position_ms);
            let ack = self.settings.save_ack_timeout();

            let failure = match tokio::time::timeout(ack, primary.save_current_position(request)).await {
                Ok(Ok(())) => return Some(SavePath::Primary),
                Ok(Err(e)) => e,
                Err(_) => ChannelError::Timeout(self.settings.save_ack_timeout_ms),
            };
            debug!("Primary save failed ({}), using fallback store", failure);
        }

        match self
            .store
            .write_position(&record.group_id, record.track_index, record.position_ms)
            .await
        {
            Ok(()) => Some(SavePath::Fallback),
            Err(e) => {
                error!(
                    "Dropping position save for {}: primary and fallback both failed: {}",
                    record.group_id, e
                );
                None
            }
        }
    }
}
