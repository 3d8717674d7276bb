//! Lazy parallel playlist loader
//!
//! **Responsibilities:**
//! - Put track 0 into the engine synchronously and start it paused
//! - Populate the remaining tracks from background tasks on a bounded pool,
//!   prioritising the tracks around the requested target
//! - Keep engine order equal to host order no matter which task finishes first
//! - Skip tracks whose source cannot be built without aborting the batch
//! - Confirm the final track count with a debounced stability check and publish
//!   it on a watch channel
//!
//! **Ordering:** a track is inserted only once every lower index has settled
//! (inserted or skipped). Its engine slot is the number of lower indices that were
//! actually inserted, so a skipped track leaves no gap. Waiting tasks block on a
//! [`Notify`] and do not hold a worker permit. Only a track's own source build is
//! time-bounded; a slow track is skipped and its successors keep waiting for it.

use crate::config::RuntimeSettings;
use crate::duration_cache::DurationCache;
use crate::engine::{EngineHandle, MediaSource, SourceFactory};
use crate::error::LoadError;
use crate::model::{LoadingState, PlaylistSession, TrackRef};
use crate::session::{SessionContext, SessionView};
use shelf_common::events::{EventBus, ShelfEvent};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex, Notify, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Number of neighbours on each side of the target loaded ahead of the rest
const NEIGHBOUR_BAND: usize = 2;

/// Loader progress, published on a watch channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadProgress {
    /// No playlist
    Idle,
    /// Background population in progress
    Loading { generation: u64 },
    /// Track count confirmed stable
    Loaded {
        generation: u64,
        /// Tracks present in the engine
        confirmed_count: usize,
        /// Tracks the host asked for
        requested: usize,
        /// Requested indices that were skipped, ascending
        skipped: Vec<usize>,
    },
    /// First track failed; nothing is loaded
    Failed { generation: u64 },
    /// Count never stabilised within the timeout
    Unstable { generation: u64 },
}

impl LoadProgress {
    pub fn generation(&self) -> Option<u64> {
        match self {
            LoadProgress::Idle => None,
            LoadProgress::Loading { generation }
            | LoadProgress::Loaded { generation, .. }
            | LoadProgress::Failed { generation }
            | LoadProgress::Unstable { generation } => Some(*generation),
        }
    }
}

/// Result of a successful [`PlaylistLoader::load_playlist`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Track 0 is in the engine and background loading has started
    Started { generation: u64 },
    /// Same playlist is already loading; nothing was done
    AlreadyLoading { generation: u64 },
}

impl LoadOutcome {
    pub fn generation(&self) -> u64 {
        match self {
            LoadOutcome::Started { generation } | LoadOutcome::AlreadyLoading { generation } => {
                *generation
            }
        }
    }
}

/// Load order for indices `1..len` around `target`
///
/// The target itself first, then up to two tracks before it (nearest first), up
/// to two after it (nearest first), then everything else ascending. Index 0 is
/// never included; it is loaded synchronously.
pub fn priority_order(len: usize, target: Option<usize>) -> Vec<usize> {
    if len <= 1 {
        return Vec::new();
    }
    let target = target.unwrap_or(0).min(len - 1);
    let mut order = Vec::with_capacity(len - 1);

    if target > 0 {
        order.push(target);
    }
    for d in 1..=NEIGHBOUR_BAND {
        match target.checked_sub(d) {
            Some(i) if i > 0 => order.push(i),
            _ => break,
        }
    }
    for d in 1..=NEIGHBOUR_BAND {
        let i = target + d;
        if i >= len {
            break;
        }
        order.push(i);
    }

    let mut seen = vec![false; len];
    seen[0] = true;
    for &i in &order {
        seen[i] = true;
    }
    order.extend((1..len).filter(|i| !seen[*i]));
    order
}

/// Settled indices of one load generation (`true` = inserted)
#[derive(Debug, Default)]
struct InsertionLedger {
    settled: Mutex<BTreeMap<usize, bool>>,
    changed: Notify,
}

impl InsertionLedger {
    fn all_settled_below(settled: &BTreeMap<usize, bool>, index: usize) -> bool {
        settled.range(..index).count() == index
    }

    fn inserted_below(settled: &BTreeMap<usize, bool>, index: usize) -> usize {
        settled.range(..index).filter(|(_, inserted)| **inserted).count()
    }

    /// Wait until every index below `index` has settled
    ///
    /// Returns `false` when the load was cancelled first. Every predecessor
    /// settles on its own (its build is time-bounded), so the wait ends.
    async fn wait_for_predecessors(&self, index: usize, cancel: &CancellationToken) -> bool {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if Self::all_settled_below(&*self.settled.lock().await, index) {
                return true;
            }

            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = notified => {}
            }
        }
    }
}

/// The load currently owned by the loader
struct ActiveLoad {
    generation: u64,
    group_id: String,
    tracks: Arc<[TrackRef]>,
    cancel: CancellationToken,
}

impl ActiveLoad {
    fn is_same_playlist(&self, session: &PlaylistSession) -> bool {
        self.group_id == session.group_id
            && self.tracks.len() == session.tracks.len()
            && self
                .tracks
                .iter()
                .zip(session.tracks.iter())
                .all(|(a, b)| a.id == b.id)
    }
}

/// Everything a background load task needs
#[derive(Clone)]
struct LoadContext {
    generation: u64,
    group_id: String,
    tracks: Arc<[TrackRef]>,
    target: Option<usize>,
    engine: EngineHandle,
    factory: Arc<dyn SourceFactory>,
    session: Arc<SessionContext>,
    durations: Arc<DurationCache>,
    events: Arc<EventBus>,
    settings: RuntimeSettings,
    progress: Arc<watch::Sender<LoadProgress>>,
    ledger: Arc<InsertionLedger>,
    insert_gate: Arc<Mutex<()>>,
    cancel: CancellationToken,
}

/// Playlist loader
pub struct PlaylistLoader {
    engine: EngineHandle,
    factory: Arc<dyn SourceFactory>,
    session: Arc<SessionContext>,
    durations: Arc<DurationCache>,
    events: Arc<EventBus>,
    settings: RuntimeSettings,
    progress: Arc<watch::Sender<LoadProgress>>,
    /// Serialises load calls; holds the in-flight load
    active: Mutex<Option<ActiveLoad>>,
    /// Held around every engine insert so a superseded generation cannot
    /// insert after the engine was cleared for a new one
    insert_gate: Arc<Mutex<()>>,
}

impl PlaylistLoader {
    pub fn new(
        engine: EngineHandle,
        factory: Arc<dyn SourceFactory>,
        session: Arc<SessionContext>,
        durations: Arc<DurationCache>,
        events: Arc<EventBus>,
        settings: RuntimeSettings,
    ) -> Self {
        let (progress, _) = watch::channel(LoadProgress::Idle);
        Self {
            engine,
            factory,
            session,
            durations,
            events,
            settings,
            progress: Arc::new(progress),
            active: Mutex::new(None),
            insert_gate: Arc::new(Mutex::new(())),
        }
    }

    /// Subscribe to loader progress
    pub fn subscribe_progress(&self) -> watch::Receiver<LoadProgress> {
        self.progress.subscribe()
    }

    /// Load a playlist
    ///
    /// Returns once track 0 is in the engine (paused); the rest is populated in
    /// the background. Calling again with the same playlist while it is still
    /// loading is a no-op. A different playlist supersedes the in-flight load.
    pub async fn load_playlist(&self, playlist: PlaylistSession) -> Result<LoadOutcome, LoadError> {
        if playlist.tracks.is_empty() {
            self.emit_load_error(&playlist.group_id, &LoadError::EmptyPlaylist);
            return Err(LoadError::EmptyPlaylist);
        }

        let mut active = self.active.lock().await;

        if let Some(current) = active.as_ref() {
            let in_flight = self.session.is_current(current.generation)
                && self.session.loading_state() == LoadingState::Loading;
            if in_flight && current.is_same_playlist(&playlist) {
                warn!(
                    "Duplicate load for group {} while generation {} is still loading; ignoring",
                    playlist.group_id, current.generation
                );
                return Ok(LoadOutcome::AlreadyLoading {
                    generation: current.generation,
                });
            }
            current.cancel.cancel();
        }

        let group_id = playlist.group_id.clone();
        let tracks = Arc::clone(&playlist.tracks);
        let target = playlist.requested_target_index;

        let (generation, cleared) = {
            let _gate = self.insert_gate.lock().await;
            let generation = self.session.begin(playlist);
            (generation, self.engine.clear().await)
        };
        if let Err(e) = cleared {
            let e = LoadError::Engine(e.to_string());
            error!("Playlist load failed for group {}: {}", group_id, e);
            self.session.mark_not_loading(generation);
            self.progress.send_replace(LoadProgress::Failed { generation });
            self.emit_load_error(&group_id, &e);
            *active = None;
            return Err(e);
        }
        self.progress.send_replace(LoadProgress::Loading { generation });
        info!(
            "Loading playlist for group {} ({} tracks, generation {})",
            group_id,
            tracks.len(),
            generation
        );

        if let Err(e) = self.load_first_track(generation, &tracks[0]).await {
            error!("Playlist load failed for group {}: {}", group_id, e);
            if let Err(release_err) = self.engine.release().await {
                warn!("Failed to release engine after load failure: {}", release_err);
            }
            self.session.mark_not_loading(generation);
            self.progress.send_replace(LoadProgress::Failed { generation });
            self.emit_load_error(&group_id, &e);
            *active = None;
            return Err(e);
        }

        let cancel = CancellationToken::new();
        let ctx = LoadContext {
            generation,
            group_id: group_id.clone(),
            tracks: Arc::clone(&tracks),
            target,
            engine: self.engine.clone(),
            factory: Arc::clone(&self.factory),
            session: Arc::clone(&self.session),
            durations: Arc::clone(&self.durations),
            events: Arc::clone(&self.events),
            settings: self.settings.clone(),
            progress: Arc::clone(&self.progress),
            ledger: Arc::new(InsertionLedger::default()),
            insert_gate: Arc::clone(&self.insert_gate),
            cancel: cancel.clone(),
        };
        ctx.ledger.settled.lock().await.insert(0, true);
        tokio::spawn(run_background(ctx));

        *active = Some(ActiveLoad {
            generation,
            group_id,
            tracks,
            cancel,
        });

        Ok(LoadOutcome::Started { generation })
    }

    /// Cancel any in-flight background load (teardown)
    pub async fn cancel(&self) {
        if let Some(current) = self.active.lock().await.take() {
            current.cancel.cancel();
            debug!("Cancelled load generation {}", current.generation);
        }
    }

    async fn load_first_track(&self, generation: u64, track: &TrackRef) -> Result<(), LoadError> {
        let source = self
            .factory
            .build(track)
            .await
            .map_err(|e| LoadError::FirstTrack {
                id: track.id.clone(),
                reason: e.to_string(),
            })?;
        let measured = source.duration_ms;

        {
            let _gate = self.insert_gate.lock().await;
            self.engine
                .insert_track_at(0, source)
                .await
                .map_err(|e| LoadError::Engine(e.to_string()))?;
            self.session.record_insert(generation, 0, 0);
        }
        if let Some(duration_ms) = measured {
            self.durations.insert(&track.id, duration_ms);
        }

        self.engine
            .set_play_when_ready(false)
            .await
            .map_err(|e| LoadError::Engine(e.to_string()))?;
        self.engine
            .prepare()
            .await
            .map_err(|e| LoadError::Engine(e.to_string()))?;
        Ok(())
    }

    fn emit_load_error(&self, group_id: &str, error: &LoadError) {
        self.events.emit_lossy(ShelfEvent::LoadError {
            group_id: group_id.to_string(),
            message: error.to_string(),
            timestamp: shelf_common::time::now(),
        });
    }
}

/// Dispatch every remaining track, wait for all of them, then confirm the count
async fn run_background(ctx: LoadContext) {
    let permits = Arc::new(Semaphore::new(ctx.settings.loader_max_concurrency));
    let mut tasks = JoinSet::new();

    for index in priority_order(ctx.tracks.len(), ctx.target) {
        let permit = tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            permit = Arc::clone(&permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        let task_ctx = ctx.clone();
        tasks.spawn(async move {
            load_track(task_ctx, index, permit).await;
        });
    }

    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            error!("Track load task failed: {}", e);
        }
    }

    if ctx.cancel.is_cancelled() || !ctx.session.is_current(ctx.generation) {
        debug!("Load generation {} superseded", ctx.generation);
        return;
    }

    confirm_stable_count(&ctx).await;
}

/// Build, order and insert one track
async fn load_track(ctx: LoadContext, index: usize, permit: tokio::sync::OwnedSemaphorePermit) {
    let track = &ctx.tracks[index];

    let build_timeout = ctx.settings.build_timeout();
    let built = tokio::select! {
        _ = ctx.cancel.cancelled() => return,
        result = tokio::time::timeout(build_timeout, ctx.factory.build(track)) => result,
    };
    // Permits bound source building only; waiting on predecessors must not hold one
    drop(permit);

    let source: Option<MediaSource> = match built {
        Ok(Ok(source)) => Some(source),
        Ok(Err(e)) => {
            warn!("Skipping track {} ({}): {}", index, track.id, e);
            None
        }
        Err(_) => {
            warn!(
                "Skipping track {} ({}): source not ready after {} ms",
                index, track.id, ctx.settings.loader_build_timeout_ms
            );
            None
        }
    };

    if !ctx.ledger.wait_for_predecessors(index, &ctx.cancel).await {
        return;
    }

    let mut settled = ctx.ledger.settled.lock().await;
    if settled.contains_key(&index) {
        warn!("Track {} already settled, not inserting twice", index);
        return;
    }

    let inserted = match source {
        None => false,
        Some(source) => {
            let _gate = ctx.insert_gate.lock().await;
            if ctx.cancel.is_cancelled() || !ctx.session.is_current(ctx.generation) {
                return;
            }
            let slot = InsertionLedger::inserted_below(&settled, index);
            let measured = source.duration_ms;
            match ctx.engine.insert_track_at(slot, source).await {
                Ok(()) => {
                    ctx.session.record_insert(ctx.generation, slot, index);
                    if let Some(duration_ms) = measured {
                        ctx.durations.insert(&track.id, duration_ms);
                    }
                    debug!("Inserted track {} at slot {}", index, slot);
                    true
                }
                Err(e) => {
                    warn!("Skipping track {} ({}): {}", index, track.id, e);
                    false
                }
            }
        }
    };

    settled.insert(index, inserted);
    drop(settled);
    ctx.ledger.changed.notify_waiters();
}

/// Debounced stability check, then publish the confirmed count
async fn confirm_stable_count(ctx: &LoadContext) {
    let requested = ctx.tracks.len();
    let skipped: Vec<usize> = ctx
        .ledger
        .settled
        .lock()
        .await
        .iter()
        .filter(|(_, inserted)| !**inserted)
        .map(|(index, _)| *index)
        .collect();
    let expected = requested - skipped.len();

    let deadline = Instant::now() + ctx.settings.stability_timeout();
    let mut consecutive = 0u32;

    loop {
        match ctx.engine.track_count().await {
            Ok(count) if count == expected => consecutive += 1,
            Ok(count) => {
                debug!("Track count {} != expected {}", count, expected);
                consecutive = 0;
            }
            Err(e) => {
                warn!("Stability check aborted: {}", e);
                ctx.session.mark_not_loading(ctx.generation);
                ctx.progress.send_replace(LoadProgress::Unstable {
                    generation: ctx.generation,
                });
                return;
            }
        }

        if consecutive >= ctx.settings.stability_check_count {
            break;
        }

        if Instant::now() >= deadline {
            warn!(
                "Track count for group {} never stabilised at {}",
                ctx.group_id, expected
            );
            ctx.session.mark_not_loading(ctx.generation);
            ctx.progress.send_replace(LoadProgress::Unstable {
                generation: ctx.generation,
            });
            return;
        }

        tokio::select! {
            _ = ctx.cancel.cancelled() => return,
            _ = tokio::time::sleep(ctx.settings.stability_check_interval()) => {}
        }
    }

    if !ctx.session.mark_loaded(ctx.generation, expected) {
        return;
    }

    if skipped.is_empty() {
        info!(
            "Playlist for group {} loaded: {} tracks",
            ctx.group_id, expected
        );
    } else {
        info!(
            "Playlist for group {} loaded: {} of {} tracks (skipped {:?})",
            ctx.group_id, expected, requested, skipped
        );
    }

    ctx.progress.send_replace(LoadProgress::Loaded {
        generation: ctx.generation,
        confirmed_count: expected,
        requested,
        skipped,
    });
    ctx.events.emit_lossy(ShelfEvent::LoadComplete {
        group_id: ctx.group_id.clone(),
        loaded: expected,
        requested,
        timestamp: shelf_common::time::now(),
    });
}
