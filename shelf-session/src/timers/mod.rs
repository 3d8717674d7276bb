//! Sleep and inactivity timers
//!
//! **Module Structure:**
//! - `sleep.rs`: [`SleepTimer`] state machine and its durable form
//! - `inactivity.rs`: [`InactivityTimer`] state machine
//! - `mod.rs`: [`TimerEngine`], which drives both from playback events and tick
//!   tasks
//!
//! Each armed timer owns one tick task guarded by a [`CancellationToken`]; a new
//! start or a cancel stops the previous task. Sleep expiry pauses playback here.
//! Inactivity expiry is signalled to the owner, which releases the engine.

mod inactivity;
mod sleep;

pub use inactivity::InactivityTimer;
pub use sleep::{PersistedSleepTimer, SleepCheck, SleepTimer};

use crate::config::RuntimeSettings;
use crate::engine::EngineHandle;
use crate::persistence::KeyValueStore;
use shelf_common::events::{EventBus, ShelfEvent, SleepTimerMode};
use shelf_common::keys::SLEEP_TIMER_KEY;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Notifications the owner of a [`TimerEngine`] must act on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerSignal {
    /// Playback has been idle for the inactivity timeout
    InactivityExpired,
}

struct TimerState {
    sleep: SleepTimer,
    sleep_ticker: Option<CancellationToken>,
    /// Last whole-second value reported in a tick event
    last_tick_secs: Option<u64>,
    inactivity: InactivityTimer,
    inactivity_ticker: Option<CancellationToken>,
    playing: bool,
}

impl TimerState {
    fn stop_sleep_ticker(&mut self) {
        if let Some(token) = self.sleep_ticker.take() {
            token.cancel();
        }
    }

    fn stop_inactivity_ticker(&mut self) {
        if let Some(token) = self.inactivity_ticker.take() {
            token.cancel();
        }
    }
}

struct TimerInner {
    engine: EngineHandle,
    events: Arc<EventBus>,
    store: Option<Arc<dyn KeyValueStore>>,
    tick: Duration,
    signals: mpsc::UnboundedSender<TimerSignal>,
    state: Mutex<TimerState>,
}

/// Drives the sleep and inactivity timers
#[derive(Clone)]
pub struct TimerEngine {
    inner: Arc<TimerInner>,
}

fn whole_seconds(remaining: Duration) -> u64 {
    remaining.as_millis().div_ceil(1000) as u64
}

impl TimerEngine {
    pub fn new(
        engine: EngineHandle,
        events: Arc<EventBus>,
        store: Option<Arc<dyn KeyValueStore>>,
        settings: &RuntimeSettings,
        signals: mpsc::UnboundedSender<TimerSignal>,
    ) -> Self {
        Self {
            inner: Arc::new(TimerInner {
                engine,
                events,
                store,
                tick: settings.sleep_tick(),
                signals,
                state: Mutex::new(TimerState {
                    sleep: SleepTimer::new(),
                    sleep_ticker: None,
                    last_tick_secs: None,
                    inactivity: InactivityTimer::new(settings.inactivity_timeout()),
                    inactivity_ticker: None,
                    playing: false,
                }),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, TimerState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Restore a persisted sleep timer after restart
    ///
    /// An already elapsed timer is discarded and its stored state cleared.
    pub async fn restore(&self, playing: bool) {
        let Some(store) = &self.inner.store else {
            return;
        };
        let raw = match store.get(SLEEP_TIMER_KEY).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return,
            Err(e) => {
                warn!("Failed to read persisted sleep timer: {}", e);
                return;
            }
        };

        let restored = serde_json::from_str::<PersistedSleepTimer>(&raw)
            .map_err(|e| warn!("Discarding unreadable sleep timer state: {}", e))
            .ok()
            .and_then(|p| SleepTimer::restore(&p, Instant::now(), shelf_common::time::now(), playing));

        let Some(timer) = restored else {
            info!("Persisted sleep timer already elapsed; discarding");
            self.persist_sleep().await;
            return;
        };

        let mode = timer.mode();
        let remaining = timer.remaining(Instant::now());
        {
            let mut state = self.state();
            state.playing = playing;
            state.sleep = timer;
            state.last_tick_secs = None;
            self.sync_sleep_ticker(&mut state);
        }
        info!("Restored sleep timer ({:?}, remaining {:?})", mode, remaining);
    }

    /// Start a fixed-duration sleep timer, replacing any active one
    pub async fn start_sleep_fixed(&self, duration: Duration) {
        {
            let mut state = self.state();
            let playing = state.playing;
            state.stop_sleep_ticker();
            state.sleep.start_fixed(duration, Instant::now(), playing);
            state.last_tick_secs = None;
            self.sync_sleep_ticker(&mut state);
        }
        info!("Sleep timer started: {}s", duration.as_secs());
        self.inner.events.emit_lossy(ShelfEvent::SleepTimerStarted {
            mode: SleepTimerMode::Fixed,
            remaining_seconds: Some(whole_seconds(duration)),
            timestamp: shelf_common::time::now(),
        });
        self.persist_sleep().await;
    }

    /// Start an end-of-chapter sleep timer, replacing any active one
    pub async fn start_sleep_end_of_chapter(&self) {
        {
            let mut state = self.state();
            state.stop_sleep_ticker();
            state.sleep.start_end_of_chapter();
            state.last_tick_secs = None;
        }
        info!("Sleep timer started: end of chapter");
        self.inner.events.emit_lossy(ShelfEvent::SleepTimerStarted {
            mode: SleepTimerMode::EndOfChapter,
            remaining_seconds: None,
            timestamp: shelf_common::time::now(),
        });
        self.persist_sleep().await;
    }

    /// Cancel the sleep timer; no-op when none is active
    pub async fn cancel_sleep(&self) {
        let was_active = {
            let mut state = self.state();
            state.stop_sleep_ticker();
            state.sleep.cancel()
        };
        if was_active {
            info!("Sleep timer cancelled");
            self.inner.events.emit_lossy(ShelfEvent::SleepTimerCancelled {
                timestamp: shelf_common::time::now(),
            });
            self.persist_sleep().await;
        }
    }

    /// Enable the inactivity timer (default timeout when `None`)
    pub fn start_inactivity(&self, timeout: Option<Duration>) {
        let mut state = self.state();
        let timeout = timeout.unwrap_or_else(|| state.inactivity.timeout());
        let playing = state.playing;
        state.stop_inactivity_ticker();
        state.inactivity.enable(timeout, Instant::now(), playing);
        self.spawn_inactivity_ticker(&mut state);
        info!("Inactivity timer enabled: {}s", timeout.as_secs());
    }

    pub fn cancel_inactivity(&self) {
        let mut state = self.state();
        state.stop_inactivity_ticker();
        if state.inactivity.disable() {
            info!("Inactivity timer disabled");
        }
    }

    /// Couple both timers to audible playback
    pub async fn on_playback_state(&self, is_playing: bool) {
        let persist = {
            let mut state = self.state();
            if state.playing == is_playing {
                return;
            }
            state.playing = is_playing;
            let now = Instant::now();
            if is_playing {
                state.sleep.on_playback_resumed(now);
                state.inactivity.on_playback_resumed();
            } else {
                state.sleep.on_playback_paused(now);
                state.inactivity.on_playback_paused(now);
            }
            self.sync_sleep_ticker(&mut state);
            state.sleep.mode() == Some(SleepTimerMode::Fixed)
        };
        if persist {
            self.persist_sleep().await;
        }
    }

    /// A track played to its end; fires an end-of-chapter timer
    pub async fn on_track_completed(&self) {
        let fired = self.state().sleep.on_track_completed();
        if fired {
            self.expire_sleep().await;
        }
    }

    /// Seconds left on a fixed sleep timer
    pub fn sleep_remaining(&self) -> Option<Duration> {
        self.state().sleep.remaining(Instant::now())
    }

    pub fn sleep_mode(&self) -> Option<SleepTimerMode> {
        self.state().sleep.mode()
    }

    pub fn inactivity_enabled(&self) -> bool {
        self.state().inactivity.is_enabled()
    }

    /// Stop every tick task; persisted sleep state is kept for the next start
    pub fn shutdown(&self) {
        let mut state = self.state();
        state.stop_sleep_ticker();
        state.stop_inactivity_ticker();
        state.playing = false;
    }

    /// Run the sleep ticker exactly while a fixed countdown is running
    fn sync_sleep_ticker(&self, state: &mut TimerState) {
        if !state.sleep.is_counting() {
            state.stop_sleep_ticker();
            return;
        }
        if state.sleep_ticker.is_some() {
            return;
        }

        let token = CancellationToken::new();
        state.sleep_ticker = Some(token.clone());
        let this = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(this.inner.tick);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {}
                }
                if !this.sleep_tick(&token) {
                    break;
                }
            }
        });
    }

    /// One sleep check; returns false when the ticker should stop
    fn sleep_tick(&self, token: &CancellationToken) -> bool {
        let tick = {
            let mut state = self.state();
            if token.is_cancelled() {
                return false;
            }
            match state.sleep.check(Instant::now()) {
                SleepCheck::Inactive => return false,
                SleepCheck::Expired => {
                    state.sleep_ticker = None;
                    None
                }
                SleepCheck::Remaining(remaining) => {
                    let secs = whole_seconds(remaining);
                    if state.last_tick_secs == Some(secs) {
                        return true;
                    }
                    state.last_tick_secs = Some(secs);
                    Some(secs)
                }
            }
        };

        match tick {
            Some(remaining_seconds) => {
                self.inner
                    .events
                    .emit_lossy(ShelfEvent::SleepTimerTick { remaining_seconds });
                true
            }
            None => {
                let this = self.clone();
                tokio::spawn(async move { this.expire_sleep().await });
                false
            }
        }
    }

    async fn expire_sleep(&self) {
        info!("Sleep timer expired; pausing playback");
        if let Err(e) = self.inner.engine.set_play_when_ready(false).await {
            warn!("Failed to pause on sleep timer expiry: {}", e);
        }
        self.state().last_tick_secs = None;
        self.inner.events.emit_lossy(ShelfEvent::SleepTimerExpired {
            timestamp: shelf_common::time::now(),
        });
        self.persist_sleep().await;
    }

    fn spawn_inactivity_ticker(&self, state: &mut TimerState) {
        let token = CancellationToken::new();
        state.inactivity_ticker = Some(token.clone());
        let this = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(this.inner.tick);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {}
                }
                let expired = this.state().inactivity.check(Instant::now());
                if expired {
                    info!("Inactivity timeout reached");
                    if this.inner.signals.send(TimerSignal::InactivityExpired).is_err() {
                        debug!("Timer signal receiver gone; stopping inactivity ticker");
                        break;
                    }
                }
            }
        });
    }

    /// Mirror the sleep timer to the store (delete when idle)
    async fn persist_sleep(&self) {
        let Some(store) = &self.inner.store else {
            return;
        };
        let persisted = self
            .state()
            .sleep
            .to_persisted(Instant::now(), shelf_common::time::now());

        let result = match persisted {
            Some(persisted) => match serde_json::to_string(&persisted) {
                Ok(json) => store.put_all(&[(SLEEP_TIMER_KEY.to_string(), json)]).await,
                Err(e) => {
                    warn!("Failed to encode sleep timer state: {}", e);
                    return;
                }
            },
            None => store.delete(SLEEP_TIMER_KEY).await,
        };
        if let Err(e) = result {
            warn!("Failed to persist sleep timer state: {}", e);
        }
    }
}
