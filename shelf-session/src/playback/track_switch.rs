//! Track switch coordinator
//!
//! Moves the engine to a saved (track, offset) once the loader has confirmed the
//! playlist. Switching track and seeking the offset are two separate steps
//! because engines reset the offset when the active track changes.
//!
//! **Protocol:**
//! 1. Wait for [`LoadProgress::Loaded`] of the current generation (bounded)
//! 2. If the engine is not on the target slot: subscribe, seek to the slot's
//!    default position and wait for the next index-transition event; without a
//!    matching event in time, poll the reported index
//! 3. Seek to the offset and verify the reported index
//! 4. On mismatch, one retry cycle, then accept and log

use super::loader::LoadProgress;
use crate::config::RuntimeSettings;
use crate::engine::{EngineEvent, EngineHandle};
use crate::error::EngineError;
use crate::session::{SessionContext, SessionView};
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot, watch};
use tracing::{debug, info, warn};

/// Why a position was not applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbandonReason {
    /// Loader never confirmed the count in time
    StabilityTimeout,
    /// Confirmed plus skipped tracks did not add up to the expected total
    CountMismatch { confirmed: usize, expected: usize },
    /// Target track was skipped during loading
    TargetSkipped,
    /// A newer playlist replaced the one being positioned
    Superseded,
    /// First track failed, nothing to position
    LoadFailed,
    Engine(String),
}

/// Result of [`TrackSwitchCoordinator::apply_initial_position`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchOutcome {
    /// Engine reports the target slot after the offset seek
    Applied { slot: usize, position_ms: u64 },
    /// Engine still disagreed after the retry cycle; accepted as is
    AppliedWithMismatch {
        slot: usize,
        reported: Option<usize>,
    },
    /// No seek was performed
    Abandoned(AbandonReason),
}

/// Clears the session's switch flag when dropped
struct SwitchGuard<'a>(&'a SessionContext);

impl<'a> SwitchGuard<'a> {
    fn engage(session: &'a SessionContext) -> Self {
        session.set_switching(true);
        Self(session)
    }
}

impl Drop for SwitchGuard<'_> {
    fn drop(&mut self) {
        self.0.set_switching(false);
    }
}

pub struct TrackSwitchCoordinator {
    engine: EngineHandle,
    session: Arc<SessionContext>,
    progress: watch::Receiver<LoadProgress>,
    settings: RuntimeSettings,
}

impl TrackSwitchCoordinator {
    pub fn new(
        engine: EngineHandle,
        session: Arc<SessionContext>,
        progress: watch::Receiver<LoadProgress>,
        settings: RuntimeSettings,
    ) -> Self {
        Self {
            engine,
            session,
            progress,
            settings,
        }
    }

    /// Apply a saved position to the playlist currently loading
    ///
    /// `target_index` is in requested-list coordinates; `total_expected` is the
    /// requested track count. Best effort: every failure ends in
    /// [`SwitchOutcome::Abandoned`] or an accepted mismatch, never an error.
    pub async fn apply_initial_position(
        &self,
        target_index: usize,
        target_position_ms: u64,
        total_expected: usize,
    ) -> SwitchOutcome {
        let generation = self.session.generation();

        let (confirmed, skipped) = match self.wait_for_loaded(generation).await {
            Ok(loaded) => loaded,
            Err(reason) => {
                warn!("Abandoning initial position: {:?}", reason);
                return SwitchOutcome::Abandoned(reason);
            }
        };

        if confirmed + skipped.len() != total_expected {
            let reason = AbandonReason::CountMismatch {
                confirmed,
                expected: total_expected,
            };
            warn!("Abandoning initial position: {:?}", reason);
            return SwitchOutcome::Abandoned(reason);
        }

        let slot = match self.session.slot_for_requested_index(target_index) {
            Some(slot) if slot < confirmed => slot,
            _ => {
                warn!(
                    "Abandoning initial position: track {} is not in the loaded playlist",
                    target_index
                );
                return SwitchOutcome::Abandoned(AbandonReason::TargetSkipped);
            }
        };

        let _guard = SwitchGuard::engage(&self.session);
        match self.switch_and_seek(slot, target_position_ms).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Abandoning initial position: {}", e);
                SwitchOutcome::Abandoned(AbandonReason::Engine(e.to_string()))
            }
        }
    }

    /// Wait for the loader to confirm this generation
    ///
    /// Returns the confirmed count and the skipped requested indices.
    async fn wait_for_loaded(&self, generation: u64) -> Result<(usize, Vec<usize>), AbandonReason> {
        let mut progress = self.progress.clone();

        let wait = async {
            loop {
                let current = progress.borrow_and_update().clone();
                match current {
                    LoadProgress::Loaded {
                        generation: g,
                        confirmed_count,
                        skipped,
                        ..
                    } if g == generation => return Ok((confirmed_count, skipped)),
                    LoadProgress::Failed { generation: g } if g == generation => {
                        return Err(AbandonReason::LoadFailed)
                    }
                    LoadProgress::Unstable { generation: g } if g == generation => {
                        return Err(AbandonReason::StabilityTimeout)
                    }
                    other => {
                        if other.generation().is_some_and(|g| g > generation) {
                            return Err(AbandonReason::Superseded);
                        }
                    }
                }
                if progress.changed().await.is_err() {
                    return Err(AbandonReason::Superseded);
                }
            }
        };

        match tokio::time::timeout(self.settings.stability_timeout(), wait).await {
            Ok(result) => result,
            Err(_) => Err(AbandonReason::StabilityTimeout),
        }
    }

    async fn switch_and_seek(
        &self,
        slot: usize,
        position_ms: u64,
    ) -> Result<SwitchOutcome, EngineError> {
        if self.engine.current_index().await? != Some(slot) {
            self.switch_track(slot).await?;
        } else {
            debug!("Engine already on slot {}, seeking directly", slot);
        }

        self.engine.seek_to(slot, position_ms).await?;
        if self.engine.current_index().await? == Some(slot) {
            info!("Applied initial position slot {} at {} ms", slot, position_ms);
            return Ok(SwitchOutcome::Applied { slot, position_ms });
        }

        debug!("Index mismatch after offset seek, retrying once");
        self.switch_track(slot).await?;
        self.engine.seek_to(slot, position_ms).await?;

        let reported = self.engine.current_index().await?;
        if reported == Some(slot) {
            info!("Applied initial position slot {} at {} ms", slot, position_ms);
            Ok(SwitchOutcome::Applied { slot, position_ms })
        } else {
            warn!(
                "Engine reports index {:?} after switching to slot {}; accepting",
                reported, slot
            );
            Ok(SwitchOutcome::AppliedWithMismatch { slot, reported })
        }
    }

    /// Move to `slot` and wait until the engine confirms it
    ///
    /// Returns whether the engine ended up on `slot`.
    async fn switch_track(&self, slot: usize) -> Result<bool, EngineError> {
        // Subscribe before seeking so the transition cannot be missed
        let events = self.engine.subscribe();
        let (index_tx, index_rx) = oneshot::channel();
        let listener = tokio::spawn(next_transition(events, index_tx));

        let seek = self.engine.seek_to_default_position(slot).await;
        if let Err(e) = seek {
            listener.abort();
            return Err(e);
        }

        let reported =
            match tokio::time::timeout(self.settings.switch_event_timeout(), index_rx).await {
                Ok(Ok(index)) => Some(index),
                _ => None,
            };
        listener.abort();

        if reported == Some(slot) {
            return Ok(true);
        }

        debug!(
            "No matching transition event for slot {} (got {:?}), polling",
            slot, reported
        );
        for _ in 0..self.settings.switch_poll_attempts {
            if self.engine.current_index().await? == Some(slot) {
                return Ok(true);
            }
            tokio::time::sleep(self.settings.switch_poll_interval()).await;
        }
        Ok(false)
    }
}

/// Resolve `index_tx` with the index of the next index-transition event
async fn next_transition(
    mut events: broadcast::Receiver<EngineEvent>,
    index_tx: oneshot::Sender<usize>,
) {
    loop {
        match events.recv().await {
            Ok(EngineEvent::IndexTransitioned { index, .. }) => {
                let _ = index_tx.send(index);
                return;
            }
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}
