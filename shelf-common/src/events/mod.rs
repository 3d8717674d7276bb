//! Event types for the shelf event system
//!
//! Provides the host-facing event definitions and the EventBus that carries them.

// Sub-modules (supporting types)
mod playback_types;
mod shared_types;

pub use playback_types::{PlaybackState, SavePath, SleepTimerMode};
pub use shared_types::PlaybackSnapshot;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Host-facing session events
///
/// Events are broadcast via EventBus and can be serialized (JSON, tagged by
/// `type`) for delivery to the host application.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ShelfEvent {
    /// Periodic playback-state snapshot
    PlaybackProgress {
        /// Engine state at emission time
        snapshot: PlaybackSnapshot,
        /// Snapshot timestamp
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Playback state changed (Playing <-> Paused)
    PlaybackStateChanged {
        /// Playback state before change
        old_state: PlaybackState,
        /// Playback state after change
        new_state: PlaybackState,
        /// When state changed
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Engine moved to another track
    TrackTransitioned {
        /// Group (book) identifier
        group_id: String,
        /// New track index in the host's playlist coordinates
        track_index: usize,
        /// When the transition was observed
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Background playlist population finished and the track count is stable
    LoadComplete {
        /// Group (book) identifier
        group_id: String,
        /// Tracks present in the engine playlist
        loaded: usize,
        /// Tracks the host asked for
        requested: usize,
        /// When loading completed
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Playlist could not be loaded at all (first track failed)
    LoadError {
        /// Group (book) identifier
        group_id: String,
        /// Human readable failure description
        message: String,
        /// When loading failed
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A playback position was persisted
    PositionSaved {
        /// Group (book) identifier
        group_id: String,
        /// Saved track index
        track_index: usize,
        /// Saved in-track offset
        position_ms: u64,
        /// Which path accepted the write
        path: SavePath,
        /// When the save completed
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Sleep timer armed
    SleepTimerStarted {
        /// Timer flavour
        mode: SleepTimerMode,
        /// Remaining seconds (fixed mode only)
        remaining_seconds: Option<u64>,
        /// When the timer was armed
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Sleep timer countdown update (emitted when the whole-second value changes)
    SleepTimerTick {
        /// Seconds until expiry
        remaining_seconds: u64,
    },

    /// Sleep timer fired and playback was paused
    SleepTimerExpired {
        /// When the timer fired
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Sleep timer cancelled by the host
    SleepTimerCancelled {
        /// When the timer was cancelled
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Inactivity timer fired and the engine was released
    InactivityExpired {
        /// When the timer fired
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

// ========================================
// EventBus Implementation
// ========================================

/// Central event distribution bus for host-facing events
///
/// The EventBus uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Automatic cleanup when subscribers drop
/// - Lagged message detection for slow subscribers
///
/// # Examples
///
/// ```
/// use shelf_common::events::{EventBus, ShelfEvent};
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit(ShelfEvent::SleepTimerTick { remaining_seconds: 30 }).ok();
///
/// match rx.try_recv() {
///     Ok(ShelfEvent::SleepTimerTick { remaining_seconds }) => assert_eq!(remaining_seconds, 30),
///     other => panic!("unexpected: {:?}", other),
/// }
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ShelfEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// * `capacity` - Number of events to buffer before dropping old events
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<ShelfEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: ShelfEvent,
    ) -> Result<usize, broadcast::error::SendError<ShelfEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    ///
    /// Used for progress-style events where nobody listening is normal.
    pub fn emit_lossy(&self, event: ShelfEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = ShelfEvent::PositionSaved {
            group_id: "book".to_string(),
            track_index: 2,
            position_ms: 5000,
            path: SavePath::Fallback,
            timestamp: chrono::Utc::now(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "PositionSaved");
        assert_eq!(json["track_index"], 2);
        assert_eq!(json["path"], "fallback");
    }

    #[test]
    fn test_snapshot_round_trips_through_json() {
        let event = ShelfEvent::PlaybackProgress {
            snapshot: PlaybackSnapshot {
                is_playing: true,
                position_ms: 1200,
                duration_ms: Some(60_000),
                current_index: Some(1),
                speed: 1.25,
                buffered_ms: 4000,
            },
            timestamp: chrono::Utc::now(),
        };

        let json = serde_json::to_string(&event).unwrap();
        let parsed: ShelfEvent = serde_json::from_str(&json).unwrap();
        match parsed {
            ShelfEvent::PlaybackProgress { snapshot, .. } => {
                assert_eq!(snapshot.current_index, Some(1));
                assert_eq!(snapshot.duration_ms, Some(60_000));
            }
            other => panic!("Expected PlaybackProgress, got {:?}", other),
        }
    }

    #[test]
    fn test_emit_without_subscribers_is_err() {
        let bus = EventBus::new(10);
        assert!(bus
            .emit(ShelfEvent::SleepTimerTick { remaining_seconds: 1 })
            .is_err());
        // Lossy variant never fails
        bus.emit_lossy(ShelfEvent::SleepTimerTick { remaining_seconds: 1 });
        assert_eq!(bus.capacity(), 10);
    }

    #[tokio::test]
    async fn test_multiple_subscribers_receive_event() {
        let bus = EventBus::new(10);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.emit(ShelfEvent::InactivityExpired {
            timestamp: chrono::Utc::now(),
        })
        .unwrap();

        assert!(matches!(
            rx1.recv().await.unwrap(),
            ShelfEvent::InactivityExpired { .. }
        ));
        assert!(matches!(
            rx2.recv().await.unwrap(),
            ShelfEvent::InactivityExpired { .. }
        ));
    }
}
