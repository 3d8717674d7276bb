//! Sleep timer state machine
//!
//! Pure: every transition takes the current [`Instant`] explicitly. The
//! [`TimerEngine`](super::TimerEngine) drives it from playback events and its
//! tick loop.
//!
//! ```text
//! Idle -> Running -> (Paused <-> Running) -> Expired | Cancelled (back to Idle)
//! Idle -> EndOfChapter -> Expired (on track completion) | Cancelled
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shelf_common::events::SleepTimerMode;
use shelf_common::time::{duration_to_millis, from_unix_millis, millis_to_duration, to_unix_millis};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SleepState {
    Idle,
    /// Counting down towards `ends_at`
    Running { ends_at: Instant },
    /// Countdown frozen while playback is paused
    Paused { remaining: Duration },
    /// Fires when the current track completes
    EndOfChapter,
}

/// Result of a periodic check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepCheck {
    /// Nothing is counting down
    Inactive,
    Remaining(Duration),
    /// Timer fired; state is back to idle
    Expired,
}

/// Sleep timer (fixed duration or end of chapter)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SleepTimer {
    state: SleepState,
}

impl Default for SleepTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl SleepTimer {
    pub fn new() -> Self {
        Self {
            state: SleepState::Idle,
        }
    }

    /// Arm a fixed countdown, replacing any active timer
    ///
    /// Starts frozen when playback is not currently playing.
    pub fn start_fixed(&mut self, duration: Duration, now: Instant, playing: bool) {
        self.state = if playing {
            SleepState::Running {
                ends_at: now + duration,
            }
        } else {
            SleepState::Paused {
                remaining: duration,
            }
        };
    }

    /// Arm end-of-chapter mode, replacing any active timer
    pub fn start_end_of_chapter(&mut self) {
        self.state = SleepState::EndOfChapter;
    }

    /// Returns true when a timer was active
    pub fn cancel(&mut self) -> bool {
        let was_active = self.is_active();
        self.state = SleepState::Idle;
        was_active
    }

    pub fn is_active(&self) -> bool {
        self.state != SleepState::Idle
    }

    /// True while a fixed countdown is ticking
    pub fn is_counting(&self) -> bool {
        matches!(self.state, SleepState::Running { .. })
    }

    pub fn mode(&self) -> Option<SleepTimerMode> {
        match self.state {
            SleepState::Idle => None,
            SleepState::Running { .. } | SleepState::Paused { .. } => Some(SleepTimerMode::Fixed),
            SleepState::EndOfChapter => Some(SleepTimerMode::EndOfChapter),
        }
    }

    /// Time left on a fixed countdown
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        match self.state {
            SleepState::Running { ends_at } => Some(ends_at.saturating_duration_since(now)),
            SleepState::Paused { remaining } => Some(remaining),
            SleepState::Idle | SleepState::EndOfChapter => None,
        }
    }

    /// Freeze the countdown
    pub fn on_playback_paused(&mut self, now: Instant) {
        if let SleepState::Running { ends_at } = self.state {
            self.state = SleepState::Paused {
                remaining: ends_at.saturating_duration_since(now),
            };
        }
    }

    /// Resume a frozen countdown from its captured remaining time
    pub fn on_playback_resumed(&mut self, now: Instant) {
        if let SleepState::Paused { remaining } = self.state {
            self.state = SleepState::Running {
                ends_at: now + remaining,
            };
        }
    }

    /// Periodic check; expiry resets the timer
    pub fn check(&mut self, now: Instant) -> SleepCheck {
        match self.state {
            SleepState::Running { ends_at } if now >= ends_at => {
                self.state = SleepState::Idle;
                SleepCheck::Expired
            }
            SleepState::Running { ends_at } => SleepCheck::Remaining(ends_at - now),
            SleepState::Paused { remaining } => SleepCheck::Remaining(remaining),
            SleepState::Idle | SleepState::EndOfChapter => SleepCheck::Inactive,
        }
    }

    /// A track finished; returns true when an end-of-chapter timer fired
    pub fn on_track_completed(&mut self) -> bool {
        if self.state == SleepState::EndOfChapter {
            self.state = SleepState::Idle;
            true
        } else {
            false
        }
    }

    /// Wall-clock mirror for durable storage, `None` when idle
    pub fn to_persisted(&self, now: Instant, wall_now: DateTime<Utc>) -> Option<PersistedSleepTimer> {
        match self.state {
            SleepState::Idle => None,
            SleepState::EndOfChapter => Some(PersistedSleepTimer {
                mode: SleepTimerMode::EndOfChapter,
                ends_at_unix_ms: None,
                paused_remaining_ms: None,
            }),
            SleepState::Running { ends_at } => {
                let remaining = ends_at.saturating_duration_since(now);
                let remaining = chrono::Duration::from_std(remaining).unwrap_or_else(|_| chrono::Duration::zero());
                Some(PersistedSleepTimer {
                    mode: SleepTimerMode::Fixed,
                    ends_at_unix_ms: Some(to_unix_millis(wall_now + remaining)),
                    paused_remaining_ms: None,
                })
            }
            SleepState::Paused { remaining } => Some(PersistedSleepTimer {
                mode: SleepTimerMode::Fixed,
                ends_at_unix_ms: None,
                paused_remaining_ms: Some(duration_to_millis(remaining)),
            }),
        }
    }

    /// Rebuild a timer after restart
    ///
    /// A running timer whose end time has already passed is discarded (`None`)
    /// rather than fired retroactively.
    pub fn restore(
        persisted: &PersistedSleepTimer,
        now: Instant,
        wall_now: DateTime<Utc>,
        playing: bool,
    ) -> Option<Self> {
        let state = match (persisted.mode, persisted.ends_at_unix_ms, persisted.paused_remaining_ms) {
            (SleepTimerMode::EndOfChapter, _, _) => SleepState::EndOfChapter,
            (SleepTimerMode::Fixed, _, Some(remaining_ms)) if remaining_ms > 0 => SleepState::Paused {
                remaining: millis_to_duration(remaining_ms),
            },
            (SleepTimerMode::Fixed, Some(ends_at_ms), _) => {
                let ends_at = from_unix_millis(ends_at_ms)?;
                let remaining = (ends_at - wall_now).to_std().ok()?;
                if remaining.is_zero() {
                    return None;
                }
                SleepState::Paused { remaining }
            }
            _ => return None,
        };

        let mut timer = Self { state };
        if playing {
            timer.on_playback_resumed(now);
        }
        Some(timer)
    }
}

/// Durable form of a [`SleepTimer`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSleepTimer {
    pub mode: SleepTimerMode,
    /// Wall-clock end of a running countdown
    pub ends_at_unix_ms: Option<i64>,
    /// Remaining time of a frozen countdown
    pub paused_remaining_ms: Option<u64>,
}
