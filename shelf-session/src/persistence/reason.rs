//! Save reasons and the save debouncer

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

/// Why a position save was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SaveReason {
    Periodic,
    TrackTransition,
    Paused,
    Seek,
    Manual,
    /// Session is being torn down
    Teardown,
    AppBackgrounded,
    AppStopped,
}

impl SaveReason {
    /// Critical reasons bypass debouncing
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            SaveReason::Teardown | SaveReason::AppBackgrounded | SaveReason::AppStopped
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SaveReason::Periodic => "periodic",
            SaveReason::TrackTransition => "track_transition",
            SaveReason::Paused => "paused",
            SaveReason::Seek => "seek",
            SaveReason::Manual => "manual",
            SaveReason::Teardown => "teardown",
            SaveReason::AppBackgrounded => "app_backgrounded",
            SaveReason::AppStopped => "app_stopped",
        }
    }
}

impl fmt::Display for SaveReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SaveReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "periodic" => Ok(SaveReason::Periodic),
            "track_transition" | "transition" => Ok(SaveReason::TrackTransition),
            "paused" | "pause" => Ok(SaveReason::Paused),
            "seek" => Ok(SaveReason::Seek),
            "manual" => Ok(SaveReason::Manual),
            "teardown" => Ok(SaveReason::Teardown),
            "app_backgrounded" | "background" => Ok(SaveReason::AppBackgrounded),
            "app_stopped" | "stopped" => Ok(SaveReason::AppStopped),
            other => Err(format!("unknown save reason: {}", other)),
        }
    }
}

/// Minimum-interval gate for non-critical saves
#[derive(Debug, Clone)]
pub struct Debouncer {
    interval: Duration,
    last_admitted: Option<Instant>,
}

impl Debouncer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_admitted: None,
        }
    }

    /// Decide whether a save requested at `now` goes ahead
    ///
    /// Admitted saves (critical ones included) restart the window.
    pub fn admit(&mut self, reason: SaveReason, now: Instant) -> bool {
        let admitted = reason.is_critical()
            || match self.last_admitted {
                None => true,
                Some(last) => now.saturating_duration_since(last) >= self.interval,
            };
        if admitted {
            self.last_admitted = Some(now);
        }
        admitted
    }

    pub fn reset(&mut self) {
        self.last_admitted = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_critical_reasons() {
        assert!(SaveReason::Teardown.is_critical());
        assert!(SaveReason::AppBackgrounded.is_critical());
        assert!(SaveReason::AppStopped.is_critical());
        assert!(!SaveReason::Periodic.is_critical());
        assert!(!SaveReason::Manual.is_critical());
    }

    #[test]
    fn test_reason_parse() {
        assert_eq!("periodic".parse::<SaveReason>(), Ok(SaveReason::Periodic));
        assert_eq!("Teardown".parse::<SaveReason>(), Ok(SaveReason::Teardown));
        assert_eq!(
            SaveReason::AppBackgrounded.to_string().parse::<SaveReason>(),
            Ok(SaveReason::AppBackgrounded)
        );
        assert!("nonsense".parse::<SaveReason>().is_err());
    }

    #[test]
    fn test_two_saves_inside_window_write_once() {
        let t0 = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(1000));

        assert!(debouncer.admit(SaveReason::Periodic, t0));
        assert!(!debouncer.admit(SaveReason::Periodic, t0 + Duration::from_millis(800)));
    }

    #[test]
    fn test_rejected_save_does_not_extend_window() {
        let t0 = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(1000));

        assert!(debouncer.admit(SaveReason::Periodic, t0));
        assert!(!debouncer.admit(SaveReason::Seek, t0 + Duration::from_millis(900)));
        assert!(debouncer.admit(SaveReason::Seek, t0 + Duration::from_millis(1000)));
    }

    #[test]
    fn test_critical_bypasses_window() {
        let t0 = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(1000));

        assert!(debouncer.admit(SaveReason::Periodic, t0));
        assert!(debouncer.admit(SaveReason::Teardown, t0 + Duration::from_millis(10)));
        assert!(!debouncer.admit(SaveReason::Periodic, t0 + Duration::from_millis(20)));
    }

    #[test]
    fn test_debounce_law_over_many_intervals() {
        let t0 = Instant::now();
        let interval = Duration::from_millis(1500);
        for gap_ms in [0u64, 1, 500, 1499] {
            let mut debouncer = Debouncer::new(interval);
            assert!(debouncer.admit(SaveReason::Periodic, t0));
            assert!(
                !debouncer.admit(SaveReason::Manual, t0 + Duration::from_millis(gap_ms)),
                "gap {} ms",
                gap_ms
            );
        }
    }
}
