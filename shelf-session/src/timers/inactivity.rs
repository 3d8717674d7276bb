//! Inactivity timer state machine
//!
//! Counts "time since playback last stopped". Armed while enabled and not
//! playing; any resume disarms it. Expiry leaves the timer enabled so a later
//! pause re-arms it.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InactivityTimer {
    timeout: Duration,
    enabled: bool,
    deadline: Option<Instant>,
}

impl InactivityTimer {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            enabled: false,
            deadline: None,
        }
    }

    /// Enable with a new timeout, arming immediately unless playing
    pub fn enable(&mut self, timeout: Duration, now: Instant, playing: bool) {
        self.timeout = timeout;
        self.enabled = true;
        self.deadline = if playing { None } else { Some(now + timeout) };
    }

    /// Returns true when the timer was enabled
    pub fn disable(&mut self) -> bool {
        let was_enabled = self.enabled;
        self.enabled = false;
        self.deadline = None;
        was_enabled
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Time left before expiry, `None` while disarmed
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(now))
    }

    pub fn on_playback_paused(&mut self, now: Instant) {
        if self.enabled {
            self.deadline = Some(now + self.timeout);
        }
    }

    pub fn on_playback_resumed(&mut self) {
        self.deadline = None;
    }

    /// Returns true exactly once per armed period when the deadline passes
    pub fn check(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if self.enabled && now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(1800);

    #[test]
    fn test_disabled_never_fires() {
        let t0 = Instant::now();
        let mut timer = InactivityTimer::new(TIMEOUT);
        timer.on_playback_paused(t0);
        assert!(!timer.check(t0 + TIMEOUT * 2));
    }

    #[test]
    fn test_fires_after_idle_period() {
        let t0 = Instant::now();
        let mut timer = InactivityTimer::new(TIMEOUT);
        timer.enable(TIMEOUT, t0, false);

        assert!(!timer.check(t0 + TIMEOUT - Duration::from_secs(1)));
        assert!(timer.check(t0 + TIMEOUT));
        // Once per idle period
        assert!(!timer.check(t0 + TIMEOUT * 2));
        assert!(timer.is_enabled());
    }

    #[test]
    fn test_playback_disarms_and_pause_rearms() {
        let t0 = Instant::now();
        let mut timer = InactivityTimer::new(TIMEOUT);
        timer.enable(Duration::from_secs(60), t0, true);
        assert_eq!(timer.remaining(t0), None);

        timer.on_playback_paused(t0 + Duration::from_secs(100));
        assert_eq!(
            timer.remaining(t0 + Duration::from_secs(130)),
            Some(Duration::from_secs(30))
        );

        timer.on_playback_resumed();
        assert!(!timer.check(t0 + Duration::from_secs(500)));
    }

    #[test]
    fn test_disable_reports_previous_state() {
        let mut timer = InactivityTimer::new(TIMEOUT);
        assert!(!timer.disable());
        timer.enable(TIMEOUT, Instant::now(), false);
        assert!(timer.disable());
        assert_eq!(timer.remaining(Instant::now()), None);
    }
}
