//! Timer objects.
//!
//! Timers are armed with an absolute deadline against the monotonic clock
//! and an optional period. The IPC tick drives expiry: a fired timer is
//! signalled and, when periodic, re-armed for the next period.

/// A waitable timer.
#[derive(Debug, Clone)]
pub struct Timer {
    /// Absolute deadline in uptime milliseconds, when armed.
    deadline_ms: Option<u64>,
    /// Re-arm period in milliseconds; `0` means one-shot.
    period_ms: u64,
    signalled: bool,
}

impl Timer {
    pub fn new() -> Timer {
        Timer {
            deadline_ms: None,
            period_ms: 0,
            signalled: false,
        }
    }

    pub fn is_signalled(&self) -> bool {
        self.signalled
    }

    pub fn is_armed(&self) -> bool {
        self.deadline_ms.is_some()
    }

    pub fn deadline_ms(&self) -> Option<u64> {
        self.deadline_ms
    }

    /// Arm the timer with an absolute deadline and optional period.
    /// Re-arming clears any previous signalled state.
    pub fn set(&mut self, deadline_ms: u64, period_ms: u64) {
        self.deadline_ms = Some(deadline_ms);
        self.period_ms = period_ms;
        self.signalled = false;
    }

    pub fn cancel(&mut self) {
        self.deadline_ms = None;
        self.signalled = false;
    }

    /// Advance to `now`. Returns `true` when the timer fired on this tick.
    pub fn tick(&mut self, now_ms: u64) -> bool {
        let Some(deadline) = self.deadline_ms else {
            return false;
        };
        if now_ms < deadline {
            return false;
        }
        self.signalled = true;
        if self.period_ms > 0 {
            // Drift-free re-arm: schedule from the missed deadline, skipping
            // any whole periods the tick fell behind by.
            let behind = now_ms - deadline;
            let periods = behind / self.period_ms + 1;
            self.deadline_ms = Some(deadline + periods * self.period_ms);
        } else {
            self.deadline_ms = None;
        }
        true
    }

    /// Consume the signal on behalf of a satisfied waiter. Periodic timers
    /// clear so the next period can signal again; one-shot timers stay
    /// signalled until re-armed or cancelled.
    pub fn consume(&mut self) {
        if self.period_ms > 0 {
            self.signalled = false;
        }
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_shot_fires_once_and_stays_signalled() {
        let mut t = Timer::new();
        t.set(100, 0);
        assert!(!t.tick(50));
        assert!(t.tick(100));
        assert!(t.is_signalled());
        assert!(!t.is_armed());
        assert!(!t.tick(200));
        t.consume();
        assert!(t.is_signalled());
    }

    #[test]
    fn periodic_rearms_without_drift() {
        let mut t = Timer::new();
        t.set(100, 50);
        assert!(t.tick(100));
        assert_eq!(t.deadline_ms(), Some(150));
        t.consume();
        assert!(!t.is_signalled());

        // A late tick skips the missed periods.
        assert!(t.tick(260));
        assert_eq!(t.deadline_ms(), Some(300));
    }

    #[test]
    fn cancel_disarms() {
        let mut t = Timer::new();
        t.set(100, 0);
        t.cancel();
        assert!(!t.tick(500));
        assert!(!t.is_signalled());
    }
}
