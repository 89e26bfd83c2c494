// Periodic position report timer
//
// The timer never fires on its own; the owning context polls it with the
// current instant. A late poll fires once and reschedules from `now`, so a
// stalled context never produces a burst of catch-up reports.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct ReportTimer {
    interval: Duration,
    next_due: Instant,
}

impl ReportTimer {
    /// Timer whose first tick is one interval after `now`.
    pub fn start(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            next_due: now + interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn next_due(&self) -> Instant {
        self.next_due
    }

    /// Returns true when a tick is due and reschedules.
    pub fn poll(&mut self, now: Instant) -> bool {
        if now < self.next_due {
            return false;
        }
        self.next_due = now + self.interval;
        true
    }
}
