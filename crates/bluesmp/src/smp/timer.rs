//! Response-wait timer
//!
//! One deadline per pairing session. The manager polls it; nothing here
//! spawns threads or schedules callbacks.

use super::constants::SMP_WAIT_FOR_RSP_TOUT;
use std::time::{Duration, Instant};

/// Default time allowed for the peer (or the application) to respond.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(SMP_WAIT_FOR_RSP_TOUT);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResponseTimer {
    deadline: Option<Instant>,
}

impl ResponseTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// (Re)arm the timer.
    pub fn start(&mut self, now: Instant, timeout: Duration) {
        self.deadline = Some(now + timeout);
    }

    pub fn stop(&mut self) {
        self.deadline = None;
    }

    pub fn is_running(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the timer is armed and its deadline has passed.
    pub fn expired(&self, now: Instant) -> bool {
        matches!(self.deadline, Some(deadline) if now >= deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_lifecycle() {
        let now = Instant::now();
        let mut timer = ResponseTimer::new();
        assert!(!timer.is_running());
        assert!(!timer.expired(now + Duration::from_secs(3600)));

        timer.start(now, DEFAULT_RESPONSE_TIMEOUT);
        assert!(timer.is_running());
        assert!(!timer.expired(now + Duration::from_secs(29)));
        assert!(timer.expired(now + Duration::from_secs(30)));

        // restarting pushes the deadline out
        timer.start(now + Duration::from_secs(20), DEFAULT_RESPONSE_TIMEOUT);
        assert!(!timer.expired(now + Duration::from_secs(30)));

        timer.stop();
        assert!(!timer.is_running());
        assert_eq!(timer.deadline(), None);
    }
}
