//! One-shot scheduled callbacks owned by a component.
//!
//! A `Timer` holds at most one pending deadline. Re-arming replaces the
//! deadline and bumps the generation, so a check taken against an older
//! arming can never fire against the new one.

use std::time::Duration;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct TimerToken {
    generation: u64,
}

#[derive(Debug, Clone, Default)]
pub struct Timer {
    deadline: Option<Duration>,
    generation: u64,
}

impl Timer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&mut self, now: Duration, after: Duration) -> TimerToken {
        self.generation = self.generation.wrapping_add(1);
        self.deadline = Some(now.saturating_add(after));
        TimerToken { generation: self.generation }
    }

    pub fn cancel(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.deadline = None;
    }

    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    #[must_use]
    pub fn is_current(&self, token: TimerToken) -> bool {
        self.deadline.is_some() && token.generation == self.generation
    }

    /// Disarms and returns true when the deadline has been reached.
    pub fn take_if_due(&mut self, now: Duration) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
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

    #[test]
    fn fires_once_at_deadline() {
        let mut timer = Timer::new();
        timer.arm(Duration::from_secs(1), Duration::from_millis(500));
        assert!(!timer.take_if_due(Duration::from_millis(1_499)));
        assert!(timer.take_if_due(Duration::from_millis(1_500)));
        assert!(!timer.take_if_due(Duration::from_secs(10)));
    }

    #[test]
    fn cancel_prevents_firing_and_invalidates_tokens() {
        let mut timer = Timer::new();
        let token = timer.arm(Duration::ZERO, Duration::from_secs(1));
        assert!(timer.is_current(token));
        timer.cancel();
        assert!(!timer.is_current(token));
        assert!(!timer.take_if_due(Duration::from_secs(5)));
    }

    #[test]
    fn rearming_replaces_deadline() {
        let mut timer = Timer::new();
        let first = timer.arm(Duration::ZERO, Duration::from_secs(1));
        let second = timer.arm(Duration::from_millis(800), Duration::from_secs(1));
        assert!(!timer.is_current(first));
        assert!(timer.is_current(second));
        assert!(!timer.take_if_due(Duration::from_millis(1_200)));
        assert!(timer.take_if_due(Duration::from_millis(1_800)));
    }
}
