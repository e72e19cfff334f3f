//! Activity clock for the encounter currently on display.

use std::time::Duration;

use serde::Serialize;

use crate::encounter::Encounter;
use crate::error::duration_ms;
use crate::timer::Timer;

#[derive(Debug, Clone, Serialize, Eq, PartialEq)]
pub struct TimingRecord {
    pub identity: Option<String>,
    #[serde(rename = "start_ms", with = "duration_ms::option")]
    pub start: Option<Duration>,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Eq, PartialEq)]
pub struct TimingStats {
    pub decisions: u64,
    pub approvals: u64,
    #[serde(rename = "total_duration_ms", with = "duration_ms")]
    pub total_duration: Duration,
    #[serde(rename = "last_duration_ms", with = "duration_ms::option")]
    pub last_duration: Option<Duration>,
}

impl TimingStats {
    #[must_use]
    pub fn mean_duration(&self) -> Option<Duration> {
        let decisions = u32::try_from(self.decisions).ok().filter(|count| *count > 0)?;
        Some(self.total_duration / decisions)
    }
}

#[derive(Debug, Clone)]
pub struct TimingGate {
    min_time_between_encounters: Duration,
    cooldown_window: Duration,
    restrictions_enabled: bool,
    identity: Option<String>,
    start: Option<Duration>,
    active: bool,
    last_display_time: Option<Duration>,
    cooldown: Timer,
    stats: TimingStats,
}

impl TimingGate {
    #[must_use]
    pub fn new(min_time_between_encounters: Duration, cooldown_window: Duration) -> Self {
        Self {
            min_time_between_encounters,
            cooldown_window,
            restrictions_enabled: true,
            identity: None,
            start: None,
            active: false,
            last_display_time: None,
            cooldown: Timer::new(),
            stats: TimingStats::default(),
        }
    }

    /// Starts timing `encounter` unless it is already the active one.
    /// Returns false for the idempotent redisplay case.
    pub fn on_encounter_displayed(&mut self, encounter: &Encounter, now: Duration) -> bool {
        let identity = encounter.derived_identity();
        if self.active && self.identity.as_deref() == Some(identity.as_str()) {
            tracing::debug!(identity = %identity, "redisplay of active encounter; timer unchanged");
            return false;
        }
        self.cooldown.cancel();
        self.active = true;
        self.start = Some(now);
        self.last_display_time = Some(now);
        tracing::debug!(identity = %identity, "encounter timer started");
        self.identity = Some(identity);
        true
    }

    /// Stops the active timer and opens the post-decision cooldown window.
    /// Returns how long the encounter was live, or `None` when nothing was.
    pub fn on_decision_made(&mut self, approved: bool, now: Duration) -> Option<Duration> {
        if !self.active {
            tracing::debug!(approved, "decision with no active encounter ignored by timing gate");
            return None;
        }
        let duration = now.saturating_sub(self.start.unwrap_or(now));
        self.active = false;
        let identity = self.identity.take();
        self.cooldown.arm(now, self.cooldown_window);

        self.stats.decisions = self.stats.decisions.saturating_add(1);
        if approved {
            self.stats.approvals = self.stats.approvals.saturating_add(1);
        }
        self.stats.total_duration = self.stats.total_duration.saturating_add(duration);
        self.stats.last_duration = Some(duration);

        tracing::info!(
            identity = identity.as_deref().unwrap_or_default(),
            approved,
            duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            "encounter decided"
        );
        Some(duration)
    }

    /// Drops the active record without a decision, e.g. when the encounter
    /// moves to the holding pattern.
    pub fn abandon_active(&mut self) {
        if self.active {
            tracing::debug!(identity = self.identity.as_deref().unwrap_or_default(), "encounter timer abandoned");
        }
        self.active = false;
        self.identity = None;
        self.start = None;
    }

    #[must_use]
    pub fn can_display_new_encounter(&self, now: Duration) -> bool {
        if !self.restrictions_enabled {
            return true;
        }
        match self.last_display_time {
            Some(last) => now.saturating_sub(last) >= self.min_time_between_encounters,
            None => true,
        }
    }

    pub fn set_restrictions_enabled(&mut self, enabled: bool) {
        if !enabled {
            tracing::warn!("timing restrictions disabled");
        }
        self.restrictions_enabled = enabled;
    }

    #[must_use]
    pub fn restrictions_enabled(&self) -> bool {
        self.restrictions_enabled
    }

    pub fn force_reset(&mut self) {
        self.abandon_active();
        self.last_display_time = None;
        self.cooldown.cancel();
    }

    /// Ends the cooldown window once due. Returns true when it ended.
    pub fn poll(&mut self, now: Duration) -> bool {
        self.cooldown.take_if_due(now)
    }

    #[must_use]
    pub fn in_cooldown(&self) -> bool {
        self.cooldown.is_armed()
    }

    /// Cooldown as `poll(now)` would leave it.
    #[must_use]
    pub fn in_cooldown_at(&self, now: Duration) -> bool {
        self.cooldown.deadline().is_some_and(|deadline| now < deadline)
    }

    #[must_use]
    pub fn cooldown_deadline(&self) -> Option<Duration> {
        self.cooldown.deadline()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    #[must_use]
    pub fn active_duration(&self, now: Duration) -> Option<Duration> {
        self.start.filter(|_| self.active).map(|start| now.saturating_sub(start))
    }

    #[must_use]
    pub fn record(&self) -> TimingRecord {
        TimingRecord { identity: self.identity.clone(), start: self.start, active: self.active }
    }

    #[must_use]
    pub fn stats(&self) -> TimingStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    fn gate() -> TimingGate {
        TimingGate::new(ms(1_000), ms(500))
    }

    #[test]
    fn redisplay_does_not_reset_start() {
        let mut gate = gate();
        let encounter = Encounter::new("Shuttle", "Voss");
        assert!(gate.on_encounter_displayed(&encounter, ms(100)));
        assert!(!gate.on_encounter_displayed(&encounter, ms(900)));
        assert_eq!(gate.record().start, Some(ms(100)));
        assert_eq!(gate.active_duration(ms(1_100)), Some(ms(1_000)));
    }

    #[test]
    fn decision_reports_duration_and_opens_cooldown() {
        let mut gate = gate();
        gate.on_encounter_displayed(&Encounter::new("Shuttle", "Voss"), ms(0));
        assert_eq!(gate.on_decision_made(true, ms(2_500)), Some(ms(2_500)));
        assert!(!gate.is_active());
        assert!(gate.in_cooldown());
        assert!(!gate.poll(ms(2_999)));
        assert!(gate.poll(ms(3_000)));
        assert!(!gate.in_cooldown());
        assert_eq!(gate.stats().approvals, 1);
        assert_eq!(gate.stats().mean_duration(), Some(ms(2_500)));
    }

    #[test]
    fn decision_without_active_encounter_is_noop() {
        let mut gate = gate();
        assert_eq!(gate.on_decision_made(false, ms(10)), None);
        assert_eq!(gate.stats().decisions, 0);
        assert!(!gate.in_cooldown());
    }

    #[test]
    fn new_display_cancels_cooldown() {
        let mut gate = gate();
        gate.on_encounter_displayed(&Encounter::new("Shuttle", "A"), ms(0));
        gate.on_decision_made(false, ms(100));
        gate.on_encounter_displayed(&Encounter::new("Shuttle", "B"), ms(200));
        assert!(!gate.in_cooldown());
        assert!(!gate.poll(ms(1_000)));
    }

    #[test]
    fn minimum_interval_between_displays() {
        let mut gate = gate();
        assert!(gate.can_display_new_encounter(ms(0)));
        gate.on_encounter_displayed(&Encounter::new("Shuttle", "A"), ms(0));
        assert!(!gate.can_display_new_encounter(ms(999)));
        assert!(gate.can_display_new_encounter(ms(1_000)));
        gate.set_restrictions_enabled(false);
        gate.on_encounter_displayed(&Encounter::new("Shuttle", "B"), ms(1_000));
        assert!(gate.can_display_new_encounter(ms(1_001)));
    }

    #[test]
    fn same_identity_after_decision_restarts_timer() {
        let mut gate = gate();
        let encounter = Encounter::new("Shuttle", "A");
        gate.on_encounter_displayed(&encounter, ms(0));
        gate.on_decision_made(true, ms(400));
        assert!(gate.on_encounter_displayed(&encounter, ms(2_000)));
        assert_eq!(gate.record().start, Some(ms(2_000)));
    }

    #[test]
    fn force_reset_clears_everything() {
        let mut gate = gate();
        gate.on_encounter_displayed(&Encounter::new("Shuttle", "A"), ms(0));
        gate.on_decision_made(true, ms(100));
        gate.force_reset();
        assert!(!gate.in_cooldown());
        assert!(!gate.is_active());
        assert!(gate.can_display_new_encounter(ms(101)));
        assert_eq!(gate.record(), TimingRecord { identity: None, start: None, active: false });
    }
}
