//! Request pacing.
//!
//! Requests are admitted only when nothing is processing, no decision cooldown
//! is running, the minimum interval since the last request has passed and the
//! session is live. Denials are immediate; callers retry on their own
//! schedule.

use std::time::Duration;

use serde::Serialize;

use crate::collaborators::SessionState;
use crate::config::RetriggerPolicy;
use crate::error::{duration_ms, DenialReason};
use crate::timer::Timer;

#[derive(Debug, Clone, Copy, Default, Serialize, Eq, PartialEq)]
pub struct FlowState {
    #[serde(rename = "last_request_time_ms", with = "duration_ms::option")]
    pub last_request_time: Option<Duration>,
    #[serde(rename = "last_decision_time_ms", with = "duration_ms::option")]
    pub last_decision_time: Option<Duration>,
    pub processing: bool,
    pub in_cooldown: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum FlowSignal {
    ProcessingCleared,
    CooldownEnded,
    RetriggerRequested,
}

#[derive(Debug, Clone)]
pub struct FlowController {
    min_encounter_interval: Duration,
    decision_cooldown: Duration,
    retrigger_policy: RetriggerPolicy,
    state: FlowState,
    processing_timer: Timer,
    cooldown_timer: Timer,
}

impl FlowController {
    #[must_use]
    pub fn new(
        min_encounter_interval: Duration,
        decision_cooldown: Duration,
        retrigger_policy: RetriggerPolicy,
    ) -> Self {
        Self {
            min_encounter_interval,
            decision_cooldown,
            retrigger_policy,
            state: FlowState::default(),
            processing_timer: Timer::new(),
            cooldown_timer: Timer::new(),
        }
    }

    /// # Errors
    /// Returns the first unmet admission condition.
    pub fn can_process_new_encounter(
        &self,
        session: &dyn SessionState,
        now: Duration,
    ) -> Result<(), DenialReason> {
        if self.state.processing {
            return Err(DenialReason::AlreadyProcessing);
        }
        if self.state.in_cooldown {
            return Err(DenialReason::InCooldown);
        }
        if let Some(last) = self.state.last_request_time {
            let elapsed = now.saturating_sub(last);
            if elapsed < self.min_encounter_interval {
                return Err(DenialReason::TooSoon {
                    remaining: self.min_encounter_interval - elapsed,
                });
            }
        }
        if !session.is_active() {
            return Err(DenialReason::SessionInactive);
        }
        if session.is_paused() {
            return Err(DenialReason::SessionPaused);
        }
        Ok(())
    }

    /// Checks the admission predicate and, when it holds, marks the request as
    /// in flight. `display_ready` carries the display interval check, which
    /// is consulted only after every flow condition passes.
    ///
    /// # Errors
    /// Returns the denial reason unchanged; nothing is mutated on denial.
    pub fn request_next_encounter(
        &mut self,
        source_label: &str,
        session: &dyn SessionState,
        now: Duration,
        display_ready: bool,
    ) -> Result<(), DenialReason> {
        let admitted = self.can_process_new_encounter(session, now).and_then(|()| {
            if display_ready {
                Ok(())
            } else {
                Err(DenialReason::DisplayIntervalNotElapsed)
            }
        });
        if let Err(reason) = admitted {
            tracing::debug!(source = source_label, reason = %reason, "encounter request denied");
            return Err(reason);
        }
        self.begin_request(source_label, now);
        Ok(())
    }

    fn begin_request(&mut self, source_label: &str, now: Duration) {
        self.state.processing = true;
        self.state.last_request_time = Some(now);
        self.processing_timer.arm(now, self.min_encounter_interval);
        tracing::debug!(source = source_label, "encounter request admitted");
    }

    pub fn on_decision_made(&mut self, now: Duration) {
        self.state.last_decision_time = Some(now);
        self.state.in_cooldown = true;
        self.cooldown_timer.arm(now, self.decision_cooldown);
    }

    /// Fires due timers and reports what changed.
    pub fn poll(&mut self, now: Duration) -> Vec<FlowSignal> {
        let mut signals = Vec::new();
        if self.processing_timer.take_if_due(now) {
            self.state.processing = false;
            signals.push(FlowSignal::ProcessingCleared);
        }
        if self.cooldown_timer.take_if_due(now) {
            self.state.in_cooldown = false;
            signals.push(FlowSignal::CooldownEnded);
            if self.retrigger_policy == RetriggerPolicy::AutoAfterCooldown {
                signals.push(FlowSignal::RetriggerRequested);
            }
        }
        signals
    }

    pub fn reset(&mut self) {
        self.state = FlowState::default();
        self.processing_timer.cancel();
        self.cooldown_timer.cancel();
        tracing::info!("flow state reset");
    }

    #[must_use]
    pub fn state(&self) -> FlowState {
        self.state
    }

    /// State as `poll(now)` would leave it, without firing anything.
    #[must_use]
    pub fn state_at(&self, now: Duration) -> FlowState {
        let due = |timer: &Timer| timer.deadline().is_some_and(|deadline| now >= deadline);
        FlowState {
            processing: self.state.processing && !due(&self.processing_timer),
            in_cooldown: self.state.in_cooldown && !due(&self.cooldown_timer),
            ..self.state
        }
    }

    #[must_use]
    pub fn next_deadline(&self) -> Option<Duration> {
        [self.processing_timer.deadline(), self.cooldown_timer.deadline()]
            .into_iter()
            .flatten()
            .min()
    }

    #[must_use]
    pub fn retrigger_policy(&self) -> RetriggerPolicy {
        self.retrigger_policy
    }

    pub fn set_retrigger_policy(&mut self, policy: RetriggerPolicy) {
        self.retrigger_policy = policy;
    }
}
