//! The encounter director: one context object that owns the four pacing
//! components and the collaborators they talk to.
//!
//! Every public operation first fires any timers that are due, so predicates
//! always see the state a real scheduler would have produced by `now`.

use std::collections::VecDeque;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::admission::{AdmissionCoordinator, AdmissionDecision, Lease};
use crate::clock::{Clock, SystemClock};
use crate::collaborators::{
    ConsequenceProvider, DisplaySurface, EncounterSource, LoyaltySink, NotificationSink,
    SessionState,
};
use crate::config::{BulkClearPolicy, FlowConfig, RetriggerPolicy};
use crate::encounter::{Encounter, EncounterKey};
use crate::error::{duration_ms, DenialReason, FlowError};
use crate::events::{DecisionBus, DecisionCallback, DecisionEvent, FlowEvent, SubscriptionId};
use crate::flow::{FlowController, FlowSignal, FlowState};
use crate::holding::{
    HeldEncounterSummary, HoldOutcome, HoldingEntryId, HoldingPatternQueue, HoldingRelease,
    ReleaseOutcome, ReleaseReason,
};
use crate::timing::{TimingGate, TimingRecord, TimingStats};

/// Lease holder id used for encounters pulled through the paced request path.
pub const FLOW_REQUESTER_ID: &str = "flow-controller";
/// Source label attached to requests issued by the auto-retrigger policy.
pub const AUTO_RETRIGGER_SOURCE: &str = "auto-retrigger";
/// Events kept for the next `tick()`. Older events are dropped first.
pub const MAX_PENDING_EVENTS: usize = 256;

#[derive(Debug, Clone, Serialize, Eq, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RequestOutcome {
    Displayed {
        encounter: EncounterKey,
        displaced: Option<EncounterKey>,
    },
    Denied {
        reason: DenialReason,
    },
    NoPendingEncounter,
    /// The lease was held by someone else; the encounter went back to the
    /// front of the backlog.
    DisplayRefused {
        encounter: EncounterKey,
        admission: AdmissionDecision,
    },
}

impl RequestOutcome {
    #[must_use]
    pub fn is_displayed(&self) -> bool {
        matches!(self, Self::Displayed { .. })
    }

    #[must_use]
    pub fn denial(&self) -> Option<DenialReason> {
        match self {
            Self::Denied { reason } => Some(*reason),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub enum PresentOutcome {
    Displayed { encounter: EncounterKey, displaced: Option<EncounterKey> },
    /// Admission refused; the caller keeps the encounter.
    Refused { admission: AdmissionDecision, encounter: Box<Encounter> },
}

#[derive(Debug, Clone, Serialize, Eq, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DecisionOutcome {
    Decided { event: DecisionEvent },
    NoLiveEncounter,
}

#[derive(Debug, Clone, Serialize, Eq, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeferOutcome {
    Held {
        id: HoldingEntryId,
        encounter: EncounterKey,
        #[serde(rename = "budget_ms", with = "duration_ms")]
        budget: Duration,
    },
    /// The holding pattern is full; the encounter stays on display.
    QueueFull { encounter: EncounterKey },
    NoLiveEncounter,
}

#[derive(Debug, Clone, Serialize, Eq, PartialEq)]
pub struct LiveSummary {
    pub encounter: EncounterKey,
    pub holder: String,
    #[serde(rename = "displayed_at_ms", with = "duration_ms")]
    pub displayed_at: Duration,
}

#[derive(Debug, Clone, Serialize, Eq, PartialEq)]
pub struct DirectorStatus {
    #[serde(rename = "now_ms", with = "duration_ms")]
    pub now: Duration,
    pub flow: FlowState,
    pub lease: Option<Lease>,
    pub live: Option<LiveSummary>,
    pub timing: TimingRecord,
    pub timing_stats: TimingStats,
    pub timing_in_cooldown: bool,
    pub timing_restrictions_enabled: bool,
    pub holding: Vec<HeldEncounterSummary>,
    pub holding_capacity: usize,
    pub retrigger_policy: RetriggerPolicy,
    pub bulk_clear_policy: BulkClearPolicy,
    pub subscribers: usize,
}

#[derive(Debug, Clone)]
struct LiveEncounter {
    encounter: Encounter,
    holder: String,
    displayed_at: Duration,
}

#[derive(Default)]
pub struct DirectorBuilder {
    config: FlowConfig,
    clock: Option<Arc<dyn Clock>>,
    source: Option<Arc<dyn EncounterSource>>,
    display: Option<Arc<dyn DisplaySurface>>,
    session: Option<Arc<dyn SessionState>>,
    consequences: Option<Arc<dyn ConsequenceProvider>>,
    loyalty: Option<Arc<dyn LoyaltySink>>,
    notifications: Option<Arc<dyn NotificationSink>>,
}

impl DirectorBuilder {
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    #[must_use]
    pub fn source(mut self, source: Arc<dyn EncounterSource>) -> Self {
        self.source = Some(source);
        self
    }

    #[must_use]
    pub fn display(mut self, display: Arc<dyn DisplaySurface>) -> Self {
        self.display = Some(display);
        self
    }

    #[must_use]
    pub fn session(mut self, session: Arc<dyn SessionState>) -> Self {
        self.session = Some(session);
        self
    }

    #[must_use]
    pub fn consequences(mut self, provider: Arc<dyn ConsequenceProvider>) -> Self {
        self.consequences = Some(provider);
        self
    }

    #[must_use]
    pub fn loyalty(mut self, sink: Arc<dyn LoyaltySink>) -> Self {
        self.loyalty = Some(sink);
        self
    }

    #[must_use]
    pub fn notifications(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.notifications = Some(sink);
        self
    }

    /// # Errors
    /// Returns `FlowError::InvalidConfig` for a bad config and
    /// `FlowError::MissingCollaborator` when the source, display or session is
    /// absent.
    pub fn build(self) -> Result<EncounterDirector, FlowError> {
        self.config.validate()?;
        let source = self.source.ok_or(FlowError::MissingCollaborator("encounter source"))?;
        let display = self.display.ok_or(FlowError::MissingCollaborator("display surface"))?;
        let session = self.session.ok_or(FlowError::MissingCollaborator("session state"))?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock::new()));

        if self.consequences.is_none() || self.loyalty.is_none() {
            tracing::warn!("consequence provider or loyalty sink missing; held releases will not apply story effects");
        }
        if self.notifications.is_none() {
            tracing::warn!("notification sink missing; operator notifications will be dropped");
        }

        let config = self.config;
        let mut timing = TimingGate::new(config.min_time_between_encounters(), config.timing_cooldown());
        timing.set_restrictions_enabled(config.timing_restrictions_enabled);
        let holding = HoldingPatternQueue::new(config.holding_capacity, Arc::clone(&source))
            .with_bulk_clear_policy(config.bulk_clear_policy)
            .with_consequences(self.consequences, self.loyalty)
            .with_notifications(self.notifications);

        Ok(EncounterDirector {
            admission: AdmissionCoordinator::new(config.lease_timeout()),
            flow: FlowController::new(
                config.min_encounter_interval(),
                config.decision_cooldown(),
                config.retrigger_policy,
            ),
            timing,
            holding,
            bus: DecisionBus::new(),
            live: None,
            pending_events: VecDeque::new(),
            dropped_events: 0,
            clock,
            source,
            display,
            session,
            config,
        })
    }
}

pub struct EncounterDirector {
    config: FlowConfig,
    clock: Arc<dyn Clock>,
    source: Arc<dyn EncounterSource>,
    display: Arc<dyn DisplaySurface>,
    session: Arc<dyn SessionState>,
    admission: AdmissionCoordinator,
    timing: TimingGate,
    flow: FlowController,
    holding: HoldingPatternQueue,
    bus: DecisionBus,
    live: Option<LiveEncounter>,
    pending_events: VecDeque<FlowEvent>,
    dropped_events: u64,
}

impl Debug for EncounterDirector {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncounterDirector")
            .field("config", &self.config)
            .field("admission", &self.admission)
            .field("timing", &self.timing)
            .field("flow", &self.flow)
            .field("holding", &self.holding)
            .field("bus", &self.bus)
            .field("live", &self.live.as_ref().map(|live| live.encounter.key()))
            .finish_non_exhaustive()
    }
}

impl EncounterDirector {
    #[must_use]
    pub fn builder(config: FlowConfig) -> DirectorBuilder {
        DirectorBuilder { config, ..DirectorBuilder::default() }
    }

    /// Paced request for the next encounter from the source.
    pub fn request_next_encounter(&mut self, source_label: &str) -> RequestOutcome {
        let now = self.clock.now();
        self.pump(now);
        self.request_at(source_label, now)
    }

    /// Shows a specific encounter on behalf of another authority. Only the
    /// display lease applies; flow pacing does not.
    pub fn present_encounter(&mut self, requester_id: &str, encounter: Encounter) -> PresentOutcome {
        let now = self.clock.now();
        self.pump(now);
        let admission = self.admission.request_display(requester_id, &encounter, now);
        if !admission.is_granted() {
            return PresentOutcome::Refused { admission, encounter: Box::new(encounter) };
        }
        let key = encounter.key();
        let displaced = self.show(encounter, requester_id, now);
        PresentOutcome::Displayed { encounter: key, displaced }
    }

    /// Records the operator's decision on the live encounter.
    pub fn decide(&mut self, approved: bool) -> DecisionOutcome {
        let now = self.clock.now();
        self.pump(now);
        let Some(live) = self.live.take() else {
            tracing::debug!(approved, "decision with no live encounter ignored");
            return DecisionOutcome::NoLiveEncounter;
        };

        let duration = self.timing.on_decision_made(approved, now);
        self.flow.on_decision_made(now);
        self.admission.notify_complete(&live.holder);

        let event = DecisionEvent {
            encounter: live.encounter.key(),
            approved,
            duration,
            decided_at: now,
        };
        self.bus.publish(&event);
        DecisionOutcome::Decided { event }
    }

    /// Moves the live encounter into the holding pattern instead of deciding.
    /// No cooldown starts and no decision event is published.
    pub fn defer_live_encounter(&mut self) -> DeferOutcome {
        let now = self.clock.now();
        self.pump(now);
        let Some(live) = self.live.take() else {
            tracing::debug!("defer with no live encounter ignored");
            return DeferOutcome::NoLiveEncounter;
        };

        let key = live.encounter.key();
        let budget = self.config.hold_budgets.budget_for(&live.encounter);
        match self.holding.try_add(live.encounter, budget, now) {
            HoldOutcome::Accepted(id) => {
                self.admission.notify_complete(&live.holder);
                self.timing.abandon_active();
                DeferOutcome::Held { id, encounter: key, budget }
            }
            HoldOutcome::QueueFull(encounter) => {
                self.live = Some(LiveEncounter { encounter: *encounter, ..live });
                DeferOutcome::QueueFull { encounter: key }
            }
        }
    }

    pub fn release_held(&mut self, id: HoldingEntryId) -> ReleaseOutcome {
        let now = self.clock.now();
        self.pump(now);
        self.holding.release(id, ReleaseReason::Manual, now)
    }

    /// Day or session boundary: every held encounter returns to the source.
    pub fn clear_holding(&mut self) -> Vec<HoldingRelease> {
        let now = self.clock.now();
        self.pump(now);
        self.holding.clear_all(now)
    }

    /// Fires due timers and returns the events collected since the last call,
    /// at most `MAX_PENDING_EVENTS` of them.
    pub fn tick(&mut self) -> Vec<FlowEvent> {
        let now = self.clock.now();
        self.pump(now);
        if self.dropped_events > 0 {
            tracing::warn!(dropped = self.dropped_events, "flow events dropped between ticks");
            self.dropped_events = 0;
        }
        self.pending_events.drain(..).collect()
    }

    /// Error recovery: drops the lease, flow and timing state, cancels their
    /// timers, discards undelivered events and hands the live encounter back
    /// to the source. Held encounters are kept.
    pub fn reset(&mut self) {
        self.admission.release_force();
        self.flow.reset();
        self.timing.force_reset();
        self.pending_events.clear();
        self.dropped_events = 0;
        if let Some(live) = self.live.take() {
            tracing::info!(encounter = %live.encounter.key(), "live encounter returned to source on reset");
            self.source.process_holding_pattern_completion(live.encounter);
        }
    }

    pub fn subscribe(&mut self, callback: DecisionCallback) -> SubscriptionId {
        self.bus.subscribe(callback)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.bus.unsubscribe(id)
    }

    pub fn set_timing_restrictions_enabled(&mut self, enabled: bool) {
        self.timing.set_restrictions_enabled(enabled);
    }

    pub fn set_retrigger_policy(&mut self, policy: RetriggerPolicy) {
        self.flow.set_retrigger_policy(policy);
    }

    /// Snapshot at the clock's current time. Deadlines that have passed are
    /// reported as elapsed even if no operation has fired them yet.
    #[must_use]
    pub fn status(&self) -> DirectorStatus {
        let now = self.clock.now();
        DirectorStatus {
            now,
            flow: self.flow.state_at(now),
            lease: self.admission.current_lease(now).cloned(),
            live: self.live.as_ref().map(|live| LiveSummary {
                encounter: live.encounter.key(),
                holder: live.holder.clone(),
                displayed_at: live.displayed_at,
            }),
            timing: self.timing.record(),
            timing_stats: self.timing.stats(),
            timing_in_cooldown: self.timing.in_cooldown_at(now),
            timing_restrictions_enabled: self.timing.restrictions_enabled(),
            holding: self.holding.snapshot(now),
            holding_capacity: self.holding.capacity(),
            retrigger_policy: self.flow.retrigger_policy(),
            bulk_clear_policy: self.config.bulk_clear_policy,
            subscribers: self.bus.len(),
        }
    }

    #[must_use]
    pub fn live_encounter(&self) -> Option<&Encounter> {
        self.live.as_ref().map(|live| &live.encounter)
    }

    #[must_use]
    pub fn holding_snapshot(&self) -> Vec<HeldEncounterSummary> {
        self.holding.snapshot(self.clock.now())
    }

    /// Events waiting for the next `tick()`.
    #[must_use]
    pub fn pending_event_count(&self) -> usize {
        self.pending_events.len()
    }

    #[must_use]
    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    #[must_use]
    pub fn admission(&self) -> &AdmissionCoordinator {
        &self.admission
    }

    #[must_use]
    pub fn timing(&self) -> &TimingGate {
        &self.timing
    }

    #[must_use]
    pub fn flow(&self) -> &FlowController {
        &self.flow
    }

    #[must_use]
    pub fn holding(&self) -> &HoldingPatternQueue {
        &self.holding
    }

    /// Earliest pending timer deadline across all components.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Duration> {
        [
            self.admission.next_deadline(),
            self.flow.next_deadline(),
            self.timing.cooldown_deadline(),
            self.holding.next_deadline(),
        ]
            .into_iter()
            .flatten()
            .min()
    }

    fn pump(&mut self, now: Duration) {
        if let Some(lease) = self.admission.poll(now) {
            self.push_event(FlowEvent::LeaseExpired { lease });
        }

        let mut retrigger = false;
        for signal in self.flow.poll(now) {
            match signal {
                FlowSignal::ProcessingCleared => self.push_event(FlowEvent::ProcessingCleared),
                FlowSignal::CooldownEnded => self.push_event(FlowEvent::CooldownEnded),
                FlowSignal::RetriggerRequested => retrigger = true,
            }
        }

        if self.timing.poll(now) {
            self.push_event(FlowEvent::TimingCooldownEnded);
        }

        for release in self.holding.poll(now) {
            self.push_event(FlowEvent::HoldExpired { release });
        }

        if retrigger {
            let outcome = self.request_at(AUTO_RETRIGGER_SOURCE, now);
            self.push_event(FlowEvent::AutoRetrigger { outcome });
        }
    }

    fn push_event(&mut self, event: FlowEvent) {
        if self.pending_events.len() == MAX_PENDING_EVENTS {
            self.pending_events.pop_front();
            self.dropped_events += 1;
        }
        self.pending_events.push_back(event);
    }

    fn request_at(&mut self, source_label: &str, now: Duration) -> RequestOutcome {
        let display_ready = self.timing.can_display_new_encounter(now);
        if let Err(reason) =
            self.flow.request_next_encounter(source_label, self.session.as_ref(), now, display_ready)
        {
            return RequestOutcome::Denied { reason };
        }

        let Some(encounter) = self.source.next_encounter() else {
            tracing::debug!(source = source_label, "no pending encounters");
            return RequestOutcome::NoPendingEncounter;
        };

        let admission = self.admission.request_display(FLOW_REQUESTER_ID, &encounter, now);
        if !admission.is_granted() {
            let key = encounter.key();
            self.source.process_holding_pattern_completion(encounter);
            return RequestOutcome::DisplayRefused { encounter: key, admission };
        }

        let key = encounter.key();
        let displaced = self.show(encounter, FLOW_REQUESTER_ID, now);
        tracing::info!(source = source_label, encounter = %key, "encounter displayed");
        RequestOutcome::Displayed { encounter: key, displaced }
    }

    fn show(&mut self, encounter: Encounter, holder: &str, now: Duration) -> Option<EncounterKey> {
        let mut displayed_at = now;
        let mut displaced = None;
        if let Some(previous) = self.live.take() {
            if previous.encounter.derived_identity() == encounter.derived_identity() {
                // Same encounter shown again: keep its clock running.
                displayed_at = previous.displayed_at;
            } else {
                let key = previous.encounter.key();
                tracing::warn!(encounter = %key, "live encounter displaced without a decision; returned to source");
                self.timing.abandon_active();
                self.source.process_holding_pattern_completion(previous.encounter);
                displaced = Some(key);
            }
        }
        self.display.display_encounter(&encounter);
        self.timing.on_encounter_displayed(&encounter, now);
        self.live = Some(LiveEncounter { encounter, holder: holder.to_string(), displayed_at });
        displaced
    }
}
