//! Deterministic scenario replay on a manual clock.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use encounter_flow_core::{
    DeferOutcome, DirectorStatus, EncounterDirector, EncounterKey, FlowConfig, FlowEvent,
    HoldingEntryId, InMemoryBacklog, LoyaltyLedger, LoyaltyTotals, ManualClock, NotificationLog,
    PresentOutcome, RecordingDisplay, SessionState, ToggleSession,
};
use serde::Serialize;
use serde_json::{json, Value};

use crate::scenario::{Action, Scenario, Step};

#[derive(Debug, Serialize)]
pub struct StepReport {
    pub index: usize,
    pub at_ms: u64,
    pub action: Action,
    pub outcome: Value,
}

#[derive(Debug, Serialize)]
pub struct TimedEvent {
    pub at_ms: u64,
    #[serde(flatten)]
    pub event: FlowEvent,
}

#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub scenario: String,
    pub steps: Vec<StepReport>,
    pub events: Vec<TimedEvent>,
    pub displayed: Vec<EncounterKey>,
    pub notifications: Vec<String>,
    pub loyalty: LoyaltyTotals,
    pub pending_backlog: Vec<EncounterKey>,
    pub status: DirectorStatus,
}

struct Harness {
    clock: ManualClock,
    backlog: Arc<InMemoryBacklog>,
    display: Arc<RecordingDisplay>,
    session: Arc<ToggleSession>,
    ledger: Arc<LoyaltyLedger>,
    notifications: Arc<NotificationLog>,
    director: EncounterDirector,
    held: Vec<HoldingEntryId>,
}

impl Harness {
    fn new(config: FlowConfig, scenario: &Scenario) -> Result<Self> {
        let clock = ManualClock::new();
        let backlog = Arc::new(InMemoryBacklog::new(scenario.backlog.clone()));
        let display = Arc::new(RecordingDisplay::new());
        let session = Arc::new(ToggleSession::active());
        let ledger = Arc::new(LoyaltyLedger::new());
        let notifications = Arc::new(NotificationLog::new());
        let director = EncounterDirector::builder(config)
            .clock(Arc::new(clock.clone()))
            .source(backlog.clone())
            .display(display.clone())
            .session(session.clone())
            .consequences(Arc::new(scenario.consequences.clone()))
            .loyalty(ledger.clone())
            .notifications(notifications.clone())
            .build()
            .context("failed to build encounter director")?;
        Ok(Self {
            clock,
            backlog,
            display,
            session,
            ledger,
            notifications,
            director,
            held: Vec::new(),
        })
    }

    fn session_json(&self) -> Value {
        json!({
            "outcome": "session_updated",
            "active": self.session.is_active(),
            "paused": self.session.is_paused(),
        })
    }

    fn apply(&mut self, step: &Step) -> Result<Value> {
        let outcome = match step.action {
            Action::Request => {
                let source = step.source.as_deref().unwrap_or("scenario");
                serde_json::to_value(self.director.request_next_encounter(source))?
            }
            Action::Present => {
                let requester =
                    step.requester.as_deref().ok_or_else(|| anyhow!("missing requester"))?;
                let encounter = step.encounter.clone().ok_or_else(|| anyhow!("missing encounter"))?;
                match self.director.present_encounter(requester, encounter) {
                    PresentOutcome::Displayed { encounter, displaced } => json!({
                        "outcome": "displayed",
                        "encounter": encounter,
                        "displaced": displaced,
                    }),
                    PresentOutcome::Refused { admission, encounter } => json!({
                        "outcome": "refused",
                        "encounter": encounter.key(),
                        "admission": admission,
                    }),
                }
            }
            Action::Approve => serde_json::to_value(self.director.decide(true))?,
            Action::Deny => serde_json::to_value(self.director.decide(false))?,
            Action::Defer => {
                let outcome = self.director.defer_live_encounter();
                if let DeferOutcome::Held { id, .. } = &outcome {
                    self.held.push(*id);
                }
                serde_json::to_value(outcome)?
            }
            Action::Release => {
                let index = step.hold.ok_or_else(|| anyhow!("missing hold index"))?;
                let id = self.held.get(index).copied().ok_or_else(|| {
                    anyhow!("hold index {index} out of range ({} deferred so far)", self.held.len())
                })?;
                serde_json::to_value(self.director.release_held(id))?
            }
            Action::ClearHolding => {
                json!({ "outcome": "cleared", "released": self.director.clear_holding() })
            }
            Action::Pause => {
                self.session.set_paused(true);
                self.session_json()
            }
            Action::Resume => {
                self.session.set_paused(false);
                self.session_json()
            }
            Action::EndSession => {
                self.session.set_active(false);
                self.session_json()
            }
            Action::Reset => {
                self.director.reset();
                json!({ "outcome": "reset" })
            }
            Action::Tick => json!({ "outcome": "ticked" }),
        };
        Ok(outcome)
    }
}

/// Replays every step at its scheduled time and collects what happened.
/// Due timers are drained after each step so events land at the step that
/// observed them.
pub fn run(config: FlowConfig, scenario: &Scenario) -> Result<SimulationReport> {
    let mut harness = Harness::new(config, scenario)?;
    let mut steps = Vec::with_capacity(scenario.steps.len());
    let mut events = Vec::new();

    for (index, step) in scenario.steps.iter().enumerate() {
        harness.clock.set(Duration::from_millis(step.at_ms));
        let outcome = harness
            .apply(step)
            .with_context(|| format!("step {index} ({}) failed", step.action.as_str()))?;
        tracing::debug!(index, at_ms = step.at_ms, action = step.action.as_str(), "scenario step applied");
        steps.push(StepReport { index, at_ms: step.at_ms, action: step.action, outcome });
        events.extend(
            harness.director.tick().into_iter().map(|event| TimedEvent { at_ms: step.at_ms, event }),
        );
    }

    Ok(SimulationReport {
        scenario: scenario.display_name().to_string(),
        steps,
        events,
        displayed: harness.display.shown(),
        notifications: harness.notifications.messages(),
        loyalty: harness.ledger.totals(),
        pending_backlog: harness.backlog.pending_keys(),
        status: harness.director.status(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario(yaml: &str) -> Scenario {
        Scenario::from_yaml_str(yaml).unwrap_or_else(|err| panic!("scenario should parse: {err:#}"))
    }

    #[test]
    fn replays_pacing_and_holding() {
        let scenario = scenario(
            r"
backlog:
  - { ship_type: Corellian Corvette, captain_name: Rell, story_tag: insurgent }
  - { ship_type: Lambda Shuttle, captain_name: Voss }
consequences:
  insurgent: { imperial: -3, rebellion: 3 }
steps:
  - { at_ms: 0, action: request }
  - { at_ms: 3000, action: request }
  - { at_ms: 3500, action: defer }
  - { at_ms: 4000, action: release, hold: 0 }
  - { at_ms: 4100, action: release, hold: 0 }
",
        );
        let report = run(FlowConfig::default(), &scenario)
            .unwrap_or_else(|err| panic!("simulation should run: {err:#}"));

        assert_eq!(report.steps[0].outcome["outcome"], "displayed");
        assert_eq!(report.steps[1].outcome["reason"]["reason"], "already_processing");
        assert_eq!(report.steps[2].outcome["outcome"], "held");
        assert_eq!(report.steps[3].outcome["outcome"], "released");
        assert_eq!(report.steps[4].outcome["outcome"], "not_held");
        assert_eq!(report.loyalty.applications, 1);
        assert_eq!(report.loyalty.imperial, -3);
        assert_eq!(report.pending_backlog.len(), 2);
    }

    #[test]
    fn release_index_out_of_range_fails_the_step() {
        let scenario = scenario("steps:\n  - { at_ms: 0, action: release, hold: 2 }\n");
        let err = run(FlowConfig::default(), &scenario)
            .err()
            .unwrap_or_else(|| panic!("release without a hold should fail"));
        assert!(format!("{err:#}").contains("out of range"));
    }

    #[test]
    fn paused_session_denies_requests() {
        let scenario = scenario(
            r"
backlog:
  - { ship_type: Lambda Shuttle, captain_name: Voss }
steps:
  - { at_ms: 0, action: pause }
  - { at_ms: 10, action: request }
  - { at_ms: 20, action: resume }
  - { at_ms: 30, action: request }
",
        );
        let report = run(FlowConfig::default(), &scenario)
            .unwrap_or_else(|err| panic!("simulation should run: {err:#}"));
        assert_eq!(report.steps[1].outcome["reason"]["reason"], "session_paused");
        assert_eq!(report.steps[3].outcome["outcome"], "displayed");
    }
}
