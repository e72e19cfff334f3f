//! Wall-clock session: a tokio interval asks for encounters while a scripted
//! operator decides each one after a fixed reading time.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::ValueEnum;
use encounter_flow_core::{
    DecisionOutcome, DeferOutcome, DirectorStatus, EncounterDirector, FlowConfig, FlowEvent,
    InMemoryBacklog, LoyaltyLedger, LoyaltyTotals, NotificationLog, RecordingDisplay,
    RequestOutcome, ToggleSession,
};
use serde::Serialize;
use tokio::time::{Instant, MissedTickBehavior};

use crate::scenario::Scenario;

const TICK_PERIOD: Duration = Duration::from_millis(25);
const OPERATOR_SOURCE: &str = "operator";

#[derive(Debug, Clone, Copy, ValueEnum, Serialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum OperatorAction {
    Approve,
    Deny,
    Defer,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub duration: Duration,
    pub request_every: Duration,
    pub decide_after: Duration,
    pub operator: Vec<OperatorAction>,
}

#[derive(Debug, Default, Serialize)]
pub struct RequestCounts {
    pub issued: u64,
    pub displayed: u64,
    pub no_pending: u64,
    pub refused: u64,
    pub denied: BTreeMap<String, u64>,
}

#[derive(Debug, Default, Serialize)]
pub struct OperatorCounts {
    pub approved: u64,
    pub denied: u64,
    pub deferred: u64,
    pub queue_full: u64,
}

#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub scenario: String,
    pub duration_ms: u64,
    pub requests: RequestCounts,
    pub operator: OperatorCounts,
    pub events: BTreeMap<&'static str, u64>,
    pub notifications: Vec<String>,
    pub loyalty: LoyaltyTotals,
    pub status: DirectorStatus,
}

fn event_name(event: &FlowEvent) -> &'static str {
    match event {
        FlowEvent::LeaseExpired { .. } => "lease_expired",
        FlowEvent::ProcessingCleared => "processing_cleared",
        FlowEvent::CooldownEnded => "cooldown_ended",
        FlowEvent::TimingCooldownEnded => "timing_cooldown_ended",
        FlowEvent::HoldExpired { .. } => "hold_expired",
        FlowEvent::AutoRetrigger { .. } => "auto_retrigger",
    }
}

impl RequestCounts {
    fn record(&mut self, outcome: &RequestOutcome) {
        match outcome {
            RequestOutcome::Displayed { .. } => self.displayed += 1,
            RequestOutcome::NoPendingEncounter => self.no_pending += 1,
            RequestOutcome::DisplayRefused { .. } => self.refused += 1,
            RequestOutcome::Denied { reason } => {
                *self.denied.entry(reason.as_str().to_string()).or_default() += 1;
            }
        }
    }
}

/// Runs the session on a current-thread runtime until `duration` elapses.
pub fn run(config: FlowConfig, scenario: &Scenario, options: RunOptions) -> Result<RunSummary> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .context("failed to start tokio runtime")?;
    runtime.block_on(drive(config, scenario, options))
}

async fn drive(config: FlowConfig, scenario: &Scenario, options: RunOptions) -> Result<RunSummary> {
    let ledger = Arc::new(LoyaltyLedger::new());
    let notifications = Arc::new(NotificationLog::new());
    let mut director = EncounterDirector::builder(config)
        .source(Arc::new(InMemoryBacklog::new(scenario.backlog.clone())))
        .display(Arc::new(RecordingDisplay::new()))
        .session(Arc::new(ToggleSession::active()))
        .consequences(Arc::new(scenario.consequences.clone()))
        .loyalty(ledger.clone())
        .notifications(notifications.clone())
        .build()
        .context("failed to build encounter director")?;

    let mut requests = RequestCounts::default();
    let mut operator = OperatorCounts::default();
    let mut events: BTreeMap<&'static str, u64> = BTreeMap::new();
    let mut script = options.operator.iter().copied().cycle();
    let mut decide_at: Option<Instant> = None;

    let end = tokio::time::sleep(options.duration);
    tokio::pin!(end);
    let mut request_timer = tokio::time::interval(options.request_every);
    request_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut ticker = tokio::time::interval(TICK_PERIOD);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            () = &mut end => break,
            _ = request_timer.tick() => {
                requests.issued += 1;
                let outcome = director.request_next_encounter(OPERATOR_SOURCE);
                requests.record(&outcome);
            }
            _ = ticker.tick() => {
                for event in director.tick() {
                    if let FlowEvent::AutoRetrigger { outcome } = &event {
                        requests.record(outcome);
                    }
                    *events.entry(event_name(&event)).or_default() += 1;
                }
                if decide_at.is_some_and(|at| Instant::now() >= at) {
                    decide_at = None;
                    if let Some(action) = script.next() {
                        act(&mut director, action, &mut operator);
                    }
                }
            }
        }

        if director.live_encounter().is_none() {
            decide_at = None;
        } else if decide_at.is_none() {
            decide_at = Some(Instant::now() + options.decide_after);
        }
    }

    tracing::info!(
        displayed = requests.displayed,
        approved = operator.approved,
        denied = operator.denied,
        deferred = operator.deferred,
        "real-time session finished"
    );

    Ok(RunSummary {
        scenario: scenario.display_name().to_string(),
        duration_ms: u64::try_from(options.duration.as_millis()).unwrap_or(u64::MAX),
        requests,
        operator,
        events,
        notifications: notifications.messages(),
        loyalty: ledger.totals(),
        status: director.status(),
    })
}

fn act(director: &mut EncounterDirector, action: OperatorAction, counts: &mut OperatorCounts) {
    match action {
        OperatorAction::Approve | OperatorAction::Deny => {
            let approved = action == OperatorAction::Approve;
            if let DecisionOutcome::Decided { .. } = director.decide(approved) {
                if approved {
                    counts.approved += 1;
                } else {
                    counts.denied += 1;
                }
            }
        }
        OperatorAction::Defer => match director.defer_live_encounter() {
            DeferOutcome::Held { .. } => counts.deferred += 1,
            DeferOutcome::QueueFull { .. } => counts.queue_full += 1,
            DeferOutcome::NoLiveEncounter => {}
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_session_displays_and_decides() {
        let scenario = Scenario::from_yaml_str(
            r"
backlog:
  - { ship_type: Lambda Shuttle, captain_name: Voss }
  - { ship_type: Lambda Shuttle, captain_name: Orn }
",
        )
        .unwrap_or_else(|err| panic!("scenario should parse: {err:#}"));
        let config = FlowConfig {
            min_encounter_interval_ms: 50,
            decision_cooldown_ms: 20,
            min_time_between_encounters_ms: 10,
            ..FlowConfig::default()
        };
        let options = RunOptions {
            duration: Duration::from_millis(400),
            request_every: Duration::from_millis(100),
            decide_after: Duration::from_millis(30),
            operator: vec![OperatorAction::Approve],
        };

        let summary = run(config, &scenario, options)
            .unwrap_or_else(|err| panic!("session should run: {err:#}"));
        assert!(summary.requests.issued >= 2);
        assert!(summary.requests.displayed >= 1);
        assert!(summary.operator.approved >= 1);
    }
}
