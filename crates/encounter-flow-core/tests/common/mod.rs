//! Shared fixtures for director integration tests.
//!
//! Wires an `EncounterDirector` to a manual clock and the in-memory adapters
//! so tests can script time precisely.

use std::sync::Arc;
use std::time::Duration;

use encounter_flow_core::{
    ConsequenceTable, Encounter, EncounterDirector, FlowConfig, InMemoryBacklog, LoyaltyLedger,
    ManualClock, NotificationLog, RecordingDisplay, ToggleSession,
};

#[allow(dead_code)]
pub struct TestContext {
    pub clock: ManualClock,
    pub backlog: Arc<InMemoryBacklog>,
    pub display: Arc<RecordingDisplay>,
    pub session: Arc<ToggleSession>,
    pub ledger: Arc<LoyaltyLedger>,
    pub notifications: Arc<NotificationLog>,
    pub director: EncounterDirector,
}

#[allow(dead_code)]
impl TestContext {
    /// Director with default config and a backlog of `encounters`.
    pub fn new(encounters: Vec<Encounter>) -> Self {
        Self::with_config(FlowConfig::default(), encounters)
    }

    pub fn with_config(config: FlowConfig, encounters: Vec<Encounter>) -> Self {
        let clock = ManualClock::new();
        let backlog = Arc::new(InMemoryBacklog::new(encounters));
        let display = Arc::new(RecordingDisplay::new());
        let session = Arc::new(ToggleSession::active());
        let ledger = Arc::new(LoyaltyLedger::new());
        let notifications = Arc::new(NotificationLog::new());
        let director = EncounterDirector::builder(config)
            .clock(Arc::new(clock.clone()))
            .source(backlog.clone())
            .display(display.clone())
            .session(session.clone())
            .consequences(Arc::new(ConsequenceTable::new().with("insurgent", -3, 3)))
            .loyalty(ledger.clone())
            .notifications(notifications.clone())
            .build()
            .unwrap_or_else(|err| panic!("failed to build director: {err}"));

        Self { clock, backlog, display, session, ledger, notifications, director }
    }

    /// Moves the clock to an absolute time in milliseconds.
    pub fn at_ms(&self, ms: u64) {
        self.clock.set(Duration::from_millis(ms));
    }
}

#[allow(dead_code)]
pub fn ship(captain: &str) -> Encounter {
    Encounter::new("Lambda Shuttle", captain)
}

#[allow(dead_code)]
pub fn insurgent(captain: &str) -> Encounter {
    Encounter::new("Corellian Corvette", captain).with_story_tag("insurgent")
}

#[allow(dead_code)]
pub fn fleet(count: usize) -> Vec<Encounter> {
    (0..count).map(|index| ship(&format!("Captain {index}"))).collect()
}
