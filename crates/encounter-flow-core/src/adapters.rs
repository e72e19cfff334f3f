//! In-process implementations of the collaborator traits.
//!
//! These back the CLI driver and the test suites. A host application would
//! normally plug in its own display, session and scoring systems instead.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::collaborators::{
    ConsequenceProvider, DisplaySurface, EncounterSource, LoyaltyImpact, LoyaltySink,
    NotificationSink, SessionState,
};
use crate::encounter::{Encounter, EncounterKey};

/// Pending encounters, served front first.
#[derive(Debug, Default)]
pub struct InMemoryBacklog {
    pending: Mutex<VecDeque<Encounter>>,
}

impl InMemoryBacklog {
    #[must_use]
    pub fn new(encounters: impl IntoIterator<Item = Encounter>) -> Self {
        Self { pending: Mutex::new(encounters.into_iter().collect()) }
    }

    pub fn push_back(&self, encounter: Encounter) {
        self.pending.lock().push_back(encounter);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    #[must_use]
    pub fn pending_keys(&self) -> Vec<EncounterKey> {
        self.pending.lock().iter().map(Encounter::key).collect()
    }
}

impl EncounterSource for InMemoryBacklog {
    fn next_encounter(&self) -> Option<Encounter> {
        self.pending.lock().pop_front()
    }

    fn process_holding_pattern_completion(&self, encounter: Encounter) {
        self.pending.lock().push_front(encounter);
    }
}

/// Display surface that remembers what it was asked to show.
#[derive(Debug, Default)]
pub struct RecordingDisplay {
    shown: Mutex<Vec<EncounterKey>>,
}

impl RecordingDisplay {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn shown(&self) -> Vec<EncounterKey> {
        self.shown.lock().clone()
    }

    #[must_use]
    pub fn last_shown(&self) -> Option<EncounterKey> {
        self.shown.lock().last().cloned()
    }
}

impl DisplaySurface for RecordingDisplay {
    fn display_encounter(&self, encounter: &Encounter) {
        tracing::debug!(encounter = %encounter.key(), "display surface received encounter");
        self.shown.lock().push(encounter.key());
    }
}

#[derive(Debug)]
pub struct ToggleSession {
    active: AtomicBool,
    paused: AtomicBool,
}

impl ToggleSession {
    #[must_use]
    pub fn active() -> Self {
        Self { active: AtomicBool::new(true), paused: AtomicBool::new(false) }
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }
}

impl Default for ToggleSession {
    fn default() -> Self {
        Self::active()
    }
}

impl SessionState for ToggleSession {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

/// Loyalty deltas per story tag, expressed for an approval. A denial applies
/// the opposite deltas; unknown tags are neutral.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(transparent)]
pub struct ConsequenceTable {
    approvals: BTreeMap<String, LoyaltyImpact>,
}

impl ConsequenceTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, story_tag: impl Into<String>, imperial: i32, rebellion: i32) -> Self {
        self.approvals.insert(story_tag.into(), LoyaltyImpact { imperial, rebellion });
        self
    }
}

impl ConsequenceProvider for ConsequenceTable {
    fn loyalty_impact(&self, story_tag: &str, is_approval: bool) -> LoyaltyImpact {
        let impact = self.approvals.get(story_tag).copied().unwrap_or_default();
        if is_approval {
            impact
        } else {
            LoyaltyImpact { imperial: -impact.imperial, rebellion: -impact.rebellion }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Eq, PartialEq)]
pub struct LoyaltyTotals {
    pub imperial: i64,
    pub rebellion: i64,
    pub applications: u64,
}

/// Running loyalty totals plus every delta applied, in order.
#[derive(Debug, Default)]
pub struct LoyaltyLedger {
    applied: Mutex<Vec<LoyaltyImpact>>,
}

impl LoyaltyLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn applied(&self) -> Vec<LoyaltyImpact> {
        self.applied.lock().clone()
    }

    #[must_use]
    pub fn totals(&self) -> LoyaltyTotals {
        self.applied.lock().iter().fold(LoyaltyTotals::default(), |mut totals, impact| {
            totals.imperial += i64::from(impact.imperial);
            totals.rebellion += i64::from(impact.rebellion);
            totals.applications += 1;
            totals
        })
    }
}

impl LoyaltySink for LoyaltyLedger {
    fn apply_loyalty_delta(&self, imperial: i32, rebellion: i32) {
        self.applied.lock().push(LoyaltyImpact { imperial, rebellion });
    }
}

#[derive(Debug, Default)]
pub struct NotificationLog {
    messages: Mutex<Vec<String>>,
}

impl NotificationLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }
}

impl NotificationSink for NotificationLog {
    fn show_notification(&self, message: &str) {
        tracing::info!(message, "notification");
        self.messages.lock().push(message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backlog_requeues_at_front() {
        let backlog = InMemoryBacklog::new([Encounter::new("A", "1"), Encounter::new("B", "2")]);
        let first = backlog.next_encounter().unwrap_or_else(|| panic!("backlog should not be empty"));
        backlog.process_holding_pattern_completion(Encounter::new("C", "3"));
        assert_eq!(
            backlog.pending_keys(),
            vec![EncounterKey::new("C", "3"), EncounterKey::new("B", "2")]
        );
        assert_eq!(first.key(), EncounterKey::new("A", "1"));
    }

    #[test]
    fn consequence_table_inverts_denials() {
        let table = ConsequenceTable::new().with("insurgent", -3, 3);
        assert_eq!(table.loyalty_impact("insurgent", true), LoyaltyImpact { imperial: -3, rebellion: 3 });
        assert_eq!(table.loyalty_impact("insurgent", false), LoyaltyImpact { imperial: 3, rebellion: -3 });
        assert!(table.loyalty_impact("unknown", true).is_neutral());
    }

    #[test]
    fn consequence_table_parses_from_yaml_map() {
        let table: ConsequenceTable =
            serde_yaml::from_str("insurgent:\n  imperial: -3\n  rebellion: 3\n")
                .unwrap_or_else(|err| panic!("parse table: {err}"));
        assert_eq!(table, ConsequenceTable::new().with("insurgent", -3, 3));
    }

    #[test]
    fn ledger_totals_sum_applied_deltas() {
        let ledger = LoyaltyLedger::new();
        ledger.apply_loyalty_delta(-3, 3);
        ledger.apply_loyalty_delta(2, -1);
        assert_eq!(ledger.totals(), LoyaltyTotals { imperial: -1, rebellion: 2, applications: 2 });
    }

    #[test]
    fn session_toggles() {
        let session = ToggleSession::active();
        assert!(session.is_active() && !session.is_paused());
        session.set_paused(true);
        session.set_active(false);
        assert!(!session.is_active() && session.is_paused());
    }
}
