//! In-process contracts with the systems around the coordinator.

use crate::encounter::Encounter;

/// Pending backlog of encounters.
pub trait EncounterSource: Send + Sync {
    fn next_encounter(&self) -> Option<Encounter>;

    /// Takes back an encounter that left the holding pattern (or was never
    /// shown) and puts it at the front of the backlog.
    fn process_holding_pattern_completion(&self, encounter: Encounter);
}

/// Presentation is fire-and-forget; the coordinator never waits on it.
pub trait DisplaySurface: Send + Sync {
    fn display_encounter(&self, encounter: &Encounter);
}

pub trait SessionState: Send + Sync {
    fn is_active(&self) -> bool;
    fn is_paused(&self) -> bool;
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize, Eq, PartialEq)]
pub struct LoyaltyImpact {
    pub imperial: i32,
    pub rebellion: i32,
}

impl LoyaltyImpact {
    #[must_use]
    pub fn is_neutral(self) -> bool {
        self.imperial == 0 && self.rebellion == 0
    }
}

pub trait ConsequenceProvider: Send + Sync {
    fn loyalty_impact(&self, story_tag: &str, is_approval: bool) -> LoyaltyImpact;
}

pub trait LoyaltySink: Send + Sync {
    fn apply_loyalty_delta(&self, imperial: i32, rebellion: i32);
}

/// Best-effort operator notifications.
pub trait NotificationSink: Send + Sync {
    fn show_notification(&self, message: &str);
}
