//! Bounded deferral queue ("holding pattern").
//!
//! Encounters the operator cannot resolve yet wait here on a countdown. On
//! release, story-significant encounters apply their loyalty consequences
//! exactly once and every encounter goes back to the source backlog.

use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use ulid::Ulid;

use crate::collaborators::{
    ConsequenceProvider, EncounterSource, LoyaltyImpact, LoyaltySink, NotificationSink,
};
use crate::config::BulkClearPolicy;
use crate::encounter::{Encounter, EncounterKey};
use crate::error::duration_ms;
use crate::timer::Timer;

#[derive(Debug, Clone, Copy, Serialize, serde::Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct HoldingEntryId(pub Ulid);

impl HoldingEntryId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for HoldingEntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for HoldingEntryId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseReason {
    Manual,
    Timeout,
    Cleared,
}

impl ReleaseReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Timeout => "timeout",
            Self::Cleared => "cleared",
        }
    }
}

#[derive(Debug, Clone, Serialize, Eq, PartialEq)]
pub struct HoldingRelease {
    pub id: HoldingEntryId,
    pub encounter: EncounterKey,
    pub reason: ReleaseReason,
    pub impact: Option<LoyaltyImpact>,
}

pub type CompletionHook = Box<dyn FnOnce(&HoldingRelease) + Send>;

struct HoldingEntry {
    id: HoldingEntryId,
    encounter: Encounter,
    held_at: Duration,
    countdown: Timer,
    on_complete: Option<CompletionHook>,
}

impl Debug for HoldingEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HoldingEntry")
            .field("id", &self.id)
            .field("encounter", &self.encounter.key())
            .field("held_at", &self.held_at)
            .field("expires_at", &self.countdown.deadline())
            .field("has_hook", &self.on_complete.is_some())
            .finish()
    }
}

#[derive(Debug)]
pub enum HoldOutcome {
    Accepted(HoldingEntryId),
    /// The queue is at capacity; the encounter is handed back untouched.
    QueueFull(Box<Encounter>),
}

impl HoldOutcome {
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }

    #[must_use]
    pub fn entry_id(&self) -> Option<HoldingEntryId> {
        match self {
            Self::Accepted(id) => Some(*id),
            Self::QueueFull(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Eq, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReleaseOutcome {
    Released(HoldingRelease),
    NotHeld { id: HoldingEntryId },
}

#[derive(Debug, Clone, Serialize, Eq, PartialEq)]
pub struct HeldEncounterSummary {
    pub id: HoldingEntryId,
    pub encounter: EncounterKey,
    pub story_tag: Option<String>,
    #[serde(rename = "held_at_ms", with = "duration_ms")]
    pub held_at: Duration,
    #[serde(rename = "remaining_ms", with = "duration_ms")]
    pub remaining: Duration,
}

pub struct HoldingPatternQueue {
    capacity: usize,
    bulk_clear_policy: BulkClearPolicy,
    entries: Vec<HoldingEntry>,
    source: Arc<dyn EncounterSource>,
    consequences: Option<Arc<dyn ConsequenceProvider>>,
    loyalty: Option<Arc<dyn LoyaltySink>>,
    notifications: Option<Arc<dyn NotificationSink>>,
}

impl Debug for HoldingPatternQueue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HoldingPatternQueue")
            .field("capacity", &self.capacity)
            .field("bulk_clear_policy", &self.bulk_clear_policy)
            .field("entries", &self.entries)
            .finish_non_exhaustive()
    }
}

impl HoldingPatternQueue {
    #[must_use]
    pub fn new(capacity: usize, source: Arc<dyn EncounterSource>) -> Self {
        Self {
            capacity,
            bulk_clear_policy: BulkClearPolicy::default(),
            entries: Vec::new(),
            source,
            consequences: None,
            loyalty: None,
            notifications: None,
        }
    }

    #[must_use]
    pub fn with_bulk_clear_policy(mut self, policy: BulkClearPolicy) -> Self {
        self.bulk_clear_policy = policy;
        self
    }

    #[must_use]
    pub fn with_consequences(
        mut self,
        provider: Option<Arc<dyn ConsequenceProvider>>,
        sink: Option<Arc<dyn LoyaltySink>>,
    ) -> Self {
        self.consequences = provider;
        self.loyalty = sink;
        self
    }

    #[must_use]
    pub fn with_notifications(mut self, sink: Option<Arc<dyn NotificationSink>>) -> Self {
        self.notifications = sink;
        self
    }

    pub fn try_add(&mut self, encounter: Encounter, budget: Duration, now: Duration) -> HoldOutcome {
        self.insert(encounter, budget, now, None)
    }

    pub fn try_add_with_hook(
        &mut self,
        encounter: Encounter,
        budget: Duration,
        now: Duration,
        on_complete: CompletionHook,
    ) -> HoldOutcome {
        self.insert(encounter, budget, now, Some(on_complete))
    }

    /// Releases one entry. A second release of the same id is a no-op.
    pub fn release(
        &mut self,
        id: HoldingEntryId,
        reason: ReleaseReason,
        now: Duration,
    ) -> ReleaseOutcome {
        let Some(index) = self.entries.iter().position(|entry| entry.id == id) else {
            tracing::warn!(%id, reason = reason.as_str(), "release of an entry that is not held ignored");
            return ReleaseOutcome::NotHeld { id };
        };
        let entry = self.entries.remove(index);
        ReleaseOutcome::Released(self.finish(entry, reason, true, now))
    }

    /// Returns every held encounter to the source at a day or session boundary.
    pub fn clear_all(&mut self, now: Duration) -> Vec<HoldingRelease> {
        let apply = self.bulk_clear_policy == BulkClearPolicy::ApplyConsequences;
        let entries = std::mem::take(&mut self.entries);
        if !entries.is_empty() {
            tracing::info!(count = entries.len(), apply_consequences = apply, "clearing holding pattern");
        }
        entries.into_iter().map(|entry| self.finish(entry, ReleaseReason::Cleared, apply, now)).collect()
    }

    /// Releases every entry whose countdown has run out.
    pub fn poll(&mut self, now: Duration) -> Vec<HoldingRelease> {
        let mut expired = Vec::new();
        let mut index = 0;
        while index < self.entries.len() {
            if self.entries[index].countdown.take_if_due(now) {
                expired.push(self.entries.remove(index));
            } else {
                index += 1;
            }
        }
        expired.into_iter().map(|entry| self.finish(entry, ReleaseReason::Timeout, true, now)).collect()
    }

    #[must_use]
    pub fn snapshot(&self, now: Duration) -> Vec<HeldEncounterSummary> {
        self.entries
            .iter()
            .map(|entry| HeldEncounterSummary {
                id: entry.id,
                encounter: entry.encounter.key(),
                story_tag: entry.encounter.effective_story_tag().map(str::to_string),
                held_at: entry.held_at,
                remaining: entry
                    .countdown
                    .deadline()
                    .map_or(Duration::ZERO, |deadline| deadline.saturating_sub(now)),
            })
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn contains(&self, id: HoldingEntryId) -> bool {
        self.entries.iter().any(|entry| entry.id == id)
    }

    #[must_use]
    pub fn next_deadline(&self) -> Option<Duration> {
        self.entries.iter().filter_map(|entry| entry.countdown.deadline()).min()
    }

    fn insert(
        &mut self,
        encounter: Encounter,
        budget: Duration,
        now: Duration,
        on_complete: Option<CompletionHook>,
    ) -> HoldOutcome {
        if self.is_full() {
            tracing::info!(
                encounter = %encounter.key(),
                capacity = self.capacity,
                "holding pattern full; encounter refused"
            );
            self.notify(&format!(
                "Holding pattern at maximum capacity ({} ships)",
                self.capacity
            ));
            return HoldOutcome::QueueFull(Box::new(encounter));
        }

        let id = HoldingEntryId::new();
        let mut countdown = Timer::new();
        countdown.arm(now, budget);
        tracing::info!(
            %id,
            encounter = %encounter.key(),
            budget_ms = u64::try_from(budget.as_millis()).unwrap_or(u64::MAX),
            "encounter entered holding pattern"
        );
        self.notify(&format!("{} entered holding pattern", encounter.key()));
        self.entries.push(HoldingEntry { id, encounter, held_at: now, countdown, on_complete });
        HoldOutcome::Accepted(id)
    }

    fn finish(
        &self,
        mut entry: HoldingEntry,
        reason: ReleaseReason,
        apply_consequences: bool,
        now: Duration,
    ) -> HoldingRelease {
        let key = entry.encounter.key();
        let impact = if apply_consequences { self.apply_consequences(&entry.encounter) } else { None };

        match (reason, impact) {
            (ReleaseReason::Timeout, Some(impact)) => self.notify(&format!(
                "{key} left the holding pattern (time expired). {}",
                describe_impact(impact)
            )),
            (ReleaseReason::Timeout, None) => {
                self.notify(&format!("{key} left the holding pattern (time expired)"));
            }
            (_, Some(impact)) => self.notify(&format!(
                "{key} released from holding pattern. {}",
                describe_impact(impact)
            )),
            (_, None) => {}
        }

        tracing::info!(
            id = %entry.id,
            encounter = %key,
            reason = reason.as_str(),
            held_ms = u64::try_from(now.saturating_sub(entry.held_at).as_millis()).unwrap_or(u64::MAX),
            "encounter released from holding pattern"
        );

        let release = HoldingRelease { id: entry.id, encounter: key, reason, impact };
        let hook = entry.on_complete.take();
        self.source.process_holding_pattern_completion(entry.encounter);
        if let Some(hook) = hook {
            hook(&release);
        }
        release
    }

    fn apply_consequences(&self, encounter: &Encounter) -> Option<LoyaltyImpact> {
        let tag = encounter.effective_story_tag()?;
        let (Some(provider), Some(sink)) = (&self.consequences, &self.loyalty) else {
            tracing::warn!(
                encounter = %encounter.key(),
                story_tag = tag,
                "no consequence provider or loyalty sink; story effect skipped"
            );
            return None;
        };
        let impact = provider.loyalty_impact(tag, true);
        sink.apply_loyalty_delta(impact.imperial, impact.rebellion);
        Some(impact)
    }

    fn notify(&self, message: &str) {
        match &self.notifications {
            Some(sink) => sink.show_notification(message),
            None => tracing::debug!(message, "notification dropped; no sink configured"),
        }
    }
}

fn describe_impact(impact: LoyaltyImpact) -> String {
    format!("Imperial loyalty {:+}, Rebellion loyalty {:+}", impact.imperial, impact.rebellion)
}
