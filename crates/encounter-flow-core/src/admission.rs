//! Single-slot display lease.
//!
//! At most one requester may hold display permission at a time. Leases carry a
//! deadline and are reclaimed once it passes, so a display path that never
//! reports completion cannot starve later requests.

use std::time::Duration;

use serde::Serialize;

use crate::encounter::{Encounter, EncounterKey};
use crate::error::duration_ms;
use crate::timer::{Timer, TimerToken};

#[derive(Debug, Clone, Serialize, Eq, PartialEq)]
pub struct Lease {
    pub holder: String,
    pub encounter: EncounterKey,
    #[serde(rename = "acquired_at_ms", with = "duration_ms")]
    pub acquired_at: Duration,
    #[serde(rename = "deadline_ms", with = "duration_ms")]
    pub deadline: Duration,
}

impl Lease {
    #[must_use]
    pub fn is_expired(&self, now: Duration) -> bool {
        now >= self.deadline
    }
}

#[derive(Debug, Clone, Serialize, Eq, PartialEq)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum AdmissionDecision {
    Granted,
    /// The same encounter is already on display under a live lease.
    DuplicateDisplay { holder: String },
    /// Another encounter holds the lease.
    Contention { holder: String },
}

impl AdmissionDecision {
    #[must_use]
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted)
    }
}

#[derive(Debug, Clone)]
struct HeldLease {
    lease: Lease,
    identity: String,
    expiry: TimerToken,
}

#[derive(Debug, Clone)]
pub struct AdmissionCoordinator {
    lease_timeout: Duration,
    held: Option<HeldLease>,
    expiry: Timer,
}

impl AdmissionCoordinator {
    #[must_use]
    pub fn new(lease_timeout: Duration) -> Self {
        Self { lease_timeout, held: None, expiry: Timer::new() }
    }

    #[must_use]
    pub fn lease_timeout(&self) -> Duration {
        self.lease_timeout
    }

    pub fn request_display(
        &mut self,
        requester_id: &str,
        encounter: &Encounter,
        now: Duration,
    ) -> AdmissionDecision {
        self.reclaim_expired(now);

        let identity = encounter.derived_identity();
        if let Some(held) = &self.held {
            let holder = held.lease.holder.clone();
            if held.identity == identity {
                tracing::debug!(
                    requester = requester_id,
                    holder = %holder,
                    encounter = %held.lease.encounter,
                    "suppressed duplicate display request"
                );
                return AdmissionDecision::DuplicateDisplay { holder };
            }
            tracing::debug!(
                requester = requester_id,
                holder = %holder,
                held_encounter = %held.lease.encounter,
                requested_encounter = %encounter.key(),
                "display lease contended"
            );
            return AdmissionDecision::Contention { holder };
        }

        let expiry = self.expiry.arm(now, self.lease_timeout);
        let lease = Lease {
            holder: requester_id.to_string(),
            encounter: encounter.key(),
            acquired_at: now,
            deadline: now.saturating_add(self.lease_timeout),
        };
        tracing::info!(
            holder = requester_id,
            encounter = %lease.encounter,
            deadline_ms = u64::try_from(lease.deadline.as_millis()).unwrap_or(u64::MAX),
            "display lease granted"
        );
        self.held = Some(HeldLease { lease, identity, expiry });
        AdmissionDecision::Granted
    }

    /// Releases the lease when `requester_id` holds it. Any other call is a
    /// logged no-op.
    pub fn notify_complete(&mut self, requester_id: &str) -> bool {
        match &self.held {
            Some(held) if held.lease.holder == requester_id => {
                tracing::debug!(holder = requester_id, encounter = %held.lease.encounter, "display lease released");
                self.clear();
                true
            }
            Some(held) => {
                tracing::warn!(
                    requester = requester_id,
                    holder = %held.lease.holder,
                    "ignored completion from a requester that does not hold the lease"
                );
                false
            }
            None => {
                tracing::debug!(requester = requester_id, "ignored completion with no lease held");
                false
            }
        }
    }

    /// Unconditional release for error recovery.
    pub fn release_force(&mut self) -> Option<Lease> {
        let released = self.held.take().map(|held| held.lease);
        self.expiry.cancel();
        if let Some(lease) = &released {
            tracing::info!(holder = %lease.holder, encounter = %lease.encounter, "display lease force-released");
        }
        released
    }

    /// Scheduled expiry check. Returns the lease it reclaimed, if any.
    pub fn poll(&mut self, now: Duration) -> Option<Lease> {
        let due = match &self.held {
            Some(held) => self.expiry.is_current(held.expiry) && self.expiry.take_if_due(now),
            None => false,
        };
        if due {
            self.take_stale(now)
        } else {
            None
        }
    }

    #[must_use]
    pub fn current_lease(&self, now: Duration) -> Option<&Lease> {
        self.held.as_ref().map(|held| &held.lease).filter(|lease| !lease.is_expired(now))
    }

    #[must_use]
    pub fn is_held(&self, now: Duration) -> bool {
        self.current_lease(now).is_some()
    }

    #[must_use]
    pub fn next_deadline(&self) -> Option<Duration> {
        self.expiry.deadline()
    }

    fn reclaim_expired(&mut self, now: Duration) {
        if self.held.as_ref().is_some_and(|held| held.lease.is_expired(now)) {
            self.expiry.cancel();
            let _ = self.take_stale(now);
        }
    }

    fn take_stale(&mut self, now: Duration) -> Option<Lease> {
        let lease = self.held.take()?.lease;
        tracing::warn!(
            holder = %lease.holder,
            encounter = %lease.encounter,
            overdue_ms = u64::try_from(now.saturating_sub(lease.deadline).as_millis()).unwrap_or(u64::MAX),
            "reclaimed stale display lease without completion notice"
        );
        Some(lease)
    }

    fn clear(&mut self) {
        self.held = None;
        self.expiry.cancel();
    }
}
