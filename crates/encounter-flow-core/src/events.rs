//! Decision notifications and the events reported by a director tick.

use std::fmt::{Debug, Formatter};
use std::time::Duration;

use serde::Serialize;

use crate::admission::Lease;
use crate::encounter::EncounterKey;
use crate::error::duration_ms;
use crate::holding::HoldingRelease;

#[derive(Debug, Clone, Serialize, Eq, PartialEq)]
pub struct DecisionEvent {
    pub encounter: EncounterKey,
    pub approved: bool,
    #[serde(rename = "duration_ms", with = "duration_ms::option")]
    pub duration: Option<Duration>,
    #[serde(rename = "decided_at_ms", with = "duration_ms")]
    pub decided_at: Duration,
}

#[derive(Debug, Clone, Copy, Serialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SubscriptionId(u64);

pub type DecisionCallback = Box<dyn FnMut(&DecisionEvent) + Send>;

/// Ordered subscriber list. Callbacks run synchronously, in subscription
/// order, on the caller's thread.
#[derive(Default)]
pub struct DecisionBus {
    next_id: u64,
    subscribers: Vec<(SubscriptionId, DecisionCallback)>,
}

impl Debug for DecisionBus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionBus").field("subscribers", &self.subscribers.len()).finish()
    }
}

impl DecisionBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, callback: DecisionCallback) -> SubscriptionId {
        self.next_id = self.next_id.wrapping_add(1);
        let id = SubscriptionId(self.next_id);
        self.subscribers.push((id, callback));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(existing, _)| *existing != id);
        before != self.subscribers.len()
    }

    pub fn publish(&mut self, event: &DecisionEvent) {
        for (_, callback) in &mut self.subscribers {
            callback(event);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

/// Something that happened while timers were polled.
#[derive(Debug, Clone, Serialize, Eq, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FlowEvent {
    LeaseExpired { lease: Lease },
    ProcessingCleared,
    CooldownEnded,
    TimingCooldownEnded,
    HoldExpired { release: HoldingRelease },
    AutoRetrigger { outcome: crate::director::RequestOutcome },
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;

    fn event(approved: bool) -> DecisionEvent {
        DecisionEvent {
            encounter: EncounterKey::new("Shuttle", "Voss"),
            approved,
            duration: Some(Duration::from_millis(1_200)),
            decided_at: Duration::from_secs(9),
        }
    }

    #[test]
    fn publishes_to_subscribers_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut bus = DecisionBus::new();
        let first = seen.clone();
        bus.subscribe(Box::new(move |e| first.lock().push(("first", e.approved))));
        let second = seen.clone();
        bus.subscribe(Box::new(move |e| second.lock().push(("second", e.approved))));

        bus.publish(&event(true));
        assert_eq!(*seen.lock(), vec![("first", true), ("second", true)]);
    }

    #[test]
    fn unsubscribed_callbacks_stop_receiving() {
        let count = Arc::new(Mutex::new(0_u32));
        let mut bus = DecisionBus::new();
        let counter = count.clone();
        let id = bus.subscribe(Box::new(move |_| *counter.lock() += 1));
        bus.publish(&event(false));
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.publish(&event(false));
        assert_eq!(*count.lock(), 1);
        assert!(bus.is_empty());
    }

    #[test]
    fn decision_event_serializes_in_milliseconds() {
        let json = serde_json::to_value(event(true))
            .unwrap_or_else(|err| panic!("serialize decision event: {err}"));
        assert_eq!(json["duration_ms"], 1_200);
        assert_eq!(json["decided_at_ms"], 9_000);
        assert_eq!(json["encounter"]["captain_name"], "Voss");
    }
}
