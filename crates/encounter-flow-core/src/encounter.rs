use std::fmt::{Display, Formatter};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::duration_ms;

/// Composite identity of an encounter: ship type plus captain name.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct EncounterKey {
    pub ship_type: String,
    pub captain_name: String,
}

impl EncounterKey {
    #[must_use]
    pub fn new(ship_type: impl Into<String>, captain_name: impl Into<String>) -> Self {
        Self { ship_type: ship_type.into(), captain_name: captain_name.into() }
    }

    /// Identity string used by the timing gate to de-duplicate redisplay.
    #[must_use]
    pub fn derived_identity(&self) -> String {
        format!("{}_{}", self.ship_type, self.captain_name)
    }
}

impl Display for EncounterKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.ship_type, self.captain_name)
    }
}

/// An externally produced encounter. The coordinator reads only the key, the
/// story tag and the hold budget; everything else rides along in `payload`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Encounter {
    pub ship_type: String,
    pub captain_name: String,
    #[serde(default)]
    pub story_tag: Option<String>,
    #[serde(default)]
    pub story_significant: bool,
    #[serde(default, rename = "hold_budget_ms", with = "duration_ms::option")]
    pub hold_budget: Option<Duration>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Encounter {
    #[must_use]
    pub fn new(ship_type: impl Into<String>, captain_name: impl Into<String>) -> Self {
        Self {
            ship_type: ship_type.into(),
            captain_name: captain_name.into(),
            story_tag: None,
            story_significant: false,
            hold_budget: None,
            payload: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub fn with_story_tag(mut self, tag: impl Into<String>) -> Self {
        self.story_tag = Some(tag.into());
        self.story_significant = true;
        self
    }

    #[must_use]
    pub fn with_hold_budget(mut self, budget: Duration) -> Self {
        self.hold_budget = Some(budget);
        self
    }

    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    #[must_use]
    pub fn key(&self) -> EncounterKey {
        EncounterKey::new(self.ship_type.clone(), self.captain_name.clone())
    }

    #[must_use]
    pub fn derived_identity(&self) -> String {
        format!("{}_{}", self.ship_type, self.captain_name)
    }

    /// The story tag, if it is present and non-empty.
    #[must_use]
    pub fn effective_story_tag(&self) -> Option<&str> {
        self.story_tag.as_deref().map(str::trim).filter(|tag| !tag.is_empty())
    }

    /// True when releasing this encounter from a hold has story consequences.
    #[must_use]
    pub fn has_story_effect(&self) -> bool {
        self.effective_story_tag().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_identity_joins_ship_and_captain() {
        let encounter = Encounter::new("Lambda Shuttle", "Captain Voss");
        assert_eq!(encounter.derived_identity(), "Lambda Shuttle_Captain Voss");
        assert_eq!(encounter.key().derived_identity(), encounter.derived_identity());
        assert_eq!(encounter.key().to_string(), "Lambda Shuttle (Captain Voss)");
    }

    #[test]
    fn blank_story_tag_has_no_effect() {
        let mut encounter = Encounter::new("Freighter", "Orn");
        assert!(!encounter.has_story_effect());
        encounter.story_tag = Some("   ".to_string());
        assert!(!encounter.has_story_effect());
        let tagged = Encounter::new("Freighter", "Orn").with_story_tag("insurgent");
        assert_eq!(tagged.effective_story_tag(), Some("insurgent"));
        assert!(tagged.story_significant);
    }

    #[test]
    fn deserializes_with_optional_fields_missing() {
        let encounter: Encounter =
            serde_yaml::from_str("ship_type: Corvette\ncaptain_name: Rell\nhold_budget_ms: 45000\n")
                .unwrap_or_else(|err| panic!("parse encounter: {err}"));
        assert_eq!(encounter.hold_budget, Some(Duration::from_secs(45)));
        assert_eq!(encounter.story_tag, None);
        assert_eq!(encounter.payload, serde_json::Value::Null);
    }
}
