//! Pacing and capacity settings shared by every component.
//!
//! All durations are whole milliseconds so YAML files stay exact.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::encounter::Encounter;
use crate::error::FlowError;

/// What happens when a decision cooldown ends.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RetriggerPolicy {
    /// External callers drive every request.
    #[default]
    Manual,
    /// The director issues a request itself once the cooldown ends.
    AutoAfterCooldown,
}

/// Whether a bulk clear of the holding pattern applies story consequences.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum BulkClearPolicy {
    /// Encounters go back to the source; consequences apply only to
    /// individual releases.
    #[default]
    ReturnOnly,
    /// Every cleared encounter is released exactly as a manual release would.
    ApplyConsequences,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct HoldBudgets {
    pub default_ms: u64,
    pub by_story_tag: BTreeMap<String, u64>,
}

impl Default for HoldBudgets {
    fn default() -> Self {
        let by_story_tag = [("insurgent", 90_000), ("imperial_spy", 75_000), ("smuggler", 45_000)]
            .into_iter()
            .map(|(tag, ms)| (tag.to_string(), ms))
            .collect();
        Self { default_ms: 60_000, by_story_tag }
    }
}

impl HoldBudgets {
    /// Budget for an encounter: its own budget, else its story tag's, else the
    /// default.
    #[must_use]
    pub fn budget_for(&self, encounter: &Encounter) -> Duration {
        if let Some(budget) = encounter.hold_budget {
            return budget;
        }
        let ms = encounter
            .effective_story_tag()
            .and_then(|tag| self.by_story_tag.get(tag))
            .copied()
            .unwrap_or(self.default_ms);
        Duration::from_millis(ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FlowConfig {
    pub min_encounter_interval_ms: u64,
    pub lease_timeout_ms: u64,
    pub decision_cooldown_ms: u64,
    pub timing_cooldown_ms: u64,
    pub min_time_between_encounters_ms: u64,
    pub timing_restrictions_enabled: bool,
    pub holding_capacity: usize,
    pub hold_budgets: HoldBudgets,
    pub retrigger_policy: RetriggerPolicy,
    pub bulk_clear_policy: BulkClearPolicy,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            min_encounter_interval_ms: 5_000,
            lease_timeout_ms: 1_000,
            decision_cooldown_ms: 3_000,
            timing_cooldown_ms: 500,
            min_time_between_encounters_ms: 1_000,
            timing_restrictions_enabled: true,
            holding_capacity: 3,
            hold_budgets: HoldBudgets::default(),
            retrigger_policy: RetriggerPolicy::Manual,
            bulk_clear_policy: BulkClearPolicy::ReturnOnly,
        }
    }
}

impl FlowConfig {
    /// Parses a YAML document. Missing keys fall back to defaults; unknown keys
    /// are rejected.
    ///
    /// # Errors
    /// Returns `FlowError::ConfigParse` for malformed YAML and
    /// `FlowError::InvalidConfig` when validation fails.
    pub fn from_yaml_str(input: &str) -> Result<Self, FlowError> {
        let config: Self =
            serde_yaml::from_str(input).map_err(|err| FlowError::ConfigParse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// Returns `FlowError::InvalidConfig` naming the first offending field.
    pub fn validate(&self) -> Result<(), FlowError> {
        if self.holding_capacity == 0 {
            return Err(FlowError::InvalidConfig("holding_capacity must be at least 1".to_string()));
        }
        if self.lease_timeout_ms == 0 {
            return Err(FlowError::InvalidConfig("lease_timeout_ms must be positive".to_string()));
        }
        if self.hold_budgets.default_ms == 0 {
            return Err(FlowError::InvalidConfig(
                "hold_budgets.default_ms must be positive".to_string(),
            ));
        }
        if let Some((tag, _)) = self.hold_budgets.by_story_tag.iter().find(|(_, ms)| **ms == 0) {
            return Err(FlowError::InvalidConfig(format!(
                "hold_budgets.by_story_tag.{tag} must be positive"
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn min_encounter_interval(&self) -> Duration {
        Duration::from_millis(self.min_encounter_interval_ms)
    }

    #[must_use]
    pub fn lease_timeout(&self) -> Duration {
        Duration::from_millis(self.lease_timeout_ms)
    }

    #[must_use]
    pub fn decision_cooldown(&self) -> Duration {
        Duration::from_millis(self.decision_cooldown_ms)
    }

    #[must_use]
    pub fn timing_cooldown(&self) -> Duration {
        Duration::from_millis(self.timing_cooldown_ms)
    }

    #[must_use]
    pub fn min_time_between_encounters(&self) -> Duration {
        Duration::from_millis(self.min_time_between_encounters_ms)
    }
}
