use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use encounter_flow_core::{ConsequenceTable, Encounter};
use serde::{Deserialize, Serialize};

/// A scripted checkpoint session: the encounters waiting in line, the
/// loyalty table for their story tags and the operator's timed actions.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub backlog: Vec<Encounter>,
    #[serde(default)]
    pub consequences: ConsequenceTable,
    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Request,
    Present,
    Approve,
    Deny,
    Defer,
    Release,
    ClearHolding,
    Pause,
    Resume,
    EndSession,
    Reset,
    Tick,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Present => "present",
            Self::Approve => "approve",
            Self::Deny => "deny",
            Self::Defer => "defer",
            Self::Release => "release",
            Self::ClearHolding => "clear_holding",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::EndSession => "end_session",
            Self::Reset => "reset",
            Self::Tick => "tick",
        }
    }
}

/// One operator action at an absolute scenario time.
///
/// `source` labels a `request`; `requester` and `encounter` are required for
/// `present`; `hold` picks the n-th deferred encounter (0-based, in deferral
/// order) for `release`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Step {
    pub at_ms: u64,
    pub action: Action,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub requester: Option<String>,
    #[serde(default)]
    pub encounter: Option<Encounter>,
    #[serde(default)]
    pub hold: Option<usize>,
}

impl Scenario {
    pub fn from_yaml_str(input: &str) -> Result<Self> {
        let scenario: Self = serde_yaml::from_str(input).context("failed to parse scenario YAML")?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let body = fs::read_to_string(path)
            .with_context(|| format!("failed to read scenario file {}", path.display()))?;
        Self::from_yaml_str(&body)
            .with_context(|| format!("invalid scenario file {}", path.display()))
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("unnamed")
    }

    fn validate(&self) -> Result<()> {
        let mut previous = 0;
        for (index, step) in self.steps.iter().enumerate() {
            if step.at_ms < previous {
                bail!(
                    "step {index} at {}ms is earlier than the previous step at {previous}ms",
                    step.at_ms
                );
            }
            previous = step.at_ms;
            match step.action {
                Action::Present if step.requester.is_none() || step.encounter.is_none() => {
                    bail!("step {index}: `present` needs both `requester` and `encounter`");
                }
                Action::Release if step.hold.is_none() => {
                    bail!("step {index}: `release` needs a `hold` index");
                }
                _ => {}
            }
        }
        Ok(())
    }
}
