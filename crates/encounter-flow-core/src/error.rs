use std::fmt::{Display, Formatter};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Construction and configuration failures. Runtime outcomes such as denials
/// or a full holding pattern are reported through outcome enums instead.
#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum FlowError {
    #[error("missing collaborator: {0}")]
    MissingCollaborator(&'static str),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("config parse error: {0}")]
    ConfigParse(String),
}

/// Why a request for the next encounter was not admitted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DenialReason {
    AlreadyProcessing,
    InCooldown,
    TooSoon {
        #[serde(with = "duration_ms")]
        remaining: Duration,
    },
    SessionInactive,
    SessionPaused,
    DisplayIntervalNotElapsed,
}

impl DenialReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AlreadyProcessing => "already_processing",
            Self::InCooldown => "in_cooldown",
            Self::TooSoon { .. } => "too_soon",
            Self::SessionInactive => "session_inactive",
            Self::SessionPaused => "session_paused",
            Self::DisplayIntervalNotElapsed => "display_interval_not_elapsed",
        }
    }
}

impl Display for DenialReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooSoon { remaining } => {
                write!(f, "too_soon ({}ms remaining)", remaining.as_millis())
            }
            other => f.write_str(other.as_str()),
        }
    }
}

/// Serde helper that writes a `Duration` as whole milliseconds.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }

    pub mod option {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer};

        #[allow(clippy::ref_option)]
        pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match value {
                Some(duration) => super::serialize(duration, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Option::<u64>::deserialize(deserializer).map(|value| value.map(Duration::from_millis))
        }
    }
}
