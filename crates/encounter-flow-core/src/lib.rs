//! Encounter lifecycle coordination: display admission, request pacing,
//! per-encounter timing and the holding pattern, wired together by
//! [`EncounterDirector`].

pub mod adapters;
pub mod admission;
pub mod clock;
pub mod collaborators;
pub mod config;
pub mod director;
pub mod encounter;
pub mod error;
pub mod events;
pub mod flow;
pub mod holding;
pub mod timer;
pub mod timing;

pub use adapters::{
    ConsequenceTable, InMemoryBacklog, LoyaltyLedger, LoyaltyTotals, NotificationLog,
    RecordingDisplay, ToggleSession,
};
pub use admission::{AdmissionCoordinator, AdmissionDecision, Lease};
pub use clock::{Clock, ManualClock, SystemClock};
pub use collaborators::{
    ConsequenceProvider, DisplaySurface, EncounterSource, LoyaltyImpact, LoyaltySink,
    NotificationSink, SessionState,
};
pub use config::{BulkClearPolicy, FlowConfig, HoldBudgets, RetriggerPolicy};
pub use director::{
    DecisionOutcome, DeferOutcome, DirectorBuilder, DirectorStatus, EncounterDirector,
    LiveSummary, PresentOutcome, RequestOutcome, AUTO_RETRIGGER_SOURCE, FLOW_REQUESTER_ID,
    MAX_PENDING_EVENTS,
};
pub use encounter::{Encounter, EncounterKey};
pub use error::{DenialReason, FlowError};
pub use events::{DecisionBus, DecisionCallback, DecisionEvent, FlowEvent, SubscriptionId};
pub use flow::{FlowController, FlowSignal, FlowState};
pub use holding::{
    CompletionHook, HeldEncounterSummary, HoldOutcome, HoldingEntryId, HoldingPatternQueue,
    HoldingRelease, ReleaseOutcome, ReleaseReason,
};
pub use timer::{Timer, TimerToken};
pub use timing::{TimingGate, TimingRecord, TimingStats};
