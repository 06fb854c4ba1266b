pub mod config;
pub mod flags;
pub mod possible_reason;
pub mod range;
pub mod reason;
pub mod slot;
pub mod timeline;
pub mod trigger;

pub use config::{
    Config, DatabaseConfig, EngineConfig, LoggingConfig, MachineModeDefaultEntry,
    MachineModeDefaultsConfig, ProviderToggle, ProvidersConfig, RetryConfig,
    ScheduledReasonsConfig, ScheduledWindowConfig, WorkerConfig,
};
pub use flags::{ReasonSlotChange, RequiredResetKind};
pub use possible_reason::{Applicability, ExtraReasonSelection, PossibleReason, Restriction};
pub use range::TimeRange;
pub use reason::{Reason, ReasonId, ReasonSource};
pub use slot::{
    Machine, MachineId, MachineModeId, MachineObservationStateId, MainAssignment, ReasonSlot,
    NO_SCORE, SCORE_EPSILON,
};
pub use trigger::{Modification, ModificationKind, SlotTrigger};
