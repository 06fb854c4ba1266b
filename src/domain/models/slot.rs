//! Reason slot domain model.
//!
//! A reason slot is the time-indexed unit of storage and mutation: it holds
//! the reason currently assigned to one machine over one range, together
//! with the bookkeeping of the extra auto and manual layers. The slots of a
//! machine tile its timeline without gaps or overlaps.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use super::possible_reason::PossibleReason;
use super::range::TimeRange;
use super::reason::{ReasonId, ReasonSource};

/// Tolerance used when comparing scores for coalescing.
pub const SCORE_EPSILON: f64 = 1e-9;

/// Score of a slot that holds no reason.
pub const NO_SCORE: f64 = -1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MachineId(pub u32);

impl fmt::Display for MachineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MachineModeId(pub u32);

impl fmt::Display for MachineModeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MachineObservationStateId(pub u32);

impl fmt::Display for MachineObservationStateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A monitored machine, as seen by reason providers at initialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Machine {
    pub id: MachineId,
    #[serde(default)]
    pub name: String,
}

impl Machine {
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id: MachineId(id),
            name: name.into(),
        }
    }
}

/// The main reason assignment of a slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MainAssignment {
    pub reason: ReasonId,
    pub details: Option<String>,
    pub score: f64,
    pub source: ReasonSource,
    pub overwrite_required: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, Value>,
}

impl From<&PossibleReason> for MainAssignment {
    fn from(candidate: &PossibleReason) -> Self {
        Self {
            reason: candidate.reason,
            details: candidate.details.clone(),
            score: candidate.score,
            source: candidate.source,
            // A manual assignment never asks the operator to overwrite it
            overwrite_required: candidate.overwrite_required && !candidate.source.is_manual(),
            data: candidate.data.clone(),
        }
    }
}

/// Reason slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasonSlot {
    pub id: Uuid,
    pub machine_id: MachineId,
    pub range: TimeRange,
    pub machine_mode: MachineModeId,
    pub machine_observation_state: MachineObservationStateId,
    /// `None` means undetermined
    pub reason: Option<ReasonId>,
    pub reason_details: Option<String>,
    pub reason_score: f64,
    pub reason_source: ReasonSource,
    pub overwrite_required: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub reason_data: BTreeMap<String, Value>,
    /// Number of auto reasons layered since the last extra-auto reset
    pub auto_reason_count: u32,
    /// An applicable manual reason was not retained as the main one
    pub extra_manual: bool,
    /// Optimistic locking version, bumped by the repository on each write
    #[serde(default)]
    pub version: u32,
}

impl ReasonSlot {
    /// Create an undetermined slot.
    pub fn new(
        machine_id: MachineId,
        range: TimeRange,
        machine_mode: MachineModeId,
        machine_observation_state: MachineObservationStateId,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            machine_id,
            range,
            machine_mode,
            machine_observation_state,
            reason: None,
            reason_details: None,
            reason_score: NO_SCORE,
            reason_source: ReasonSource::Default,
            overwrite_required: false,
            reason_data: BTreeMap::new(),
            auto_reason_count: 0,
            extra_manual: false,
            version: 0,
        }
    }

    pub fn with_main(mut self, assignment: MainAssignment) -> Self {
        self.set_main(Some(assignment));
        self
    }

    pub fn with_auto_reason_count(mut self, count: u32) -> Self {
        self.auto_reason_count = count;
        self
    }

    pub fn with_extra_manual(mut self, extra_manual: bool) -> Self {
        self.extra_manual = extra_manual;
        self
    }

    pub const fn is_undetermined(&self) -> bool {
        self.reason.is_none()
    }

    /// Whether the main scope must be recomputed whatever the providers say.
    pub fn requires_main_reset(&self) -> bool {
        self.reason.is_none() || self.reason_score < 0.0
    }

    pub fn main(&self) -> Option<MainAssignment> {
        self.reason.map(|reason| MainAssignment {
            reason,
            details: self.reason_details.clone(),
            score: self.reason_score,
            source: self.reason_source,
            overwrite_required: self.overwrite_required,
            data: self.reason_data.clone(),
        })
    }

    pub fn set_main(&mut self, assignment: Option<MainAssignment>) {
        match assignment {
            Some(main) => {
                self.reason = Some(main.reason);
                self.reason_details = main.details;
                self.reason_score = main.score;
                self.reason_source = main.source;
                self.overwrite_required = main.overwrite_required;
                self.reason_data = main.data;
            }
            None => {
                self.reason = None;
                self.reason_details = None;
                self.reason_score = NO_SCORE;
                self.reason_source = ReasonSource::Default;
                self.overwrite_required = false;
                self.reason_data = BTreeMap::new();
            }
        }
    }

    /// Copy restricted to a sub-range, as a new unsaved slot.
    pub fn narrowed(&self, range: TimeRange) -> Self {
        Self {
            id: Uuid::new_v4(),
            range,
            version: 0,
            ..self.clone()
        }
    }

    /// Same machine, mode and observation state.
    pub fn same_context(&self, other: &Self) -> bool {
        self.machine_id == other.machine_id
            && self.machine_mode == other.machine_mode
            && self.machine_observation_state == other.machine_observation_state
    }

    /// Whether two slots carry the same reference data and may be merged
    /// into one, ignoring their ranges.
    pub fn same_reference_data(&self, other: &Self) -> bool {
        self.same_context(other)
            && self.reason == other.reason
            && self.reason_source == other.reason_source
            && (self.reason_score - other.reason_score).abs() <= SCORE_EPSILON
            && self.reason_details == other.reason_details
            && self.overwrite_required == other.overwrite_required
            && self.reason_data == other.reason_data
            && self.auto_reason_count == other.auto_reason_count
            && self.extra_manual == other.extra_manual
    }

    /// Whether `next` directly follows this slot and carries the same data.
    pub fn can_coalesce_with(&self, next: &Self) -> bool {
        self.range.meets(&next.range) && self.same_reference_data(next)
    }
}

impl fmt::Display for ReasonSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "slot {} machine={} {} mode={} state={} reason={} score={} source={}",
            self.id,
            self.machine_id,
            self.range,
            self.machine_mode,
            self.machine_observation_state,
            self.reason
                .map_or_else(|| "undetermined".to_string(), |r| r.to_string()),
            self.reason_score,
            self.reason_source
        )
    }
}
