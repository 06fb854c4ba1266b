//! Reason candidates and picker selections.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::range::TimeRange;
use super::reason::{ReasonId, ReasonSource};
use super::slot::{MachineModeId, MachineObservationStateId, ReasonSlot};

/// Optional validity restriction of a candidate.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Restriction {
    /// Valid over the whole evaluated slot
    #[default]
    None,
    /// Valid over a sub-range of the slot only
    Range { range: TimeRange },
    /// Valid only for this mode and observation state
    Mode {
        machine_mode: MachineModeId,
        machine_observation_state: MachineObservationStateId,
    },
}

/// How a candidate relates to the slot being evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applicability {
    /// Applies to the whole slot
    Whole,
    /// Applies to a strict sub-range of the slot
    Partial(TimeRange),
    /// Mode/state do not match: silently ignored
    NotApplicable,
    /// Range restriction outside the slot: the provider misbehaved
    OutOfRange(TimeRange),
}

/// An immutable proposal produced by one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PossibleReason {
    pub reason: ReasonId,
    #[serde(default)]
    pub details: Option<String>,
    pub score: f64,
    pub source: ReasonSource,
    /// Whether the candidate may win a score tie
    #[serde(default)]
    pub overwrite_required: bool,
    #[serde(default)]
    pub restriction: Restriction,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, Value>,
}

impl PossibleReason {
    pub fn new(reason: ReasonId, score: f64, source: ReasonSource) -> Self {
        Self {
            reason,
            details: None,
            score,
            source,
            overwrite_required: false,
            restriction: Restriction::None,
            data: BTreeMap::new(),
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_overwrite_required(mut self, overwrite_required: bool) -> Self {
        self.overwrite_required = overwrite_required;
        self
    }

    pub fn restricted_to_range(mut self, range: TimeRange) -> Self {
        self.restriction = Restriction::Range { range };
        self
    }

    pub fn restricted_to_mode(
        mut self,
        machine_mode: MachineModeId,
        machine_observation_state: MachineObservationStateId,
    ) -> Self {
        self.restriction = Restriction::Mode {
            machine_mode,
            machine_observation_state,
        };
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    pub fn restricted_range(&self) -> Option<TimeRange> {
        match &self.restriction {
            Restriction::Range { range } => Some(*range),
            _ => None,
        }
    }

    /// Classify this candidate against a slot.
    pub fn applicability(&self, slot: &ReasonSlot) -> Applicability {
        match &self.restriction {
            Restriction::None => Applicability::Whole,
            Restriction::Mode {
                machine_mode,
                machine_observation_state,
            } => {
                if *machine_mode == slot.machine_mode
                    && *machine_observation_state == slot.machine_observation_state
                {
                    Applicability::Whole
                } else {
                    Applicability::NotApplicable
                }
            }
            Restriction::Range { range } => {
                if !slot.range.contains_range(range) {
                    Applicability::OutOfRange(*range)
                } else if *range == slot.range {
                    Applicability::Whole
                } else {
                    Applicability::Partial(*range)
                }
            }
        }
    }

    /// Whether the candidate is valid over all of `range`.
    pub fn covers(&self, range: &TimeRange) -> bool {
        match &self.restriction {
            Restriction::Range { range: restricted } => restricted.contains_range(range),
            _ => true,
        }
    }
}

/// A selectable variant of a candidate, used to populate reason pickers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtraReasonSelection {
    pub machine_mode: MachineModeId,
    pub machine_observation_state: MachineObservationStateId,
    pub reason: ReasonId,
    pub reason_score: f64,
    pub selectable: bool,
    pub details_required: bool,
    #[serde(default)]
    pub alternative_text: Option<String>,
    #[serde(default)]
    pub alternative_long_text: Option<String>,
    #[serde(default)]
    pub alternative_description: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, Value>,
}

impl ExtraReasonSelection {
    pub fn new(
        machine_mode: MachineModeId,
        machine_observation_state: MachineObservationStateId,
        reason: ReasonId,
        reason_score: f64,
    ) -> Self {
        Self {
            machine_mode,
            machine_observation_state,
            reason,
            reason_score,
            selectable: true,
            details_required: false,
            alternative_text: None,
            alternative_long_text: None,
            alternative_description: None,
            data: BTreeMap::new(),
        }
    }

    /// Picker entry for a candidate; the candidate details become the
    /// alternative text.
    pub fn from_candidate(
        candidate: &PossibleReason,
        machine_mode: MachineModeId,
        machine_observation_state: MachineObservationStateId,
    ) -> Self {
        Self {
            alternative_text: candidate.details.clone(),
            data: candidate.data.clone(),
            ..Self::new(
                machine_mode,
                machine_observation_state,
                candidate.reason,
                candidate.score,
            )
        }
    }

    pub fn with_details_required(mut self, details_required: bool) -> Self {
        self.details_required = details_required;
        self
    }

    pub fn with_selectable(mut self, selectable: bool) -> Self {
        self.selectable = selectable;
        self
    }
}
