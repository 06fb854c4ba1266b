//! Slot mutation events delivered by the upstream trigger source.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::flags::ReasonSlotChange;
use super::range::TimeRange;
use super::reason::ReasonId;
use super::slot::{MachineId, ReasonSlot};

/// What kind of upstream modification caused a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModificationKind {
    /// New machine activity was detected
    Activity,
    /// The machine mode or observation state was updated
    MachineStatus,
    /// An operator entered or removed a manual reason
    ManualReason,
    /// An auto reason was proposed or withdrawn
    ReasonProposal,
    /// Explicit re-evaluation
    Reevaluation,
    #[default]
    Other,
}

impl ModificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Activity => "activity",
            Self::MachineStatus => "machine_status",
            Self::ManualReason => "manual_reason",
            Self::ReasonProposal => "reason_proposal",
            Self::Reevaluation => "reevaluation",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ModificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The upstream modification behind a trigger, when known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modification {
    pub kind: ModificationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<TimeRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<ReasonId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Modification {
    pub fn new(kind: ModificationKind) -> Self {
        Self {
            kind,
            range: None,
            reason: None,
            description: None,
        }
    }

    pub fn with_range(mut self, range: TimeRange) -> Self {
        self.range = Some(range);
        self
    }

    pub fn with_reason(mut self, reason: ReasonId) -> Self {
        self.reason = Some(reason);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A request to consolidate one slot.
///
/// `new_slot` is the slot as it stands now; `old_slot` is its previous
/// state when the trigger source knows it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotTrigger {
    pub machine_id: MachineId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_slot: Option<ReasonSlot>,
    pub new_slot: ReasonSlot,
    pub change: ReasonSlotChange,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modification: Option<Modification>,
}

impl SlotTrigger {
    pub fn new(new_slot: ReasonSlot, change: ReasonSlotChange) -> Self {
        Self {
            machine_id: new_slot.machine_id,
            old_slot: None,
            new_slot,
            change,
            modification: None,
        }
    }

    /// Explicit re-evaluation of a stored slot.
    pub fn requested(slot: ReasonSlot) -> Self {
        Self::new(slot, ReasonSlotChange::REQUESTED)
            .with_modification(Modification::new(ModificationKind::Reevaluation))
    }

    pub fn with_old_slot(mut self, old_slot: ReasonSlot) -> Self {
        self.old_slot = Some(old_slot);
        self
    }

    pub fn with_modification(mut self, modification: Modification) -> Self {
        self.modification = Some(modification);
        self
    }

    /// Same trigger for a piece of the slot.
    pub fn for_piece(&self, piece: ReasonSlot) -> Self {
        Self {
            machine_id: self.machine_id,
            old_slot: self.old_slot.clone(),
            new_slot: piece,
            change: self.change,
            modification: self.modification.clone(),
        }
    }

    pub fn range(&self) -> TimeRange {
        self.new_slot.range
    }
}
