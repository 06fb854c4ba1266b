//! Auto reason proposals pushed by external detectors.

use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::models::{
    Machine, MachineId, MachineModeId, MachineObservationStateId, Modification, ModificationKind,
    PossibleReason, ReasonId, ReasonSlot, ReasonSlotChange, ReasonSource, RequiredResetKind,
    TimeRange, NO_SCORE,
};
use crate::domain::ports::{ProviderCache, ProviderResult, ReasonProvider};

pub const NAME: &str = "reason_proposal";

/// A reason proposed for a period, optionally only while the machine is in
/// a given mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasonProposal {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub machine_id: MachineId,
    pub range: TimeRange,
    pub reason: ReasonId,
    pub score: f64,
    #[serde(default)]
    pub overwrite_required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_mode: Option<MachineModeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ReasonProposal {
    pub fn new(machine_id: MachineId, range: TimeRange, reason: ReasonId, score: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            machine_id,
            range,
            reason,
            score,
            overwrite_required: false,
            machine_mode: None,
            details: None,
        }
    }

    #[must_use]
    pub fn with_overwrite_required(mut self, overwrite_required: bool) -> Self {
        self.overwrite_required = overwrite_required;
        self
    }

    #[must_use]
    pub fn for_mode(mut self, machine_mode: MachineModeId) -> Self {
        self.machine_mode = Some(machine_mode);
        self
    }

    fn applies_to(&self, machine_mode: MachineModeId) -> bool {
        self.machine_mode.map_or(true, |m| m == machine_mode)
    }
}

/// In-process store of reason proposals.
#[derive(Debug, Clone, Default)]
pub struct ReasonProposalStore {
    proposals: Arc<RwLock<Vec<ReasonProposal>>>,
}

impl ReasonProposalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, proposal: ReasonProposal) -> Uuid {
        let id = proposal.id;
        self.proposals
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(proposal);
        id
    }

    /// Withdraw a proposal. Slots it was applied to keep their reason until
    /// they are re-evaluated.
    pub fn withdraw(&self, id: Uuid) -> Option<ReasonProposal> {
        let mut proposals = self.proposals.write().unwrap_or_else(PoisonError::into_inner);
        let position = proposals.iter().position(|p| p.id == id)?;
        Some(proposals.remove(position))
    }

    pub fn overlapping(&self, machine_id: MachineId, range: &TimeRange) -> Vec<ReasonProposal> {
        self.proposals
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|p| p.machine_id == machine_id && p.range.overlaps(range))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.proposals
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Proposes auto reasons, restricted to their overlap with the slot.
pub struct ReasonProposalProvider {
    store: ReasonProposalStore,
    machine_id: Option<MachineId>,
    priority: i32,
}

impl ReasonProposalProvider {
    pub fn new(store: ReasonProposalStore) -> Self {
        Self {
            store,
            machine_id: None,
            priority: 0,
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    fn applicable(&self, range: &TimeRange, machine_mode: MachineModeId) -> Vec<ReasonProposal> {
        let Some(machine_id) = self.machine_id else {
            return vec![];
        };
        self.store
            .overlapping(machine_id, range)
            .into_iter()
            .filter(|p| p.applies_to(machine_mode))
            .collect()
    }

    fn candidate(proposal: &ReasonProposal) -> PossibleReason {
        let candidate = PossibleReason::new(proposal.reason, proposal.score, ReasonSource::Auto)
            .with_overwrite_required(proposal.overwrite_required)
            .with_data(
                "proposal_id",
                serde_json::Value::String(proposal.id.to_string()),
            );
        match &proposal.details {
            Some(details) => candidate.with_details(details.clone()),
            None => candidate,
        }
    }
}

impl ReasonProvider for ReasonProposalProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn initialize(&mut self, machine: &Machine) -> ProviderResult<bool> {
        self.machine_id = Some(machine.id);
        Ok(true)
    }

    fn maximum_score(
        &self,
        slot: &ReasonSlot,
        _cache: &ProviderCache,
    ) -> ProviderResult<Option<f64>> {
        Ok(Some(
            self.applicable(&slot.range, slot.machine_mode)
                .iter()
                .map(|p| p.score)
                .fold(NO_SCORE, f64::max),
        ))
    }

    fn may_apply_auto_reasons(
        &self,
        slot: &ReasonSlot,
        _cache: &ProviderCache,
    ) -> ProviderResult<bool> {
        Ok(!self.applicable(&slot.range, slot.machine_mode).is_empty())
    }

    fn required_reset_kind(
        &self,
        _old_slot: Option<&ReasonSlot>,
        new_slot: &ReasonSlot,
        modification: Option<&Modification>,
        change: ReasonSlotChange,
        _cache: &ProviderCache,
    ) -> ProviderResult<RequiredResetKind> {
        let mut kind = RequiredResetKind::NONE;
        if change.intersects(ReasonSlotChange::PERIOD | ReasonSlotChange::NEW_ACTIVITY) {
            kind |= RequiredResetKind::EXTRA_AUTO;
        }
        if change.has_flag(ReasonSlotChange::MACHINE_MODE) {
            let mode_bound = self.machine_id.is_some_and(|machine_id| {
                self.store
                    .overlapping(machine_id, &new_slot.range)
                    .iter()
                    .any(|p| p.machine_mode.is_some())
            });
            if mode_bound {
                kind |= RequiredResetKind::MAIN | RequiredResetKind::EXTRA_AUTO;
            }
        }
        let proposed = modification.is_some_and(|m| {
            m.kind == ModificationKind::ReasonProposal
                && m.range.map_or(true, |r| r.overlaps(&new_slot.range))
        });
        if proposed {
            kind |= RequiredResetKind::MAIN | RequiredResetKind::EXTRA_AUTO;
        }
        Ok(kind)
    }

    fn try_get_active_at(
        &self,
        at: DateTime<Utc>,
        machine_mode: MachineModeId,
        _machine_observation_state: MachineObservationStateId,
        _auto_manual_only: bool,
        _cache: &ProviderCache,
    ) -> ProviderResult<Vec<PossibleReason>> {
        let Ok(instant) = TimeRange::starting_at(at, chrono::Duration::milliseconds(1)) else {
            return Ok(vec![]);
        };
        Ok(self
            .applicable(&instant, machine_mode)
            .iter()
            .map(Self::candidate)
            .collect())
    }

    fn try_get_active_during(
        &self,
        range: &TimeRange,
        machine_mode: MachineModeId,
        _machine_observation_state: MachineObservationStateId,
        _auto_manual_only: bool,
        _cache: &ProviderCache,
    ) -> ProviderResult<Vec<PossibleReason>> {
        Ok(self
            .applicable(range, machine_mode)
            .iter()
            .filter_map(|p| {
                let overlap = p.range.intersection(range)?;
                Some(Self::candidate(p).restricted_to_range(overlap))
            })
            .collect())
    }
}
