//! Consolidation service.
//!
//! Wraps the pure [`ConsolidationEngine`] with persistence: it reads the
//! stored slot, resolves the trigger, replaces the slot by its resolution
//! and coalesces the result with its neighbours. It also plays the
//! upstream role for the CLI, turning activity and machine status changes
//! into slot triggers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::consolidation_engine::{ConsolidationEngine, ProviderDiagnostic, ResetState};
use super::provider_registry::ActiveProviders;
use crate::domain::errors::DomainError;
use crate::domain::models::{
    ExtraReasonSelection, MachineId, MachineModeId, MachineObservationStateId, Modification,
    ModificationKind, ReasonSlot, ReasonSlotChange, SlotTrigger, TimeRange,
};
use crate::domain::ports::{BatchContext, ReasonSlotRepository, RepositoryError};

/// Errors surfaced by the consolidation service
#[derive(Debug, Error)]
pub enum ConsolidationError {
    #[error("Reason slots changed underneath the pass: {0}")]
    Stale(#[source] RepositoryError),

    #[error("Repository error: {0}")]
    Repository(#[source] RepositoryError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("Reason slot {0} no longer exists")]
    Vanished(Uuid),

    #[error("Consolidation cancelled")]
    Cancelled,

    #[error("No worker available for machine {0}")]
    WorkerUnavailable(MachineId),
}

impl ConsolidationError {
    /// Whether the caller may retry from a fresh read of the slots.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Stale(_) | Self::Vanished(_))
    }
}

impl From<RepositoryError> for ConsolidationError {
    fn from(err: RepositoryError) -> Self {
        if err.is_retryable() {
            Self::Stale(err)
        } else {
            Self::Repository(err)
        }
    }
}

pub type ConsolidationResult<T> = Result<T, ConsolidationError>;

/// Outcome of one committed consolidation.
#[derive(Debug, Clone)]
pub struct ConsolidationReport {
    pub machine_id: MachineId,
    /// Range of the consolidated slot
    pub range: TimeRange,
    pub reset: ResetState,
    /// Whether the slot set changed
    pub changed: bool,
    /// Stored slots covering the consolidated range after coalescing
    pub slots: Vec<ReasonSlot>,
    /// Number of merges with neighbouring or sibling slots
    pub coalesced: usize,
    pub diagnostics: Vec<ProviderDiagnostic>,
}

/// Service committing consolidation passes to a slot repository.
pub struct ConsolidationService {
    repo: Arc<dyn ReasonSlotRepository>,
    engine: ConsolidationEngine,
}

impl ConsolidationService {
    pub fn new(repo: Arc<dyn ReasonSlotRepository>, engine: ConsolidationEngine) -> Self {
        Self { repo, engine }
    }

    pub fn repository(&self) -> &Arc<dyn ReasonSlotRepository> {
        &self.repo
    }

    pub fn engine(&self) -> &ConsolidationEngine {
        &self.engine
    }

    /// Resolve a trigger and commit the result.
    ///
    /// The stored state of the slot is resolved, not the copy carried by the
    /// trigger; a trigger slot that was never stored is inserted first.
    ///
    /// # Errors
    /// - `Stale` or `Vanished` when the slot changed concurrently (retryable)
    /// - `Repository` for other persistence failures
    #[instrument(
        skip(self, providers, batch, trigger),
        fields(machine_id = %trigger.machine_id, range = %trigger.range()),
        err
    )]
    pub async fn consolidate(
        &self,
        providers: &ActiveProviders,
        batch: &BatchContext,
        trigger: &SlotTrigger,
    ) -> ConsolidationResult<ConsolidationReport> {
        let current = match self.repo.get(trigger.new_slot.id).await? {
            Some(stored) => stored,
            None if trigger.new_slot.version == 0 => self.repo.insert(&trigger.new_slot).await?,
            None => return Err(ConsolidationError::Vanished(trigger.new_slot.id)),
        };
        let trigger = trigger.for_piece(current.clone());

        let resolution = self.engine.resolve(providers, batch, &trigger);
        if !resolution.changed() {
            debug!(reset = %resolution.reset, "Slot unchanged");
            return Ok(ConsolidationReport {
                machine_id: current.machine_id,
                range: current.range,
                reset: resolution.reset,
                changed: false,
                slots: vec![current],
                coalesced: 0,
                diagnostics: resolution.diagnostics,
            });
        }

        let stored = self.repo.replace(&current, resolution.slots).await?;
        let (slots, coalesced) = self.coalesce(providers, batch, stored).await?;

        info!(
            reset = %resolution.reset,
            slots = slots.len(),
            splits = resolution.splits,
            coalesced,
            "Slot consolidated"
        );

        Ok(ConsolidationReport {
            machine_id: current.machine_id,
            range: current.range,
            reset: resolution.reset,
            changed: true,
            slots,
            coalesced,
            diagnostics: resolution.diagnostics,
        })
    }

    /// Merge `stored` (ordered, contiguous) with each other and with the
    /// slots right before and after them wherever the data is identical and
    /// no provider objects.
    async fn coalesce(
        &self,
        providers: &ActiveProviders,
        batch: &BatchContext,
        stored: Vec<ReasonSlot>,
    ) -> ConsolidationResult<(Vec<ReasonSlot>, usize)> {
        let (Some(first), Some(last)) = (stored.first(), stored.last()) else {
            return Ok((stored, 0));
        };
        let machine_id = first.machine_id;
        let before = self
            .repo
            .find_ending_at(machine_id, first.range.lower())
            .await?;
        let after = self
            .repo
            .find_starting_at(machine_id, last.range.upper())
            .await?;

        let chain = before.into_iter().chain(stored).chain(after);
        let mut merged: Vec<ReasonSlot> = Vec::new();
        let mut count = 0;

        for slot in chain {
            match merged.last_mut() {
                Some(previous) if can_merge(providers, batch, previous, &slot) => {
                    *previous = self.repo.merge(previous, &slot).await?;
                    count += 1;
                }
                _ => merged.push(slot),
            }
        }

        Ok((merged, count))
    }

    /// Picker entries for a machine at an instant, best first.
    pub fn selections_at(
        &self,
        providers: &ActiveProviders,
        batch: &BatchContext,
        at: DateTime<Utc>,
        machine_mode: MachineModeId,
        machine_observation_state: MachineObservationStateId,
    ) -> Vec<ExtraReasonSelection> {
        let mut selections = Vec::new();
        for (index, provider) in providers.iter() {
            match provider.try_get_active_at(
                at,
                machine_mode,
                machine_observation_state,
                false,
                batch.cache(index),
            ) {
                Ok(candidates) => selections.extend(candidates.iter().map(|c| {
                    let details_required = c
                        .data
                        .get("details_required")
                        .and_then(serde_json::Value::as_bool)
                        .unwrap_or(false);
                    ExtraReasonSelection::from_candidate(
                        c,
                        machine_mode,
                        machine_observation_state,
                    )
                    .with_details_required(details_required)
                })),
                Err(e) => warn!(
                    provider = provider.name(),
                    error = %e,
                    "Provider skipped while listing selections"
                ),
            }
        }
        selections.sort_by(|a, b| {
            b.reason_score
                .total_cmp(&a.reason_score)
                .then_with(|| a.reason.cmp(&b.reason))
        });
        selections
    }

    /// Triggers for every stored slot overlapping `range`.
    pub async fn triggers_for_range(
        &self,
        machine_id: MachineId,
        range: &TimeRange,
        change: ReasonSlotChange,
        modification: Option<Modification>,
    ) -> ConsolidationResult<Vec<SlotTrigger>> {
        let slots = self.repo.find_in_range(machine_id, range).await?;
        Ok(slots
            .into_iter()
            .map(|slot| {
                let trigger = SlotTrigger::new(slot, change);
                match &modification {
                    Some(m) => trigger.with_modification(m.clone()),
                    None => trigger,
                }
            })
            .collect())
    }

    /// Store a slot for newly detected activity and return its trigger.
    ///
    /// # Errors
    /// Fails with a partition violation when the range is already covered.
    pub async fn record_activity(
        &self,
        machine_id: MachineId,
        range: TimeRange,
        machine_mode: MachineModeId,
        machine_observation_state: MachineObservationStateId,
    ) -> ConsolidationResult<SlotTrigger> {
        let slot = ReasonSlot::new(machine_id, range, machine_mode, machine_observation_state);
        let stored = self.repo.insert(&slot).await?;
        Ok(SlotTrigger::new(stored, ReasonSlotChange::NEW_ACTIVITY).with_modification(
            Modification::new(ModificationKind::Activity).with_range(range),
        ))
    }

    /// Re-state the machine mode and observation state over `range`,
    /// splitting the slots it cuts through. Returns one trigger per slot
    /// whose status changed.
    pub async fn apply_status(
        &self,
        machine_id: MachineId,
        range: TimeRange,
        machine_mode: MachineModeId,
        machine_observation_state: MachineObservationStateId,
    ) -> ConsolidationResult<Vec<SlotTrigger>> {
        let mut triggers = Vec::new();

        for slot in self.repo.find_in_range(machine_id, &range).await? {
            let Some(piece) = slot.range.intersection(&range) else {
                continue;
            };
            let mut change = ReasonSlotChange::NONE;
            if slot.machine_mode != machine_mode {
                change |= ReasonSlotChange::MACHINE_MODE;
            }
            if slot.machine_observation_state != machine_observation_state {
                change |= ReasonSlotChange::MACHINE_OBSERVATION_STATE;
            }
            if change.is_empty() {
                continue;
            }
            if piece != slot.range {
                change |= ReasonSlotChange::PERIOD;
            }

            let mut updated = slot.clone();
            updated.range = piece;
            updated.machine_mode = machine_mode;
            updated.machine_observation_state = machine_observation_state;
            let mut replacements: Vec<ReasonSlot> = slot
                .range
                .difference(&piece)
                .into_iter()
                .map(|rest| slot.narrowed(rest))
                .collect();
            replacements.push(updated);
            replacements.sort_by_key(|s| s.range.lower());

            let stored = self.repo.replace(&slot, replacements).await?;
            if let Some(changed) = stored.into_iter().find(|s| s.id == slot.id) {
                triggers.push(
                    SlotTrigger::new(changed, change)
                        .with_old_slot(slot)
                        .with_modification(
                            Modification::new(ModificationKind::MachineStatus).with_range(range),
                        ),
                );
            }
        }

        Ok(triggers)
    }
}

fn can_merge(
    providers: &ActiveProviders,
    batch: &BatchContext,
    first: &ReasonSlot,
    second: &ReasonSlot,
) -> bool {
    if !first.can_coalesce_with(second) {
        return false;
    }
    let (Some(reason), Some(merged)) = (first.reason, first.range.span(&second.range)) else {
        return first.reason.is_none();
    };
    providers.iter().all(|(index, provider)| {
        !matches!(
            provider.is_compatible(
                &merged,
                first.machine_mode,
                first.machine_observation_state,
                reason,
                first.reason_score,
                first.reason_source,
                batch.cache(index),
            ),
            Ok(false)
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let stale: ConsolidationError = RepositoryError::StaleSlot {
            id: Uuid::new_v4(),
            expected: 1,
            found: 2,
        }
        .into();
        assert!(stale.is_retryable());
        assert!(matches!(stale, ConsolidationError::Stale(_)));

        let missing: ConsolidationError = RepositoryError::SlotNotFound(Uuid::new_v4()).into();
        assert!(!missing.is_retryable());
        assert!(ConsolidationError::Vanished(Uuid::new_v4()).is_retryable());
        assert!(!ConsolidationError::Cancelled.is_retryable());
    }
}
