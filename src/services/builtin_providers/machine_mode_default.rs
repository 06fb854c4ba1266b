//! Default reasons keyed by machine mode, observation state and slot
//! duration.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::domain::models::{
    Machine, MachineModeDefaultEntry, MachineModeId, MachineObservationStateId, Modification,
    PossibleReason, ReasonId, ReasonSlot, ReasonSlotChange, ReasonSource, RequiredResetKind,
    TimeRange, NO_SCORE, SCORE_EPSILON,
};
use crate::domain::ports::{ProviderCache, ProviderResult, ReasonProvider};

pub const NAME: &str = "machine_mode_default";

const MODE_CHANGES: ReasonSlotChange = ReasonSlotChange::NEW_ACTIVITY
    .add(ReasonSlotChange::MACHINE_MODE)
    .add(ReasonSlotChange::MACHINE_OBSERVATION_STATE);

/// Proposes the configured default reason of a slot's machine mode.
///
/// An entry bound to an observation state takes precedence over the
/// entries of the same mode that accept any state. Among those, a slot gets
/// the entry with the smallest `maximum_duration_secs` it fits in, or the
/// unbounded entry when it is longer than all of them: a stop of a few
/// seconds can be a micro stop while a long one is an unplanned stop.
pub struct MachineModeDefaultProvider {
    entries: Arc<Vec<MachineModeDefaultEntry>>,
    priority: i32,
}

impl MachineModeDefaultProvider {
    pub fn new(entries: Arc<Vec<MachineModeDefaultEntry>>) -> Self {
        Self {
            entries,
            priority: 0,
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Entries for a mode and state, shortest maximum duration first and
    /// the unbounded entry last.
    fn matching(
        &self,
        machine_mode: MachineModeId,
        machine_observation_state: MachineObservationStateId,
    ) -> Vec<&MachineModeDefaultEntry> {
        let of_mode = self
            .entries
            .iter()
            .filter(|e| e.machine_mode == machine_mode);
        let specific: Vec<_> = of_mode
            .clone()
            .filter(|e| e.machine_observation_state == Some(machine_observation_state))
            .collect();
        let mut found = if specific.is_empty() {
            of_mode
                .filter(|e| e.machine_observation_state.is_none())
                .collect()
        } else {
            specific
        };
        found.sort_by_key(|e| e.maximum_duration_secs.unwrap_or(u64::MAX));
        found
    }

    /// The entry applying to a slot lasting `duration`.
    fn select(
        &self,
        duration: Duration,
        machine_mode: MachineModeId,
        machine_observation_state: MachineObservationStateId,
    ) -> Option<&MachineModeDefaultEntry> {
        self.matching(machine_mode, machine_observation_state)
            .into_iter()
            .find(|e| e.accepts(duration))
    }

    /// Whether some bounded entry accepts exactly one of the two durations.
    fn crosses_threshold(
        &self,
        before: Duration,
        after: Duration,
        machine_mode: MachineModeId,
        machine_observation_state: MachineObservationStateId,
    ) -> bool {
        self.matching(machine_mode, machine_observation_state)
            .iter()
            .filter(|e| e.maximum_duration_secs.is_some())
            .any(|e| e.accepts(before) != e.accepts(after))
    }

    fn candidate(
        entry: &MachineModeDefaultEntry,
        machine_mode: MachineModeId,
        machine_observation_state: MachineObservationStateId,
    ) -> PossibleReason {
        let source = if entry.auto {
            ReasonSource::Auto
        } else {
            ReasonSource::Default
        };
        PossibleReason::new(entry.reason, entry.score, source)
            .with_overwrite_required(entry.overwrite_required)
            .restricted_to_mode(machine_mode, machine_observation_state)
    }
}

impl ReasonProvider for MachineModeDefaultProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn initialize(&mut self, _machine: &Machine) -> ProviderResult<bool> {
        Ok(!self.entries.is_empty())
    }

    fn maximum_score(
        &self,
        slot: &ReasonSlot,
        _cache: &ProviderCache,
    ) -> ProviderResult<Option<f64>> {
        Ok(Some(
            self.matching(slot.machine_mode, slot.machine_observation_state)
                .iter()
                .map(|e| e.score)
                .fold(NO_SCORE, f64::max),
        ))
    }

    fn may_apply_auto_reasons(
        &self,
        slot: &ReasonSlot,
        _cache: &ProviderCache,
    ) -> ProviderResult<bool> {
        Ok(self
            .matching(slot.machine_mode, slot.machine_observation_state)
            .iter()
            .any(|e| e.auto))
    }

    fn required_reset_kind(
        &self,
        old_slot: Option<&ReasonSlot>,
        new_slot: &ReasonSlot,
        _modification: Option<&Modification>,
        change: ReasonSlotChange,
        _cache: &ProviderCache,
    ) -> ProviderResult<RequiredResetKind> {
        if change.intersects(MODE_CHANGES) {
            return Ok(RequiredResetKind::MAIN);
        }
        if !change.has_flag(ReasonSlotChange::PERIOD)
            || new_slot.reason_source != ReasonSource::Default
        {
            return Ok(RequiredResetKind::NONE);
        }

        let (mode, state) = (new_slot.machine_mode, new_slot.machine_observation_state);
        let duration = new_slot.range.duration();
        let crossed = old_slot.is_some_and(|old| {
            self.crosses_threshold(old.range.duration(), duration, mode, state)
        });
        let outdated = new_slot.reason.is_some_and(|reason| {
            !self.select(duration, mode, state).is_some_and(|e| {
                e.reason == reason && (e.score - new_slot.reason_score).abs() < SCORE_EPSILON
            })
        });

        if crossed || outdated {
            debug!(
                range = %new_slot.range,
                crossed,
                outdated,
                "Slot duration changed its default reason"
            );
            Ok(RequiredResetKind::MAIN)
        } else {
            Ok(RequiredResetKind::NONE)
        }
    }

    /// Without a slot there is no duration, so only the unbounded entry
    /// applies.
    fn try_get_active_at(
        &self,
        _at: DateTime<Utc>,
        machine_mode: MachineModeId,
        machine_observation_state: MachineObservationStateId,
        auto_manual_only: bool,
        _cache: &ProviderCache,
    ) -> ProviderResult<Vec<PossibleReason>> {
        Ok(self
            .matching(machine_mode, machine_observation_state)
            .into_iter()
            .filter(|e| e.maximum_duration_secs.is_none())
            .filter(|e| e.auto || !auto_manual_only)
            .map(|e| Self::candidate(e, machine_mode, machine_observation_state))
            .collect())
    }

    fn try_get_active_during(
        &self,
        range: &TimeRange,
        machine_mode: MachineModeId,
        machine_observation_state: MachineObservationStateId,
        auto_manual_only: bool,
        _cache: &ProviderCache,
    ) -> ProviderResult<Vec<PossibleReason>> {
        Ok(self
            .select(range.duration(), machine_mode, machine_observation_state)
            .filter(|e| e.auto || !auto_manual_only)
            .map(|e| Self::candidate(e, machine_mode, machine_observation_state))
            .into_iter()
            .collect())
    }

    fn is_compatible(
        &self,
        range: &TimeRange,
        machine_mode: MachineModeId,
        machine_observation_state: MachineObservationStateId,
        reason: ReasonId,
        _score: f64,
        source: ReasonSource,
        _cache: &ProviderCache,
    ) -> ProviderResult<bool> {
        if source != ReasonSource::Default {
            return Ok(true);
        }
        Ok(self
            .select(range.duration(), machine_mode, machine_observation_state)
            .is_some_and(|e| e.reason == reason))
    }
}
