//! Manual reasons entered by operators.

use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::models::{
    Machine, MachineId, MachineModeId, MachineObservationStateId, Modification, ModificationKind,
    PossibleReason, ReasonId, ReasonSlot, ReasonSlotChange, ReasonSource, RequiredResetKind,
    TimeRange, NO_SCORE,
};
use crate::domain::ports::{cached, ProviderCache, ProviderResult, ReasonProvider};

pub const NAME: &str = "manual_reason";

/// A manual reason associated with a period of a machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualReason {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub machine_id: MachineId,
    pub range: TimeRange,
    pub reason: ReasonId,
    #[serde(default)]
    pub details: Option<String>,
    /// Overrides the engine's manual score
    #[serde(default)]
    pub score: Option<f64>,
}

impl ManualReason {
    pub fn new(machine_id: MachineId, range: TimeRange, reason: ReasonId) -> Self {
        Self {
            id: Uuid::new_v4(),
            machine_id,
            range,
            reason,
            details: None,
            score: None,
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    #[must_use]
    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }
}

/// In-process store of manual reason associations.
///
/// A new association replaces whatever part of older ones it overlaps on
/// the same machine.
#[derive(Debug, Clone, Default)]
pub struct ManualReasonStore {
    entries: Arc<RwLock<Vec<ManualReason>>>,
}

impl ManualReasonStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, manual: ManualReason) -> Uuid {
        let id = manual.id;
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let previous = std::mem::take(&mut *entries);
        for old in previous {
            if old.machine_id != manual.machine_id || !old.range.overlaps(&manual.range) {
                entries.push(old);
                continue;
            }
            for rest in old.range.difference(&manual.range) {
                entries.push(ManualReason {
                    id: Uuid::new_v4(),
                    range: rest,
                    ..old.clone()
                });
            }
        }
        entries.push(manual);
        id
    }

    pub fn remove(&self, id: Uuid) -> Option<ManualReason> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let position = entries.iter().position(|e| e.id == id)?;
        Some(entries.remove(position))
    }

    /// Associations of `machine_id` overlapping `range`, by start.
    pub fn overlapping(&self, machine_id: MachineId, range: &TimeRange) -> Vec<ManualReason> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut found: Vec<ManualReason> = entries
            .iter()
            .filter(|e| e.machine_id == machine_id && e.range.overlaps(range))
            .cloned()
            .collect();
        found.sort_by_key(|e| e.range.lower());
        found
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Batch snapshot of the associations overlapping the batch range.
struct Preloaded {
    range: TimeRange,
    entries: Vec<ManualReason>,
}

/// Proposes manual reasons, restricted to their overlap with the slot.
pub struct ManualReasonProvider {
    store: ManualReasonStore,
    machine_id: Option<MachineId>,
    manual_score: f64,
    priority: i32,
}

impl ManualReasonProvider {
    pub fn new(store: ManualReasonStore, manual_score: f64) -> Self {
        Self {
            store,
            machine_id: None,
            manual_score,
            priority: 0,
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    fn overlapping(
        &self,
        range: &TimeRange,
        cache: &ProviderCache,
    ) -> ProviderResult<Vec<ManualReason>> {
        let Some(machine_id) = self.machine_id else {
            return Ok(vec![]);
        };
        if let Some(preloaded) = cached::<Preloaded>(NAME, cache)? {
            if preloaded.range.contains_range(range) {
                return Ok(preloaded
                    .entries
                    .iter()
                    .filter(|e| e.range.overlaps(range))
                    .cloned()
                    .collect());
            }
        }
        Ok(self.store.overlapping(machine_id, range))
    }

    fn score(&self, manual: &ManualReason) -> f64 {
        manual.score.unwrap_or(self.manual_score)
    }

    fn candidate(&self, manual: &ManualReason) -> PossibleReason {
        let candidate = PossibleReason::new(manual.reason, self.score(manual), ReasonSource::Manual)
            .with_data("manual_reason_id", serde_json::Value::String(manual.id.to_string()));
        match &manual.details {
            Some(details) => candidate.with_details(details.clone()),
            None => candidate,
        }
    }
}

impl ReasonProvider for ManualReasonProvider {
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

    fn preload(&self, range: &TimeRange, cache: &mut ProviderCache) -> ProviderResult<()> {
        if let Some(machine_id) = self.machine_id {
            cache.insert(Preloaded {
                range: *range,
                entries: self.store.overlapping(machine_id, range),
            });
        }
        Ok(())
    }

    fn maximum_score(
        &self,
        slot: &ReasonSlot,
        cache: &ProviderCache,
    ) -> ProviderResult<Option<f64>> {
        Ok(Some(
            self.overlapping(&slot.range, cache)?
                .iter()
                .map(|m| self.score(m))
                .fold(NO_SCORE, f64::max),
        ))
    }

    fn may_apply_manual_reasons(
        &self,
        slot: &ReasonSlot,
        cache: &ProviderCache,
    ) -> ProviderResult<bool> {
        Ok(!self.overlapping(&slot.range, cache)?.is_empty())
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
            kind |= RequiredResetKind::EXTRA_MANUAL;
        }
        let touches_slot = modification.is_some_and(|m| {
            m.kind == ModificationKind::ManualReason
                && m.range.map_or(true, |r| r.overlaps(&new_slot.range))
        });
        if touches_slot {
            kind |= RequiredResetKind::MAIN | RequiredResetKind::EXTRA_MANUAL;
        }
        Ok(kind)
    }

    fn try_get_active_at(
        &self,
        at: DateTime<Utc>,
        _machine_mode: MachineModeId,
        _machine_observation_state: MachineObservationStateId,
        _auto_manual_only: bool,
        _cache: &ProviderCache,
    ) -> ProviderResult<Vec<PossibleReason>> {
        let Some(machine_id) = self.machine_id else {
            return Ok(vec![]);
        };
        let Ok(instant) = TimeRange::starting_at(at, chrono::Duration::milliseconds(1)) else {
            return Ok(vec![]);
        };
        Ok(self
            .store
            .overlapping(machine_id, &instant)
            .iter()
            .map(|m| self.candidate(m))
            .collect())
    }

    fn try_get_active_during(
        &self,
        range: &TimeRange,
        _machine_mode: MachineModeId,
        _machine_observation_state: MachineObservationStateId,
        _auto_manual_only: bool,
        cache: &ProviderCache,
    ) -> ProviderResult<Vec<PossibleReason>> {
        Ok(self
            .overlapping(range, cache)?
            .iter()
            .filter_map(|m| {
                let overlap = m.range.intersection(range)?;
                Some(self.candidate(m).restricted_to_range(overlap))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Restriction;
    use chrono::{Duration, TimeZone};

    fn range(from_hour: u32, to_hour: u32) -> TimeRange {
        let day = Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap();
        TimeRange::new(
            day + Duration::hours(i64::from(from_hour)),
            day + Duration::hours(i64::from(to_hour)),
        )
        .unwrap()
    }

    fn active(store: &ManualReasonStore) -> ManualReasonProvider {
        let mut provider = ManualReasonProvider::new(store.clone(), 100.0);
        assert!(provider.initialize(&Machine::new(1, "press")).unwrap());
        provider
    }

    #[test]
    fn test_new_association_replaces_overlap() {
        let store = ManualReasonStore::new();
        store.add(ManualReason::new(MachineId(1), range(8, 12), ReasonId(1)));
        store.add(ManualReason::new(MachineId(1), range(9, 10), ReasonId(2)));
        store.add(ManualReason::new(MachineId(2), range(9, 10), ReasonId(3)));

        let found = store.overlapping(MachineId(1), &range(0, 24));
        let summary: Vec<(TimeRange, u32)> = found.iter().map(|m| (m.range, m.reason.0)).collect();
        assert_eq!(
            summary,
            vec![(range(8, 9), 1), (range(9, 10), 2), (range(10, 12), 1)]
        );
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn test_candidates_restricted_to_overlap() {
        let store = ManualReasonStore::new();
        store.add(
            ManualReason::new(MachineId(1), range(9, 11), ReasonId(5))
                .with_details("tool change")
                .with_score(80.0),
        );
        let provider = active(&store);
        let cache = ProviderCache::default();
        let slot_range = range(8, 10);

        let candidates = provider
            .try_get_active_during(
                &slot_range,
                MachineModeId(1),
                MachineObservationStateId(1),
                false,
                &cache,
            )
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].source, ReasonSource::Manual);
        assert_eq!(candidates[0].score, 80.0);
        assert_eq!(candidates[0].details.as_deref(), Some("tool change"));
        assert_eq!(
            candidates[0].restriction,
            Restriction::Range {
                range: range(9, 10)
            }
        );
    }

    #[test]
    fn test_gate_and_silence() {
        let store = ManualReasonStore::new();
        store.add(ManualReason::new(MachineId(1), range(9, 11), ReasonId(5)));
        let provider = active(&store);
        let cache = ProviderCache::default();
        let busy = ReasonSlot::new(
            MachineId(1),
            range(10, 12),
            MachineModeId(1),
            MachineObservationStateId(1),
        );
        let quiet = ReasonSlot::new(
            MachineId(1),
            range(12, 13),
            MachineModeId(1),
            MachineObservationStateId(1),
        );

        assert!(provider.may_apply_manual_reasons(&busy, &cache).unwrap());
        assert_eq!(provider.maximum_score(&busy, &cache).unwrap(), Some(100.0));
        assert!(!provider.may_apply_manual_reasons(&quiet, &cache).unwrap());
        assert_eq!(provider.maximum_score(&quiet, &cache).unwrap(), Some(NO_SCORE));
    }

    #[test]
    fn test_preloaded_snapshot_is_used_inside_batch_range() {
        let store = ManualReasonStore::new();
        let provider = active(&store);
        let mut cache = ProviderCache::default();
        provider.preload(&range(0, 24), &mut cache).unwrap();

        // Added after the preload: invisible inside the batch range.
        store.add(ManualReason::new(MachineId(1), range(9, 11), ReasonId(5)));
        let candidates = provider
            .try_get_active_during(
                &range(8, 10),
                MachineModeId(1),
                MachineObservationStateId(1),
                false,
                &cache,
            )
            .unwrap();
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_reset_kinds() {
        let store = ManualReasonStore::new();
        let provider = active(&store);
        let cache = ProviderCache::default();
        let slot = ReasonSlot::new(
            MachineId(1),
            range(8, 10),
            MachineModeId(1),
            MachineObservationStateId(1),
        );
        let entered = Modification::new(ModificationKind::ManualReason).with_range(range(9, 11));

        let kind = |modification: Option<&Modification>, change| {
            provider
                .required_reset_kind(None, &slot, modification, change, &cache)
                .unwrap()
        };
        assert_eq!(
            kind(None, ReasonSlotChange::PERIOD),
            RequiredResetKind::EXTRA_MANUAL
        );
        assert_eq!(kind(None, ReasonSlotChange::MACHINE_MODE), RequiredResetKind::NONE);
        assert_eq!(
            kind(Some(&entered), ReasonSlotChange::RESET_MANUAL),
            RequiredResetKind::MAIN | RequiredResetKind::EXTRA_MANUAL
        );
    }
}
