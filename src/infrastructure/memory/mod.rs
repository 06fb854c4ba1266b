//! In-memory `ReasonSlotRepository`, for tests, demos and scenario runs.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::models::{timeline, MachineId, ReasonSlot, TimeRange};
use crate::domain::ports::{ReasonSlotRepository, RepositoryError, RepositoryResult};

type Timeline = BTreeMap<DateTime<Utc>, ReasonSlot>;

#[derive(Debug, Default)]
struct Slots {
    machines: HashMap<MachineId, Timeline>,
    /// slot id -> (machine, start)
    index: HashMap<Uuid, (MachineId, DateTime<Utc>)>,
}

impl Slots {
    fn get(&self, id: Uuid) -> Option<&ReasonSlot> {
        let (machine_id, start) = self.index.get(&id)?;
        self.machines.get(machine_id)?.get(start)
    }

    fn overlapping(&self, machine_id: MachineId, range: &TimeRange) -> Vec<&ReasonSlot> {
        let Some(timeline) = self.machines.get(&machine_id) else {
            return vec![];
        };
        // At most one slot starting before the range can reach into it
        let from = timeline
            .range(..=range.lower())
            .next_back()
            .map_or(range.lower(), |(start, _)| *start);
        timeline
            .range(from..range.upper())
            .map(|(_, slot)| slot)
            .filter(|slot| slot.range.overlaps(range))
            .collect()
    }

    fn check_version(&self, slot: &ReasonSlot) -> RepositoryResult<()> {
        match self.get(slot.id).map(|s| s.version) {
            Some(found) if found == slot.version => Ok(()),
            found => Err(RepositoryError::StaleSlot {
                id: slot.id,
                expected: slot.version,
                found: found.unwrap_or(0),
            }),
        }
    }

    fn remove(&mut self, id: Uuid) -> Option<ReasonSlot> {
        let (machine_id, start) = self.index.remove(&id)?;
        let timeline = self.machines.get_mut(&machine_id)?;
        let removed = timeline.remove(&start);
        if timeline.is_empty() {
            self.machines.remove(&machine_id);
        }
        removed
    }

    fn put(&mut self, slot: ReasonSlot) {
        self.index
            .insert(slot.id, (slot.machine_id, slot.range.lower()));
        self.machines
            .entry(slot.machine_id)
            .or_default()
            .insert(slot.range.lower(), slot);
    }
}

/// Slots kept per machine in a map ordered by start.
#[derive(Debug, Default)]
pub struct InMemorySlotRepository {
    slots: RwLock<Slots>,
}

impl InMemorySlotRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.slots.read().await.index.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ReasonSlotRepository for InMemorySlotRepository {
    async fn insert(&self, slot: &ReasonSlot) -> RepositoryResult<ReasonSlot> {
        let mut slots = self.slots.write().await;
        if slots.index.contains_key(&slot.id) {
            return Err(RepositoryError::InvalidData(format!(
                "slot {} is already stored",
                slot.id
            )));
        }
        let overlapping = slots.overlapping(slot.machine_id, &slot.range).len();
        if overlapping > 0 {
            return Err(RepositoryError::PartitionViolation {
                machine_id: slot.machine_id,
                detail: format!("{} overlaps {overlapping} stored slot(s)", slot.range),
            });
        }

        let stored = ReasonSlot {
            version: 1,
            ..slot.clone()
        };
        slots.put(stored.clone());
        Ok(stored)
    }

    async fn get(&self, id: Uuid) -> RepositoryResult<Option<ReasonSlot>> {
        Ok(self.slots.read().await.get(id).cloned())
    }

    async fn find_at(
        &self,
        machine_id: MachineId,
        at: DateTime<Utc>,
    ) -> RepositoryResult<Option<ReasonSlot>> {
        let slots = self.slots.read().await;
        Ok(slots.machines.get(&machine_id).and_then(|timeline| {
            timeline
                .range(..=at)
                .next_back()
                .map(|(_, slot)| slot)
                .filter(|slot| slot.range.contains(at))
                .cloned()
        }))
    }

    async fn find_in_range(
        &self,
        machine_id: MachineId,
        range: &TimeRange,
    ) -> RepositoryResult<Vec<ReasonSlot>> {
        let slots = self.slots.read().await;
        Ok(slots
            .overlapping(machine_id, range)
            .into_iter()
            .cloned()
            .collect())
    }

    async fn find_all(&self, machine_id: MachineId) -> RepositoryResult<Vec<ReasonSlot>> {
        let slots = self.slots.read().await;
        Ok(slots
            .machines
            .get(&machine_id)
            .map(|timeline| timeline.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn find_ending_at(
        &self,
        machine_id: MachineId,
        at: DateTime<Utc>,
    ) -> RepositoryResult<Option<ReasonSlot>> {
        let slots = self.slots.read().await;
        Ok(slots.machines.get(&machine_id).and_then(|timeline| {
            timeline
                .range(..at)
                .next_back()
                .map(|(_, slot)| slot)
                .filter(|slot| slot.range.upper() == at)
                .cloned()
        }))
    }

    async fn find_starting_at(
        &self,
        machine_id: MachineId,
        at: DateTime<Utc>,
    ) -> RepositoryResult<Option<ReasonSlot>> {
        let slots = self.slots.read().await;
        Ok(slots
            .machines
            .get(&machine_id)
            .and_then(|timeline| timeline.get(&at))
            .cloned())
    }

    async fn replace(
        &self,
        original: &ReasonSlot,
        mut replacements: Vec<ReasonSlot>,
    ) -> RepositoryResult<Vec<ReasonSlot>> {
        replacements.sort_by_key(|s| s.range.lower());
        timeline::check_tiles(original.machine_id, &original.range, &replacements)?;

        let mut slots = self.slots.write().await;
        slots.check_version(original)?;
        slots.remove(original.id);

        for slot in &mut replacements {
            slot.version = if slot.id == original.id {
                original.version + 1
            } else {
                1
            };
            slots.put(slot.clone());
        }
        Ok(replacements)
    }

    async fn merge(&self, first: &ReasonSlot, second: &ReasonSlot) -> RepositoryResult<ReasonSlot> {
        let Some(range) = first
            .range
            .span(&second.range)
            .filter(|_| first.machine_id == second.machine_id)
        else {
            return Err(RepositoryError::PartitionViolation {
                machine_id: first.machine_id,
                detail: format!("{} does not follow {}", second.range, first.range),
            });
        };

        let mut slots = self.slots.write().await;
        slots.check_version(first)?;
        slots.check_version(second)?;

        slots.remove(second.id);
        slots.remove(first.id);
        let merged = ReasonSlot {
            range,
            version: first.version + 1,
            ..first.clone()
        };
        slots.put(merged.clone());
        Ok(merged)
    }

    async fn machines(&self) -> RepositoryResult<Vec<MachineId>> {
        let slots = self.slots.read().await;
        let mut machines: Vec<_> = slots.machines.keys().copied().collect();
        machines.sort();
        Ok(machines)
    }
}
