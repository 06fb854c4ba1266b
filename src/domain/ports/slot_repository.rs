/// Reason slot repository port (trait) for dependency injection.
///
/// Defines the persistence boundary of the consolidation engine. Every
/// implementation keeps the slots of a machine an interval partition and
/// versions each stored slot for optimistic locking.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::errors::RepositoryResult;
use crate::domain::models::{MachineId, ReasonSlot, TimeRange};

/// Repository trait for reason slot persistence
#[async_trait]
pub trait ReasonSlotRepository: Send + Sync {
    /// Stores a new slot with version 1
    ///
    /// # Errors
    /// Returns error if:
    /// - The slot overlaps a stored slot of the same machine
    /// - Database connection fails
    async fn insert(&self, slot: &ReasonSlot) -> RepositoryResult<ReasonSlot>;

    /// Retrieves a slot by ID
    async fn get(&self, id: Uuid) -> RepositoryResult<Option<ReasonSlot>>;

    /// Slot of `machine_id` whose range contains `at`
    async fn find_at(
        &self,
        machine_id: MachineId,
        at: DateTime<Utc>,
    ) -> RepositoryResult<Option<ReasonSlot>>;

    /// Slots of `machine_id` overlapping `range`, ordered by start
    async fn find_in_range(
        &self,
        machine_id: MachineId,
        range: &TimeRange,
    ) -> RepositoryResult<Vec<ReasonSlot>>;

    /// Every slot of `machine_id`, ordered by start
    async fn find_all(&self, machine_id: MachineId) -> RepositoryResult<Vec<ReasonSlot>>;

    /// Slot of `machine_id` whose range ends exactly at `at`
    async fn find_ending_at(
        &self,
        machine_id: MachineId,
        at: DateTime<Utc>,
    ) -> RepositoryResult<Option<ReasonSlot>>;

    /// Slot of `machine_id` whose range starts exactly at `at`
    async fn find_starting_at(
        &self,
        machine_id: MachineId,
        at: DateTime<Utc>,
    ) -> RepositoryResult<Option<ReasonSlot>>;

    /// Atomically replaces `original` by `replacements`, which must tile its
    /// range. A replacement keeping the original id is an update and gets
    /// the next version; the others are inserted with version 1.
    ///
    /// # Errors
    /// Returns error if:
    /// - The stored version of `original` differs (`StaleSlot`)
    /// - The replacements do not tile the original range
    async fn replace(
        &self,
        original: &ReasonSlot,
        replacements: Vec<ReasonSlot>,
    ) -> RepositoryResult<Vec<ReasonSlot>>;

    /// Atomically merges two adjacent slots into `first`, extended over
    /// `second`, which is deleted.
    ///
    /// # Errors
    /// Returns error if:
    /// - Either stored version differs (`StaleSlot`)
    /// - `second` does not start where `first` ends
    async fn merge(
        &self,
        first: &ReasonSlot,
        second: &ReasonSlot,
    ) -> RepositoryResult<ReasonSlot>;

    /// Machines holding at least one slot
    async fn machines(&self) -> RepositoryResult<Vec<MachineId>>;
}
