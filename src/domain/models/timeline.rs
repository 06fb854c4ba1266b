//! Interval-partition helpers over a machine's reason slots.

use super::range::TimeRange;
use super::slot::{MachineId, ReasonSlot};
use crate::domain::errors::{DomainError, DomainResult};

/// Check that `slots`, sorted by start, belong to one machine and tile a
/// contiguous range without gaps or overlaps. Returns the covered range.
pub fn check_partition(
    machine_id: MachineId,
    slots: &[ReasonSlot],
) -> DomainResult<Option<TimeRange>> {
    let mut covered: Option<TimeRange> = None;

    for slot in slots {
        if slot.machine_id != machine_id {
            return Err(DomainError::PartitionViolation {
                machine_id,
                detail: format!("slot {} belongs to machine {}", slot.id, slot.machine_id),
            });
        }
        covered = match covered {
            None => Some(slot.range),
            Some(range) if range.meets(&slot.range) => range.span(&slot.range),
            Some(range) if range.upper() < slot.range.lower() => {
                return Err(DomainError::PartitionViolation {
                    machine_id,
                    detail: format!("gap between {} and {}", range.upper(), slot.range.lower()),
                })
            }
            Some(range) => {
                return Err(DomainError::PartitionViolation {
                    machine_id,
                    detail: format!("slot {} overlaps {}", slot.range, range),
                })
            }
        };
    }

    Ok(covered)
}

/// Check that `replacements` tile exactly `range`.
pub fn check_tiles(
    machine_id: MachineId,
    range: &TimeRange,
    replacements: &[ReasonSlot],
) -> DomainResult<()> {
    match check_partition(machine_id, replacements)? {
        Some(covered) if covered == *range => Ok(()),
        Some(covered) => Err(DomainError::PartitionViolation {
            machine_id,
            detail: format!("replacements cover {covered} instead of {range}"),
        }),
        None => Err(DomainError::PartitionViolation {
            machine_id,
            detail: format!("no replacement for {range}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::reason::{ReasonId, ReasonSource};
    use crate::domain::models::slot::{MachineModeId, MachineObservationStateId, MainAssignment};
    use chrono::{Duration, TimeZone, Utc};
    use std::collections::BTreeMap;

    fn range(a: i64, b: i64) -> TimeRange {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        TimeRange::new(base + Duration::minutes(a), base + Duration::minutes(b)).unwrap()
    }

    fn slot(a: i64, b: i64, reason: Option<u32>) -> ReasonSlot {
        let slot = ReasonSlot::new(
            MachineId(1),
            range(a, b),
            MachineModeId(1),
            MachineObservationStateId(1),
        );
        match reason {
            Some(r) => slot.with_main(MainAssignment {
                reason: ReasonId(r),
                details: None,
                score: 10.0,
                source: ReasonSource::Auto,
                overwrite_required: false,
                data: BTreeMap::new(),
            }),
            None => slot,
        }
    }

    #[test]
    fn test_partition_ok() {
        let slots = vec![slot(0, 10, None), slot(10, 30, Some(1)), slot(30, 31, None)];
        assert_eq!(check_partition(MachineId(1), &slots).unwrap(), Some(range(0, 31)));
        assert_eq!(check_partition(MachineId(1), &[]).unwrap(), None);
    }

    #[test]
    fn test_partition_gap_and_overlap() {
        let gap = vec![slot(0, 10, None), slot(11, 20, None)];
        assert!(check_partition(MachineId(1), &gap).is_err());
        let overlap = vec![slot(0, 10, None), slot(5, 20, None)];
        assert!(check_partition(MachineId(1), &overlap).is_err());
        assert!(check_partition(MachineId(2), &[slot(0, 10, None)]).is_err());
    }

    #[test]
    fn test_check_tiles() {
        let pieces = vec![slot(0, 50, Some(1)), slot(50, 100, Some(2))];
        assert!(check_tiles(MachineId(1), &range(0, 100), &pieces).is_ok());
        assert!(check_tiles(MachineId(1), &range(0, 120), &pieces).is_err());
        assert!(check_tiles(MachineId(1), &range(0, 100), &[]).is_err());
    }
}
