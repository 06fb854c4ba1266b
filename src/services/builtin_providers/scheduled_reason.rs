//! Reasons tied to the time of day, such as breaks or shift handovers.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};

use crate::domain::models::{
    Machine, MachineModeId, MachineObservationStateId, Modification, PossibleReason, ReasonSlot,
    ReasonSlotChange, ReasonSource, RequiredResetKind, ScheduledWindowConfig, TimeRange, NO_SCORE,
};
use crate::domain::ports::{ProviderCache, ProviderResult, ReasonProvider};

pub const NAME: &str = "scheduled_reason";

/// Occurrences of a daily window overlapping `range`, clipped to it.
fn occurrences(window: &ScheduledWindowConfig, range: &TimeRange) -> Vec<TimeRange> {
    let last = range.upper().date_naive();
    let mut day = range.lower().date_naive() - Duration::days(1);
    let mut found = Vec::new();

    while day <= last {
        if let Some(occurrence) = occurrence_on(window, day) {
            if let Some(overlap) = occurrence.intersection(range) {
                found.push(overlap);
            }
        }
        match day.succ_opt() {
            Some(next) => day = next,
            None => break,
        }
    }
    found
}

/// The occurrence starting on `day`; a window not ending after its start
/// ends the next day.
fn occurrence_on(window: &ScheduledWindowConfig, day: NaiveDate) -> Option<TimeRange> {
    let end_day = if window.end <= window.start {
        day + Duration::days(1)
    } else {
        day
    };
    TimeRange::new(
        Utc.from_utc_datetime(&day.and_time(window.start)),
        Utc.from_utc_datetime(&end_day.and_time(window.end)),
    )
    .ok()
}

/// Proposes the reason of each daily window for the part of a slot it
/// covers, and narrows slots so that none straddles a window boundary.
pub struct ScheduledReasonProvider {
    windows: Arc<Vec<ScheduledWindowConfig>>,
    priority: i32,
}

impl ScheduledReasonProvider {
    pub fn new(windows: Arc<Vec<ScheduledWindowConfig>>) -> Self {
        Self {
            windows,
            priority: 0,
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    fn for_mode(
        &self,
        machine_mode: MachineModeId,
    ) -> impl Iterator<Item = &ScheduledWindowConfig> {
        self.windows
            .iter()
            .filter(move |w| {
                w.machine_modes.is_empty() || w.machine_modes.contains(&machine_mode)
            })
    }

    fn candidate(window: &ScheduledWindowConfig) -> PossibleReason {
        PossibleReason::new(window.reason, window.score, ReasonSource::Auto)
            .with_overwrite_required(window.overwrite_required)
            .with_details(window.name.clone())
    }

    /// First window boundary strictly inside `range`.
    fn next_boundary(
        &self,
        range: &TimeRange,
        machine_mode: MachineModeId,
    ) -> Option<DateTime<Utc>> {
        self.for_mode(machine_mode)
            .flat_map(|w| occurrences(w, range))
            .flat_map(|o| [o.lower(), o.upper()])
            .filter(|b| range.lower() < *b && *b < range.upper())
            .min()
    }
}

impl ReasonProvider for ScheduledReasonProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn initialize(&mut self, _machine: &Machine) -> ProviderResult<bool> {
        Ok(!self.windows.is_empty())
    }

    fn maximum_score(
        &self,
        slot: &ReasonSlot,
        _cache: &ProviderCache,
    ) -> ProviderResult<Option<f64>> {
        Ok(Some(
            self.for_mode(slot.machine_mode)
                .filter(|w| !occurrences(w, &slot.range).is_empty())
                .map(|w| w.score)
                .fold(NO_SCORE, f64::max),
        ))
    }

    fn may_apply_auto_reasons(
        &self,
        slot: &ReasonSlot,
        _cache: &ProviderCache,
    ) -> ProviderResult<bool> {
        Ok(self
            .for_mode(slot.machine_mode)
            .any(|w| !occurrences(w, &slot.range).is_empty()))
    }

    fn required_reset_kind(
        &self,
        _old_slot: Option<&ReasonSlot>,
        _new_slot: &ReasonSlot,
        _modification: Option<&Modification>,
        change: ReasonSlotChange,
        _cache: &ProviderCache,
    ) -> ProviderResult<RequiredResetKind> {
        let mut kind = RequiredResetKind::NONE;
        if change.intersects(ReasonSlotChange::PERIOD | ReasonSlotChange::NEW_ACTIVITY) {
            kind |= RequiredResetKind::MAIN | RequiredResetKind::EXTRA_AUTO;
        }
        if change.has_flag(ReasonSlotChange::MACHINE_MODE) {
            kind |= RequiredResetKind::MAIN;
        }
        Ok(kind)
    }

    fn try_reset_reason(
        &self,
        slot: &ReasonSlot,
        _cache: &ProviderCache,
    ) -> ProviderResult<ReasonSlot> {
        let mut narrowed = slot.clone();
        if let Some(boundary) = self.next_boundary(&slot.range, slot.machine_mode) {
            if let Some((before, _)) = slot.range.split_at(boundary) {
                narrowed.range = before;
            }
        }
        Ok(narrowed)
    }

    fn try_get_active_at(
        &self,
        at: DateTime<Utc>,
        machine_mode: MachineModeId,
        _machine_observation_state: MachineObservationStateId,
        _auto_manual_only: bool,
        _cache: &ProviderCache,
    ) -> ProviderResult<Vec<PossibleReason>> {
        let Ok(instant) = TimeRange::starting_at(at, Duration::milliseconds(1)) else {
            return Ok(vec![]);
        };
        Ok(self
            .for_mode(machine_mode)
            .filter(|w| !occurrences(w, &instant).is_empty())
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
            .for_mode(machine_mode)
            .flat_map(|w| {
                occurrences(w, range)
                    .into_iter()
                    .map(move |o| Self::candidate(w).restricted_to_range(o))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{MachineId, ReasonId};
    use chrono::NaiveTime;

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, hour, minute, 0).unwrap()
    }

    fn window(name: &str, start: (u32, u32), end: (u32, u32)) -> ScheduledWindowConfig {
        ScheduledWindowConfig {
            name: name.to_string(),
            start: NaiveTime::from_hms_opt(start.0, start.1, 0).unwrap(),
            end: NaiveTime::from_hms_opt(end.0, end.1, 0).unwrap(),
            reason: ReasonId(40),
            score: 30.0,
            machine_modes: vec![],
            overwrite_required: false,
        }
    }

    fn provider(windows: Vec<ScheduledWindowConfig>) -> ScheduledReasonProvider {
        ScheduledReasonProvider::new(Arc::new(windows))
    }

    fn slot(from: DateTime<Utc>, to: DateTime<Utc>) -> ReasonSlot {
        ReasonSlot::new(
            MachineId(1),
            TimeRange::new(from, to).unwrap(),
            MachineModeId(1),
            MachineObservationStateId(1),
        )
    }

    #[test]
    fn test_occurrences_cross_midnight() {
        let night = window("night", (22, 0), (6, 0));
        let range = TimeRange::new(at(4, 0, 0), at(5, 0, 0)).unwrap();
        let found = occurrences(&night, &range);
        assert_eq!(
            found,
            vec![
                TimeRange::new(at(4, 0, 0), at(4, 6, 0)).unwrap(),
                TimeRange::new(at(4, 22, 0), at(5, 0, 0)).unwrap(),
            ]
        );
    }

    #[test]
    fn test_narrows_at_next_boundary() {
        let p = provider(vec![window("break", (10, 0), (10, 15))]);
        let cache = ProviderCache::default();

        let s = slot(at(4, 8, 0), at(4, 12, 0));
        let first = p.try_reset_reason(&s, &cache).unwrap();
        assert_eq!(first.id, s.id);
        assert_eq!(first.range, TimeRange::new(at(4, 8, 0), at(4, 10, 0)).unwrap());

        let inside = slot(at(4, 10, 0), at(4, 12, 0));
        let second = p.try_reset_reason(&inside, &cache).unwrap();
        assert_eq!(second.range, TimeRange::new(at(4, 10, 0), at(4, 10, 15)).unwrap());

        let after = slot(at(4, 10, 15), at(4, 12, 0));
        assert_eq!(p.try_reset_reason(&after, &cache).unwrap().range, after.range);
    }

    #[test]
    fn test_candidates_per_occurrence() {
        let mut lunch = window("lunch", (12, 0), (12, 30));
        lunch.machine_modes = vec![MachineModeId(1)];
        let p = provider(vec![lunch]);
        let cache = ProviderCache::default();
        let range = TimeRange::new(at(4, 11, 0), at(5, 13, 0)).unwrap();

        let candidates = p
            .try_get_active_during(
                &range,
                MachineModeId(1),
                MachineObservationStateId(1),
                false,
                &cache,
            )
            .unwrap();
        assert_eq!(candidates.len(), 2);
        assert!(candidates.iter().all(|c| c.source == ReasonSource::Auto));
        assert_eq!(candidates[0].details.as_deref(), Some("lunch"));

        let other_mode = p
            .try_get_active_during(
                &range,
                MachineModeId(2),
                MachineObservationStateId(1),
                false,
                &cache,
            )
            .unwrap();
        assert!(other_mode.is_empty());
    }

    #[test]
    fn test_maximum_score_outside_windows() {
        let p = provider(vec![window("break", (10, 0), (10, 15))]);
        let cache = ProviderCache::default();
        let quiet = slot(at(4, 8, 0), at(4, 9, 0));
        assert_eq!(p.maximum_score(&quiet, &cache).unwrap(), Some(NO_SCORE));
        assert!(!p.may_apply_auto_reasons(&quiet, &cache).unwrap());
        let busy = slot(at(4, 9, 0), at(4, 11, 0));
        assert_eq!(p.maximum_score(&busy, &cache).unwrap(), Some(30.0));
    }
}
