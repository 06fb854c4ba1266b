//! Consolidation engine.
//!
//! Given a slot trigger, the engine works out which part of the slot's
//! reason assignment must be recomputed, drives the active providers,
//! ranks their candidates and produces the replacement slots, splitting the
//! slot when the winner only applies to part of it. The engine is pure and
//! synchronous; persistence belongs to the consolidation service.

use std::collections::VecDeque;
use std::fmt;

use tracing::{debug, info_span, warn};

use super::candidate_ranking::{rank, select_winner, sort_plans, ProviderPlan, RankedCandidate};
use super::provider_registry::ActiveProviders;
use crate::domain::models::{
    Applicability, EngineConfig, MainAssignment, ReasonSlot, ReasonSlotChange, ReasonSource,
    RequiredResetKind, SlotTrigger, TimeRange, SCORE_EPSILON,
};
use crate::domain::ports::{BatchContext, ReasonProvider};

/// Reset state of a pass, derived from the trigger and the providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetState {
    /// Nothing to recompute
    NoOp,
    /// Only extra layers are recomputed
    Partial(RequiredResetKind),
    /// The main reason is recomputed, with the extra layers in the set
    Full(RequiredResetKind),
}

impl ResetState {
    pub fn from_kind(kind: RequiredResetKind) -> Self {
        if kind.is_empty() {
            Self::NoOp
        } else if kind.has_flag(RequiredResetKind::MAIN) {
            Self::Full(kind)
        } else {
            Self::Partial(kind)
        }
    }

    pub fn kind(&self) -> RequiredResetKind {
        match self {
            Self::NoOp => RequiredResetKind::NONE,
            Self::Partial(kind) | Self::Full(kind) => *kind,
        }
    }

    pub const fn is_noop(&self) -> bool {
        matches!(self, Self::NoOp)
    }
}

impl fmt::Display for ResetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoOp => f.write_str("no-op"),
            Self::Partial(kind) => write!(f, "partial({kind})"),
            Self::Full(kind) => write!(f, "full({kind})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// A provider call failed; the provider was skipped
    Failed,
    /// A provider returned an invalid candidate or slot, which was discarded
    Misbehaving,
    /// A provider was not queried because it could not beat the best score
    EarlyExit,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderDiagnostic {
    pub provider: String,
    pub kind: DiagnosticKind,
    pub detail: String,
}

/// Outcome of resolving one trigger.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// The trigger slot as received
    pub original: ReasonSlot,
    /// Replacement slots tiling the original range, ordered by start
    pub slots: Vec<ReasonSlot>,
    /// Reset state of the root pass
    pub reset: ResetState,
    pub diagnostics: Vec<ProviderDiagnostic>,
    /// Number of times a slot was split or narrowed
    pub splits: usize,
}

impl Resolution {
    /// Whether the replacements differ from the original slot.
    pub fn changed(&self) -> bool {
        !matches!(self.slots.as_slice(), [only] if *only == self.original)
    }
}

/// A piece of the trigger slot waiting to be resolved.
#[derive(Debug, Clone)]
struct WorkItem {
    slot: ReasonSlot,
    /// Ranges already assigned to a restricted winner, by provider
    assigned: Vec<(usize, TimeRange)>,
}

/// The reason consolidation engine
#[derive(Debug, Clone, Default)]
pub struct ConsolidationEngine {
    config: EngineConfig,
}

impl ConsolidationEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Resolve a trigger into replacement slots.
    ///
    /// Never fails: provider errors and invalid provider output are logged
    /// and recorded as diagnostics, and a slot without a winner is left
    /// undetermined.
    pub fn resolve(
        &self,
        providers: &ActiveProviders,
        batch: &BatchContext,
        trigger: &SlotTrigger,
    ) -> Resolution {
        let original = trigger.new_slot.clone();
        let _span = info_span!(
            "consolidate",
            machine_id = %trigger.machine_id,
            range = %original.range,
            change = %trigger.change
        )
        .entered();

        let mut pass = Pass {
            engine: self,
            providers,
            batch,
            trigger,
            diagnostics: Vec::new(),
            splits: 0,
            pieces: 1,
        };

        let mut queue = VecDeque::from([WorkItem {
            slot: original.clone(),
            assigned: Vec::new(),
        }]);
        let mut root_reset = None;
        let mut slots = Vec::new();

        while let Some(item) = queue.pop_front() {
            let (slot, reset) = pass.resolve_item(item, &mut queue);
            root_reset.get_or_insert(reset);
            slots.push(slot);
        }
        slots.sort_by_key(|s| s.range.lower());

        let reset = root_reset.unwrap_or(ResetState::NoOp);
        debug!(
            reset = %reset,
            slots = slots.len(),
            splits = pass.splits,
            "Trigger resolved"
        );

        Resolution {
            original,
            slots,
            reset,
            diagnostics: pass.diagnostics,
            splits: pass.splits,
        }
    }

    /// Union of the forced and provider reset kinds for `slot`, with the
    /// main scope removed from sticky manual slots.
    pub fn required_reset_kind(
        &self,
        providers: &ActiveProviders,
        batch: &BatchContext,
        trigger: &SlotTrigger,
        slot: &ReasonSlot,
    ) -> RequiredResetKind {
        let mut kind = trigger.change.forced_reset();
        if slot.requires_main_reset() {
            kind |= RequiredResetKind::MAIN;
        }

        for (index, provider) in providers.iter() {
            if kind.is_full() {
                break;
            }
            match provider.required_reset_kind(
                trigger.old_slot.as_ref(),
                slot,
                trigger.modification.as_ref(),
                trigger.change,
                batch.cache(index),
            ) {
                Ok(provider_kind) => kind |= provider_kind,
                Err(e) => warn!(
                    provider = provider.name(),
                    error = %e,
                    "Reset kind query failed, provider ignored"
                ),
            }
        }

        if is_sticky(slot, trigger.change) {
            kind = kind.remove(RequiredResetKind::MAIN);
        }
        kind
    }

    /// Assignment the candidates must beat, or `None` when the current
    /// assignment no longer holds.
    pub fn baseline(
        &self,
        providers: &ActiveProviders,
        batch: &BatchContext,
        trigger: &SlotTrigger,
        slot: &ReasonSlot,
    ) -> Option<MainAssignment> {
        let main = slot.main()?;
        if main.score < 0.0 || trigger.change.has_flag(ReasonSlotChange::REQUESTED) {
            return None;
        }
        if main.source.is_manual() && trigger.change.has_flag(ReasonSlotChange::RESET_MANUAL) {
            return None;
        }

        let rejected_by = providers.iter().find(|(index, provider)| {
            matches!(
                provider.is_compatible(
                    &slot.range,
                    slot.machine_mode,
                    slot.machine_observation_state,
                    main.reason,
                    main.score,
                    main.source,
                    batch.cache(*index),
                ),
                Ok(false)
            )
        });
        if let Some((_, provider)) = rejected_by {
            debug!(
                provider = provider.name(),
                reason = %main.reason,
                "Current reason no longer compatible"
            );
            return None;
        }

        Some(main)
    }
}

/// Manual main reasons only move on an explicit reset.
fn is_sticky(slot: &ReasonSlot, change: ReasonSlotChange) -> bool {
    slot.reason.is_some() && slot.reason_source.is_manual() && !change.is_forcing()
}

/// State shared by the work items of one trigger.
struct Pass<'a> {
    engine: &'a ConsolidationEngine,
    providers: &'a ActiveProviders,
    batch: &'a BatchContext,
    trigger: &'a SlotTrigger,
    diagnostics: Vec<ProviderDiagnostic>,
    splits: usize,
    /// Pieces created so far, the trigger slot included
    pieces: usize,
}

impl Pass<'_> {
    fn record(&mut self, provider: &dyn ReasonProvider, kind: DiagnosticKind, detail: String) {
        match kind {
            DiagnosticKind::EarlyExit => {
                debug!(provider = provider.name(), %detail, "Provider skipped");
            }
            DiagnosticKind::Failed => {
                warn!(
                    provider = provider.name(),
                    %detail,
                    "Provider call failed, skipped for this pass"
                );
            }
            DiagnosticKind::Misbehaving => {
                warn!(provider = provider.name(), %detail, "Provider output discarded");
            }
        }
        self.diagnostics.push(ProviderDiagnostic {
            provider: provider.name().to_string(),
            kind,
            detail,
        });
    }

    fn can_split(&self) -> bool {
        self.pieces < self.engine.config.max_pieces
    }

    fn queue_piece(&mut self, queue: &mut VecDeque<WorkItem>, item: WorkItem) {
        self.pieces += 1;
        queue.push_back(item);
    }

    fn resolve_item(
        &mut self,
        item: WorkItem,
        queue: &mut VecDeque<WorkItem>,
    ) -> (ReasonSlot, ResetState) {
        let trigger = self.trigger.for_piece(item.slot.clone());
        let kind = self
            .engine
            .required_reset_kind(self.providers, self.batch, &trigger, &item.slot);
        let reset = ResetState::from_kind(kind);
        if reset.is_noop() {
            return (item.slot, reset);
        }

        let mut slot = item.slot.clone();
        let participants = self.participants(&slot);

        // Decided once per piece so candidate collection and selection agree
        let splittable = self.can_split();
        if splittable {
            slot = self.narrow(slot, &participants, &item, queue);
        } else {
            warn!(
                pieces = self.pieces,
                range = %slot.range,
                "Piece limit reached, resolving without narrowing or splitting"
            );
        }

        let baseline = if kind.has_flag(RequiredResetKind::MAIN) {
            self.engine
                .baseline(self.providers, self.batch, &trigger, &slot)
        } else {
            slot.main()
        };

        let candidates = self.collect(
            &slot,
            kind,
            baseline.as_ref(),
            &participants,
            &item,
            splittable,
        );

        let mut main = baseline.clone();
        if kind.has_flag(RequiredResetKind::MAIN) {
            let eligible = candidates.iter().filter(|c| {
                splittable || c.candidate.restricted_range().map_or(true, |r| r == slot.range)
            });
            if let Some(winner) = select_winner(eligible, baseline.as_ref(), trigger.change) {
                if let Some(range) = winner
                    .candidate
                    .restricted_range()
                    .filter(|r| *r != slot.range)
                {
                    self.split(&slot, range, winner.provider_index, &item, queue);
                    slot.range = range;
                }
                debug!(
                    reason = %winner.candidate.reason,
                    score = winner.candidate.score,
                    source = %winner.candidate.source,
                    range = %slot.range,
                    "Main reason selected"
                );
                main = Some(MainAssignment::from(&winner.candidate));
            }
            slot.set_main(main.clone());
        }

        let covering: Vec<&RankedCandidate> =
            candidates.iter().filter(|c| c.covers(&slot.range)).collect();

        if kind.has_flag(RequiredResetKind::EXTRA_AUTO) {
            let count = covering.iter().filter(|c| c.is_extra_auto()).count();
            slot.auto_reason_count = u32::try_from(count).unwrap_or(u32::MAX);
        }
        if kind.has_flag(RequiredResetKind::EXTRA_MANUAL) {
            slot.extra_manual = covering
                .iter()
                .filter(|c| c.is_extra_manual())
                .any(|c| main.as_ref().map_or(true, |m| !c.matches(m)));
        }

        (slot, reset)
    }

    /// Providers taking part in the reset of `slot`.
    fn participants(&mut self, slot: &ReasonSlot) -> Vec<usize> {
        let mut participants = Vec::with_capacity(self.providers.len());
        for (index, provider) in self.providers.iter() {
            match provider.is_reset_applicable(
                slot.reason_source,
                slot.reason_score,
                slot.auto_reason_count,
            ) {
                Ok(true) => participants.push(index),
                Ok(false) => {}
                Err(e) => self.record(provider, DiagnosticKind::Failed, e.to_string()),
            }
        }
        participants
    }

    /// Let every participant narrow the slot; the uncovered pieces are
    /// queued for their own pass.
    fn narrow(
        &mut self,
        mut slot: ReasonSlot,
        participants: &[usize],
        item: &WorkItem,
        queue: &mut VecDeque<WorkItem>,
    ) -> ReasonSlot {
        for &index in participants {
            let Some(provider) = self.providers.get(index) else {
                continue;
            };
            let narrowed = match provider.try_reset_reason(&slot, self.batch.cache(index)) {
                Ok(narrowed) => narrowed,
                Err(e) => {
                    self.record(provider, DiagnosticKind::Failed, e.to_string());
                    continue;
                }
            };
            if narrowed.range == slot.range {
                continue;
            }
            if !slot.range.contains_range(&narrowed.range) || !narrowed.same_context(&slot) {
                self.record(
                    provider,
                    DiagnosticKind::Misbehaving,
                    format!("narrowed slot {} outside {}", narrowed.range, slot.range),
                );
                continue;
            }

            debug!(
                provider = provider.name(),
                from = %slot.range,
                to = %narrowed.range,
                "Slot narrowed"
            );
            for piece in slot.range.difference(&narrowed.range) {
                let remainder = WorkItem {
                    slot: slot.narrowed(piece),
                    assigned: item.assigned.clone(),
                };
                self.queue_piece(queue, remainder);
            }
            self.splits += 1;
            slot.range = narrowed.range;
        }
        slot
    }

    /// Split `slot` around `range`, queueing the pieces before and after.
    fn split(
        &mut self,
        slot: &ReasonSlot,
        range: TimeRange,
        provider_index: usize,
        item: &WorkItem,
        queue: &mut VecDeque<WorkItem>,
    ) {
        let mut assigned = item.assigned.clone();
        assigned.push((provider_index, range));
        for piece in slot.range.difference(&range) {
            debug!(piece = %piece, "Slot split, remainder queued");
            let remainder = WorkItem {
                slot: slot.narrowed(piece),
                assigned: assigned.clone(),
            };
            self.queue_piece(queue, remainder);
        }
        self.splits += 1;
    }

    /// Plans of the participants, in consultation order.
    fn plans(&mut self, slot: &ReasonSlot, participants: &[usize]) -> Vec<ProviderPlan> {
        let mut plans = Vec::with_capacity(participants.len());
        for &index in participants {
            let Some(provider) = self.providers.get(index) else {
                continue;
            };
            let cache = self.batch.cache(index);
            let plan = provider.maximum_score(slot, cache).and_then(|maximum_score| {
                Ok(ProviderPlan {
                    index,
                    priority: provider.priority(),
                    maximum_score,
                    may_apply_auto: provider.may_apply_auto_reasons(slot, cache)?,
                    may_apply_manual: provider.may_apply_manual_reasons(slot, cache)?,
                })
            });
            match plan {
                Ok(plan) if plan.is_silent() => {}
                Ok(plan) => plans.push(plan),
                Err(e) => self.record(provider, DiagnosticKind::Failed, e.to_string()),
            }
        }
        sort_plans(&mut plans);
        plans
    }

    /// Query the providers in plan order and keep their valid candidates,
    /// ranked.
    fn collect(
        &mut self,
        slot: &ReasonSlot,
        kind: RequiredResetKind,
        baseline: Option<&MainAssignment>,
        participants: &[usize],
        item: &WorkItem,
        splittable: bool,
    ) -> Vec<RankedCandidate> {
        let main_scope = kind.has_flag(RequiredResetKind::MAIN);
        let auto_manual_only = !main_scope;
        let early_exit = self.engine.config.early_exit;
        let mut best = baseline.map_or(f64::NEG_INFINITY, |b| b.score);
        let mut candidates: Vec<RankedCandidate> = Vec::new();

        for plan in self.plans(slot, participants) {
            let Some(provider) = self.providers.get(plan.index) else {
                continue;
            };
            let needed_for_extra = (kind.has_flag(RequiredResetKind::EXTRA_AUTO)
                && plan.may_apply_auto)
                || (kind.has_flag(RequiredResetKind::EXTRA_MANUAL) && plan.may_apply_manual);
            if !needed_for_extra {
                if !main_scope {
                    continue;
                }
                if early_exit && plan.cannot_reach(best) {
                    self.record(
                        provider,
                        DiagnosticKind::EarlyExit,
                        format!("maximum score below {best}"),
                    );
                    continue;
                }
            }

            let proposed = match provider.try_get_active_during(
                &slot.range,
                slot.machine_mode,
                slot.machine_observation_state,
                auto_manual_only,
                self.batch.cache(plan.index),
            ) {
                Ok(proposed) => proposed,
                Err(e) => {
                    self.record(provider, DiagnosticKind::Failed, e.to_string());
                    continue;
                }
            };

            for candidate in proposed {
                if auto_manual_only && candidate.source == ReasonSource::Default {
                    continue;
                }
                if candidate.score.is_nan()
                    || plan
                        .maximum_score
                        .is_some_and(|max| candidate.score > max + SCORE_EPSILON)
                {
                    self.record(
                        provider,
                        DiagnosticKind::Misbehaving,
                        format!(
                            "candidate {} scores {} above its maximum",
                            candidate.reason, candidate.score
                        ),
                    );
                    continue;
                }
                match candidate.applicability(slot) {
                    Applicability::Whole | Applicability::Partial(_) => {}
                    Applicability::NotApplicable => continue,
                    Applicability::OutOfRange(range) => {
                        self.record(
                            provider,
                            DiagnosticKind::Misbehaving,
                            format!("candidate range {range} outside slot {}", slot.range),
                        );
                        continue;
                    }
                }
                if let Some(range) = candidate.restricted_range() {
                    let guarded = item.assigned.iter().any(|(index, assigned)| {
                        *index == plan.index && assigned.overlaps(&range)
                    });
                    if guarded {
                        continue;
                    }
                }

                // Past the piece limit a restricted candidate cannot win
                if splittable || candidate.restricted_range().map_or(true, |r| r == slot.range) {
                    best = best.max(candidate.score);
                }
                let sequence = candidates.len();
                candidates.push(RankedCandidate {
                    candidate,
                    provider_index: plan.index,
                    provider_priority: plan.priority,
                    auto_gated: plan.may_apply_auto,
                    manual_gated: plan.may_apply_manual,
                    sequence,
                });
            }
        }

        rank(&mut candidates);
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{
        Machine, MachineId, MachineModeId, MachineObservationStateId, Modification,
        PossibleReason, ReasonId,
    };
    use crate::domain::ports::{ProviderCache, ProviderError, ProviderResult};
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::collections::BTreeMap;

    fn t(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn range(a: i64, b: i64) -> TimeRange {
        TimeRange::new(t(a), t(b)).unwrap()
    }

    fn slot(a: i64, b: i64) -> ReasonSlot {
        ReasonSlot::new(
            MachineId(1),
            range(a, b),
            MachineModeId(1),
            MachineObservationStateId(1),
        )
    }

    /// Provider returning a fixed candidate list, clipped to the queried
    /// range for range-restricted candidates.
    struct Fixed {
        name: &'static str,
        max: Option<f64>,
        auto_gate: bool,
        reset: RequiredResetKind,
        candidates: Vec<PossibleReason>,
        fail: bool,
        clip: bool,
    }

    impl Fixed {
        fn new(name: &'static str, candidates: Vec<PossibleReason>) -> Self {
            Self {
                name,
                max: None,
                auto_gate: false,
                reset: RequiredResetKind::NONE,
                candidates,
                fail: false,
                clip: true,
            }
        }
    }

    impl ReasonProvider for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn initialize(&mut self, _machine: &Machine) -> ProviderResult<bool> {
            Ok(true)
        }

        fn maximum_score(
            &self,
            _slot: &ReasonSlot,
            _cache: &ProviderCache,
        ) -> ProviderResult<Option<f64>> {
            Ok(self.max)
        }

        fn may_apply_auto_reasons(
            &self,
            _slot: &ReasonSlot,
            _cache: &ProviderCache,
        ) -> ProviderResult<bool> {
            Ok(self.auto_gate)
        }

        fn required_reset_kind(
            &self,
            _old_slot: Option<&ReasonSlot>,
            _new_slot: &ReasonSlot,
            _modification: Option<&Modification>,
            _change: ReasonSlotChange,
            _cache: &ProviderCache,
        ) -> ProviderResult<RequiredResetKind> {
            Ok(self.reset)
        }

        fn try_get_active_at(
            &self,
            at: DateTime<Utc>,
            _machine_mode: MachineModeId,
            _machine_observation_state: MachineObservationStateId,
            _auto_manual_only: bool,
            _cache: &ProviderCache,
        ) -> ProviderResult<Vec<PossibleReason>> {
            Ok(self
                .candidates
                .iter()
                .filter(|c| c.restricted_range().map_or(true, |r| r.contains(at)))
                .cloned()
                .collect())
        }

        fn try_get_active_during(
            &self,
            range: &TimeRange,
            _machine_mode: MachineModeId,
            _machine_observation_state: MachineObservationStateId,
            _auto_manual_only: bool,
            _cache: &ProviderCache,
        ) -> ProviderResult<Vec<PossibleReason>> {
            if self.fail {
                return Err(ProviderError::unavailable(self.name, "down"));
            }
            Ok(self
                .candidates
                .iter()
                .filter_map(|c| match c.restricted_range() {
                    Some(r) if self.clip => r
                        .intersection(range)
                        .map(|clip| c.clone().restricted_to_range(clip)),
                    _ => Some(c.clone()),
                })
                .collect())
        }
    }

    fn active(providers: Vec<Fixed>) -> ActiveProviders {
        ActiveProviders::initialize(
            Machine::new(1, "m1"),
            providers
                .into_iter()
                .map(|p| Box::new(p) as Box<dyn ReasonProvider>)
                .collect(),
        )
    }

    fn resolve(providers: &ActiveProviders, trigger: &SlotTrigger) -> Resolution {
        ConsolidationEngine::default().resolve(providers, &providers.new_batch(), trigger)
    }

    fn new_activity(a: i64, b: i64) -> SlotTrigger {
        SlotTrigger::new(slot(a, b), ReasonSlotChange::NEW_ACTIVITY)
    }

    fn auto(reason: u32, score: f64) -> PossibleReason {
        PossibleReason::new(ReasonId(reason), score, ReasonSource::Auto)
    }

    fn assigned(reason: u32, score: f64, source: ReasonSource) -> MainAssignment {
        MainAssignment {
            reason: ReasonId(reason),
            details: None,
            score,
            source,
            overwrite_required: false,
            data: BTreeMap::new(),
        }
    }

    #[test]
    fn test_reset_state_from_kind() {
        assert_eq!(ResetState::from_kind(RequiredResetKind::NONE), ResetState::NoOp);
        assert!(matches!(
            ResetState::from_kind(RequiredResetKind::EXTRA_AUTO),
            ResetState::Partial(_)
        ));
        assert!(matches!(
            ResetState::from_kind(RequiredResetKind::MAIN),
            ResetState::Full(_)
        ));
    }

    #[test]
    fn test_noop_keeps_slot() {
        let providers = active(vec![Fixed::new("p", vec![auto(1, 50.0)])]);
        let current = slot(0, 10).with_main(assigned(2, 10.0, ReasonSource::Auto));
        let trigger = SlotTrigger::new(current.clone(), ReasonSlotChange::PERIOD);
        let resolution = resolve(&providers, &trigger);
        assert_eq!(resolution.reset, ResetState::NoOp);
        assert_eq!(resolution.slots, vec![current]);
        assert!(!resolution.changed());
    }

    #[test]
    fn test_overwrite_tie_splits_slot() {
        let providers = active(vec![
            Fixed::new("p1", vec![auto(1, 10.0)]),
            Fixed::new(
                "p2",
                vec![auto(2, 10.0)
                    .with_overwrite_required(true)
                    .restricted_to_range(range(50, 100))],
            ),
        ]);
        let resolution = resolve(&providers, &new_activity(0, 100));
        let result: Vec<(TimeRange, Option<ReasonId>)> =
            resolution.slots.iter().map(|s| (s.range, s.reason)).collect();
        assert_eq!(
            result,
            vec![
                (range(0, 50), Some(ReasonId(1))),
                (range(50, 100), Some(ReasonId(2))),
            ]
        );
        assert_eq!(resolution.splits, 1);
        assert!(resolution.changed());
    }

    #[test]
    fn test_manual_is_sticky() {
        let mut p = Fixed::new("p", vec![auto(7, 50.0)]);
        p.reset = RequiredResetKind::FULL;
        let providers = active(vec![p]);
        let current = slot(0, 10).with_main(assigned(3, 5.0, ReasonSource::Manual));
        let trigger = SlotTrigger::new(current, ReasonSlotChange::PERIOD);
        let resolution = resolve(&providers, &trigger);
        assert_eq!(resolution.slots[0].reason, Some(ReasonId(3)));
        assert!(matches!(resolution.reset, ResetState::Partial(_)));
    }

    #[test]
    fn test_reset_manual_replaces_manual() {
        let providers = active(vec![Fixed::new("p", vec![auto(7, 1.0)])]);
        let current = slot(0, 10).with_main(assigned(3, 5.0, ReasonSource::Manual));
        let trigger = SlotTrigger::new(current, ReasonSlotChange::RESET_MANUAL);
        let resolution = resolve(&providers, &trigger);
        assert_eq!(resolution.slots[0].reason, Some(ReasonId(7)));
    }

    #[test]
    fn test_requested_counts_auto_reasons() {
        let mut p1 = Fixed::new("p1", vec![auto(1, 10.0)]);
        p1.auto_gate = true;
        let mut p2 = Fixed::new("p2", vec![auto(2, 20.0)]);
        p2.auto_gate = true;
        let providers = active(vec![p1, p2]);
        let resolution = resolve(&providers, &SlotTrigger::requested(slot(0, 10)));
        assert_eq!(resolution.slots[0].auto_reason_count, 2);
        assert_eq!(resolution.slots[0].reason, Some(ReasonId(2)));
        assert!(matches!(resolution.reset, ResetState::Full(k) if k.is_full()));
    }

    #[test]
    fn test_no_candidate_leaves_undetermined() {
        let providers = active(vec![Fixed::new("p", vec![])]);
        let resolution = resolve(&providers, &new_activity(0, 10));
        assert!(resolution.slots[0].is_undetermined());
        assert_eq!(resolution.slots.len(), 1);
    }

    #[test]
    fn test_failing_provider_is_skipped() {
        let mut broken = Fixed::new("broken", vec![auto(9, 99.0)]);
        broken.fail = true;
        let providers = active(vec![broken, Fixed::new("ok", vec![auto(1, 1.0)])]);
        let resolution = resolve(&providers, &new_activity(0, 10));
        assert_eq!(resolution.slots[0].reason, Some(ReasonId(1)));
        assert!(resolution
            .diagnostics
            .iter()
            .any(|d| d.provider == "broken" && d.kind == DiagnosticKind::Failed));
    }

    #[test]
    fn test_out_of_range_and_over_maximum_discarded() {
        let mut liar = Fixed::new("liar", vec![auto(9, 99.0)]);
        liar.max = Some(10.0);
        let mut outside = Fixed::new(
            "outside",
            vec![auto(8, 50.0).restricted_to_range(range(5, 20))],
        );
        outside.clip = false;
        let providers = active(vec![liar, outside, Fixed::new("ok", vec![auto(1, 1.0)])]);

        let resolution = resolve(&providers, &new_activity(0, 10));
        assert_eq!(resolution.slots.len(), 1);
        assert_eq!(resolution.slots[0].reason, Some(ReasonId(1)));
        for name in ["liar", "outside"] {
            assert!(resolution
                .diagnostics
                .iter()
                .any(|d| d.provider == name && d.kind == DiagnosticKind::Misbehaving));
        }
    }

    #[test]
    fn test_early_exit_skips_weak_provider() {
        let mut strong = Fixed::new("strong", vec![auto(1, 50.0)]);
        strong.max = Some(50.0);
        let mut weak = Fixed::new("weak", vec![auto(2, 10.0)]);
        weak.max = Some(10.0);
        let providers = active(vec![weak, strong]);
        let resolution = resolve(&providers, &new_activity(0, 10));
        assert_eq!(resolution.slots[0].reason, Some(ReasonId(1)));
        assert!(resolution
            .diagnostics
            .iter()
            .any(|d| d.provider == "weak" && d.kind == DiagnosticKind::EarlyExit));
    }

    #[test]
    fn test_piece_limit_ignores_restricted_winner() {
        let providers = active(vec![
            Fixed::new("whole", vec![auto(1, 5.0)]),
            Fixed::new("part", vec![auto(2, 10.0).restricted_to_range(range(0, 5))]),
        ]);
        let engine = ConsolidationEngine::new(EngineConfig {
            max_pieces: 1,
            ..EngineConfig::default()
        });
        let resolution = engine.resolve(&providers, &providers.new_batch(), &new_activity(0, 10));
        assert_eq!(resolution.slots.len(), 1);
        assert_eq!(resolution.slots[0].reason, Some(ReasonId(1)));
    }
}
