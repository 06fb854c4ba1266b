//! Provider ordering and candidate ranking.
//!
//! Providers are consulted gated-first, then by maximum score, so that the
//! engine can stop querying once no remaining provider can beat the best
//! score seen. Candidates are ranked by score, then overwrite flag, then
//! provider priority, then registration order.

use std::cmp::Ordering;

use crate::domain::models::{
    MainAssignment, PossibleReason, ReasonSlotChange, ReasonSource, TimeRange,
};

/// What the engine learned about one provider before querying it.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderPlan {
    /// Position in the active provider set
    pub index: usize,
    pub priority: i32,
    /// `None` when unknown
    pub maximum_score: Option<f64>,
    pub may_apply_auto: bool,
    pub may_apply_manual: bool,
}

impl ProviderPlan {
    pub const fn is_gated(&self) -> bool {
        self.may_apply_auto || self.may_apply_manual
    }

    /// The provider declared it will propose nothing.
    pub fn is_silent(&self) -> bool {
        self.maximum_score.is_some_and(|max| max < 0.0)
    }

    /// Whether none of this provider's candidates can reach `best`.
    pub fn cannot_reach(&self, best: f64) -> bool {
        self.maximum_score.is_some_and(|max| max < best)
    }
}

/// Order in which providers are consulted.
pub fn compare_plans(a: &ProviderPlan, b: &ProviderPlan) -> Ordering {
    let max = |p: &ProviderPlan| p.maximum_score.unwrap_or(f64::INFINITY);
    b.is_gated()
        .cmp(&a.is_gated())
        .then_with(|| max(b).total_cmp(&max(a)))
        .then_with(|| b.priority.cmp(&a.priority))
        .then_with(|| a.index.cmp(&b.index))
}

pub fn sort_plans(plans: &mut [ProviderPlan]) {
    plans.sort_by(compare_plans);
}

/// A candidate together with the provider that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedCandidate {
    pub candidate: PossibleReason,
    pub provider_index: usize,
    pub provider_priority: i32,
    /// The provider's auto gate was open for the slot
    pub auto_gated: bool,
    /// The provider's manual gate was open for the slot
    pub manual_gated: bool,
    /// Emission order, last-resort tie-break
    pub sequence: usize,
}

impl RankedCandidate {
    pub fn score(&self) -> f64 {
        self.candidate.score
    }

    pub fn covers(&self, range: &TimeRange) -> bool {
        self.candidate.covers(range)
    }

    /// Counts for the extra auto layer.
    pub fn is_extra_auto(&self) -> bool {
        self.auto_gated && self.candidate.source.is_auto()
    }

    /// Counts for the extra manual layer.
    pub fn is_extra_manual(&self) -> bool {
        self.manual_gated && self.candidate.source.is_manual()
    }

    /// Same reason assignment as `main`.
    pub fn matches(&self, main: &MainAssignment) -> bool {
        self.candidate.reason == main.reason
            && self.candidate.source == main.source
            && self.candidate.details == main.details
    }
}

/// Ranking order of candidates for the main reason.
pub fn compare_candidates(a: &RankedCandidate, b: &RankedCandidate) -> Ordering {
    b.score()
        .total_cmp(&a.score())
        .then_with(|| {
            b.candidate
                .overwrite_required
                .cmp(&a.candidate.overwrite_required)
        })
        .then_with(|| b.provider_priority.cmp(&a.provider_priority))
        .then_with(|| a.provider_index.cmp(&b.provider_index))
        .then_with(|| a.sequence.cmp(&b.sequence))
}

pub fn rank(candidates: &mut [RankedCandidate]) {
    candidates.sort_by(compare_candidates);
}

/// Whether `candidate` may replace `baseline` as the main reason.
pub fn qualifies(
    candidate: &PossibleReason,
    baseline: Option<&MainAssignment>,
    change: ReasonSlotChange,
) -> bool {
    let Some(current) = baseline else {
        return true;
    };
    if current.source == ReasonSource::Manual {
        return change.has_flag(ReasonSlotChange::RESET_MANUAL);
    }
    candidate.score > current.score
        || (candidate.score == current.score && candidate.overwrite_required)
}

/// First candidate of a ranked list that qualifies against `baseline`.
pub fn select_winner<'a, I>(
    ranked: I,
    baseline: Option<&MainAssignment>,
    change: ReasonSlotChange,
) -> Option<&'a RankedCandidate>
where
    I: IntoIterator<Item = &'a RankedCandidate>,
{
    ranked
        .into_iter()
        .find(|c| qualifies(&c.candidate, baseline, change))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ReasonId;
    use std::collections::BTreeMap;

    fn plan(index: usize, max: Option<f64>, gated: bool, priority: i32) -> ProviderPlan {
        ProviderPlan {
            index,
            priority,
            maximum_score: max,
            may_apply_auto: gated,
            may_apply_manual: false,
        }
    }

    fn ranked(
        reason: u32,
        score: f64,
        overwrite: bool,
        index: usize,
        priority: i32,
    ) -> RankedCandidate {
        RankedCandidate {
            candidate: PossibleReason::new(ReasonId(reason), score, ReasonSource::Auto)
                .with_overwrite_required(overwrite),
            provider_index: index,
            provider_priority: priority,
            auto_gated: true,
            manual_gated: false,
            sequence: 0,
        }
    }

    fn main(score: f64, source: ReasonSource) -> MainAssignment {
        MainAssignment {
            reason: ReasonId(99),
            details: None,
            score,
            source,
            overwrite_required: false,
            data: BTreeMap::new(),
        }
    }

    #[test]
    fn test_plan_order() {
        let mut plans = vec![
            plan(0, Some(10.0), false, 0),
            plan(1, None, false, 0),
            plan(2, Some(5.0), true, 0),
            plan(3, Some(10.0), false, 5),
        ];
        sort_plans(&mut plans);
        let order: Vec<usize> = plans.iter().map(|p| p.index).collect();
        assert_eq!(order, vec![2, 1, 3, 0]);
    }

    #[test]
    fn test_plan_reachability() {
        assert!(plan(0, Some(-1.0), false, 0).is_silent());
        assert!(!plan(0, None, false, 0).is_silent());
        assert!(plan(0, Some(4.0), false, 0).cannot_reach(5.0));
        assert!(!plan(0, Some(5.0), false, 0).cannot_reach(5.0));
        assert!(!plan(0, None, false, 0).cannot_reach(f64::MAX));
    }

    #[test]
    fn test_candidate_order() {
        let mut candidates = vec![
            ranked(1, 10.0, false, 0, 0),
            ranked(2, 10.0, true, 1, 0),
            ranked(3, 12.0, false, 2, 0),
            ranked(4, 10.0, false, 3, 7),
        ];
        rank(&mut candidates);
        let order: Vec<u32> = candidates.iter().map(|c| c.candidate.reason.0).collect();
        assert_eq!(order, vec![3, 2, 4, 1]);
    }

    #[test]
    fn test_qualification_rules() {
        let change = ReasonSlotChange::PERIOD;
        let equal_no_overwrite = PossibleReason::new(ReasonId(1), 10.0, ReasonSource::Auto);
        let equal_overwrite = equal_no_overwrite.clone().with_overwrite_required(true);
        let higher = PossibleReason::new(ReasonId(1), 11.0, ReasonSource::Auto);

        assert!(qualifies(&equal_no_overwrite, None, change));
        let auto = main(10.0, ReasonSource::Auto);
        assert!(!qualifies(&equal_no_overwrite, Some(&auto), change));
        assert!(qualifies(&equal_overwrite, Some(&auto), change));
        assert!(qualifies(&higher, Some(&auto), change));

        let manual = main(5.0, ReasonSource::Manual);
        assert!(!qualifies(&higher, Some(&manual), change));
        assert!(qualifies(
            &equal_no_overwrite,
            Some(&manual),
            ReasonSlotChange::RESET_MANUAL
        ));
    }

    #[test]
    fn test_select_winner_skips_non_qualifying() {
        let mut candidates = vec![ranked(1, 10.0, false, 0, 0), ranked(2, 8.0, false, 1, 0)];
        rank(&mut candidates);
        let baseline = main(10.0, ReasonSource::Auto);
        assert!(select_winner(&candidates, Some(&baseline), ReasonSlotChange::PERIOD).is_none());
        let winner = select_winner(&candidates, None, ReasonSlotChange::PERIOD);
        assert_eq!(winner.map(|c| c.candidate.reason), Some(ReasonId(1)));
    }
}
