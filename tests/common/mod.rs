//! Common test utilities for integration tests
//!
//! Provides time helpers, a configurable fixed-candidate provider and
//! builders for engines, services and worker pools over the in-memory
//! repository.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use tempfile::TempDir;

use reasonflow::domain::models::{
    timeline, Config, Machine, MachineId, MachineModeId, MachineObservationStateId,
    MainAssignment, Modification, PossibleReason, ReasonId, ReasonSlot, ReasonSlotChange,
    ReasonSource, RequiredResetKind, TimeRange,
};
use reasonflow::domain::ports::{
    FnProviderFactory, ProviderCache, ProviderError, ProviderResult, ReasonProvider,
    ReasonSlotRepository,
};
use reasonflow::services::{
    ActiveProviders, ConsolidationEngine, ConsolidationService, MachineWorkerPool,
    ProviderRegistry,
};
use reasonflow::InMemorySlotRepository;

/// Create a temporary directory for test isolation
pub fn temp_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

/// Setup test logging
pub fn setup_test_logging() {
    use tracing_subscriber::fmt;

    let _ = fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Minutes after 2024-03-04 08:00 UTC.
pub fn t(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, 8, 0, 0).unwrap() + Duration::minutes(minutes)
}

pub fn range(a: i64, b: i64) -> TimeRange {
    TimeRange::new(t(a), t(b)).unwrap()
}

pub const MACHINE: MachineId = MachineId(1);
pub const ACTIVE: MachineModeId = MachineModeId(1);
pub const IDLE: MachineModeId = MachineModeId(2);
pub const RUNNING: MachineObservationStateId = MachineObservationStateId(1);

pub fn slot(a: i64, b: i64) -> ReasonSlot {
    ReasonSlot::new(MACHINE, range(a, b), ACTIVE, RUNNING)
}

pub fn auto(reason: u32, score: f64) -> PossibleReason {
    PossibleReason::new(ReasonId(reason), score, ReasonSource::Auto)
}

pub fn manual(reason: u32, score: f64) -> PossibleReason {
    PossibleReason::new(ReasonId(reason), score, ReasonSource::Manual)
}

pub fn assigned(reason: u32, score: f64, source: ReasonSource) -> MainAssignment {
    MainAssignment {
        reason: ReasonId(reason),
        details: None,
        score,
        source,
        overwrite_required: false,
        data: Default::default(),
    }
}

/// Provider returning a fixed candidate list. Restricted candidates are
/// clipped to the queried range.
#[derive(Debug, Clone)]
pub struct FixedProvider {
    pub name: String,
    pub priority: i32,
    pub max: Option<f64>,
    pub auto_gate: bool,
    pub manual_gate: bool,
    pub reset: RequiredResetKind,
    pub candidates: Vec<PossibleReason>,
    pub fail: bool,
}

impl FixedProvider {
    pub fn new(name: &str, candidates: Vec<PossibleReason>) -> Self {
        Self {
            name: name.to_string(),
            priority: 0,
            max: None,
            auto_gate: false,
            manual_gate: false,
            reset: RequiredResetKind::NONE,
            candidates,
            fail: false,
        }
    }

    /// Declare the best candidate score as the maximum.
    #[must_use]
    pub fn honest(mut self) -> Self {
        self.max = self
            .candidates
            .iter()
            .map(|c| c.score)
            .reduce(f64::max)
            .or(Some(-1.0));
        self
    }

    #[must_use]
    pub fn gated(mut self) -> Self {
        self.auto_gate = true;
        self
    }

    #[must_use]
    pub fn manual_gated(mut self) -> Self {
        self.manual_gate = true;
        self
    }

    #[must_use]
    pub fn resetting(mut self, reset: RequiredResetKind) -> Self {
        self.reset = reset;
        self
    }
}

impl ReasonProvider for FixedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
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

    fn may_apply_manual_reasons(
        &self,
        _slot: &ReasonSlot,
        _cache: &ProviderCache,
    ) -> ProviderResult<bool> {
        Ok(self.manual_gate)
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
            return Err(ProviderError::unavailable(&self.name, "down"));
        }
        Ok(self
            .candidates
            .iter()
            .filter_map(|c| match c.restricted_range() {
                Some(r) => r
                    .intersection(range)
                    .map(|clip| c.clone().restricted_to_range(clip)),
                None => Some(c.clone()),
            })
            .collect())
    }
}

pub fn active(providers: &[FixedProvider]) -> ActiveProviders {
    ActiveProviders::initialize(
        Machine::new(MACHINE.0, "press"),
        providers
            .iter()
            .cloned()
            .map(|p| Box::new(p) as Box<dyn ReasonProvider>)
            .collect(),
    )
}

pub fn registry(providers: &[FixedProvider]) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    for provider in providers {
        let provider = provider.clone();
        registry.register(FnProviderFactory::shared(provider.name.clone(), move || {
            Box::new(provider.clone()) as Box<dyn ReasonProvider>
        }));
    }
    registry
}

pub fn service(repo: Arc<dyn ReasonSlotRepository>) -> Arc<ConsolidationService> {
    Arc::new(ConsolidationService::new(repo, ConsolidationEngine::default()))
}

/// Worker pool over a fresh in-memory repository.
pub fn memory_pool(providers: &[FixedProvider]) -> (Arc<InMemorySlotRepository>, MachineWorkerPool) {
    let repo = Arc::new(InMemorySlotRepository::new());
    let mut config = Config::default();
    config.retry.initial_backoff_ms = 1;
    config.retry.max_backoff_ms = 5;
    let pool = MachineWorkerPool::new(registry(providers), service(repo.clone()), &config);
    (repo, pool)
}

/// Reason of each stored slot of `machine`, by range.
pub async fn timeline_of(
    repo: &dyn ReasonSlotRepository,
    machine: MachineId,
) -> Vec<(TimeRange, Option<ReasonId>)> {
    repo.find_all(machine)
        .await
        .unwrap()
        .into_iter()
        .map(|s| (s.range, s.reason))
        .collect()
}

/// Assert that the stored slots of `machine` tile `expected` exactly.
pub async fn assert_partition(repo: &dyn ReasonSlotRepository, machine: MachineId, expected: TimeRange) {
    let slots = repo.find_all(machine).await.unwrap();
    let covered = timeline::check_partition(machine, &slots).unwrap();
    assert_eq!(covered, Some(expected), "slots: {slots:#?}");
}
