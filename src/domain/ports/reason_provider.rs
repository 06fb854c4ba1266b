//! Reason provider port (the extension contract).
//!
//! A provider encapsulates one source of reason knowledge: a business rule,
//! a heuristic, operator input. The engine combines many of them without
//! knowing their internals. Calls are synchronous; anything a provider needs
//! across a batch lives in its own [`ProviderCache`] inside the
//! [`BatchContext`] the engine passes around.

use chrono::{DateTime, Utc};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

use super::errors::{ProviderError, ProviderResult};
use crate::domain::models::{
    Machine, MachineModeId, MachineObservationStateId, Modification, PossibleReason, ReasonId,
    ReasonSlot, ReasonSlotChange, ReasonSource, RequiredResetKind, TimeRange,
};

/// Batch-scoped reference data owned by exactly one provider.
#[derive(Default)]
pub struct ProviderCache {
    inner: Option<Box<dyn Any + Send + Sync>>,
}

impl ProviderCache {
    pub fn is_empty(&self) -> bool {
        self.inner.is_none()
    }

    pub fn insert<T: Any + Send + Sync>(&mut self, value: T) {
        self.inner = Some(Box::new(value));
    }

    /// `None` when empty or holding another type.
    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.inner.as_ref().and_then(|v| v.downcast_ref::<T>())
    }

    pub fn get_mut<T: Any + Send + Sync>(&mut self) -> Option<&mut T> {
        self.inner.as_mut().and_then(|v| v.downcast_mut::<T>())
    }

    pub fn clear(&mut self) {
        self.inner = None;
    }
}

impl fmt::Debug for ProviderCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderCache")
            .field("loaded", &self.inner.is_some())
            .finish()
    }
}

static EMPTY_CACHE: ProviderCache = ProviderCache { inner: None };

/// Caches of all the providers active for one machine, for the lifetime of
/// a batch (or of a single consolidation outside of any batch).
#[derive(Debug, Default)]
pub struct BatchContext {
    range: Option<TimeRange>,
    caches: Vec<ProviderCache>,
}

impl BatchContext {
    /// One empty cache per provider.
    pub fn new(providers: usize) -> Self {
        Self {
            range: None,
            caches: (0..providers).map(|_| ProviderCache::default()).collect(),
        }
    }

    /// Range preloaded by the current batch, if any.
    pub fn range(&self) -> Option<TimeRange> {
        self.range
    }

    pub fn set_range(&mut self, range: Option<TimeRange>) {
        self.range = range;
    }

    pub fn len(&self) -> usize {
        self.caches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }

    /// Cache of the provider at `index`, grown on demand.
    pub fn cache_mut(&mut self, index: usize) -> &mut ProviderCache {
        if index >= self.caches.len() {
            self.caches.resize_with(index + 1, ProviderCache::default);
        }
        &mut self.caches[index]
    }

    /// Cache of the provider at `index`; empty when never filled.
    pub fn cache(&self, index: usize) -> &ProviderCache {
        self.caches.get(index).unwrap_or(&EMPTY_CACHE)
    }

    /// Drop every cache; called at the end of a batch.
    pub fn release(&mut self) {
        self.range = None;
        self.caches.iter_mut().for_each(ProviderCache::clear);
    }
}

/// A pluggable source of reason candidates.
///
/// Only the candidate query, the maximum score and the reset kind are
/// mandatory; every other operation has a neutral default.
pub trait ReasonProvider: Send + Sync {
    /// Stable name, used in logs and diagnostics
    fn name(&self) -> &str;

    /// Declared priority, higher first. Breaks score ties between
    /// providers.
    fn priority(&self) -> i32 {
        0
    }

    /// One-time setup for a machine. A provider returning `false` is left
    /// out for that machine for the rest of the session.
    fn initialize(&mut self, machine: &Machine) -> ProviderResult<bool>;

    fn start_batch(&self, _cache: &mut ProviderCache) -> ProviderResult<()> {
        Ok(())
    }

    /// Load reference data for the slots of `range` into the cache.
    fn preload(&self, _range: &TimeRange, _cache: &mut ProviderCache) -> ProviderResult<()> {
        Ok(())
    }

    fn end_batch(&self, cache: &mut ProviderCache) -> ProviderResult<()> {
        cache.clear();
        Ok(())
    }

    /// Upper bound of any candidate score for `slot`.
    ///
    /// A negative value means nothing will be proposed; `None` means
    /// unknown, so the provider is always queried.
    fn maximum_score(
        &self,
        slot: &ReasonSlot,
        cache: &ProviderCache,
    ) -> ProviderResult<Option<f64>>;

    fn may_apply_auto_reasons(
        &self,
        _slot: &ReasonSlot,
        _cache: &ProviderCache,
    ) -> ProviderResult<bool> {
        Ok(false)
    }

    fn may_apply_manual_reasons(
        &self,
        _slot: &ReasonSlot,
        _cache: &ProviderCache,
    ) -> ProviderResult<bool> {
        Ok(false)
    }

    /// What this provider needs recomputed after a slot change.
    fn required_reset_kind(
        &self,
        old_slot: Option<&ReasonSlot>,
        new_slot: &ReasonSlot,
        modification: Option<&Modification>,
        change: ReasonSlotChange,
        cache: &ProviderCache,
    ) -> ProviderResult<RequiredResetKind>;

    /// Whether a reset of a slot currently holding a reason of this source,
    /// score and auto count should involve this provider.
    fn is_reset_applicable(
        &self,
        _source: ReasonSource,
        _score: f64,
        _auto_reason_count: u32,
    ) -> ProviderResult<bool> {
        Ok(true)
    }

    /// Narrowing hook run during a reset. Returns the slot to process now,
    /// which must be a non-empty sub-range of `slot` with the same machine,
    /// mode and state.
    fn try_reset_reason(
        &self,
        slot: &ReasonSlot,
        _cache: &ProviderCache,
    ) -> ProviderResult<ReasonSlot> {
        Ok(slot.clone())
    }

    /// Candidates valid at `at` under the given mode and state.
    /// `auto_manual_only` suppresses `Default` candidates.
    fn try_get_active_at(
        &self,
        at: DateTime<Utc>,
        machine_mode: MachineModeId,
        machine_observation_state: MachineObservationStateId,
        auto_manual_only: bool,
        cache: &ProviderCache,
    ) -> ProviderResult<Vec<PossibleReason>>;

    /// Candidates valid somewhere in `range`, restricted to the part of the
    /// range where they apply.
    ///
    /// The default only asks `try_get_active_at` at the start of the range,
    /// which is right for providers whose candidates hold over a whole slot
    /// once mode and state are fixed. A provider whose candidates can start
    /// or end inside a slot must override this, or pair it with a
    /// `try_reset_reason` that narrows the slot at each such boundary;
    /// otherwise candidates starting after `range.lower()` are never seen.
    fn try_get_active_during(
        &self,
        range: &TimeRange,
        machine_mode: MachineModeId,
        machine_observation_state: MachineObservationStateId,
        auto_manual_only: bool,
        cache: &ProviderCache,
    ) -> ProviderResult<Vec<PossibleReason>> {
        self.try_get_active_at(
            range.lower(),
            machine_mode,
            machine_observation_state,
            auto_manual_only,
            cache,
        )
    }

    /// Whether a previously chosen reason is still acceptable over `range`.
    #[allow(clippy::too_many_arguments)]
    fn is_compatible(
        &self,
        _range: &TimeRange,
        _machine_mode: MachineModeId,
        _machine_observation_state: MachineObservationStateId,
        _reason: ReasonId,
        _score: f64,
        _source: ReasonSource,
        _cache: &ProviderCache,
    ) -> ProviderResult<bool> {
        Ok(true)
    }
}

/// Builds a fresh provider instance for each machine worker.
pub trait ProviderFactory: Send + Sync {
    fn name(&self) -> &str;

    fn create(&self) -> Box<dyn ReasonProvider>;
}

/// Factory backed by a closure.
pub struct FnProviderFactory<F> {
    name: String,
    build: F,
}

impl<F> FnProviderFactory<F>
where
    F: Fn() -> Box<dyn ReasonProvider> + Send + Sync,
{
    pub fn new(name: impl Into<String>, build: F) -> Self {
        Self {
            name: name.into(),
            build,
        }
    }

    pub fn shared(name: impl Into<String>, build: F) -> Arc<dyn ProviderFactory>
    where
        F: 'static,
    {
        Arc::new(Self::new(name, build))
    }
}

impl<F> ProviderFactory for FnProviderFactory<F>
where
    F: Fn() -> Box<dyn ReasonProvider> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn create(&self) -> Box<dyn ReasonProvider> {
        (self.build)()
    }
}

/// Typed access to a provider's own cache.
pub fn cached<'a, T: Any + Send + Sync>(
    provider: &str,
    cache: &'a ProviderCache,
) -> ProviderResult<Option<&'a T>> {
    if cache.is_empty() {
        return Ok(None);
    }
    cache
        .get::<T>()
        .map(Some)
        .ok_or_else(|| ProviderError::CacheMismatch(provider.to_string()))
}
