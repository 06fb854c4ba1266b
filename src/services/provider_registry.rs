//! Provider registry and per-machine provider sets.
//!
//! The [`ProviderRegistry`] holds one factory per reason provider, in
//! registration order. Each machine worker asks it for an
//! [`ActiveProviders`] set: fresh instances, initialized for that machine,
//! with the providers that declined or failed left out.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::domain::models::{Machine, TimeRange};
use crate::domain::ports::{BatchContext, ProviderFactory, ReasonProvider};

/// Central registry of reason provider factories.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    factories: Vec<Arc<dyn ProviderFactory>>,
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory; registration order is the last tie-break between
    /// providers.
    pub fn register(&mut self, factory: Arc<dyn ProviderFactory>) -> &mut Self {
        self.factories.push(factory);
        self
    }

    #[must_use]
    pub fn with(mut self, factory: Arc<dyn ProviderFactory>) -> Self {
        self.register(factory);
        self
    }

    pub fn names(&self) -> Vec<&str> {
        self.factories.iter().map(|f| f.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Instantiate and initialize every provider for `machine`.
    pub fn activate(&self, machine: &Machine) -> ActiveProviders {
        ActiveProviders::initialize(
            machine.clone(),
            self.factories.iter().map(|f| f.create()).collect(),
        )
    }
}

/// Providers active for one machine, in registration order.
///
/// The position of a provider in this set is also the index of its cache in
/// a [`BatchContext`].
pub struct ActiveProviders {
    machine: Machine,
    providers: Vec<Box<dyn ReasonProvider>>,
}

impl fmt::Debug for ActiveProviders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveProviders")
            .field("machine", &self.machine.id)
            .field(
                "providers",
                &self.providers.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl ActiveProviders {
    /// Initialize `providers` for `machine`, keeping those that accept it.
    pub fn initialize(machine: Machine, providers: Vec<Box<dyn ReasonProvider>>) -> Self {
        let mut active = Vec::with_capacity(providers.len());
        for mut provider in providers {
            match provider.initialize(&machine) {
                Ok(true) => active.push(provider),
                Ok(false) => debug!(
                    machine_id = %machine.id,
                    provider = provider.name(),
                    "Provider inactive for machine"
                ),
                Err(e) => warn!(
                    machine_id = %machine.id,
                    provider = provider.name(),
                    error = %e,
                    "Provider initialization failed, excluded for this session"
                ),
            }
        }
        Self {
            machine,
            providers: active,
        }
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&dyn ReasonProvider> {
        self.providers.get(index).map(AsRef::as_ref)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &dyn ReasonProvider)> {
        self.providers.iter().map(AsRef::as_ref).enumerate()
    }

    pub fn names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Empty caches, one per provider.
    pub fn new_batch(&self) -> BatchContext {
        BatchContext::new(self.providers.len())
    }

    /// Run `start_batch` then `preload(range)` on every provider. A failing
    /// provider simply runs without a cache.
    pub fn start_batch(&self, batch: &mut BatchContext, range: &TimeRange) {
        batch.set_range(Some(*range));
        for (index, provider) in self.iter() {
            let cache = batch.cache_mut(index);
            let loaded = provider
                .start_batch(cache)
                .and_then(|()| provider.preload(range, cache));
            if let Err(e) = loaded {
                cache.clear();
                warn!(
                    machine_id = %self.machine.id,
                    provider = provider.name(),
                    error = %e,
                    "Provider batch preload failed"
                );
            }
        }
    }

    /// Run `end_batch` on every provider and release all caches.
    pub fn end_batch(&self, batch: &mut BatchContext) {
        for (index, provider) in self.iter() {
            if let Err(e) = provider.end_batch(batch.cache_mut(index)) {
                warn!(
                    machine_id = %self.machine.id,
                    provider = provider.name(),
                    error = %e,
                    "Provider end of batch failed"
                );
            }
        }
        batch.release();
    }
}
