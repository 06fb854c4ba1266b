//! Reason providers shipped with the engine.
//!
//! Providers are registered in a fixed order, which is also the last
//! tie-break between their candidates: manual reasons, reason proposals,
//! scheduled reasons, then machine mode defaults.

pub mod machine_mode_default;
pub mod manual_reason;
pub mod reason_proposal;
pub mod scheduled_reason;

use std::sync::Arc;

pub use machine_mode_default::MachineModeDefaultProvider;
pub use manual_reason::{ManualReason, ManualReasonProvider, ManualReasonStore};
pub use reason_proposal::{ReasonProposal, ReasonProposalProvider, ReasonProposalStore};
pub use scheduled_reason::ScheduledReasonProvider;

use super::provider_registry::ProviderRegistry;
use crate::domain::models::Config;
use crate::domain::ports::{FnProviderFactory, ReasonProvider};

/// Shared stores behind the manual reason and proposal providers.
///
/// Cloning is cheap; every clone sees the same data.
#[derive(Debug, Clone, Default)]
pub struct ReasonStores {
    pub manual: ManualReasonStore,
    pub proposals: ReasonProposalStore,
}

/// Registry holding every built-in provider enabled in `config`.
pub fn builtin_registry(config: &Config, stores: &ReasonStores) -> ProviderRegistry {
    let providers = &config.providers;
    let mut registry = ProviderRegistry::new();

    if providers.manual.enabled {
        let store = stores.manual.clone();
        let priority = providers.manual.priority;
        let score = config.engine.manual_score;
        registry.register(FnProviderFactory::shared(manual_reason::NAME, move || {
            Box::new(ManualReasonProvider::new(store.clone(), score).with_priority(priority))
                as Box<dyn ReasonProvider>
        }));
    }

    if providers.proposals.enabled {
        let store = stores.proposals.clone();
        let priority = providers.proposals.priority;
        registry.register(FnProviderFactory::shared(reason_proposal::NAME, move || {
            Box::new(ReasonProposalProvider::new(store.clone()).with_priority(priority))
                as Box<dyn ReasonProvider>
        }));
    }

    if providers.scheduled.enabled {
        let windows = Arc::new(providers.scheduled.windows.clone());
        let priority = providers.scheduled.priority;
        registry.register(FnProviderFactory::shared(scheduled_reason::NAME, move || {
            Box::new(ScheduledReasonProvider::new(Arc::clone(&windows)).with_priority(priority))
                as Box<dyn ReasonProvider>
        }));
    }

    if providers.machine_mode_defaults.enabled {
        let entries = Arc::new(providers.machine_mode_defaults.entries.clone());
        let priority = providers.machine_mode_defaults.priority;
        registry.register(FnProviderFactory::shared(
            machine_mode_default::NAME,
            move || {
                Box::new(
                    MachineModeDefaultProvider::new(Arc::clone(&entries)).with_priority(priority),
                ) as Box<dyn ReasonProvider>
            },
        ));
    }

    registry
}
