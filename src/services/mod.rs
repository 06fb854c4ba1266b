pub mod builtin_providers;
pub mod candidate_ranking;
pub mod consolidation_engine;
pub mod consolidation_service;
pub mod machine_worker;
pub mod provider_registry;

pub use builtin_providers::{builtin_registry, ReasonStores};
pub use consolidation_engine::{
    ConsolidationEngine, DiagnosticKind, ProviderDiagnostic, ResetState, Resolution,
};
pub use consolidation_service::{
    ConsolidationError, ConsolidationReport, ConsolidationResult, ConsolidationService,
};
pub use machine_worker::{BatchReport, MachineWorkerPool};
pub use provider_registry::{ActiveProviders, ProviderRegistry};
