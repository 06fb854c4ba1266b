//! Reasonflow - reason assignment and consolidation engine
//!
//! Reasonflow partitions the timeline of each machine into reason slots and
//! decides, for every slot, the main reason explaining what the machine was
//! doing, from candidates proposed by pluggable reason providers.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): slots, ranges, flags and the port traits
//! - **Service Layer** (`services`): provider registry, consolidation engine,
//!   per-machine workers
//! - **Infrastructure Layer** (`infrastructure`): configuration, logging,
//!   `SQLite` and in-memory slot repositories
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use reasonflow::{builtin_registry, ConsolidationEngine, ConsolidationService};
//! use reasonflow::{Config, InMemorySlotRepository, MachineWorkerPool, ReasonStores};
//!
//! let config = Config::default();
//! let registry = builtin_registry(&config, &ReasonStores::default());
//! let service = Arc::new(ConsolidationService::new(
//!     Arc::new(InMemorySlotRepository::new()),
//!     ConsolidationEngine::new(config.engine.clone()),
//! ));
//! let pool = MachineWorkerPool::new(registry, service, &config);
//! ```

pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::models::{
    Config, DatabaseConfig, LoggingConfig, Machine, MachineId, MachineModeId,
    MachineObservationStateId, PossibleReason, Reason, ReasonId, ReasonSlot, ReasonSlotChange,
    ReasonSource, RequiredResetKind, RetryConfig, SlotTrigger, TimeRange,
};
pub use domain::ports::{ProviderCache, ReasonProvider, ReasonSlotRepository};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use infrastructure::InMemorySlotRepository;
pub use services::{
    builtin_registry, ConsolidationEngine, ConsolidationService, MachineWorkerPool,
    ProviderRegistry, ReasonStores,
};
