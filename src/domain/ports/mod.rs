//! Port trait definitions (Hexagonal Architecture)
//!
//! This module defines the interfaces at the seams of the engine:
//! - ReasonProvider: the extension contract implemented by reason sources
//! - ReasonSlotRepository: persistence of reason slots
//!
//! Services depend on these traits, never on concrete adapters.

pub mod errors;
pub mod reason_provider;
pub mod slot_repository;

pub use errors::{ProviderError, ProviderResult, RepositoryError, RepositoryResult};
pub use reason_provider::{
    cached, BatchContext, FnProviderFactory, ProviderCache, ProviderFactory, ReasonProvider,
};
pub use slot_repository::ReasonSlotRepository;
