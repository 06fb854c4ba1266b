//! Infrastructure layer module
//!
//! Adapters satisfying the port traits defined in the domain layer:
//! - Configuration management (figment)
//! - Logging infrastructure (tracing)
//! - Slot repositories (`SQLite` with sqlx, in-memory)
//! - Project setup

pub mod config;
pub mod database;
pub mod logging;
pub mod memory;
pub mod setup;

pub use memory::InMemorySlotRepository;
