//! `SQLite` persistence: connection pool, embedded migrations and the slot
//! repository.

pub mod connection;
pub mod slot_repo;

pub use connection::{ConnectionError, DatabaseConnection};
pub use slot_repo::SqliteSlotRepository;
