//! CLI command implementations.

pub mod config;
pub mod init;
pub mod picker;
pub mod reevaluate;
pub mod run;
pub mod slots;

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::domain::models::{Config, Machine};
use crate::domain::ports::ReasonSlotRepository;
use crate::infrastructure::database::{DatabaseConnection, SqliteSlotRepository};
use crate::services::{
    builtin_registry, ConsolidationEngine, ConsolidationService, MachineWorkerPool, ReasonStores,
};

/// Slot repository on the configured `SQLite` database, migrated.
pub async fn open_repository(config: &Config) -> Result<Arc<dyn ReasonSlotRepository>> {
    let db = DatabaseConnection::connect(&config.database)
        .await
        .with_context(|| format!("Failed to open database {}", config.database.path))?;
    db.migrate().await.context("Failed to run migrations")?;
    Ok(Arc::new(SqliteSlotRepository::new(db.pool().clone())))
}

/// Worker pool running the built-in providers over `repo`.
pub fn worker_pool(
    config: &Config,
    repo: Arc<dyn ReasonSlotRepository>,
    stores: &ReasonStores,
    machines: Vec<Machine>,
) -> MachineWorkerPool {
    let registry = builtin_registry(config, stores);
    let engine = ConsolidationEngine::new(config.engine.clone());
    let service = Arc::new(ConsolidationService::new(repo, engine));
    MachineWorkerPool::new(registry, service, config).with_machines(machines)
}
