use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::domain::models::DatabaseConfig;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Invalid database URL: {0}")]
    InvalidDatabaseUrl(String),

    #[error("Failed to create database directory: {0}")]
    DirectoryCreationFailed(#[source] std::io::Error),

    #[error("Failed to create connection pool: {0}")]
    PoolCreationFailed(#[source] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationFailed(#[source] sqlx::migrate::MigrateError),
}

/// Database connection pool manager
///
/// `SQLite` pool with WAL journaling, NORMAL synchronous mode and a busy
/// timeout so that concurrent writers wait instead of failing.
pub struct DatabaseConnection {
    pool: SqlitePool,
}

impl DatabaseConnection {
    /// Open (creating if missing) the database file at `config.path`.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, ConnectionError> {
        ensure_database_directory(&config.path)?;
        let database_url = format!("sqlite:{}", config.path);

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|_| ConnectionError::InvalidDatabaseUrl(database_url.clone()))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(config.max_connections)
            .idle_timeout(Duration::from_secs(30))
            .max_lifetime(Duration::from_secs(1800))
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(ConnectionError::PoolCreationFailed)?;

        Ok(Self { pool })
    }

    /// Private in-memory database on a single connection that is never
    /// recycled, so the data lives as long as the pool.
    pub async fn in_memory() -> Result<Self, ConnectionError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|_| ConnectionError::InvalidDatabaseUrl("sqlite::memory:".to_string()))?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(ConnectionError::PoolCreationFailed)?;

        Ok(Self { pool })
    }

    /// Apply pending migrations; already applied ones are skipped.
    pub async fn migrate(&self) -> Result<(), ConnectionError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(ConnectionError::MigrationFailed)
    }

    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn ensure_database_directory(path: &str) -> Result<(), ConnectionError> {
    if path == ":memory:" || path.is_empty() {
        return Ok(());
    }

    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).map_err(ConnectionError::DirectoryCreationFailed)?;
        }
    }
    Ok(())
}
