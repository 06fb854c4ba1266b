//! Project initialization: the `.reasonflow/` directory, a commented default
//! configuration file and a migrated slot database.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::models::DatabaseConfig;
use crate::infrastructure::database::DatabaseConnection;

/// Default configuration template content
const DEFAULT_CONFIG_TEMPLATE: &str = r##"# Reasonflow Configuration
# Override settings by editing this file, adding .reasonflow/local.yaml, or
# setting environment variables with the REASONFLOW_ prefix, e.g.
#   export REASONFLOW_ENGINE__MAX_PIECES=1024
#   export REASONFLOW_LOGGING__LEVEL=debug

engine:
  # Maximum number of pieces one trigger slot may be cut into
  max_pieces: 4096
  # Score of manual reasons that do not carry their own
  manual_score: 100.0
  # Skip providers that cannot beat the best score seen so far
  early_exit: true

worker:
  # Pending triggers per machine
  channel_capacity: 256
  # Slots loaded per page during re-evaluation
  batch_size: 50

database:
  path: ".reasonflow/reasonflow.db"
  max_connections: 5

logging:
  # trace, debug, info, warn, error
  level: "info"
  # json, pretty
  format: "pretty"
  # daily, hourly, never (only used with log_dir)
  rotation: "daily"

retry:
  max_retries: 3
  initial_backoff_ms: 50
  max_backoff_ms: 2000

# Reason reference data
reasons: []
#  - id: 1
#    name: Production
#    color: "#00A000"

providers:
  machine_mode_defaults:
    entries: []
    #  - machine_mode: 1
    #    reason: 1
    #    score: 10.0
    #    # Only for slots up to this many seconds; one entry per mode
    #    # and state may leave it unset
    #    maximum_duration_secs: 120
  scheduled:
    windows: []
    #  - name: lunch
    #    start: "12:00:00"
    #    end: "12:30:00"
    #    reason: 2
    #    score: 30.0
"##;

/// Setup paths and directories
pub struct SetupPaths {
    pub config_dir: PathBuf,
    pub config_file: PathBuf,
    pub database_file: PathBuf,
}

impl SetupPaths {
    /// Setup paths for the current directory
    pub fn new() -> Result<Self> {
        let current_dir = std::env::current_dir().context("Failed to get current directory")?;
        Ok(Self::in_dir(&current_dir))
    }

    pub fn in_dir(root: &Path) -> Self {
        let config_dir = root.join(".reasonflow");
        Self {
            config_file: config_dir.join("config.yaml"),
            database_file: config_dir.join("reasonflow.db"),
            config_dir,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.config_file.exists() && self.database_file.exists()
    }
}

/// What `initialize` created; existing files are left alone unless forced.
#[derive(Debug, Default, serde::Serialize)]
pub struct SetupReport {
    pub config_file: Option<PathBuf>,
    pub database_file: Option<PathBuf>,
}

pub fn create_config_file(paths: &SetupPaths, force: bool) -> Result<bool> {
    if paths.config_file.exists() && !force {
        return Ok(false);
    }
    fs::create_dir_all(&paths.config_dir).context("Failed to create config directory")?;
    fs::write(&paths.config_file, DEFAULT_CONFIG_TEMPLATE)
        .context("Failed to write config file")?;
    Ok(true)
}

/// Create the database if missing and apply pending migrations.
pub async fn run_migrations(paths: &SetupPaths) -> Result<bool> {
    let existed = paths.database_file.exists();
    let config = DatabaseConfig {
        path: paths.database_file.to_string_lossy().into_owned(),
        max_connections: 1,
    };
    let db = DatabaseConnection::connect(&config)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await.context("Failed to run migrations")?;
    db.close().await;
    Ok(!existed)
}

pub async fn initialize(paths: &SetupPaths, force: bool) -> Result<SetupReport> {
    let mut report = SetupReport::default();
    if create_config_file(paths, force)? {
        report.config_file = Some(paths.config_file.clone());
    }
    if run_migrations(paths).await? {
        report.database_file = Some(paths.database_file.clone());
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Config;

    #[test]
    fn test_template_parses_to_defaults() {
        let config: Config = serde_yaml::from_str(DEFAULT_CONFIG_TEMPLATE).unwrap();
        let defaults = Config::default();
        assert_eq!(config.engine.max_pieces, defaults.engine.max_pieces);
        assert_eq!(config.worker.batch_size, defaults.worker.batch_size);
        assert_eq!(config.database.path, defaults.database.path);
        assert!(config.reasons.is_empty());
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let paths = SetupPaths::in_dir(dir.path());
        assert!(!paths.is_initialized());

        let first = initialize(&paths, false).await.unwrap();
        assert!(first.config_file.is_some());
        assert!(first.database_file.is_some());
        assert!(paths.is_initialized());

        let second = initialize(&paths, false).await.unwrap();
        assert!(second.config_file.is_none());
        assert!(second.database_file.is_none());
    }
}
