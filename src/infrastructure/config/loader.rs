use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::{Config, ReasonId};

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidLogRotation(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Invalid channel_capacity: {0}. Must be at least 1")]
    InvalidChannelCapacity(usize),

    #[error("Invalid batch_size: {0}. Must be at least 1")]
    InvalidBatchSize(usize),

    #[error("Invalid max_pieces: {0}. Must be at least 1")]
    InvalidMaxPieces(usize),

    #[error("Invalid manual_score: {0}. Must be a finite, non-negative number")]
    InvalidManualScore(f64),

    #[error("Invalid max_retries: {0}. Cannot be 0")]
    InvalidMaxRetries(u32),

    #[error(
        "Invalid backoff configuration: initial_backoff_ms ({0}) must be less than max_backoff_ms ({1})"
    )]
    InvalidBackoff(u64, u64),

    #[error("Reason {0} is defined more than once")]
    DuplicateReason(ReasonId),

    #[error("{provider} references unknown reason {reason}")]
    UnknownReason { provider: String, reason: ReasonId },

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .reasonflow/config.yaml (project config)
    /// 3. .reasonflow/local.yaml (local overrides, optional)
    /// 4. Environment variables (REASONFLOW_* prefix, `__` between sections)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".reasonflow/config.yaml"))
            .merge(Yaml::file(".reasonflow/local.yaml"))
            .merge(Env::prefixed("REASONFLOW_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file; environment variables still
    /// take precedence over it.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("REASONFLOW_").split("__"))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(
                config.database.max_connections,
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }
        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidLogRotation(
                config.logging.rotation.clone(),
            ));
        }

        if config.worker.channel_capacity == 0 {
            return Err(ConfigError::InvalidChannelCapacity(
                config.worker.channel_capacity,
            ));
        }
        if config.worker.batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize(config.worker.batch_size));
        }
        if config.engine.max_pieces == 0 {
            return Err(ConfigError::InvalidMaxPieces(config.engine.max_pieces));
        }
        if !config.engine.manual_score.is_finite() || config.engine.manual_score < 0.0 {
            return Err(ConfigError::InvalidManualScore(config.engine.manual_score));
        }

        if config.retry.max_retries == 0 {
            return Err(ConfigError::InvalidMaxRetries(config.retry.max_retries));
        }
        if config.retry.initial_backoff_ms >= config.retry.max_backoff_ms {
            return Err(ConfigError::InvalidBackoff(
                config.retry.initial_backoff_ms,
                config.retry.max_backoff_ms,
            ));
        }

        Self::validate_reasons(config)
    }

    fn validate_reasons(config: &Config) -> Result<(), ConfigError> {
        let mut known = HashSet::new();
        for reason in &config.reasons {
            if !known.insert(reason.id) {
                return Err(ConfigError::DuplicateReason(reason.id));
            }
        }
        let check = |provider: &str, reason: ReasonId| {
            if known.contains(&reason) {
                Ok(())
            } else {
                Err(ConfigError::UnknownReason {
                    provider: provider.to_string(),
                    reason,
                })
            }
        };

        let mut unbounded = HashSet::new();
        for entry in &config.providers.machine_mode_defaults.entries {
            check("machine_mode_defaults", entry.reason)?;
            if !entry.score.is_finite() {
                return Err(ConfigError::ValidationFailed(format!(
                    "machine mode {} default score must be finite",
                    entry.machine_mode
                )));
            }
            if entry.maximum_duration_secs == Some(0) {
                return Err(ConfigError::ValidationFailed(format!(
                    "machine mode {} default maximum_duration_secs must be positive",
                    entry.machine_mode
                )));
            }
            if entry.maximum_duration_secs.is_none()
                && !unbounded.insert((entry.machine_mode, entry.machine_observation_state))
            {
                return Err(ConfigError::ValidationFailed(format!(
                    "machine mode {} has more than one default without maximum_duration_secs",
                    entry.machine_mode
                )));
            }
        }
        for window in &config.providers.scheduled.windows {
            if window.name.is_empty() {
                return Err(ConfigError::ValidationFailed(
                    "Scheduled window name cannot be empty".to_string(),
                ));
            }
            check(&format!("scheduled window '{}'", window.name), window.reason)?;
            if !window.score.is_finite() {
                return Err(ConfigError::ValidationFailed(format!(
                    "scheduled window '{}' score must be finite",
                    window.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{MachineModeDefaultEntry, MachineModeId, Reason};

    fn with_default_entry(reason: u32) -> Config {
        let mut config = Config::default();
        config.reasons = vec![Reason::new(1, "Production"), Reason::new(2, "Idle")];
        config
            .providers
            .machine_mode_defaults
            .entries
            .push(MachineModeDefaultEntry {
                machine_mode: MachineModeId(1),
                machine_observation_state: None,
                reason: ReasonId(reason),
                score: 10.0,
                overwrite_required: false,
                auto: false,
                maximum_duration_secs: None,
            });
        config
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.database.path, ".reasonflow/reasonflow.db");
        assert_eq!(config.logging.level, "info");
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r"
engine:
  max_pieces: 8
  early_exit: false
worker:
  channel_capacity: 16
database:
  path: /custom/path.db
  max_connections: 2
logging:
  level: debug
  format: json
  rotation: hourly
reasons:
  - id: 1
    name: Production
";
        let config: Config = serde_yaml::from_str(yaml).expect("YAML should parse");

        assert_eq!(config.engine.max_pieces, 8);
        assert!(!config.engine.early_exit);
        assert_eq!(config.worker.channel_capacity, 16);
        assert_eq!(config.worker.batch_size, 50);
        assert_eq!(config.database.path, "/custom/path.db");
        assert_eq!(config.logging.rotation, "hourly");
        assert_eq!(config.reasons.len(), 1);

        ConfigLoader::validate(&config).expect("Parsed config should be valid");
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "invalid".to_string();

        match ConfigLoader::validate(&config) {
            Err(ConfigError::InvalidLogLevel(level)) => assert_eq!(level, "invalid"),
            other => panic!("Expected InvalidLogLevel error, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_invalid_log_format_and_rotation() {
        let mut config = Config::default();
        config.logging.format = "xml".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidLogFormat(_))
        ));

        let mut config = Config::default();
        config.logging.rotation = "weekly".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidLogRotation(_))
        ));
    }

    #[test]
    fn test_validate_database() {
        let mut config = Config::default();
        config.database.path = String::new();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::EmptyDatabasePath)
        ));

        let mut config = Config::default();
        config.database.max_connections = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidMaxConnections(0))
        ));
    }

    #[test]
    fn test_validate_engine_and_worker() {
        let mut config = Config::default();
        config.worker.channel_capacity = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidChannelCapacity(0))
        ));

        let mut config = Config::default();
        config.worker.batch_size = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidBatchSize(0))
        ));

        let mut config = Config::default();
        config.engine.max_pieces = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidMaxPieces(0))
        ));

        let mut config = Config::default();
        config.engine.manual_score = f64::NAN;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidManualScore(_))
        ));
    }

    #[test]
    fn test_validate_retry() {
        let mut config = Config::default();
        config.retry.max_retries = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidMaxRetries(0))
        ));

        let mut config = Config::default();
        config.retry.initial_backoff_ms = 3000;
        config.retry.max_backoff_ms = 1000;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidBackoff(3000, 1000))
        ));
    }

    #[test]
    fn test_validate_reason_references() {
        assert!(ConfigLoader::validate(&with_default_entry(2)).is_ok());

        match ConfigLoader::validate(&with_default_entry(9)) {
            Err(ConfigError::UnknownReason { provider, reason }) => {
                assert_eq!(provider, "machine_mode_defaults");
                assert_eq!(reason, ReasonId(9));
            }
            other => panic!("Expected UnknownReason error, got {other:?}"),
        }

        let mut ambiguous = with_default_entry(1);
        let mut second = ambiguous.providers.machine_mode_defaults.entries[0].clone();
        second.reason = ReasonId(2);
        ambiguous.providers.machine_mode_defaults.entries.push(second.clone());
        assert!(matches!(
            ConfigLoader::validate(&ambiguous),
            Err(ConfigError::ValidationFailed(_))
        ));
        let last = ambiguous.providers.machine_mode_defaults.entries.len() - 1;
        ambiguous.providers.machine_mode_defaults.entries[last].maximum_duration_secs = Some(0);
        assert!(ConfigLoader::validate(&ambiguous).is_err());
        ambiguous.providers.machine_mode_defaults.entries[last].maximum_duration_secs = Some(120);
        assert!(ConfigLoader::validate(&ambiguous).is_ok());

        let mut config = with_default_entry(1);
        config.reasons.push(Reason::new(1, "Again"));
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::DuplicateReason(ReasonId(1)))
        ));
    }

    #[test]
    fn test_env_override() {
        temp_env::with_vars(
            [
                ("REASONFLOW_ENGINE__MAX_PIECES", Some("4")),
                ("REASONFLOW_LOGGING__LEVEL", Some("debug")),
            ],
            || {
                let config = ConfigLoader::load().expect("config should load");
                assert_eq!(config.engine.max_pieces, 4);
                assert_eq!(config.logging.level, "debug");
                assert_eq!(config.worker.channel_capacity, 256);
            },
        );
    }

    #[test]
    fn test_invalid_env_value_rejected() {
        temp_env::with_var("REASONFLOW_WORKER__BATCH_SIZE", Some("0"), || {
            assert!(ConfigLoader::load().is_err());
        });
    }

    #[test]
    fn test_hierarchical_merging() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let mut base_file = NamedTempFile::new().unwrap();
        writeln!(
            base_file,
            "engine:\n  max_pieces: 5\nlogging:\n  level: info\n  format: json"
        )
        .unwrap();
        base_file.flush().unwrap();

        let mut override_file = NamedTempFile::new().unwrap();
        writeln!(
            override_file,
            "engine:\n  max_pieces: 12\nlogging:\n  level: debug"
        )
        .unwrap();
        override_file.flush().unwrap();

        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(base_file.path()))
            .merge(Yaml::file(override_file.path()))
            .extract()
            .unwrap();

        assert_eq!(config.engine.max_pieces, 12, "Override should win");
        assert_eq!(
            config.logging.level, "debug",
            "Override should win for nested fields"
        );
        assert_eq!(
            config.logging.format, "json",
            "Base value should persist when not overridden"
        );
        assert!(config.engine.early_exit, "Defaults fill untouched fields");
    }

    #[test]
    fn test_load_from_file() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "reasons:\n  - id: 3\n    name: Setup\nproviders:\n  scheduled:\n    windows:\n      - name: lunch\n        start: \"12:00:00\"\n        end: \"12:30:00\"\n        reason: 3\n        score: 20.0"
        )
        .unwrap();
        file.flush().unwrap();

        let config = ConfigLoader::load_from_file(file.path()).unwrap();
        assert_eq!(config.providers.scheduled.windows.len(), 1);
        assert_eq!(config.providers.scheduled.windows[0].reason, ReasonId(3));
    }
}
