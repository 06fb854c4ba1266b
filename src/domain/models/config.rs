use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::reason::{Reason, ReasonId};
use super::slot::{MachineModeId, MachineObservationStateId};

/// Main configuration structure for reasonflow
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Consolidation engine tuning
    #[serde(default)]
    pub engine: EngineConfig,

    /// Per-machine worker pool
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Retry policy for retryable consolidation failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Reason reference data
    #[serde(default)]
    pub reasons: Vec<Reason>,

    /// Built-in provider tables
    #[serde(default)]
    pub providers: ProvidersConfig,
}

impl Config {
    pub fn reason(&self, id: ReasonId) -> Option<&Reason> {
        self.reasons.iter().find(|r| r.id == id)
    }
}

/// Consolidation engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct EngineConfig {
    /// Maximum number of pieces one trigger slot may be cut into by
    /// narrowing and splitting
    #[serde(default = "default_max_pieces")]
    pub max_pieces: usize,

    /// Score given to manual reasons that do not carry their own
    #[serde(default = "default_manual_score")]
    pub manual_score: f64,

    /// Skip providers that cannot beat the best score seen so far
    #[serde(default = "default_true")]
    pub early_exit: bool,
}

const fn default_max_pieces() -> usize {
    4096
}

const fn default_manual_score() -> f64 {
    100.0
}

const fn default_true() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_pieces: default_max_pieces(),
            manual_score: default_manual_score(),
            early_exit: true,
        }
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct WorkerConfig {
    /// Capacity of each machine's trigger channel
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Slots loaded per page during batch re-evaluation
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

const fn default_channel_capacity() -> usize {
    256
}

const fn default_batch_size() -> usize {
    50
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            batch_size: default_batch_size(),
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to `SQLite` database file
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".reasonflow/reasonflow.db".to_string()
}

const fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stdout only when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,

    /// Rotation of the log files: daily, hourly or never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial backoff delay in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff delay in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_initial_backoff_ms() -> u64 {
    50
}

const fn default_max_backoff_ms() -> u64 {
    2_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// Built-in provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ProvidersConfig {
    #[serde(default)]
    pub machine_mode_defaults: MachineModeDefaultsConfig,

    #[serde(default = "ProviderToggle::manual")]
    pub manual: ProviderToggle,

    #[serde(default = "ProviderToggle::proposals")]
    pub proposals: ProviderToggle,

    #[serde(default)]
    pub scheduled: ScheduledReasonsConfig,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            machine_mode_defaults: MachineModeDefaultsConfig::default(),
            manual: ProviderToggle::manual(),
            proposals: ProviderToggle::proposals(),
            scheduled: ScheduledReasonsConfig::default(),
        }
    }
}

/// Enables a provider and sets its tie-break priority
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ProviderToggle {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub priority: i32,
}

impl ProviderToggle {
    fn manual() -> Self {
        Self {
            enabled: true,
            priority: 100,
        }
    }

    fn proposals() -> Self {
        Self {
            enabled: true,
            priority: 50,
        }
    }
}

impl Default for ProviderToggle {
    fn default() -> Self {
        Self {
            enabled: true,
            priority: 0,
        }
    }
}

/// Default reasons per machine mode
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MachineModeDefaultsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub priority: i32,

    #[serde(default)]
    pub entries: Vec<MachineModeDefaultEntry>,
}

impl Default for MachineModeDefaultsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            priority: 0,
            entries: vec![],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MachineModeDefaultEntry {
    pub machine_mode: MachineModeId,

    /// Any observation state when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_observation_state: Option<MachineObservationStateId>,

    pub reason: ReasonId,

    #[serde(default)]
    pub score: f64,

    #[serde(default)]
    pub overwrite_required: bool,

    /// Propose the reason as an auto reason instead of a default one
    #[serde(default)]
    pub auto: bool,

    /// Longest slot, in seconds, the entry applies to; unbounded when unset.
    /// Among the entries of a mode and state, the one with the smallest
    /// maximum that the slot fits in is chosen.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum_duration_secs: Option<u64>,
}

impl MachineModeDefaultEntry {
    pub fn maximum_duration(&self) -> Option<chrono::Duration> {
        self.maximum_duration_secs
            .and_then(|secs| i64::try_from(secs).ok())
            .map(chrono::Duration::seconds)
    }

    /// Whether a slot lasting `duration` is short enough for this entry.
    pub fn accepts(&self, duration: chrono::Duration) -> bool {
        self.maximum_duration().map_or(true, |max| duration <= max)
    }
}

/// Daily scheduled reason windows
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ScheduledReasonsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_scheduled_priority")]
    pub priority: i32,

    #[serde(default)]
    pub windows: Vec<ScheduledWindowConfig>,
}

const fn default_scheduled_priority() -> i32 {
    10
}

impl Default for ScheduledReasonsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            priority: default_scheduled_priority(),
            windows: vec![],
        }
    }
}

/// A window repeated every day, in UTC. A window whose end is not after its
/// start runs past midnight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ScheduledWindowConfig {
    pub name: String,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub reason: ReasonId,
    pub score: f64,

    /// Machine modes the window applies to; all modes when empty
    #[serde(default)]
    pub machine_modes: Vec<MachineModeId>,

    #[serde(default)]
    pub overwrite_required: bool,
}
