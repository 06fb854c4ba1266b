use thiserror::Error;
use uuid::Uuid;

use crate::domain::errors::DomainError;
use crate::domain::models::MachineId;

/// Slot repository errors
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Query failed: {0}")]
    QueryFailed(#[from] sqlx::Error),

    #[error("Reason slot not found: {0}")]
    SlotNotFound(Uuid),

    #[error("Stale reason slot {id}: expected version {expected}, found {found}")]
    StaleSlot { id: Uuid, expected: u32, found: u32 },

    #[error("Partition violation on machine {machine_id}: {detail}")]
    PartitionViolation { machine_id: MachineId, detail: String },

    #[error("Invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(#[from] chrono::ParseError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Invalid stored data: {0}")]
    InvalidData(String),

    #[error("Connection pool error: {0}")]
    ConnectionPoolError(String),

    #[error("Migration error: {0}")]
    MigrationError(String),
}

impl RepositoryError {
    /// The slot set changed underneath the caller; retrying from a fresh
    /// read may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StaleSlot { .. } | Self::QueryFailed(sqlx::Error::PoolTimedOut)
        )
    }
}

impl From<DomainError> for RepositoryError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::PartitionViolation { machine_id, detail } => {
                Self::PartitionViolation { machine_id, detail }
            }
            other => Self::InvalidData(other.to_string()),
        }
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Reason provider errors
///
/// Always recovered by the engine: the provider is skipped for the current
/// pass and the error logged.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Provider {provider} unavailable: {reason}")]
    Unavailable { provider: String, reason: String },

    #[error("Provider {provider} holds invalid data: {reason}")]
    InvalidData { provider: String, reason: String },

    #[error("Provider {0} found a batch cache of another type")]
    CacheMismatch(String),

    #[error("Provider {provider} failed: {source}")]
    Failed {
        provider: String,
        #[source]
        source: anyhow::Error,
    },
}

impl ProviderError {
    pub fn unavailable(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_data(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidData {
            provider: provider.into(),
            reason: reason.into(),
        }
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;
