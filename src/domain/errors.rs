//! Domain errors for the reason consolidation engine.

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::models::MachineId;

/// Domain-level errors raised while building or validating domain values.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    #[error("Empty or inverted time range [{lower}, {upper})")]
    EmptyRange {
        lower: DateTime<Utc>,
        upper: DateTime<Utc>,
    },

    #[error("Unknown flag name: {0}")]
    UnknownFlag(String),

    #[error("Unknown reason source: {0}")]
    UnknownReasonSource(String),

    #[error("Partition violation on machine {machine_id}: {detail}")]
    PartitionViolation { machine_id: MachineId, detail: String },

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

pub type DomainResult<T> = Result<T, DomainError>;
