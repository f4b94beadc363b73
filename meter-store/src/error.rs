use std::time::Duration;

use crate::domain::Field;

/// A record that the store refuses to persist.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("timestamp is required")]
    MissingTimestamp,
    #[error("timestamp {0} is not representable as a UTC instant")]
    TimestampOutOfRange(i64),
    #[error("{field} must be a finite number, got {value}")]
    NonFinite { field: Field, value: f64 },
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("invalid record: {0}")]
    Validation(#[from] ValidationError),
    #[error("record {0} not found")]
    NotFound(i64),
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),
}

impl StoreError {
    /// Whether repeating the same call could succeed. The store itself never
    /// retries; this is a hint for callers with their own retry policy.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Storage(_) | StoreError::Timeout(_))
    }
}
