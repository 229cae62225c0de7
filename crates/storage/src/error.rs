use common::{OrderId, ParseStatusError};
use thiserror::Error;

/// Errors that can occur when interacting with storage.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The row was modified by someone else since it was read.
    #[error(
        "Concurrency conflict for order {order_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        order_id: OrderId,
        expected: i64,
        actual: i64,
    },

    /// A row with the same unique key already exists.
    #[error("Duplicate {entity}: {key}")]
    Duplicate { entity: &'static str, key: String },

    /// The referenced row does not exist.
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    /// The backend is unavailable or refused the write.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// A stored value could not be decoded.
    #[error("Invalid stored data: {0}")]
    InvalidData(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<ParseStatusError> for StoreError {
    fn from(e: ParseStatusError) -> Self {
        StoreError::InvalidData(e.to_string())
    }
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;
