use thiserror::Error;

use parley_core::error::ParleyError;

/// Errors that can occur during persistence operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A SQLite operation failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A record could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// `create` was called for a session id that already has a row.
    #[error("session already exists: {id}")]
    AlreadyExists { id: String },

    /// The backing store could not be reached.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for ParleyError {
    fn from(err: StoreError) -> Self {
        ParleyError::PersistenceDegraded(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
