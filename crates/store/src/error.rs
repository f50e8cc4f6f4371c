use thiserror::Error;

use crate::EntityId;

/// Errors that can occur when interacting with a repository or object store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No live row exists for the id.
    #[error("{aggregate_type} not found: {id}")]
    NotFound {
        aggregate_type: &'static str,
        id: EntityId,
    },

    /// Another row already holds the unique key.
    #[error("{aggregate_type} already exists with key {key}")]
    Conflict {
        aggregate_type: &'static str,
        key: String,
    },

    /// The object store has no payload under the key.
    #[error("object not found: {scope}/{key}")]
    ObjectNotFound { key: String, scope: String },

    /// The backend rejected or could not serve the request.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A filesystem error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Returns true for missing rows or payloads.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::NotFound { .. } | StoreError::ObjectNotFound { .. }
        )
    }

    /// Returns true for unique key violations.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
