//! Saga error types.

use common::{EntityId, ValidationError};
use event_bus::EventBusError;
use store::StoreError;
use thiserror::Error;

use crate::dispatch::PublishFailure;

/// Coarse classification of a [`SagaError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Persistence,
    Publish,
    Compensation,
    Cancelled,
}

impl ErrorKind {
    /// True when the operation failed and left the stores untouched
    /// (or restored them).
    pub fn nothing_changed(&self) -> bool {
        !matches!(self, ErrorKind::Compensation)
    }
}

/// Errors that can occur during saga operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// Bad input; nothing was written.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{aggregate_type} not found: {id}")]
    NotFound {
        aggregate_type: &'static str,
        id: EntityId,
    },

    /// A unique field is already taken.
    #[error("{aggregate_type} already exists with key {key}")]
    Conflict {
        aggregate_type: &'static str,
        key: String,
    },

    /// The store was unreachable or rejected the write; nothing to undo.
    #[error("Persistence error: {0}")]
    Persistence(StoreError),

    /// The event could not be published; the primary write was undone.
    #[error("Publish error: {0}")]
    Publish(#[from] PublishFailure),

    /// Undoing the primary write failed. The stores may be inconsistent.
    #[error("compensation of {operation} failed: {compensation_error} (after: {source_error})")]
    Compensation {
        operation: String,
        source_error: Box<SagaError>,
        compensation_error: StoreError,
    },

    /// The caller cancelled the operation before its primary write committed.
    #[error("operation cancelled")]
    Cancelled,
}

impl SagaError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SagaError::Validation(_) => ErrorKind::Validation,
            SagaError::NotFound { .. } => ErrorKind::NotFound,
            SagaError::Conflict { .. } => ErrorKind::Conflict,
            SagaError::Persistence(_) => ErrorKind::Persistence,
            SagaError::Publish(_) => ErrorKind::Publish,
            SagaError::Compensation { .. } => ErrorKind::Compensation,
            SagaError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

impl From<StoreError> for SagaError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { aggregate_type, id } => SagaError::NotFound { aggregate_type, id },
            StoreError::Conflict {
                aggregate_type,
                key,
            } => SagaError::Conflict {
                aggregate_type,
                key,
            },
            StoreError::ObjectNotFound { key, scope } => SagaError::NotFound {
                aggregate_type: "object",
                id: EntityId::new(format!("{scope}/{key}")),
            },
            other => SagaError::Persistence(other),
        }
    }
}

impl From<EventBusError> for SagaError {
    fn from(err: EventBusError) -> Self {
        SagaError::Publish(PublishFailure::Bus(err))
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
