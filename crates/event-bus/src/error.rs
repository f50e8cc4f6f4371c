//! Event bus error types.

use thiserror::Error;

/// Errors that can occur while publishing or consuming events.
#[derive(Debug, Error)]
pub enum EventBusError {
    /// The broker could not take the message.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The circuit breaker guarding the call is open.
    #[error("circuit breaker '{breaker}' is open")]
    BreakerOpen { breaker: String },

    /// The half-open circuit breaker already admitted its probe requests.
    #[error("circuit breaker '{breaker}' rejected the request: too many requests")]
    TooManyRequests { breaker: String },

    /// A required metadata key is missing from an inbound message.
    #[error("missing message metadata: {0}")]
    MissingMetadata(&'static str),

    /// The subscription or broker has been closed.
    #[error("broker closed")]
    Closed,

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EventBusError {
    /// Returns true if the call was rejected by a circuit breaker without
    /// reaching the transport.
    pub fn is_breaker_rejection(&self) -> bool {
        matches!(
            self,
            EventBusError::BreakerOpen { .. } | EventBusError::TooManyRequests { .. }
        )
    }
}

/// Convenience type alias for event bus results.
pub type Result<T> = std::result::Result<T, EventBusError>;
