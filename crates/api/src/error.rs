//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use common::ValidationError;
use saga::{ErrorKind, SagaError};
use thiserror::Error;

/// API-level error type that maps to HTTP responses.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Saga execution error.
    #[error(transparent)]
    Saga(#[from] SagaError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Saga(err) => match err.kind() {
                ErrorKind::Validation => StatusCode::BAD_REQUEST,
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::Conflict => StatusCode::CONFLICT,
                ErrorKind::Persistence
                | ErrorKind::Publish
                | ErrorKind::Compensation
                | ErrorKind::Cancelled => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::Saga(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "internal server error");
        }

        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use common::EntityId;
    use saga::PublishFailure;

    use super::*;

    #[test]
    fn saga_errors_map_to_statuses() {
        let cases = [
            (
                SagaError::from(ValidationError::required("name")),
                StatusCode::BAD_REQUEST,
            ),
            (
                SagaError::NotFound {
                    aggregate_type: "category",
                    id: EntityId::new("x"),
                },
                StatusCode::NOT_FOUND,
            ),
            (
                SagaError::Conflict {
                    aggregate_type: "category",
                    key: "poetry".into(),
                },
                StatusCode::CONFLICT,
            ),
            (
                SagaError::Publish(PublishFailure::Cancelled),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (SagaError::Cancelled, StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn validation_message_is_kept() {
        let err = ApiError::from(SagaError::from(ValidationError::range("file", "1 B", "10 MB")));
        assert_eq!(
            err.to_string(),
            "request field file is out of range, expected from 1 B to 10 MB"
        );
    }
}
