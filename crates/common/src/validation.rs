//! Validation failure descriptions.

use thiserror::Error;

/// A typed validation failure.
///
/// Messages keep the offending field and the accepted range or format so the
/// transport layer can hand them to clients verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field is missing or blank.
    #[error("missing required request field {field}")]
    RequiredField { field: String },

    /// A field does not match the expected format.
    #[error("request field {field} has an invalid format, expected {expected}")]
    InvalidFieldFormat { field: String, expected: String },

    /// A field is outside its accepted range.
    #[error("request field {field} is out of range, expected from {min} to {max}")]
    InvalidFieldRange {
        field: String,
        min: String,
        max: String,
    },
}

impl ValidationError {
    pub fn required(field: impl Into<String>) -> Self {
        Self::RequiredField {
            field: field.into(),
        }
    }

    pub fn format(field: impl Into<String>, expected: impl Into<String>) -> Self {
        Self::InvalidFieldFormat {
            field: field.into(),
            expected: expected.into(),
        }
    }

    pub fn range(field: impl Into<String>, min: impl Into<String>, max: impl Into<String>) -> Self {
        Self::InvalidFieldRange {
            field: field.into(),
            min: min.into(),
            max: max.into(),
        }
    }

    /// Returns the name of the offending field.
    pub fn field(&self) -> &str {
        match self {
            ValidationError::RequiredField { field }
            | ValidationError::InvalidFieldFormat { field, .. }
            | ValidationError::InvalidFieldRange { field, .. } => field,
        }
    }
}
