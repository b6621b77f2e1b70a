// ABOUTME: Validation errors raised eagerly by fragment builder operations.
// ABOUTME: Every variant names the offending field so callers can point at it.

use crate::types::{ResourceKind, ResourceNameError};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid name '{value}': {source}")]
    InvalidName {
        value: String,
        #[source]
        source: ResourceNameError,
    },

    #[error("unknown {kind} directive '{key}'")]
    UnknownDirective { kind: ResourceKind, key: String },

    #[error("invalid value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("conflicting '{field}': {reason}")]
    Conflict { field: &'static str, reason: String },
}

impl ValidationError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }

    pub fn conflict(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Conflict {
            field,
            reason: reason.into(),
        }
    }

    /// The field or directive the error refers to.
    pub fn field(&self) -> &str {
        match self {
            ValidationError::InvalidName { .. } => "name",
            ValidationError::UnknownDirective { key, .. } => key,
            ValidationError::InvalidValue { field, .. } => field,
            ValidationError::Conflict { field, .. } => field,
        }
    }
}
