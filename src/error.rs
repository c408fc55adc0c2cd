//! Error types for the decision core.

use thiserror::Error;

use crate::broker::BrokerError;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum CoreError {
    /// An input failed validation and was not coerced
    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    /// Context length differs from the policy's model dimension
    #[error("context dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("unknown action id {0}")]
    UnknownAction(u8),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

impl CoreError {
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }
}

/// Fail with a validation error unless `value` is finite and strictly positive.
pub(crate) fn ensure_positive(field: &'static str, value: f64) -> CoreResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(CoreError::validation(field, format!("must be positive, got {value}")))
    }
}
