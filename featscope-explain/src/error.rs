//! Error types for the featscope-explain crate.

use featscope_core::error::LookupError;
use thiserror::Error;

/// Top-level error type for explanation handling.
#[derive(Debug, Error)]
pub enum ExplainError {
    #[error("Lookup error: {0}")]
    Lookup(#[from] LookupError),

    #[error("Malformed attribution for '{name}': {reason}")]
    MalformedAttribution { name: String, reason: String },

    #[error("Invalid grouping: {0}")]
    InvalidGrouping(String),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

impl ExplainError {
    pub fn malformed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedAttribution {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_grouping(msg: impl Into<String>) -> Self {
        Self::InvalidGrouping(msg.into())
    }

    pub fn class_not_found(class_index: i64) -> Self {
        Self::Lookup(LookupError::ClassIndexNotFound { class_index })
    }
}

pub type Result<T> = std::result::Result<T, ExplainError>;
