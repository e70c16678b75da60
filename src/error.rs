use std::fmt;

use thiserror::Error;

/// Failures the core reports back to its caller.
///
/// Aggregation skips are not errors: a dangling reference during a rollup is
/// logged and recorded on the rollup itself.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    /// `key` is whatever the record was looked up by: an id or a username.
    #[error("{kind} {key} not found")]
    NotFound { kind: &'static str, key: String },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not authorized: {0}")]
    Unauthorized(String),
}

impl CoreError {
    pub fn not_found(kind: &'static str, key: impl fmt::Display) -> Self {
        CoreError::NotFound { kind, key: key.to_string() }
    }
}
