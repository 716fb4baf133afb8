//! Error types for abuse detection.

use thiserror::Error;

/// Errors that can occur in the abuse detection layer.
///
/// Only configuration errors ever leave this crate. Malformed addresses are
/// absorbed by [`AdmissionGate`](crate::AdmissionGate) and tracked under their
/// raw text.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ShieldError {
    /// A threshold or setting failed validation at construction.
    #[error("Configuration error: {field}: {reason}")]
    Config {
        /// Name of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// A client address could not be parsed.
    #[error("Malformed address: {0:?}")]
    MalformedAddress(String),
}

impl ShieldError {
    /// Shorthand for a configuration error.
    pub(crate) fn config(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Config {
            field,
            reason: reason.into(),
        }
    }
}

/// Result type for abuse detection operations.
pub type ShieldResult<T> = Result<T, ShieldError>;
