//! Hybrid runtime error types
//!
//! Transaction-level failures never leave the runtime; only configuration
//! problems are reported to the caller, before any transaction runs.

use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A field holds a value the runtime cannot work with
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        /// Field name
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },

    /// Configuration text could not be parsed
    #[error("failed to parse configuration: {0}")]
    Parse(String),

    /// Hardware transactions were required but the capability has none
    #[error("hardware transactions required but the {backend} backend does not support them")]
    HtmUnavailable {
        /// Capability name
        backend: &'static str,
    },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}

/// Result type for configuration
pub type ConfigResult<T> = Result<T, ConfigError>;
