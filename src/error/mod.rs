//! Error handling for the key pool.
//!
//! `PoolError` covers configuration, storage and key-management failures.
//! Errors produced by caller-supplied operations never pass through here; the
//! executor wraps them in [`crate::pool::ExecuteError`] instead.

pub mod types;

use thiserror::Error;
use tracing::{error, warn};

/// Main error type with categorization by subsystem
#[derive(Error, Debug)]
pub enum PoolError {
    // Configuration errors
    #[error("Configuration validation failed: {message}")]
    ConfigValidation { message: String, field: Option<String> },

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    #[error("Configuration parse error: {message}")]
    ConfigParse { message: String, line: Option<usize> },

    // Storage errors
    #[error("Redis connection failed: {message}")]
    RedisConnection { message: String },

    #[error("Redis operation failed: {operation} - {message}")]
    RedisOperation { operation: String, message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("IO operation failed: {operation} - {message}")]
    Io { operation: String, message: String },

    // Key management
    #[error("API key not found: {key_id}")]
    KeyNotFound { key_id: String },

    // Validation errors
    #[error("Validation failed: {field} - {message}")]
    Validation { field: String, message: String },
}

impl PoolError {
    /// Create a new configuration validation error
    pub fn config_validation(message: impl Into<String>, field: Option<impl Into<String>>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
            field: field.map(Into::into),
        }
    }

    /// Create a new validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn key_not_found(key_id: impl Into<String>) -> Self {
        Self::KeyNotFound {
            key_id: key_id.into(),
        }
    }

    /// Short machine-readable category, used as a log field.
    pub fn category(&self) -> &'static str {
        match self {
            Self::ConfigValidation { .. }
            | Self::ConfigNotFound { .. }
            | Self::ConfigParse { .. } => "configuration",
            Self::RedisConnection { .. }
            | Self::RedisOperation { .. }
            | Self::Serialization { .. }
            | Self::Io { .. } => "storage",
            Self::KeyNotFound { .. } => "key-management",
            Self::Validation { .. } => "validation",
        }
    }

    /// Whether the failure lies with the environment rather than the input.
    pub fn is_storage_failure(&self) -> bool {
        self.category() == "storage"
    }

    /// Log the error with appropriate level
    pub fn log(&self, operation: &str) {
        if self.is_storage_failure() {
            error!(
                error = %self,
                error.category = self.category(),
                operation,
                "Key pool operation failed"
            );
        } else {
            warn!(
                error = %self,
                error.category = self.category(),
                operation,
                "Key pool operation rejected"
            );
        }
    }
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, PoolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(PoolError::key_not_found("abc").category(), "key-management");
        assert_eq!(
            PoolError::config_validation("bad", Some("pool.concurrency")).category(),
            "configuration"
        );
        assert!(PoolError::Io {
            operation: "write_store".to_string(),
            message: "disk full".to_string()
        }
        .is_storage_failure());
        assert!(!PoolError::validation("name", "empty").is_storage_failure());
    }

    #[test]
    fn test_error_display() {
        let err = PoolError::key_not_found("abc");
        assert_eq!(err.to_string(), "API key not found: abc");
    }
}
