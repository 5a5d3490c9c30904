//! Error types for the monitor.

use thiserror::Error;

/// Main error type for monitor operations.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Registration token generation failed: {0}")]
    TokenGeneration(String),

    #[error("Reducer failed for {key}: {reason}")]
    Reducer { key: String, reason: String },

    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("Integer overflow: {0}")]
    Overflow(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),
}

impl MonitorError {
    /// Build a reducer failure for `key`.
    pub fn reducer(key: impl Into<String>, reason: impl Into<String>) -> Self {
        MonitorError::Reducer {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for MonitorError {
    fn from(e: serde_json::Error) -> Self {
        MonitorError::Serialization(e.to_string())
    }
}

impl From<rand::Error> for MonitorError {
    fn from(e: rand::Error) -> Self {
        MonitorError::TokenGeneration(e.to_string())
    }
}

/// Result type for monitor operations.
pub type Result<T> = std::result::Result<T, MonitorError>;
