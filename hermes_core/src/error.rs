//! Unified error handling for HERMES
//!
//! This module provides a centralized error type for the whole bus engine,
//! ensuring consistent error handling across all components.

use thiserror::Error;

/// Main error type for HERMES operations
#[derive(Debug, Error)]
pub enum HermesError {
    /// I/O related errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration parsing or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Bus name rejected at construction time
    #[error("Invalid bus name: {0}")]
    InvalidName(String),

    /// Log capacity rejected at construction time
    #[error("Invalid capacity: {0}")]
    InvalidCapacity(String),

    /// Reader count rejected at construction time
    #[error("Invalid reader count: {0}")]
    InvalidReaderCount(String),

    /// A public operation was invoked after disposal
    #[error("Bus is disposed")]
    Disposed,

    /// A single-message publish was handed an empty message
    #[error("Message must not be empty")]
    EmptyMessage,

    /// A payload can never fit the shared log capacity
    #[error("Payload of {size} bytes exceeds the {max} byte capacity")]
    PayloadTooLarge { size: usize, max: usize },

    /// A lock or gate acquisition exceeded its wait timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Cooperative cancellation was observed
    #[error("Operation canceled")]
    Canceled,

    /// The host cannot create system-global named primitives
    #[error("System primitive unavailable: {0}")]
    SystemPrimitiveUnavailable(String),

    /// The shared log bytes could not be decoded (torn or foreign write).
    /// Callers recover by treating the log as empty.
    #[error("Log decode error: {0}")]
    Decode(String),

    /// A background worker died unexpectedly
    #[error("Worker failure: {0}")]
    Worker(String),
}

/// Convenience type alias for Results using HermesError
pub type HermesResult<T> = std::result::Result<T, HermesError>;

impl From<serde_yaml::Error> for HermesError {
    fn from(err: serde_yaml::Error) -> Self {
        HermesError::Config(format!("YAML parse error: {}", err))
    }
}

impl HermesError {
    /// Create a timeout error naming the primitive that timed out
    pub fn timeout<S: Into<String>>(what: S) -> Self {
        HermesError::Timeout(what.into())
    }

    /// Create a primitive-unavailable error with the OS error attached
    pub fn primitive<S: Into<String>>(what: S, source: std::io::Error) -> Self {
        HermesError::SystemPrimitiveUnavailable(format!("{}: {}", what.into(), source))
    }
}
