//! Error types for formwork core operations.

use thiserror::Error;

/// Main error type for core operations (configuration, serialization).
#[derive(Error, Debug)]
pub enum FormworkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, FormworkError>;
