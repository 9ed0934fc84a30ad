//! Error types for ADREP

use thiserror::Error;

/// Result type alias for ADREP operations
pub type Result<T> = std::result::Result<T, AdrepError>;

/// Main error type for ADREP
#[derive(Error, Debug)]
pub enum AdrepError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Logging error: {0}")]
    Logging(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl AdrepError {
    /// Shorthand for building a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        AdrepError::Config(message.into())
    }
}
