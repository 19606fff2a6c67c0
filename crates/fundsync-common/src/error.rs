//! Error types shared across fundsync crates

use thiserror::Error;

/// Result type alias for fundsync operations
pub type Result<T> = std::result::Result<T, FundsyncError>;

#[derive(Error, Debug)]
pub enum FundsyncError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid value for {key}: '{value}' ({reason})")]
    InvalidEnv {
        key: String,
        value: String,
        reason: String,
    },
}
