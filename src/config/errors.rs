//! Configuration error types
//!
//! A rejected configuration is never partially applied.

use crate::model::ModelError;
use std::io;
use thiserror::Error;

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    #[error("Failed to read configuration: {0}")]
    Io(#[from] io::Error),

    #[error("Configuration rejected by the model: {0}")]
    Model(#[from] ModelError),
}

impl ConfigError {
    pub fn invalid(message: impl Into<String>) -> Self {
        ConfigError::InvalidConfiguration(message.into())
    }
}
