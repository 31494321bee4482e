//! # Entity Model Errors

use super::ids::EntityId;
use thiserror::Error;

/// Result type for entity model operations
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised by the entity model and the operations built on it
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("Entity already exists: {0}")]
    AlreadyExists(String),

    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Entity in use: {0}")]
    InUse(String),

    #[error("Dependency {dependent} -> {sponsor} would create a cycle")]
    CyclicDependency { sponsor: String, dependent: String },

    #[error("Dependency {dependent} -> {sponsor} already exists")]
    DependencyAlreadyExists { sponsor: String, dependent: String },

    #[error("Unit not in service: {0}")]
    UnitNotInService(String),

    #[error("Capacity exceeded on unit {0}")]
    CapacityExceeded(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Controller is not active")]
    NotActive,
}

impl ModelError {
    /// Not-found error for a typed id.
    pub fn missing(id: impl Into<EntityId>) -> Self {
        ModelError::NotFound(id.into().to_string())
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        ModelError::InvalidState(message.into())
    }
}
