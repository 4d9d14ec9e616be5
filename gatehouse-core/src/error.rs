//! Error types for Gatehouse

use crate::fields::FieldError;
use thiserror::Error;

/// Main error type for Gatehouse operations
#[derive(Error, Debug)]
pub enum GatehouseError {
    /// Metadata scan target could not be located
    #[error("Target not found: {0}")]
    TargetNotFound(String),

    /// Referenced role is unknown to the RBAC store
    #[error("The role '{0}' was not found.")]
    RoleNotFound(String),

    /// Referenced permission is unknown to the RBAC store
    #[error("Permission '{0}' not found.")]
    PermissionNotFound(String),

    /// Dynamic field validation failed; carries every collected error
    #[error("Field validation failed: {}", join_field_errors(.0))]
    FieldValidationFailed(Vec<FieldError>),

    /// Underlying persistence layer failed
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// A write collided with a unique constraint
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A failed write could not be undone
    #[error("{cause}; rollback failed: {rollback}")]
    RollbackFailed {
        /// Error that triggered the rollback
        #[source]
        cause: Box<GatehouseError>,
        /// Error raised while rolling back
        rollback: Box<GatehouseError>,
    },

    /// A rule or field descriptor could not be constructed
    #[error("Invalid descriptor: {0}")]
    InvalidDescriptor(String),

    /// Two field descriptors on one entity share a name
    #[error("Duplicate field '{field}' declared on {entity}")]
    DuplicateField {
        /// Entity type name
        entity: String,
        /// Field name declared twice
        field: String,
    },

    /// User record does not exist
    #[error("User {0} not found")]
    UserNotFound(u64),

    /// Operation not supported by the configured backend
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Parse error in a declaration manifest
    #[error("Parse error: {0}")]
    ParseError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl GatehouseError {
    /// Field errors carried by a validation failure, empty otherwise
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            GatehouseError::FieldValidationFailed(errors) => errors,
            _ => &[],
        }
    }
}

fn join_field_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Result type alias for Gatehouse operations
pub type Result<T> = std::result::Result<T, GatehouseError>;
