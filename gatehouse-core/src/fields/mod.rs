//! Dynamic user fields: validation and storage

mod persistence;
mod validator;

pub use persistence::{FieldPersistence, StorageMode};
pub use validator::{coerce, is_boolean_like, is_numeric, parse_date, FieldValidator};

use crate::descriptor::FieldType;
use crate::error::Result;
use crate::types::{PrincipalId, Value};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a field was rejected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldErrorKind {
    /// Absent or null while required
    Required,
    /// Value does not match the declared type
    Type {
        /// Declared type
        expected: FieldType,
    },
    /// Another principal already holds the value
    Unique,
}

/// One rejected field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Field name
    pub field: String,
    /// Cause
    #[serde(flatten)]
    pub kind: FieldErrorKind,
}

impl FieldError {
    /// Create a field error
    pub fn new(field: impl Into<String>, kind: FieldErrorKind) -> Self {
        FieldError {
            field: field.into(),
            kind,
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            FieldErrorKind::Required => write!(f, "The {} field is required.", self.field),
            FieldErrorKind::Type { expected } => {
                write!(f, "The {} field must be of type {}.", self.field, expected)
            }
            FieldErrorKind::Unique => write!(f, "The {} field must be unique.", self.field),
        }
    }
}

/// Finds principals holding a dynamic field value
pub trait FieldLookup: Send + Sync {
    /// Principals whose `field` equals `value`
    fn principals_with(&self, field: &str, value: &Value) -> Result<Vec<PrincipalId>>;
}
