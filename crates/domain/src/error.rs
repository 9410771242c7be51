//! Domain errors
//!
//! Pure domain errors with no infrastructure dependencies

use thiserror::Error;
use trustproto_core::ErrorKind;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Validation error: {field}: {reason}")]
    ValidationError { field: String, reason: String },

    #[error("Declaration not found: {0}")]
    DeclarationNotFound(String),

    #[error("Identity not found: {0}")]
    IdentityNotFound(String),

    #[error("Declaration already exists: {0}")]
    DuplicateDeclaration(String),

    #[error("Storage error: {0}")]
    StorageError(String),
}

impl DomainError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        DomainError::ValidationError {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DomainError::ValidationError { .. } => ErrorKind::Validation,
            DomainError::DeclarationNotFound(_) | DomainError::IdentityNotFound(_) => {
                ErrorKind::NotFound
            }
            DomainError::DuplicateDeclaration(_) => ErrorKind::Conflict,
            DomainError::StorageError(_) => ErrorKind::Storage,
        }
    }
}

pub type Result<T> = std::result::Result<T, DomainError>;
