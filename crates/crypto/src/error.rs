//! Errors raised by key management and declaration signing.

use thiserror::Error;
use trustproto_core::ErrorKind;

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("Invalid field '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    #[error("Serialization error: {reason}")]
    SerializationError { reason: String },

    #[error("Key not found for owner: {owner_id}")]
    KeyNotFound { owner_id: String },

    #[error("Signature invalid: {reason}")]
    SignatureInvalid { reason: String },

    #[error("Signed payload diverges from current object at '{field}'")]
    IntegrityMismatch { field: String },

    #[error("Cryptographic error: {reason}")]
    CryptoError { reason: String },

    #[error("Key store error: {0}")]
    StorageError(#[from] rusqlite::Error),

    #[error("Stored key for {owner_id} is unreadable: {reason}")]
    CorruptKey { owner_id: String, reason: String },
}

impl SigningError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        SigningError::SignatureInvalid {
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SigningError::InvalidField { .. } | SigningError::SerializationError { .. } => {
                ErrorKind::Validation
            }
            SigningError::KeyNotFound { .. } => ErrorKind::KeyNotFound,
            SigningError::SignatureInvalid { .. } => ErrorKind::SignatureInvalid,
            SigningError::IntegrityMismatch { .. } => ErrorKind::IntegrityMismatch,
            SigningError::CryptoError { .. } => ErrorKind::Configuration,
            SigningError::StorageError(_) | SigningError::CorruptKey { .. } => ErrorKind::Storage,
        }
    }
}

impl From<serde_json::Error> for SigningError {
    fn from(e: serde_json::Error) -> Self {
        SigningError::SerializationError {
            reason: e.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SigningError>;
