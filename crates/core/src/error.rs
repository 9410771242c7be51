//! Core error types
//!
//! Every crate in the workspace carries its own error enum. Each variant maps
//! onto exactly one [`ErrorKind`], which is the taxonomy callers match on when
//! turning a failure into a structured response.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error taxonomy shared by the ledger, signing, consensus and bridge layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing or malformed required fields
    Validation,
    /// Unknown session, declaration, bridge or validator
    NotFound,
    /// Attempted mutation of a persisted ledger row
    ImmutableViolation,
    /// No key pair registered for the signer
    KeyNotFound,
    /// Token failed cryptographic, issuer, subject or expiry checks
    SignatureInvalid,
    /// Signed claims diverge from the current business object
    IntegrityMismatch,
    /// Weighted approval below the consensus threshold
    ConsensusThresholdNotMet,
    /// Agent does not meet validator admission requirements
    ValidatorRequirementsNotMet,
    /// Bridge establishment refused
    TrustThresholdNotMet,
    /// Caller is not allowed to perform the operation
    Unauthorized,
    /// Duplicate active record, stale version or illegal state transition
    Conflict,
    /// Backing store failure
    Storage,
    /// Invalid or unreadable configuration
    Configuration,
}

impl ErrorKind {
    /// Stable machine-readable name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation_error",
            ErrorKind::NotFound => "not_found",
            ErrorKind::ImmutableViolation => "immutable_violation",
            ErrorKind::KeyNotFound => "key_not_found",
            ErrorKind::SignatureInvalid => "signature_invalid",
            ErrorKind::IntegrityMismatch => "integrity_mismatch",
            ErrorKind::ConsensusThresholdNotMet => "consensus_threshold_not_met",
            ErrorKind::ValidatorRequirementsNotMet => "validator_requirements_not_met",
            ErrorKind::TrustThresholdNotMet => "trust_threshold_not_met",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Storage => "storage_error",
            ErrorKind::Configuration => "configuration_error",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Core error type
#[derive(Debug, Error)]
pub enum CoreError {
    /// A required field is missing or malformed
    #[error("Invalid field '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    /// Configuration could not be loaded or failed validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        CoreError::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::InvalidField { .. } => ErrorKind::Validation,
            CoreError::Config(_) => ErrorKind::Configuration,
            CoreError::Serialization(_) => ErrorKind::Validation,
            CoreError::Io(_) => ErrorKind::Storage,
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
