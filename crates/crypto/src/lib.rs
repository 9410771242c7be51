//! Cryptographic primitives and operations for the trust protocol.
//!
//! This crate provides key management and the signature service used to
//! sign and verify trust declarations.
//!
//! # Core Capabilities
//!
//! - **Key Management**: One active Ed25519 key per signer identity, stored
//!   in memory or in SQLite, replaced on regeneration
//! - **Declaration Signing**: Compact EdDSA JWTs carrying the declaration's
//!   essential fields
//! - **Integrity Checks**: Signed claims are compared with the current object
//! - **Key Distribution**: Public keys exported as a JWK set
//!
//! # Security Principles
//!
//! - Secrets must never be logged or exported
//! - Private key bytes are zeroized when dropped
//! - All signatures must be verified before trust

pub mod error;
pub mod jwks;
pub mod keys;
pub mod signing;

pub use error::{Result, SigningError};
pub use jwks::{Jwk, PublicKeySet};
pub use keys::{generate_key_id, InMemoryKeyStore, KeyPair, KeyStore, SqliteKeyStore, ALGORITHM};
pub use signing::{
    DeclarationClaims, SignatureService, SigningMetrics, VerificationResult, NUMERIC_TOLERANCE,
};
