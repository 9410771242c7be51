//! Domain module for the trust protocol
//!
//! This crate contains the business objects shared by signing, consensus
//! and the trust bridge:
//! - Trust declarations, their articles, ballots and audit history
//! - Human identity records from the verification collaborator
//! - Storage seams for declarations and identities

pub mod declaration;
pub mod error;
pub mod identity;
pub mod store;

pub use declaration::{
    AuditAction, AuditEntry, ConsensusRecord, DeclarationPayload, SignatureEnvelope,
    TrustArticles, TrustDeclaration, Vote, WeightedVote,
};
pub use error::{DomainError, Result};
pub use identity::{
    ConfidenceComponents, ConsentRecord, HumanIdentityRecord, IdentityRegistry,
    InMemoryIdentityRegistry, VerificationStatus,
};
pub use store::{DeclarationMutation, DeclarationStore, InMemoryDeclarationStore};
