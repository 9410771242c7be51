//! Trust Mesh
//!
//! This crate implements the trust-evaluation layer of the protocol:
//! - Validator admission and reputation-weighted consensus over declarations
//! - Human and agent trust scoring with itemized cross-validation
//! - Trust bridge lifecycle: establish, interact, decay, revoke, expire
//! - Persistent bridge stores and the periodic decay task
//! - The `TrustProtocol` facade that applies caller authorization
//!
//! The ledger and signature service live in `trustproto-core` and
//! `trustproto-crypto`; this crate composes them.

pub mod bridge;
pub mod consensus;
pub mod decay;
pub mod scoring;
pub mod service;
pub mod store;

pub use bridge::{
    BridgeError, BridgeOptions, BridgeStatus, DecayOutcome, DecaySweepReport, Interaction,
    InteractionOutcome, InteractionRecord, TrustAssessment, TrustBridge, TrustBridgeManager,
    TrustDecay, DECAY_EXPIRY_REASON, DEFAULT_REVOCATION_REASON, LIFETIME_EXPIRY_REASON,
};
pub use consensus::{
    latest_votes, ConsensusEngine, ConsensusError, ConsensusResult, ValidatorRecord,
    ValidatorRequirements,
};
pub use decay::spawn_decay_task;
pub use scoring::{
    agent_trust_score, human_trust_score, mutual_trust_score, validate_agent_for_human,
    validate_human_for_agent, validator_weight, DeclarationStats, ScoringPolicy, ValidationCheck,
    ValidationReport, MIN_VALIDATOR_WEIGHT,
};
pub use service::{
    Caller, DeclarationSummary, DeclarationVerification, NewDeclaration, ProtocolError, Role,
    TrustProtocol,
};
pub use store::{BridgeStore, InMemoryBridgeStore, SqliteBridgeStore};
