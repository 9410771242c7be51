//! Protocol facade.
//!
//! `TrustProtocol` is the single entry point external adapters call. It
//! wires the ledger, signature service, consensus engine and bridge
//! manager together and applies caller authorization before delegating.

use crate::bridge::{
    BridgeError, BridgeOptions, DecaySweepReport, Interaction, TrustBridge, TrustBridgeManager,
};
use crate::consensus::{
    latest_votes, ConsensusEngine, ConsensusError, ConsensusResult, ValidatorRecord,
};
use crate::scoring::ScoringPolicy;
use crate::store::BridgeStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use trustproto_core::{
    now_ms, ChainVerification, ErrorKind, HashChainLedger, IngestReceipt, IngestRequest,
    LedgerError, LedgerPage, ProtocolConfig, TimestampMs,
};
use trustproto_crypto::{PublicKeySet, SignatureService, SigningError, VerificationResult};
use trustproto_domain::{
    AuditAction, DeclarationStore, DomainError, IdentityRegistry, TrustArticles, TrustDeclaration,
    Vote,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    User,
    Agent,
    ValidatorAgent,
    Admin,
}

/// Authenticated principal behind a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub id: String,
    pub role: Role,
}

impl Caller {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Signing(#[from] SigningError),

    #[error(transparent)]
    Consensus(#[from] ConsensusError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error("{caller} may not {operation}")]
    Unauthorized { caller: String, operation: String },

    #[error("Invalid field '{field}': {reason}")]
    Validation { field: String, reason: String },
}

impl ProtocolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProtocolError::Ledger(e) => e.kind(),
            ProtocolError::Domain(e) => e.kind(),
            ProtocolError::Signing(e) => e.kind(),
            ProtocolError::Consensus(e) => e.kind(),
            ProtocolError::Bridge(e) => e.kind(),
            ProtocolError::Unauthorized { .. } => ErrorKind::Unauthorized,
            ProtocolError::Validation { .. } => ErrorKind::Validation,
        }
    }

    fn unauthorized(caller: &Caller, operation: &str) -> Self {
        warn!(caller = %caller.id, role = ?caller.role, operation = %operation, "Unauthorized request");
        ProtocolError::Unauthorized {
            caller: caller.id.clone(),
            operation: operation.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Input for `create_declaration`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDeclaration {
    pub agent_id: String,
    pub agent_name: String,
    pub trust_articles: TrustArticles,
    /// Defaults to the caller; only admins may set another owner
    #[serde(default)]
    pub owner_id: Option<String>,
}

/// Declaration fields returned alongside a verification result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeclarationSummary {
    pub declaration_id: String,
    pub agent_id: String,
    pub agent_name: String,
    pub compliance_score: f64,
    pub guilt_score: f64,
    pub signed_by: String,
    pub key_id: String,
    pub signed_at: TimestampMs,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeclarationVerification {
    pub verification: VerificationResult,
    pub declaration: DeclarationSummary,
}

pub struct TrustProtocol {
    ledger: Arc<HashChainLedger>,
    declarations: Arc<dyn DeclarationStore>,
    signer: Arc<SignatureService>,
    consensus: ConsensusEngine,
    bridges: Arc<TrustBridgeManager>,
}

impl TrustProtocol {
    pub fn new(
        config: &ProtocolConfig,
        ledger: Arc<HashChainLedger>,
        signer: Arc<SignatureService>,
        declarations: Arc<dyn DeclarationStore>,
        identities: Arc<dyn IdentityRegistry>,
        bridge_store: Arc<dyn BridgeStore>,
    ) -> Self {
        let consensus = ConsensusEngine::new(declarations.clone(), config.consensus.clone());
        let bridges = Arc::new(TrustBridgeManager::new(
            bridge_store,
            identities,
            declarations.clone(),
            config.bridge.clone(),
            ScoringPolicy::from_config(config),
        ));
        Self {
            ledger,
            declarations,
            signer,
            consensus,
            bridges,
        }
    }

    pub fn ledger(&self) -> &HashChainLedger {
        &self.ledger
    }

    pub fn signer(&self) -> &SignatureService {
        &self.signer
    }

    pub fn consensus(&self) -> &ConsensusEngine {
        &self.consensus
    }

    /// Shared handle for the background decay task.
    pub fn bridge_manager(&self) -> Arc<TrustBridgeManager> {
        self.bridges.clone()
    }

    // Ledger

    /// Append an interaction; a blank `owner` defaults to the caller.
    pub fn ingest(&self, caller: &Caller, mut request: IngestRequest) -> Result<IngestReceipt> {
        if request.owner.trim().is_empty() {
            request.owner = caller.id.clone();
        }
        Ok(self.ledger.append(request)?)
    }

    pub fn read_session(
        &self,
        session_id: &str,
        since_row_hash: Option<&str>,
        limit: usize,
    ) -> Result<LedgerPage> {
        Ok(self.ledger.list(session_id, since_row_hash, limit)?)
    }

    pub fn verify_session(&self, session_id: &str) -> Result<ChainVerification> {
        Ok(self.ledger.verify(session_id)?)
    }

    // Declarations

    pub fn create_declaration(&self, caller: &Caller, input: NewDeclaration) -> Result<TrustDeclaration> {
        self.create_declaration_at(caller, input, now_ms())
    }

    pub fn create_declaration_at(
        &self,
        caller: &Caller,
        input: NewDeclaration,
        now: TimestampMs,
    ) -> Result<TrustDeclaration> {
        let owner_id = match input.owner_id {
            Some(owner) if owner != caller.id && !caller.is_admin() => {
                return Err(ProtocolError::unauthorized(caller, "create declarations for others"));
            }
            Some(owner) => owner,
            None => caller.id.clone(),
        };

        let declaration = TrustDeclaration::new(
            input.agent_id,
            input.agent_name,
            owner_id,
            input.trust_articles,
            now,
        )?;
        self.declarations.insert(declaration.clone())?;
        info!(
            declaration_id = %declaration.id,
            agent_id = %declaration.agent_id,
            compliance = declaration.compliance_score,
            "Trust declaration created"
        );
        Ok(declaration)
    }

    pub fn get_declaration(&self, declaration_id: &str) -> Result<TrustDeclaration> {
        Ok(self.declarations.get(declaration_id)?)
    }

    /// Replace the articles; the existing signature is cleared.
    pub fn update_declaration_articles(
        &self,
        caller: &Caller,
        declaration_id: &str,
        articles: TrustArticles,
    ) -> Result<TrustDeclaration> {
        self.authorize_owner(caller, declaration_id, "update declaration")?;
        let actor = caller.id.clone();
        let now = now_ms();
        Ok(self.declarations.modify(declaration_id, &mut |decl| {
            decl.set_articles(articles, actor.clone(), now);
            Ok(())
        })?)
    }

    pub fn delete_declaration(&self, caller: &Caller, declaration_id: &str) -> Result<TrustDeclaration> {
        if !caller.is_admin() {
            return Err(ProtocolError::unauthorized(caller, "delete declarations"));
        }
        let removed = self.declarations.delete(declaration_id)?;
        info!(declaration_id = %declaration_id, "Trust declaration deleted");
        Ok(removed)
    }

    fn authorize_owner(
        &self,
        caller: &Caller,
        declaration_id: &str,
        operation: &str,
    ) -> Result<TrustDeclaration> {
        let declaration = self.declarations.get(declaration_id)?;
        if declaration.owner_id != caller.id && !caller.is_admin() {
            return Err(ProtocolError::unauthorized(caller, operation));
        }
        Ok(declaration)
    }

    // Signing

    pub fn sign_declaration(
        &self,
        caller: &Caller,
        declaration_id: &str,
        agent_id: &str,
    ) -> Result<TrustDeclaration> {
        self.sign_declaration_at(caller, declaration_id, agent_id, now_ms())
    }

    /// Sign the declaration's essential fields under the caller's key.
    pub fn sign_declaration_at(
        &self,
        caller: &Caller,
        declaration_id: &str,
        agent_id: &str,
        now: TimestampMs,
    ) -> Result<TrustDeclaration> {
        self.authorize_owner(caller, declaration_id, "sign declaration")?;

        // Signing happens under the store lock so the token covers exactly
        // what is persisted.
        let mut signing_failure: Option<ProtocolError> = None;
        let outcome = self.declarations.modify(declaration_id, &mut |decl| {
            if decl.agent_id != agent_id {
                signing_failure = Some(ProtocolError::Validation {
                    field: "agent_id".to_string(),
                    reason: format!("declaration belongs to {}", decl.agent_id),
                });
                return Err(DomainError::validation("agent_id", "mismatch"));
            }
            match self.signer.sign_at(&decl.signing_payload(), &caller.id, now) {
                Ok(envelope) => {
                    let key_id = envelope.key_id.clone();
                    decl.signature = Some(envelope);
                    decl.record(
                        AuditAction::Signed,
                        caller.id.clone(),
                        now,
                        serde_json::json!({ "key_id": key_id }),
                    );
                    Ok(())
                }
                Err(e) => {
                    signing_failure = Some(e.into());
                    Err(DomainError::validation("signature", "signing failed"))
                }
            }
        });

        match (outcome, signing_failure) {
            (_, Some(failure)) => Err(failure),
            (Ok(declaration), None) => {
                info!(declaration_id = %declaration_id, signed_by = %caller.id, "Trust declaration signed");
                Ok(declaration)
            }
            (Err(e), None) => Err(e.into()),
        }
    }

    pub fn verify_declaration(
        &self,
        caller: &Caller,
        declaration_id: &str,
    ) -> Result<DeclarationVerification> {
        let declaration = self.declarations.get(declaration_id)?;
        let envelope = declaration.signature.clone().ok_or_else(|| {
            SigningError::SignatureInvalid {
                reason: "declaration is not signed".to_string(),
            }
        })?;

        let verification = self
            .signer
            .verify(&declaration.signing_payload(), &envelope)?;

        let actor = caller.id.clone();
        let key_id = verification.key_id.clone();
        self.declarations.modify(declaration_id, &mut |decl| {
            decl.record(
                AuditAction::SignatureVerified,
                actor.clone(),
                now_ms(),
                serde_json::json!({ "key_id": key_id }),
            );
            Ok(())
        })?;

        Ok(DeclarationVerification {
            verification,
            declaration: DeclarationSummary {
                declaration_id: declaration.id,
                agent_id: declaration.agent_id,
                agent_name: declaration.agent_name,
                compliance_score: declaration.compliance_score,
                guilt_score: declaration.guilt_score,
                signed_by: envelope.signed_by,
                key_id: envelope.key_id,
                signed_at: envelope.signed_at,
            },
        })
    }

    /// Unauthenticated.
    pub fn public_keys(&self) -> Result<PublicKeySet> {
        Ok(self.signer.export_public_keys()?)
    }

    // Consensus

    pub fn admit_validator(&self, caller: &Caller, agent_id: &str) -> Result<ValidatorRecord> {
        if !caller.is_admin() {
            return Err(ProtocolError::unauthorized(caller, "admit validators"));
        }
        let requirements = self.consensus.default_requirements();
        Ok(self.consensus.add_validator(agent_id, &requirements)?)
    }

    pub fn submit_vote(&self, caller: &Caller, declaration_id: &str, vote: Vote) -> Result<TrustDeclaration> {
        if vote.validator_id != caller.id {
            return Err(ProtocolError::unauthorized(caller, "vote on behalf of another validator"));
        }
        Ok(self.consensus.submit_vote(declaration_id, vote)?)
    }

    pub fn calculate_consensus(
        &self,
        caller: &Caller,
        declaration_id: &str,
        votes: &[Vote],
    ) -> Result<ConsensusResult> {
        if !matches!(caller.role, Role::ValidatorAgent | Role::Admin) {
            return Err(ProtocolError::unauthorized(caller, "calculate consensus"));
        }
        if !caller.is_admin() && !self.consensus.is_validator(&caller.id) {
            return Err(ConsensusError::NotAValidator {
                validator_id: caller.id.clone(),
            }
            .into());
        }

        // Other validators' votes only count as the ballots they submitted
        let ballots = self.declarations.get(declaration_id)?.ballots;
        for vote in latest_votes(votes) {
            if vote.validator_id == caller.id {
                continue;
            }
            let recorded = ballots.iter().any(|b| {
                b.validator_id == vote.validator_id
                    && b.approved == vote.approved
                    && b.timestamp == vote.timestamp
            });
            if !recorded {
                warn!(
                    caller = %caller.id,
                    validator_id = %vote.validator_id,
                    declaration_id = %declaration_id,
                    "Consensus input does not match submitted ballots"
                );
                return Err(ConsensusError::UnrecordedVote {
                    validator_id: vote.validator_id.clone(),
                }
                .into());
            }
        }

        Ok(self
            .consensus
            .calculate_weighted_consensus(declaration_id, votes)?)
    }

    // Bridges

    pub fn establish_bridge(
        &self,
        caller: &Caller,
        agent_id: &str,
        options: Option<BridgeOptions>,
    ) -> Result<TrustBridge> {
        if caller.role != Role::User {
            return Err(ProtocolError::unauthorized(caller, "establish bridges"));
        }
        Ok(self.bridges.establish(&caller.id, agent_id, options)?)
    }

    pub fn get_bridge(&self, caller: &Caller, bridge_id: &str) -> Result<TrustBridge> {
        let bridge = self.bridges.get(bridge_id)?;
        if bridge.user_id != caller.id && !caller.is_admin() {
            return Err(ProtocolError::unauthorized(caller, "read this bridge"));
        }
        Ok(bridge)
    }

    /// The caller's bridges; admins may name another user.
    pub fn list_bridges(&self, caller: &Caller, user_id: Option<&str>) -> Result<Vec<TrustBridge>> {
        let user_id = match user_id {
            Some(other) if other != caller.id && !caller.is_admin() => {
                return Err(ProtocolError::unauthorized(caller, "list another user's bridges"));
            }
            Some(other) => other,
            None => caller.id.as_str(),
        };
        Ok(self.bridges.list_for_user(user_id)?)
    }

    /// Either party to the bridge, or an admin, may report an interaction.
    pub fn record_interaction(
        &self,
        caller: &Caller,
        bridge_id: &str,
        interaction: Interaction,
    ) -> Result<TrustBridge> {
        let bridge = self.bridges.get(bridge_id)?;
        let party = bridge.user_id == caller.id || bridge.agent_id == caller.id;
        if !party && !caller.is_admin() {
            return Err(ProtocolError::unauthorized(caller, "record interactions on this bridge"));
        }
        Ok(self.bridges.record_interaction(bridge_id, interaction)?)
    }

    pub fn revoke_bridge(
        &self,
        caller: &Caller,
        bridge_id: &str,
        reason: Option<&str>,
    ) -> Result<TrustBridge> {
        self.get_bridge(caller, bridge_id)?;
        Ok(self.bridges.revoke(bridge_id, reason)?)
    }

    pub fn run_decay(&self, caller: &Caller) -> Result<DecaySweepReport> {
        if !caller.is_admin() {
            return Err(ProtocolError::unauthorized(caller, "run decay sweeps"));
        }
        Ok(self.bridges.decay()?)
    }
}
