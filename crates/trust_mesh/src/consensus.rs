//! Weighted validator consensus over trust declarations.
//!
//! Validators are agents admitted on the strength of their own declaration
//! history. Membership is binary; a validator's weight is derived from its
//! history every time it is used and never stored.

use crate::scoring::{validator_weight, DeclarationStats};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use trustproto_core::{now_ms, ConsensusConfig, ErrorKind, TimestampMs};
use trustproto_domain::{
    AuditAction, ConsensusRecord, DeclarationStore, DomainError, TrustDeclaration, Vote,
    WeightedVote,
};

const ENGINE_ACTOR: &str = "consensus_engine";

#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("Agent {agent_id} does not meet validator requirements: {reason}")]
    ValidatorRequirementsNotMet { agent_id: String, reason: String },

    #[error("{validator_id} is not an admitted validator")]
    NotAValidator { validator_id: String },

    #[error("Vote from {validator_id} does not match a submitted ballot")]
    UnrecordedVote { validator_id: String },

    #[error("Consensus not reached: ratio {ratio:.4} below threshold {threshold}")]
    ThresholdNotMet { ratio: f64, threshold: f64 },

    #[error("Invalid vote field '{field}': {reason}")]
    InvalidVote { field: String, reason: String },

    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl ConsensusError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConsensusError::ValidatorRequirementsNotMet { .. } => {
                ErrorKind::ValidatorRequirementsNotMet
            }
            ConsensusError::NotAValidator { .. } | ConsensusError::UnrecordedVote { .. } => {
                ErrorKind::Unauthorized
            }
            ConsensusError::ThresholdNotMet { .. } => ErrorKind::ConsensusThresholdNotMet,
            ConsensusError::InvalidVote { .. } => ErrorKind::Validation,
            ConsensusError::Domain(e) => e.kind(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConsensusError>;

/// Admission thresholds for validators.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatorRequirements {
    /// Signed declarations required
    pub min_declarations: usize,
    pub min_avg_compliance: f64,
    /// Latest declaration may be at most this old
    pub max_age_days: f64,
}

impl Default for ValidatorRequirements {
    fn default() -> Self {
        Self::from(&ConsensusConfig::default())
    }
}

impl From<&ConsensusConfig> for ValidatorRequirements {
    fn from(config: &ConsensusConfig) -> Self {
        Self {
            min_declarations: config.min_declarations,
            min_avg_compliance: config.min_avg_compliance,
            max_age_days: config.max_age_days,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorRecord {
    pub agent_id: String,
    pub admitted_at: TimestampMs,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub declaration_id: String,
    pub ratio: f64,
    pub reached: bool,
    pub threshold: f64,
    pub total_weight: f64,
    pub approval_weight: f64,
    pub votes: Vec<WeightedVote>,
    pub calculated_at: TimestampMs,
}

impl ConsensusResult {
    /// Fail with `ThresholdNotMet` unless the threshold was reached.
    pub fn ensure_reached(&self) -> Result<&Self> {
        if self.reached {
            Ok(self)
        } else {
            Err(ConsensusError::ThresholdNotMet {
                ratio: self.ratio,
                threshold: self.threshold,
            })
        }
    }

    fn to_record(&self) -> ConsensusRecord {
        ConsensusRecord {
            ratio: self.ratio,
            reached: self.reached,
            threshold: self.threshold,
            total_weight: self.total_weight,
            approval_weight: self.approval_weight,
            votes: self.votes.clone(),
            calculated_at: self.calculated_at,
        }
    }
}

pub struct ConsensusEngine {
    declarations: Arc<dyn DeclarationStore>,
    config: ConsensusConfig,
    validators: RwLock<BTreeMap<String, ValidatorRecord>>,
}

impl ConsensusEngine {
    pub fn new(declarations: Arc<dyn DeclarationStore>, config: ConsensusConfig) -> Self {
        Self {
            declarations,
            config,
            validators: RwLock::new(BTreeMap::new()),
        }
    }

    /// Requirements derived from configuration.
    pub fn default_requirements(&self) -> ValidatorRequirements {
        ValidatorRequirements::from(&self.config)
    }

    pub fn threshold(&self) -> f64 {
        self.config.threshold
    }

    pub fn add_validator(
        &self,
        agent_id: &str,
        requirements: &ValidatorRequirements,
    ) -> Result<ValidatorRecord> {
        self.add_validator_at(agent_id, requirements, now_ms())
    }

    /// Admit `agent_id` if its history satisfies `requirements`.
    /// Re-admitting an existing validator returns the original record.
    pub fn add_validator_at(
        &self,
        agent_id: &str,
        requirements: &ValidatorRequirements,
        now: TimestampMs,
    ) -> Result<ValidatorRecord> {
        if let Some(existing) = self.validators.read().get(agent_id) {
            return Ok(existing.clone());
        }

        let history = self.declarations.list_for_agent(agent_id)?;
        if let Err(reason) = self.check_requirements(&history, requirements, now) {
            warn!(agent_id = %agent_id, reason = %reason, "Validator admission rejected");
            return Err(ConsensusError::ValidatorRequirementsNotMet {
                agent_id: agent_id.to_string(),
                reason,
            });
        }

        let record = self
            .validators
            .write()
            .entry(agent_id.to_string())
            .or_insert_with(|| ValidatorRecord {
                agent_id: agent_id.to_string(),
                admitted_at: now,
            })
            .clone();
        info!(agent_id = %agent_id, "Validator admitted");
        Ok(record)
    }

    fn check_requirements(
        &self,
        history: &[TrustDeclaration],
        requirements: &ValidatorRequirements,
        now: TimestampMs,
    ) -> std::result::Result<(), String> {
        let signed = history.iter().filter(|d| d.is_signed()).count();
        if signed < requirements.min_declarations {
            return Err(format!(
                "{signed} signed declarations, {} required",
                requirements.min_declarations
            ));
        }

        let stats = DeclarationStats::from_recent(history, self.config.history_window);
        let avg = stats.avg_compliance.unwrap_or(0.0);
        if avg < requirements.min_avg_compliance {
            return Err(format!(
                "average compliance {avg:.3} below {}",
                requirements.min_avg_compliance
            ));
        }

        let age = stats.days_since_latest(now).unwrap_or(f64::INFINITY);
        if age > requirements.max_age_days {
            return Err(format!(
                "latest declaration is {age:.1} days old, limit {}",
                requirements.max_age_days
            ));
        }
        Ok(())
    }

    pub fn remove_validator(&self, agent_id: &str) -> bool {
        let removed = self.validators.write().remove(agent_id).is_some();
        if removed {
            info!(agent_id = %agent_id, "Validator removed");
        }
        removed
    }

    pub fn is_validator(&self, agent_id: &str) -> bool {
        self.validators.read().contains_key(agent_id)
    }

    pub fn validators(&self) -> Vec<ValidatorRecord> {
        self.validators.read().values().cloned().collect()
    }

    pub fn compute_validator_weight(&self, agent_id: &str) -> Result<f64> {
        self.compute_validator_weight_at(agent_id, now_ms())
    }

    pub fn compute_validator_weight_at(&self, agent_id: &str, now: TimestampMs) -> Result<f64> {
        let history = self.declarations.list_for_agent(agent_id)?;
        Ok(validator_weight(&history, self.config.history_window, now))
    }

    /// Record an admitted validator's ballot. A later ballot from the same
    /// validator replaces the earlier one.
    pub fn submit_vote(&self, declaration_id: &str, vote: Vote) -> Result<TrustDeclaration> {
        if vote.validator_id.trim().is_empty() {
            return Err(ConsensusError::InvalidVote {
                field: "validator_id".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if !self.is_validator(&vote.validator_id) {
            warn!(validator_id = %vote.validator_id, "Vote from non-validator rejected");
            return Err(ConsensusError::NotAValidator {
                validator_id: vote.validator_id,
            });
        }

        let validator_id = vote.validator_id.clone();
        let approved = vote.approved;
        let timestamp = vote.timestamp;
        let mut ballot = Some(vote);
        let updated = self.declarations.modify(declaration_id, &mut |decl| {
            if let Some(vote) = ballot.take() {
                let replaced = decl.cast_ballot(vote);
                decl.record(
                    AuditAction::VoteSubmitted,
                    validator_id.clone(),
                    timestamp,
                    serde_json::json!({ "approved": approved, "replaced": replaced }),
                );
            }
            Ok(())
        })?;

        debug!(declaration_id = %declaration_id, validator_id = %validator_id, approved, "Vote recorded");
        Ok(updated)
    }

    pub fn calculate_weighted_consensus(
        &self,
        declaration_id: &str,
        votes: &[Vote],
    ) -> Result<ConsensusResult> {
        self.calculate_weighted_consensus_at(declaration_id, votes, now_ms())
    }

    /// Weight each vote by its validator's history and persist the outcome
    /// onto the declaration.
    pub fn calculate_weighted_consensus_at(
        &self,
        declaration_id: &str,
        votes: &[Vote],
        now: TimestampMs,
    ) -> Result<ConsensusResult> {
        // Existence check before any weighting work
        self.declarations.get(declaration_id)?;

        let effective = latest_votes(votes);
        if let Some(outsider) = effective.iter().find(|v| !self.is_validator(&v.validator_id)) {
            warn!(
                declaration_id = %declaration_id,
                validator_id = %outsider.validator_id,
                "Consensus input contains a vote from a non-validator"
            );
            return Err(ConsensusError::NotAValidator {
                validator_id: outsider.validator_id.clone(),
            });
        }

        let mut weighted = Vec::with_capacity(effective.len());
        let mut total_weight = 0.0;
        let mut approval_weight = 0.0;
        for vote in effective {
            let weight = self.compute_validator_weight_at(&vote.validator_id, now)?;
            total_weight += weight;
            if vote.approved {
                approval_weight += weight;
            }
            weighted.push(WeightedVote {
                validator_id: vote.validator_id.clone(),
                approved: vote.approved,
                weight,
                reasoning: vote.reasoning.clone(),
                timestamp: vote.timestamp,
            });
        }

        let ratio = if total_weight > 0.0 {
            approval_weight / total_weight
        } else {
            0.0
        };
        let result = ConsensusResult {
            declaration_id: declaration_id.to_string(),
            ratio,
            reached: ratio >= self.config.threshold,
            threshold: self.config.threshold,
            total_weight,
            approval_weight,
            votes: weighted,
            calculated_at: now,
        };

        let record = result.to_record();
        self.declarations.modify(declaration_id, &mut |decl| {
            decl.consensus = Some(record.clone());
            decl.record(
                AuditAction::ConsensusCalculated,
                ENGINE_ACTOR,
                now,
                serde_json::json!({
                    "ratio": record.ratio,
                    "reached": record.reached,
                    "votes": record.votes.len(),
                }),
            );
            Ok(())
        })?;

        info!(
            declaration_id = %declaration_id,
            ratio = result.ratio,
            reached = result.reached,
            votes = result.votes.len(),
            "Weighted consensus calculated"
        );
        Ok(result)
    }

    pub fn tally(&self, declaration_id: &str) -> Result<ConsensusResult> {
        self.tally_at(declaration_id, now_ms())
    }

    /// Run the weighted calculation over the ballots submitted so far.
    pub fn tally_at(&self, declaration_id: &str, now: TimestampMs) -> Result<ConsensusResult> {
        let ballots = self.declarations.get(declaration_id)?.ballots;
        self.calculate_weighted_consensus_at(declaration_id, &ballots, now)
    }
}

/// Keep the last vote of each validator, in first-seen order.
pub fn latest_votes(votes: &[Vote]) -> Vec<&Vote> {
    let mut order: Vec<&str> = Vec::new();
    let mut latest: BTreeMap<&str, &Vote> = BTreeMap::new();
    for vote in votes {
        if latest.insert(vote.validator_id.as_str(), vote).is_none() {
            order.push(vote.validator_id.as_str());
        }
    }
    order.into_iter().filter_map(|id| latest.get(id).copied()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use trustproto_core::MS_PER_DAY;
    use trustproto_domain::{InMemoryDeclarationStore, SignatureEnvelope, TrustArticles};

    const NOW: TimestampMs = 1_000 * MS_PER_DAY;

    fn seed(store: &InMemoryDeclarationStore, agent: &str, compliance: f64, days_ago: u64, signed: bool) -> String {
        let mut decl = TrustDeclaration::new(
            agent,
            agent,
            format!("{agent}-owner"),
            TrustArticles::uniform(true),
            NOW - days_ago * MS_PER_DAY,
        )
        .unwrap();
        decl.compliance_score = compliance;
        decl.guilt_score = 1.0 - compliance;
        if signed {
            decl.signature = Some(SignatureEnvelope {
                token: "token".to_string(),
                key_id: "kid".to_string(),
                signed_at: decl.declaration_date,
                signed_by: decl.owner_id.clone(),
                algorithm: "EdDSA".to_string(),
            });
        }
        let id = decl.id.clone();
        store.insert(decl).unwrap();
        id
    }

    fn engine() -> (Arc<InMemoryDeclarationStore>, ConsensusEngine) {
        let store = Arc::new(InMemoryDeclarationStore::new());
        let engine = ConsensusEngine::new(store.clone(), ConsensusConfig::default());
        (store, engine)
    }

    /// Admit on any signed history, however weak.
    fn admit_lenient(engine: &ConsensusEngine, agent: &str) {
        let lenient = ValidatorRequirements {
            min_declarations: 1,
            min_avg_compliance: 0.0,
            max_age_days: 365.0,
        };
        engine.add_validator_at(agent, &lenient, NOW).unwrap();
    }

    fn qualified(store: &InMemoryDeclarationStore, agent: &str) {
        seed(store, agent, 0.9, 30, true);
        seed(store, agent, 0.85, 20, true);
        seed(store, agent, 0.95, 10, true);
    }

    #[test]
    fn test_admission_scenario() {
        let (store, engine) = engine();
        qualified(&store, "validator-1");
        let record = engine
            .add_validator_at("validator-1", &engine.default_requirements(), NOW)
            .unwrap();
        assert_eq!(record.admitted_at, NOW);
        assert!(engine.is_validator("validator-1"));

        let again = engine
            .add_validator_at("validator-1", &engine.default_requirements(), NOW + 5)
            .unwrap();
        assert_eq!(again.admitted_at, NOW);
        assert_eq!(engine.validators().len(), 1);

        let weight = engine.compute_validator_weight_at("validator-1", NOW).unwrap();
        assert!((weight - 0.876).abs() < 1e-3);
    }

    #[test]
    fn test_admission_rejections() {
        let (store, engine) = engine();
        let reqs = engine.default_requirements();

        seed(&store, "too-few", 1.0, 1, true);
        seed(&store, "too-few", 1.0, 1, false);
        let err = engine.add_validator_at("too-few", &reqs, NOW).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidatorRequirementsNotMet);

        for _ in 0..3 {
            seed(&store, "low", 0.5, 1, true);
        }
        let err = engine.add_validator_at("low", &reqs, NOW).unwrap_err();
        assert!(err.to_string().contains("average compliance"));

        for _ in 0..3 {
            seed(&store, "stale", 1.0, 120, true);
        }
        let err = engine.add_validator_at("stale", &reqs, NOW).unwrap_err();
        assert!(err.to_string().contains("days old"));
        assert!(engine.validators().is_empty());
    }

    #[test]
    fn test_unknown_agent_weight_floor() {
        let (_, engine) = engine();
        assert_eq!(engine.compute_validator_weight_at("ghost", NOW).unwrap(), 0.1);
    }

    #[test]
    fn test_votes_require_admission() {
        let (store, engine) = engine();
        let target = seed(&store, "subject", 1.0, 1, true);
        let err = engine
            .submit_vote(&target, Vote::new("outsider", true, NOW))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);

        qualified(&store, "validator-1");
        engine
            .add_validator_at("validator-1", &engine.default_requirements(), NOW)
            .unwrap();
        engine
            .submit_vote(&target, Vote::new("validator-1", false, NOW))
            .unwrap();
        let decl = engine
            .submit_vote(&target, Vote::new("validator-1", true, NOW + 1))
            .unwrap();
        assert_eq!(decl.ballots.len(), 1);
        assert!(decl.ballots[0].approved);
        assert_eq!(
            decl.audit_history
                .iter()
                .filter(|e| e.action == AuditAction::VoteSubmitted)
                .count(),
            2
        );
    }

    #[test]
    fn test_weighted_consensus_is_persisted() {
        let (store, engine) = engine();
        let target = seed(&store, "subject", 1.0, 1, true);
        qualified(&store, "strong");
        seed(&store, "weak", 0.5, 300, true);
        admit_lenient(&engine, "strong");
        admit_lenient(&engine, "weak");

        let votes = vec![
            Vote::new("strong", true, NOW),
            Vote::new("weak", false, NOW).with_reasoning("insufficient evidence"),
        ];
        let result = engine
            .calculate_weighted_consensus_at(&target, &votes, NOW)
            .unwrap();

        let strong = 0.9 * (1.0 - 10.0 / 365.0);
        let weak = 0.5 * (1.0 - 300.0 / 365.0);
        assert!((result.total_weight - (strong + weak)).abs() < 1e-9);
        assert!((result.ratio - strong / (strong + weak)).abs() < 1e-9);
        assert!(result.reached);
        assert!(result.ensure_reached().is_ok());

        let stored = store.get(&target).unwrap();
        let record = stored.consensus.unwrap();
        assert_eq!(record.votes.len(), 2);
        assert_eq!(record.votes[1].reasoning.as_deref(), Some("insufficient evidence"));
        assert_eq!(
            stored.audit_history.last().map(|e| e.action),
            Some(AuditAction::ConsensusCalculated)
        );

        let again = engine
            .calculate_weighted_consensus_at(&target, &votes, NOW)
            .unwrap();
        assert_eq!(again, result);
    }

    #[test]
    fn test_no_votes_means_no_consensus() {
        let (store, engine) = engine();
        let target = seed(&store, "subject", 1.0, 1, true);
        let result = engine.tally_at(&target, NOW).unwrap();
        assert_eq!(result.ratio, 0.0);
        let err = result.ensure_reached().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConsensusThresholdNotMet);
    }

    #[test]
    fn test_tally_uses_submitted_ballots() {
        let (store, engine) = engine();
        let target = seed(&store, "subject", 1.0, 1, true);
        qualified(&store, "validator-1");
        engine
            .add_validator_at("validator-1", &engine.default_requirements(), NOW)
            .unwrap();
        engine
            .submit_vote(&target, Vote::new("validator-1", true, NOW))
            .unwrap();

        let result = engine.tally_at(&target, NOW).unwrap();
        assert_eq!(result.ratio, 1.0);
        assert!(store.get(&target).unwrap().consensus_reached());
    }

    #[test]
    fn test_votes_from_non_validators_are_rejected() {
        let (store, engine) = engine();
        let target = seed(&store, "subject", 1.0, 1, true);
        qualified(&store, "validator-1");
        admit_lenient(&engine, "validator-1");

        let votes = vec![
            Vote::new("validator-1", false, NOW),
            Vote::new("ghost", true, NOW),
        ];
        let err = engine
            .calculate_weighted_consensus_at(&target, &votes, NOW)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
        assert!(matches!(err, ConsensusError::NotAValidator { ref validator_id } if validator_id == "ghost"));
        assert!(store.get(&target).unwrap().consensus.is_none());

        // A removed validator no longer counts either
        engine.remove_validator("validator-1");
        let err = engine
            .calculate_weighted_consensus_at(&target, &votes[..1], NOW)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
    }

    #[test]
    fn test_unknown_declaration() {
        let (_, engine) = engine();
        let err = engine
            .calculate_weighted_consensus_at("missing", &[], NOW)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_duplicate_votes_keep_latest() {
        let votes = vec![
            Vote::new("a", false, 1),
            Vote::new("b", true, 2),
            Vote::new("a", true, 3),
        ];
        let kept = latest_votes(&votes);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].validator_id, "a");
        assert!(kept[0].approved);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(32))]

            #[test]
            fn ratio_monotonic_in_approvals(
                compliances in proptest::collection::vec(0.0f64..=1.0, 1..8),
                approvals in proptest::collection::vec(any::<bool>(), 8),
                flip in 0usize..8,
            ) {
                let (store, engine) = engine();
                let target = seed(&store, "subject", 1.0, 1, true);
                for (i, compliance) in compliances.iter().enumerate() {
                    seed(&store, &format!("v{i}"), *compliance, 5, true);
                    admit_lenient(&engine, &format!("v{i}"));
                }
                let votes: Vec<Vote> = (0..compliances.len())
                    .map(|i| Vote::new(format!("v{i}"), approvals[i], NOW))
                    .collect();
                let before = engine.calculate_weighted_consensus_at(&target, &votes, NOW).unwrap();

                let mut more = votes.clone();
                more[flip % votes.len()].approved = true;
                let after = engine.calculate_weighted_consensus_at(&target, &more, NOW).unwrap();

                prop_assert!((after.total_weight - before.total_weight).abs() < 1e-12);
                prop_assert!(after.ratio + 1e-12 >= before.ratio);
                prop_assert!((0.0..=1.0 + 1e-12).contains(&after.ratio));
            }
        }
    }
}
