//! Trust Declaration Domain Model
//!
//! A [`TrustDeclaration`] is an agent's self-assessment against the six
//! trust articles. Scores are derived from the articles and recomputed on
//! every change; signing, consensus and audit entries are layered on top.

use crate::error::{DomainError, Result};
use serde::{Deserialize, Serialize};
use trustproto_core::TimestampMs;

/// The six trust articles an agent declares compliance with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TrustArticles {
    pub transparency: bool,
    pub accountability: bool,
    pub fairness: bool,
    pub privacy: bool,
    pub safety: bool,
    pub human_oversight: bool,
}

impl TrustArticles {
    pub const COUNT: usize = 6;

    /// Every article set to `value`.
    pub fn uniform(value: bool) -> Self {
        Self {
            transparency: value,
            accountability: value,
            fairness: value,
            privacy: value,
            safety: value,
            human_oversight: value,
        }
    }

    pub fn entries(&self) -> [(&'static str, bool); Self::COUNT] {
        [
            ("transparency", self.transparency),
            ("accountability", self.accountability),
            ("fairness", self.fairness),
            ("privacy", self.privacy),
            ("safety", self.safety),
            ("human_oversight", self.human_oversight),
        ]
    }

    pub fn satisfied(&self) -> usize {
        self.entries().iter().filter(|(_, held)| *held).count()
    }

    /// Fraction of articles held.
    pub fn compliance_score(&self) -> f64 {
        self.satisfied() as f64 / Self::COUNT as f64
    }
}

/// Detached JWS produced by the signature service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureEnvelope {
    pub token: String,
    pub key_id: String,
    pub signed_at: TimestampMs,
    /// Owner id whose key produced the token
    pub signed_by: String,
    pub algorithm: String,
}

/// A validator's ballot on a declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub validator_id: String,
    pub approved: bool,
    #[serde(default)]
    pub reasoning: Option<String>,
    pub timestamp: TimestampMs,
}

impl Vote {
    pub fn new(validator_id: impl Into<String>, approved: bool, timestamp: TimestampMs) -> Self {
        Self {
            validator_id: validator_id.into(),
            approved,
            reasoning: None,
            timestamp,
        }
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }
}

/// One vote together with the weight it carried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedVote {
    pub validator_id: String,
    pub approved: bool,
    pub weight: f64,
    pub reasoning: Option<String>,
    pub timestamp: TimestampMs,
}

/// Weighted consensus outcome stored on the declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusRecord {
    pub ratio: f64,
    pub reached: bool,
    pub threshold: f64,
    pub total_weight: f64,
    pub approval_weight: f64,
    pub votes: Vec<WeightedVote>,
    pub calculated_at: TimestampMs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Created,
    ArticlesUpdated,
    Signed,
    SignatureVerified,
    VoteSubmitted,
    ConsensusCalculated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub action: AuditAction,
    pub actor: String,
    pub timestamp: TimestampMs,
    #[serde(default)]
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustDeclaration {
    pub id: String,
    pub agent_id: String,
    pub agent_name: String,
    /// Identity allowed to sign this declaration
    pub owner_id: String,
    pub declaration_date: TimestampMs,
    pub trust_articles: TrustArticles,
    pub compliance_score: f64,
    pub guilt_score: f64,
    pub signature: Option<SignatureEnvelope>,
    pub consensus: Option<ConsensusRecord>,
    /// Current ballot per validator
    #[serde(default)]
    pub ballots: Vec<Vote>,
    #[serde(default)]
    pub audit_history: Vec<AuditEntry>,
}

/// Essential business fields covered by a signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeclarationPayload {
    pub declaration_id: String,
    pub agent_id: String,
    pub agent_name: String,
    pub owner_id: String,
    pub declaration_date: TimestampMs,
    pub trust_articles: TrustArticles,
    pub compliance_score: f64,
    pub guilt_score: f64,
}

impl TrustDeclaration {
    pub fn new(
        agent_id: impl Into<String>,
        agent_name: impl Into<String>,
        owner_id: impl Into<String>,
        trust_articles: TrustArticles,
        declaration_date: TimestampMs,
    ) -> Result<Self> {
        let agent_id = agent_id.into();
        let agent_name = agent_name.into();
        let owner_id = owner_id.into();
        for (field, value) in [
            ("agent_id", &agent_id),
            ("agent_name", &agent_name),
            ("owner_id", &owner_id),
        ] {
            if value.trim().is_empty() {
                return Err(DomainError::validation(field, "must not be empty"));
            }
        }

        let mut declaration = Self {
            id: uuid::Uuid::new_v4().to_string(),
            agent_id,
            agent_name,
            owner_id: owner_id.clone(),
            declaration_date,
            trust_articles,
            compliance_score: 0.0,
            guilt_score: 0.0,
            signature: None,
            consensus: None,
            ballots: Vec::new(),
            audit_history: Vec::new(),
        };
        declaration.recompute_scores();
        declaration.record(
            AuditAction::Created,
            owner_id,
            declaration_date,
            serde_json::json!({ "compliance_score": declaration.compliance_score }),
        );
        Ok(declaration)
    }

    /// Derive `compliance_score` and `guilt_score` from the articles.
    pub fn recompute_scores(&mut self) {
        self.compliance_score = self.trust_articles.compliance_score();
        self.guilt_score = 1.0 - self.compliance_score;
    }

    /// Replace the articles. Any existing signature no longer covers the
    /// declaration and is dropped.
    pub fn set_articles(
        &mut self,
        trust_articles: TrustArticles,
        actor: impl Into<String>,
        now: TimestampMs,
    ) {
        let previous = self.compliance_score;
        self.trust_articles = trust_articles;
        self.recompute_scores();
        self.signature = None;
        self.record(
            AuditAction::ArticlesUpdated,
            actor,
            now,
            serde_json::json!({
                "previous_compliance": previous,
                "compliance_score": self.compliance_score,
            }),
        );
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    pub fn consensus_reached(&self) -> bool {
        self.consensus.as_ref().is_some_and(|c| c.reached)
    }

    pub fn record(
        &mut self,
        action: AuditAction,
        actor: impl Into<String>,
        timestamp: TimestampMs,
        details: serde_json::Value,
    ) {
        self.audit_history.push(AuditEntry {
            action,
            actor: actor.into(),
            timestamp,
            details,
        });
    }

    /// Record a ballot, replacing any earlier one from the same validator.
    /// Returns `true` when a previous ballot was replaced.
    pub fn cast_ballot(&mut self, vote: Vote) -> bool {
        match self
            .ballots
            .iter_mut()
            .find(|b| b.validator_id == vote.validator_id)
        {
            Some(existing) => {
                *existing = vote;
                true
            }
            None => {
                self.ballots.push(vote);
                false
            }
        }
    }

    pub fn signing_payload(&self) -> DeclarationPayload {
        DeclarationPayload {
            declaration_id: self.id.clone(),
            agent_id: self.agent_id.clone(),
            agent_name: self.agent_name.clone(),
            owner_id: self.owner_id.clone(),
            declaration_date: self.declaration_date,
            trust_articles: self.trust_articles,
            compliance_score: self.compliance_score,
            guilt_score: self.guilt_score,
        }
    }
}
