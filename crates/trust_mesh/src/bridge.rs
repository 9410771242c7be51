//! Human ↔ agent trust bridges.
//!
//! A bridge is established only when both sides pass cross-validation and
//! the mutual score clears the configured threshold. Once active, its
//! mutual score moves with recorded interactions and decays with
//! inactivity until the bridge is revoked or expires.
//!
//! ```text
//! none ──establish──▶ active ──revoke──▶ revoked
//!                        │
//!                        └──decay / lifetime──▶ expired
//! ```

use crate::scoring::{
    agent_trust_score, human_trust_score, mutual_trust_score, validate_agent_for_human,
    validate_human_for_agent, ScoringPolicy, ValidationReport,
};
use crate::store::BridgeStore;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use trustproto_core::types::{clamp01, days_between};
use trustproto_core::{now_ms, BridgeConfig, ErrorKind, TimestampMs};
use trustproto_domain::{DeclarationStore, DomainError, IdentityRegistry, VerificationStatus};

pub const DEFAULT_REVOCATION_REASON: &str = "revoked by user";
pub const DECAY_EXPIRY_REASON: &str = "decay";
pub const LIFETIME_EXPIRY_REASON: &str = "lifetime";

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("No identity record for user {user_id}")]
    IdentityNotFound { user_id: String },

    #[error("Identity for user {user_id} is {status:?}, not verified")]
    IdentityNotVerified {
        user_id: String,
        status: VerificationStatus,
    },

    #[error("Agent {agent_id} has no trust declarations")]
    NoDeclarations { agent_id: String },

    #[error("Bridge not found: {bridge_id}")]
    BridgeNotFound { bridge_id: String },

    #[error("An active bridge already exists between {user_id} and {agent_id}")]
    DuplicateActiveBridge { user_id: String, agent_id: String },

    #[error("Bridge {bridge_id} is {status:?}")]
    NotActive {
        bridge_id: String,
        status: BridgeStatus,
    },

    #[error("Bridge {bridge_id} was modified concurrently (expected version {expected})")]
    StaleVersion { bridge_id: String, expected: u64 },

    #[error("Mutual trust {:.4} below threshold {:.2}", .0.mutual_trust_score, .0.threshold)]
    TrustThresholdNotMet(Box<TrustAssessment>),

    #[error("Invalid field '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("Bridge store error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Bridge serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Bridge store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    fn invalid(field: &str, reason: impl Into<String>) -> Self {
        BridgeError::InvalidField {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::IdentityNotFound { .. }
            | BridgeError::NoDeclarations { .. }
            | BridgeError::BridgeNotFound { .. } => ErrorKind::NotFound,
            BridgeError::IdentityNotVerified { .. } => ErrorKind::Unauthorized,
            BridgeError::DuplicateActiveBridge { .. }
            | BridgeError::NotActive { .. }
            | BridgeError::StaleVersion { .. } => ErrorKind::Conflict,
            BridgeError::TrustThresholdNotMet(_) => ErrorKind::TrustThresholdNotMet,
            BridgeError::InvalidField { .. } => ErrorKind::Validation,
            BridgeError::Domain(e) => e.kind(),
            BridgeError::Database(_) | BridgeError::Serialization(_) | BridgeError::Io(_) => {
                ErrorKind::Storage
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeStatus {
    Active,
    Revoked,
    Expired,
}

impl BridgeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeStatus::Active => "active",
            BridgeStatus::Revoked => "revoked",
            BridgeStatus::Expired => "expired",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeOptions {
    pub decay_enabled: bool,
    /// Score lost per full decay period of inactivity
    pub decay_rate: f64,
    pub duration_days: u64,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            decay_enabled: true,
            decay_rate: 0.01,
            duration_days: 365,
        }
    }
}

impl BridgeOptions {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            decay_enabled: true,
            decay_rate: config.default_decay_rate,
            duration_days: config.default_duration_days,
        }
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.decay_rate) {
            return Err(BridgeError::invalid("decay_rate", "must be within [0, 1]"));
        }
        if self.duration_days == 0 {
            return Err(BridgeError::invalid("duration_days", "must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustDecay {
    pub enabled: bool,
    pub decay_rate: f64,
    pub last_decay_calculation: TimestampMs,
    /// Periods already charged since the last activity
    #[serde(default)]
    pub periods_charged: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionOutcome {
    Successful,
    Helpful,
    Neutral,
    Failed,
    Harmful,
}

/// Interaction reported against an active bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub outcome: InteractionOutcome,
    /// 1..=5
    #[serde(default)]
    pub rating: Option<u8>,
    #[serde(default)]
    pub trust_violation: bool,
    #[serde(default)]
    pub notes: Option<String>,
}

impl Interaction {
    pub fn new(outcome: InteractionOutcome) -> Self {
        Self {
            outcome,
            rating: None,
            trust_violation: false,
            notes: None,
        }
    }

    pub fn rated(mut self, rating: u8) -> Self {
        self.rating = Some(rating);
        self
    }

    pub fn violation(mut self) -> Self {
        self.trust_violation = true;
        self
    }

    fn validate(&self) -> Result<()> {
        if let Some(rating) = self.rating {
            if !(1..=5).contains(&rating) {
                return Err(BridgeError::invalid("rating", "must be between 1 and 5"));
            }
        }
        Ok(())
    }

    /// Uncapped score adjustment implied by this interaction.
    pub fn raw_delta(&self) -> f64 {
        let mut delta = match self.outcome {
            InteractionOutcome::Successful | InteractionOutcome::Helpful => 0.01,
            InteractionOutcome::Failed | InteractionOutcome::Harmful => -0.02,
            InteractionOutcome::Neutral => 0.0,
        };
        match self.rating {
            Some(r) if r >= 4 => delta += 0.005,
            Some(r) if r <= 2 => delta -= 0.01,
            _ => {}
        }
        if self.trust_violation {
            delta -= 0.05;
        }
        delta
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionRecord {
    #[serde(flatten)]
    pub interaction: Interaction,
    pub timestamp: TimestampMs,
    pub trust_delta: f64,
    pub resulting_score: f64,
}

/// Full outcome of the establishment protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustAssessment {
    pub user_id: String,
    pub agent_id: String,
    pub human_trust_score: f64,
    pub agent_trust_score: f64,
    pub mutual_trust_score: f64,
    pub human_validation: ValidationReport,
    pub agent_validation: ValidationReport,
    pub threshold: f64,
    pub assessed_at: TimestampMs,
}

impl TrustAssessment {
    pub fn meets_threshold(&self) -> bool {
        self.mutual_trust_score >= self.threshold
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustBridge {
    pub bridge_id: String,
    pub user_id: String,
    pub agent_id: String,
    pub human_trust_score: f64,
    pub agent_trust_score: f64,
    pub mutual_trust_score: f64,
    pub human_validation: ValidationReport,
    pub agent_validation: ValidationReport,
    pub status: BridgeStatus,
    pub interactions: Vec<InteractionRecord>,
    pub trust_decay: TrustDecay,
    pub established_at: TimestampMs,
    pub expires_at: TimestampMs,
    pub last_interaction_at: Option<TimestampMs>,
    pub revoked_at: Option<TimestampMs>,
    pub revocation_reason: Option<String>,
    pub expired_at: Option<TimestampMs>,
    pub expiry_reason: Option<String>,
    pub version: u64,
}

impl TrustBridge {
    fn from_assessment(assessment: TrustAssessment, options: &BridgeOptions, now: TimestampMs) -> Self {
        Self {
            bridge_id: uuid::Uuid::new_v4().to_string(),
            user_id: assessment.user_id,
            agent_id: assessment.agent_id,
            human_trust_score: assessment.human_trust_score,
            agent_trust_score: assessment.agent_trust_score,
            mutual_trust_score: assessment.mutual_trust_score,
            human_validation: assessment.human_validation,
            agent_validation: assessment.agent_validation,
            status: BridgeStatus::Active,
            interactions: Vec::new(),
            trust_decay: TrustDecay {
                enabled: options.decay_enabled,
                decay_rate: options.decay_rate,
                last_decay_calculation: now,
                periods_charged: 0,
            },
            established_at: now,
            expires_at: now.saturating_add(options.duration_days.saturating_mul(trustproto_core::MS_PER_DAY)),
            last_interaction_at: None,
            revoked_at: None,
            revocation_reason: None,
            expired_at: None,
            expiry_reason: None,
            version: 1,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == BridgeStatus::Active
    }

    /// Inactivity is measured from here.
    pub fn last_activity(&self) -> TimestampMs {
        self.last_interaction_at.unwrap_or(self.established_at)
    }

    fn ensure_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(BridgeError::NotActive {
                bridge_id: self.bridge_id.clone(),
                status: self.status,
            })
        }
    }

    fn expire(&mut self, reason: &str, now: TimestampMs) {
        self.status = BridgeStatus::Expired;
        self.expired_at = Some(now);
        self.expiry_reason = Some(reason.to_string());
    }
}

/// What a sweep did to one bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecayOutcome {
    pub bridge_id: String,
    pub periods_charged: u64,
    pub score_before: f64,
    pub score_after: f64,
    pub expired: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecaySweepReport {
    pub swept_at: TimestampMs,
    pub evaluated: usize,
    /// Bridges whose score or status changed
    pub changed: Vec<DecayOutcome>,
    /// Bridges skipped because a concurrent update won
    pub conflicts: usize,
}

impl DecaySweepReport {
    pub fn expired_count(&self) -> usize {
        self.changed.iter().filter(|o| o.expired.is_some()).count()
    }
}

/// Lifecycle manager for trust bridges.
pub struct TrustBridgeManager {
    store: Arc<dyn BridgeStore>,
    identities: Arc<dyn IdentityRegistry>,
    declarations: Arc<dyn DeclarationStore>,
    config: BridgeConfig,
    policy: ScoringPolicy,
    /// Serializes lookup-before-create for establishment
    establish_lock: Mutex<()>,
}

impl TrustBridgeManager {
    pub fn new(
        store: Arc<dyn BridgeStore>,
        identities: Arc<dyn IdentityRegistry>,
        declarations: Arc<dyn DeclarationStore>,
        config: BridgeConfig,
        policy: ScoringPolicy,
    ) -> Self {
        Self {
            store,
            identities,
            declarations,
            config,
            policy,
            establish_lock: Mutex::new(()),
        }
    }

    pub fn default_options(&self) -> BridgeOptions {
        BridgeOptions::from_config(&self.config)
    }

    /// Score both parties without creating anything.
    pub fn assess_at(&self, user_id: &str, agent_id: &str, now: TimestampMs) -> Result<TrustAssessment> {
        let identity = self
            .identities
            .get_identity(user_id)?
            .ok_or_else(|| BridgeError::IdentityNotFound {
                user_id: user_id.to_string(),
            })?;
        if !identity.is_verified() {
            return Err(BridgeError::IdentityNotVerified {
                user_id: user_id.to_string(),
                status: identity.status,
            });
        }

        let history = self.declarations.list_for_agent(agent_id)?;
        if history.is_empty() {
            return Err(BridgeError::NoDeclarations {
                agent_id: agent_id.to_string(),
            });
        }

        let human_score = human_trust_score(&identity);
        let agent_score = agent_trust_score(&history, self.policy.history_window, now);
        let human_validation = validate_human_for_agent(&identity, now, &self.policy);
        let agent_validation = validate_agent_for_human(&history, now, &self.policy);
        let mutual = mutual_trust_score(
            human_score,
            agent_score,
            human_validation.passed,
            agent_validation.passed,
        );

        Ok(TrustAssessment {
            user_id: user_id.to_string(),
            agent_id: agent_id.to_string(),
            human_trust_score: human_score,
            agent_trust_score: agent_score,
            mutual_trust_score: mutual,
            human_validation,
            agent_validation,
            threshold: self.config.mutual_trust_threshold,
            assessed_at: now,
        })
    }

    pub fn establish(
        &self,
        user_id: &str,
        agent_id: &str,
        options: Option<BridgeOptions>,
    ) -> Result<TrustBridge> {
        self.establish_at(user_id, agent_id, options, now_ms())
    }

    /// Run the establishment protocol. Nothing is persisted unless the
    /// mutual score clears the threshold.
    pub fn establish_at(
        &self,
        user_id: &str,
        agent_id: &str,
        options: Option<BridgeOptions>,
        now: TimestampMs,
    ) -> Result<TrustBridge> {
        let options = options.unwrap_or_else(|| self.default_options());
        options.validate()?;

        let _guard = self.establish_lock.lock();
        if self.store.find_active(user_id, agent_id)?.is_some() {
            warn!(user_id = %user_id, agent_id = %agent_id, "Duplicate bridge establishment rejected");
            return Err(BridgeError::DuplicateActiveBridge {
                user_id: user_id.to_string(),
                agent_id: agent_id.to_string(),
            });
        }

        let assessment = self.assess_at(user_id, agent_id, now)?;
        if !assessment.meets_threshold() {
            warn!(
                user_id = %user_id,
                agent_id = %agent_id,
                mutual = assessment.mutual_trust_score,
                "Trust threshold not met"
            );
            return Err(BridgeError::TrustThresholdNotMet(Box::new(assessment)));
        }

        let bridge = TrustBridge::from_assessment(assessment, &options, now);
        self.store.insert(&bridge)?;
        info!(
            bridge_id = %bridge.bridge_id,
            user_id = %user_id,
            agent_id = %agent_id,
            mutual = bridge.mutual_trust_score,
            "Trust bridge established"
        );
        Ok(bridge)
    }

    pub fn record_interaction(&self, bridge_id: &str, interaction: Interaction) -> Result<TrustBridge> {
        self.record_interaction_at(bridge_id, interaction, now_ms())
    }

    /// Adjust the mutual score by the interaction's capped delta.
    pub fn record_interaction_at(
        &self,
        bridge_id: &str,
        interaction: Interaction,
        now: TimestampMs,
    ) -> Result<TrustBridge> {
        interaction.validate()?;
        let mut bridge = self.get(bridge_id)?;
        bridge.ensure_active()?;

        let cap = self.config.max_interaction_delta;
        let delta = interaction.raw_delta().clamp(-cap, cap);
        bridge.mutual_trust_score = clamp01(bridge.mutual_trust_score + delta);
        bridge.interactions.push(InteractionRecord {
            interaction,
            timestamp: now,
            trust_delta: delta,
            resulting_score: bridge.mutual_trust_score,
        });
        bridge.last_interaction_at = Some(now);
        // New activity point; decay restarts from here
        bridge.trust_decay.periods_charged = 0;

        self.commit(&mut bridge)?;
        debug!(bridge_id = %bridge_id, delta, score = bridge.mutual_trust_score, "Interaction recorded");
        Ok(bridge)
    }

    pub fn revoke(&self, bridge_id: &str, reason: Option<&str>) -> Result<TrustBridge> {
        self.revoke_at(bridge_id, reason, now_ms())
    }

    pub fn revoke_at(&self, bridge_id: &str, reason: Option<&str>, now: TimestampMs) -> Result<TrustBridge> {
        let mut bridge = self.get(bridge_id)?;
        bridge.ensure_active()?;

        let reason = reason
            .filter(|r| !r.trim().is_empty())
            .unwrap_or(DEFAULT_REVOCATION_REASON);
        bridge.status = BridgeStatus::Revoked;
        bridge.revoked_at = Some(now);
        bridge.revocation_reason = Some(reason.to_string());

        self.commit(&mut bridge)?;
        info!(bridge_id = %bridge_id, reason = %reason, "Trust bridge revoked");
        Ok(bridge)
    }

    pub fn decay(&self) -> Result<DecaySweepReport> {
        self.decay_at(now_ms())
    }

    /// Sweep every active bridge once.
    ///
    /// Only whole periods not yet charged since the last activity are
    /// subtracted, so running the sweep repeatedly at the same instant is a no-op.
    pub fn decay_at(&self, now: TimestampMs) -> Result<DecaySweepReport> {
        let mut report = DecaySweepReport {
            swept_at: now,
            ..Default::default()
        };

        for mut bridge in self.store.list_active()? {
            report.evaluated += 1;
            let Some(outcome) = self.apply_decay(&mut bridge, now) else {
                continue;
            };
            match self.commit(&mut bridge) {
                Ok(()) => {
                    if let Some(reason) = &outcome.expired {
                        info!(bridge_id = %bridge.bridge_id, reason = %reason, "Trust bridge expired");
                    }
                    report.changed.push(outcome);
                }
                Err(BridgeError::StaleVersion { bridge_id, .. }) => {
                    warn!(bridge_id = %bridge_id, "Decay skipped; bridge changed during sweep");
                    report.conflicts += 1;
                }
                Err(e) => return Err(e),
            }
        }

        debug!(
            evaluated = report.evaluated,
            changed = report.changed.len(),
            expired = report.expired_count(),
            "Decay sweep finished"
        );
        Ok(report)
    }

    fn apply_decay(&self, bridge: &mut TrustBridge, now: TimestampMs) -> Option<DecayOutcome> {
        let score_before = bridge.mutual_trust_score;
        let mut periods = 0;

        if bridge.trust_decay.enabled {
            let period = self.config.decay_period_days;
            let inactive_days = days_between(bridge.last_activity(), now);
            if inactive_days > period {
                let elapsed = (inactive_days / period).floor() as u64;
                periods = elapsed.saturating_sub(bridge.trust_decay.periods_charged);
                if periods > 0 {
                    bridge.mutual_trust_score = clamp01(
                        bridge.mutual_trust_score - bridge.trust_decay.decay_rate * periods as f64,
                    );
                    bridge.trust_decay.periods_charged = elapsed;
                }
            }
            bridge.trust_decay.last_decay_calculation = now;
        }

        // Only a charge made by this sweep can expire a bridge for decay
        let expired = if periods > 0 && bridge.mutual_trust_score < self.config.expiry_threshold {
            Some(DECAY_EXPIRY_REASON)
        } else if now > bridge.expires_at {
            Some(LIFETIME_EXPIRY_REASON)
        } else {
            None
        };
        if let Some(reason) = expired {
            bridge.expire(reason, now);
        }

        // Unchanged bridges are not rewritten
        if periods == 0 && expired.is_none() {
            return None;
        }
        Some(DecayOutcome {
            bridge_id: bridge.bridge_id.clone(),
            periods_charged: periods,
            score_before,
            score_after: bridge.mutual_trust_score,
            expired: expired.map(str::to_string),
        })
    }

    fn commit(&self, bridge: &mut TrustBridge) -> Result<()> {
        let expected = bridge.version;
        bridge.version += 1;
        if let Err(e) = self.store.update(bridge, expected) {
            bridge.version = expected;
            return Err(e);
        }
        Ok(())
    }

    pub fn get(&self, bridge_id: &str) -> Result<TrustBridge> {
        self.store
            .get(bridge_id)?
            .ok_or_else(|| BridgeError::BridgeNotFound {
                bridge_id: bridge_id.to_string(),
            })
    }

    pub fn list_for_user(&self, user_id: &str) -> Result<Vec<TrustBridge>> {
        self.store.list_for_user(user_id)
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.config.sweep_interval_secs)
    }
}
