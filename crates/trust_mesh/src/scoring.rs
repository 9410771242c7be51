//! Trust Scoring Module
//!
//! Reproducible score formulas shared by the consensus engine and the trust
//! bridge. Every function is pure: the same history, identity record and
//! clock reading always yield the same score.
//!
//! Declaration histories are passed newest first, as returned by
//! [`DeclarationStore::list_for_agent`](trustproto_domain::DeclarationStore::list_for_agent).

use serde::{Deserialize, Serialize};
use trustproto_core::types::{clamp01, days_between, mean, recency_factor, variance};
use trustproto_core::{ProtocolConfig, TimestampMs};
use trustproto_domain::{HumanIdentityRecord, TrustDeclaration};

/// Weight given to agents without any declaration history.
pub const MIN_VALIDATOR_WEIGHT: f64 = 0.1;

/// Thresholds used by the cross-validation checklists.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringPolicy {
    /// Number of most recent declarations considered
    pub history_window: usize,
    pub min_avg_compliance: f64,
    pub max_declaration_age_days: f64,
    pub min_human_confidence: f64,
    pub min_consistency: f64,
    /// A checklist passes at or above this score
    pub cross_validation_threshold: f64,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            history_window: 10,
            min_avg_compliance: 0.8,
            max_declaration_age_days: 90.0,
            min_human_confidence: 0.7,
            min_consistency: 0.9,
            cross_validation_threshold: 0.8,
        }
    }
}

impl ScoringPolicy {
    pub fn from_config(config: &ProtocolConfig) -> Self {
        Self {
            history_window: config.consensus.history_window,
            min_avg_compliance: config.consensus.min_avg_compliance,
            max_declaration_age_days: config.consensus.max_age_days,
            cross_validation_threshold: config.bridge.cross_validation_threshold,
            ..Self::default()
        }
    }
}

/// Summary of an agent's most recent declarations.
#[derive(Debug, Clone, PartialEq)]
pub struct DeclarationStats {
    /// Declarations inside the window
    pub considered: usize,
    pub avg_compliance: Option<f64>,
    pub compliance_variance: Option<f64>,
    pub latest_date: Option<TimestampMs>,
}

impl DeclarationStats {
    /// Statistics over the first `window` entries of a newest-first history.
    pub fn from_recent(history: &[TrustDeclaration], window: usize) -> Self {
        let recent = &history[..history.len().min(window)];
        let scores: Vec<f64> = recent.iter().map(|d| d.compliance_score).collect();
        Self {
            considered: recent.len(),
            avg_compliance: mean(&scores),
            compliance_variance: variance(&scores),
            latest_date: recent.iter().map(|d| d.declaration_date).max(),
        }
    }

    pub fn days_since_latest(&self, now: TimestampMs) -> Option<f64> {
        self.latest_date.map(|latest| days_between(latest, now))
    }

    /// `1 - variance` of the compliance scores.
    pub fn consistency(&self) -> Option<f64> {
        self.compliance_variance.map(|v| clamp01(1.0 - v))
    }
}

/// `avg_compliance × recency_factor`, or 0.1 for an agent with no history.
pub fn validator_weight(history: &[TrustDeclaration], window: usize, now: TimestampMs) -> f64 {
    let stats = DeclarationStats::from_recent(history, window);
    match (stats.avg_compliance, stats.days_since_latest(now)) {
        (Some(avg), Some(days)) => clamp01(avg * recency_factor(days)),
        _ => MIN_VALIDATOR_WEIGHT,
    }
}

/// Confidence in a human from their identity verification.
pub fn human_trust_score(identity: &HumanIdentityRecord) -> f64 {
    let confidence = &identity.confidence;
    let mut evidence_bonus = 0.0;
    if confidence.document_verified {
        evidence_bonus += 0.1;
    }
    if confidence.biometric_verified {
        evidence_bonus += 0.1;
    }
    if confidence.liveness_verified {
        evidence_bonus += 0.05;
    }
    if confidence.multi_factor {
        evidence_bonus += 0.05;
    }
    clamp01(
        0.5 * confidence.base_confidence + evidence_bonus + 0.2 * identity.consent.completeness(),
    )
}

/// `avg_compliance × recency_factor × consistency_factor`.
pub fn agent_trust_score(history: &[TrustDeclaration], window: usize, now: TimestampMs) -> f64 {
    let stats = DeclarationStats::from_recent(history, window);
    match (
        stats.avg_compliance,
        stats.days_since_latest(now),
        stats.consistency(),
    ) {
        (Some(avg), Some(days), Some(consistency)) => {
            clamp01(avg * recency_factor(days) * consistency)
        }
        _ => 0.0,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationCheck {
    pub name: String,
    pub passed: bool,
}

/// Itemized checklist result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub passed: bool,
    /// Fraction of checks passed
    pub score: f64,
    pub checks: Vec<ValidationCheck>,
}

impl ValidationReport {
    fn from_checks(checks: &[(&str, bool)], threshold: f64) -> Self {
        let total = checks.len().max(1) as f64;
        let passed_count = checks.iter().filter(|(_, passed)| *passed).count() as f64;
        let score = passed_count / total;
        Self {
            passed: score >= threshold,
            score,
            checks: checks
                .iter()
                .map(|(name, passed)| ValidationCheck {
                    name: name.to_string(),
                    passed: *passed,
                })
                .collect(),
        }
    }

    pub fn check(&self, name: &str) -> Option<bool> {
        self.checks.iter().find(|c| c.name == name).map(|c| c.passed)
    }
}

/// Can this human safely be bridged to an agent?
pub fn validate_human_for_agent(
    identity: &HumanIdentityRecord,
    now: TimestampMs,
    policy: &ScoringPolicy,
) -> ValidationReport {
    ValidationReport::from_checks(
        &[
            ("identity_verified", identity.is_verified()),
            ("identity_current", identity.is_current_at(now)),
            ("consent_ai_interaction", identity.consent.ai_interaction),
            ("consent_trust_bridge", identity.consent.trust_bridge),
            (
                "confidence_sufficient",
                identity.confidence.base_confidence >= policy.min_human_confidence,
            ),
        ],
        policy.cross_validation_threshold,
    )
}

/// Is this agent trustworthy enough to be bridged to a human?
pub fn validate_agent_for_human(
    history: &[TrustDeclaration],
    now: TimestampMs,
    policy: &ScoringPolicy,
) -> ValidationReport {
    let stats = DeclarationStats::from_recent(history, policy.history_window);
    let latest = history.first();
    ValidationReport::from_checks(
        &[
            ("signed_declaration", latest.is_some_and(|d| d.is_signed())),
            (
                "compliance_sufficient",
                stats
                    .avg_compliance
                    .is_some_and(|avg| avg >= policy.min_avg_compliance),
            ),
            (
                "declaration_recent",
                stats
                    .days_since_latest(now)
                    .is_some_and(|days| days <= policy.max_declaration_age_days),
            ),
            (
                "consensus_reached",
                latest.is_some_and(|d| d.consensus_reached()),
            ),
            (
                "consistent_history",
                stats
                    .consistency()
                    .is_some_and(|c| c >= policy.min_consistency),
            ),
        ],
        policy.cross_validation_threshold,
    )
}

/// Combined bridge score; each passing checklist adds a 0.1 bonus.
pub fn mutual_trust_score(
    human_score: f64,
    agent_score: f64,
    human_passed: bool,
    agent_passed: bool,
) -> f64 {
    let base = (human_score * 0.4 + agent_score * 0.4) / 0.8;
    let bonus = if human_passed { 0.1 } else { 0.0 } + if agent_passed { 0.1 } else { 0.0 };
    clamp01(base + bonus)
}

#[cfg(test)]
mod tests {
    use super::*;
    use trustproto_core::MS_PER_DAY;
    use trustproto_domain::{
        ConfidenceComponents, ConsentRecord, TrustArticles, VerificationStatus,
    };

    const NOW: TimestampMs = 1_000 * MS_PER_DAY;

    fn declaration(compliance: f64, days_ago: u64) -> TrustDeclaration {
        let mut decl = TrustDeclaration::new(
            "agent-1",
            "Agent",
            "owner-1",
            TrustArticles::uniform(true),
            NOW - days_ago * MS_PER_DAY,
        )
        .unwrap();
        decl.compliance_score = compliance;
        decl.guilt_score = 1.0 - compliance;
        decl
    }

    fn identity(base: f64) -> HumanIdentityRecord {
        HumanIdentityRecord {
            user_id: "user-1".to_string(),
            status: VerificationStatus::Verified,
            confidence: ConfidenceComponents {
                base_confidence: base,
                document_verified: true,
                biometric_verified: true,
                liveness_verified: false,
                multi_factor: false,
            },
            consent: ConsentRecord::all_granted(),
            verified_at: Some(0),
            expires_at: None,
        }
    }

    #[test]
    fn test_validator_weight_scenario() {
        let history = vec![
            declaration(0.95, 10),
            declaration(0.85, 20),
            declaration(0.9, 30),
        ];
        let weight = validator_weight(&history, 10, NOW);
        assert!((weight - 0.9 * (1.0 - 10.0 / 365.0)).abs() < 1e-9);
        assert!((weight - 0.876).abs() < 1e-3);
    }

    #[test]
    fn test_validator_weight_without_history() {
        assert_eq!(validator_weight(&[], 10, NOW), MIN_VALIDATOR_WEIGHT);
    }

    #[test]
    fn test_window_limits_history() {
        let mut history: Vec<TrustDeclaration> = (0..10).map(|i| declaration(1.0, i)).collect();
        history.push(declaration(0.0, 11));
        let stats = DeclarationStats::from_recent(&history, 10);
        assert_eq!(stats.considered, 10);
        assert_eq!(stats.avg_compliance, Some(1.0));
        assert_eq!(stats.consistency(), Some(1.0));
    }

    #[test]
    fn test_human_trust_score() {
        // 0.5*0.8 + 0.2 + 0.2
        assert!((human_trust_score(&identity(0.8)) - 0.8).abs() < 1e-12);
        assert_eq!(human_trust_score(&identity(2.0)), 1.0);
    }

    #[test]
    fn test_agent_trust_score_penalizes_inconsistency() {
        let steady = vec![declaration(0.8, 0), declaration(0.8, 1)];
        let erratic = vec![declaration(1.0, 0), declaration(0.6, 1)];
        let steady_score = agent_trust_score(&steady, 10, NOW);
        let erratic_score = agent_trust_score(&erratic, 10, NOW);
        assert!((steady_score - 0.8).abs() < 1e-9);
        assert!(erratic_score < steady_score);
        assert_eq!(agent_trust_score(&[], 10, NOW), 0.0);
    }

    #[test]
    fn test_human_checklist() {
        let policy = ScoringPolicy::default();
        let report = validate_human_for_agent(&identity(0.9), NOW, &policy);
        assert!(report.passed);
        assert_eq!(report.score, 1.0);

        let mut lapsed = identity(0.5);
        lapsed.expires_at = Some(NOW - 1);
        let report = validate_human_for_agent(&lapsed, NOW, &policy);
        assert_eq!(report.check("identity_current"), Some(false));
        assert_eq!(report.check("confidence_sufficient"), Some(false));
        assert!((report.score - 0.6).abs() < 1e-12);
        assert!(!report.passed);
    }

    #[test]
    fn test_agent_checklist_requires_signature_and_consensus() {
        let policy = ScoringPolicy::default();
        let history = vec![declaration(0.9, 5)];
        let report = validate_agent_for_human(&history, NOW, &policy);
        assert_eq!(report.check("signed_declaration"), Some(false));
        assert_eq!(report.check("consensus_reached"), Some(false));
        assert_eq!(report.check("declaration_recent"), Some(true));
        assert!((report.score - 0.6).abs() < 1e-12);
        assert!(!report.passed);
    }

    #[test]
    fn test_mutual_scenario_clamps_to_one() {
        assert_eq!(mutual_trust_score(0.9, 0.85, true, true), 1.0);
        assert!((mutual_trust_score(0.5, 0.5, false, false) - 0.5).abs() < 1e-12);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn weight_stays_in_unit_interval(
                entries in proptest::collection::vec((0.0f64..=1.0, 0u64..2000), 0..15)
            ) {
                let history: Vec<TrustDeclaration> = entries
                    .iter()
                    .map(|(c, days)| declaration(*c, (*days).min(999)))
                    .collect();
                let weight = validator_weight(&history, 10, NOW);
                prop_assert!((0.0..=1.0).contains(&weight));
                let agent = agent_trust_score(&history, 10, NOW);
                prop_assert!((0.0..=1.0).contains(&agent));
            }

            #[test]
            fn mutual_stays_in_unit_interval(
                h in -1.0f64..2.0, a in -1.0f64..2.0, hp: bool, ap: bool
            ) {
                let mutual = mutual_trust_score(h, a, hp, ap);
                prop_assert!((0.0..=1.0).contains(&mutual));
            }
        }
    }
}
