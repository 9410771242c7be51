//! Validator admission and weighted consensus

use crate::test_utils::*;
use std::sync::Arc;
use trustproto_core::{now_ms, ConsensusConfig, ErrorKind, MS_PER_DAY};
use trustproto_domain::{
    DeclarationStore, InMemoryDeclarationStore, SignatureEnvelope, TrustArticles,
    TrustDeclaration, Vote,
};
use trustproto_trust_mesh::{ConsensusEngine, ConsensusError, ProtocolError};

fn seeded(agent: &str, compliance: f64, date: u64) -> TrustDeclaration {
    let mut decl =
        TrustDeclaration::new(agent, agent, "owner", TrustArticles::uniform(true), date).unwrap();
    decl.compliance_score = compliance;
    decl.guilt_score = 1.0 - compliance;
    decl.signature = Some(SignatureEnvelope {
        token: "t".to_string(),
        key_id: "k".to_string(),
        signed_at: date,
        signed_by: "owner".to_string(),
        algorithm: "EdDSA".to_string(),
    });
    decl
}

#[test]
fn test_validator_weight_scenario() {
    let store = Arc::new(InMemoryDeclarationStore::new());
    let now = 500 * MS_PER_DAY;
    for (compliance, age) in [(0.9, 10), (0.85, 20), (0.95, 30)] {
        store
            .insert(seeded("validator-1", compliance, now - age * MS_PER_DAY))
            .unwrap();
    }
    let engine = ConsensusEngine::new(store, ConsensusConfig::default());
    let weight = engine.compute_validator_weight_at("validator-1", now).unwrap();
    assert!((weight - 0.876).abs() < 1e-3, "weight was {weight}");
}

#[test]
fn test_full_endorsement_flow() {
    let harness = TestHarness::new();
    let decl = harness.endorsed_agent("agent-1");

    let consensus = decl.consensus.unwrap();
    assert!(consensus.reached);
    assert_eq!(consensus.ratio, 1.0);
    assert_eq!(decl.ballots.len(), 1);
}

#[test]
fn test_weighted_split_vote() {
    let harness = TestHarness::new();
    let owner = user("owner-x");
    let decl = harness.signed_declaration(&owner, "agent-x");
    let yes_a = harness.admitted_validator("v-a");
    let yes_b = harness.admitted_validator("v-b");
    let no = harness.admitted_validator("v-c");

    let now = now_ms();
    let votes = vec![
        Vote::new(yes_a.id.clone(), true, now),
        Vote::new(yes_b.id.clone(), true, now),
        Vote::new(no.id.clone(), false, now).with_reasoning("insufficient oversight"),
    ];
    for (caller, vote) in [&yes_a, &yes_b, &no].into_iter().zip(&votes) {
        harness
            .protocol
            .submit_vote(caller, &decl.id, vote.clone())
            .unwrap();
    }

    // Equal histories give equal weights: 2/3 is below 0.75
    let result = harness
        .protocol
        .calculate_consensus(&admin(), &decl.id, &votes)
        .unwrap();
    assert!((result.ratio - 2.0 / 3.0).abs() < 1e-9);
    assert!(!result.reached);
    let err = result.ensure_reached().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConsensusThresholdNotMet);

    // The dissenter changes their mind; the later vote wins
    let change_of_mind = Vote::new(no.id.clone(), true, now + 1);
    let mut revised = votes.clone();
    revised.push(change_of_mind.clone());

    // Until the new ballot is submitted, nobody can count it on their behalf
    let err = harness
        .protocol
        .calculate_consensus(&admin(), &decl.id, &revised)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);

    harness
        .protocol
        .submit_vote(&no, &decl.id, change_of_mind)
        .unwrap();
    let result = harness
        .protocol
        .calculate_consensus(&admin(), &decl.id, &revised)
        .unwrap();
    assert_eq!(result.votes.len(), 3);
    assert!(result.reached);
    assert!(harness
        .protocol
        .get_declaration(&decl.id)
        .unwrap()
        .consensus_reached());
}

#[test]
fn test_unadmitted_validator_cannot_vote() {
    let harness = TestHarness::new();
    let decl = harness.signed_declaration(&user("owner"), "agent-1");
    let outsider = validator("newcomer");

    let err = harness
        .protocol
        .submit_vote(&outsider, &decl.id, Vote::new("newcomer", true, now_ms()))
        .unwrap_err();
    assert!(matches!(
        err,
        ProtocolError::Consensus(ConsensusError::NotAValidator { .. })
    ));

    // Nor can it push a consensus result attributed to a phantom voter
    let err = harness
        .protocol
        .calculate_consensus(&outsider, &decl.id, &[Vote::new("ghost", true, now_ms())])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);
    assert!(!harness
        .protocol
        .get_declaration(&decl.id)
        .unwrap()
        .consensus_reached());

    // Two signed declarations are not enough for admission
    let owner = user("owner-of-newcomer");
    harness.signed_declaration(&owner, "newcomer");
    harness.signed_declaration(&owner, "newcomer");
    let err = harness
        .protocol
        .admit_validator(&admin(), "newcomer")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidatorRequirementsNotMet);
}
