//! Trust bridge lifecycle end to end

use crate::test_utils::*;
use std::sync::Arc;
use std::time::Duration;
use trustproto_core::{now_ms, BridgeConfig, ErrorKind, MS_PER_DAY};
use trustproto_domain::{
    DeclarationStore, InMemoryDeclarationStore, InMemoryIdentityRegistry, SignatureEnvelope,
    TrustArticles, TrustDeclaration, ConsensusRecord,
};
use trustproto_trust_mesh::{
    spawn_decay_task, BridgeOptions, BridgeStatus, BridgeStore, Interaction, InteractionOutcome,
    ScoringPolicy, SqliteBridgeStore, TrustBridgeManager, DECAY_EXPIRY_REASON,
};

fn endorsed(agent_id: &str, compliance: f64, date: u64) -> TrustDeclaration {
    let mut decl =
        TrustDeclaration::new(agent_id, agent_id, "owner", TrustArticles::uniform(true), date)
            .unwrap();
    decl.compliance_score = compliance;
    decl.guilt_score = 1.0 - compliance;
    decl.signature = Some(SignatureEnvelope {
        token: "t".to_string(),
        key_id: "k".to_string(),
        signed_at: date,
        signed_by: "owner".to_string(),
        algorithm: "EdDSA".to_string(),
    });
    decl.consensus = Some(ConsensusRecord {
        ratio: 1.0,
        reached: true,
        threshold: 0.75,
        total_weight: 1.0,
        approval_weight: 1.0,
        votes: Vec::new(),
        calculated_at: date,
    });
    decl
}

#[test]
fn test_high_trust_scenario_establishes_active_bridge() {
    let identities = Arc::new(InMemoryIdentityRegistry::new());
    let declarations = Arc::new(InMemoryDeclarationStore::new());
    let now = 1_000 * MS_PER_DAY;
    identities.upsert(verified_human("alice"));
    declarations.insert(endorsed("agent-1", 0.85, now)).unwrap();

    let manager = TrustBridgeManager::new(
        Arc::new(SqliteBridgeStore::open_in_memory().unwrap()),
        identities,
        declarations,
        BridgeConfig::default(),
        ScoringPolicy::default(),
    );
    let bridge = manager.establish_at("alice", "agent-1", None, now).unwrap();

    assert!((bridge.human_trust_score - 0.9).abs() < 1e-9);
    assert!((bridge.agent_trust_score - 0.85).abs() < 1e-9);
    assert_eq!(bridge.mutual_trust_score, 1.0);
    assert_eq!(bridge.status, BridgeStatus::Active);
}

#[test]
fn test_protocol_bridge_lifecycle() {
    let harness = TestHarness::new();
    harness.endorsed_agent("agent-1");
    harness.identities.upsert(verified_human("alice"));
    let alice = user("alice");

    let bridge = harness
        .protocol
        .establish_bridge(&alice, "agent-1", None)
        .unwrap();
    assert!(bridge.is_active());

    // Only the parties or an admin may see or touch the bridge
    let mallory = user("mallory");
    assert_eq!(
        harness
            .protocol
            .get_bridge(&mallory, &bridge.bridge_id)
            .unwrap_err()
            .kind(),
        ErrorKind::Unauthorized
    );

    let agent = trustproto_trust_mesh::Caller::new("agent-1", trustproto_trust_mesh::Role::Agent);
    let updated = harness
        .protocol
        .record_interaction(
            &agent,
            &bridge.bridge_id,
            Interaction::new(InteractionOutcome::Failed).rated(2),
        )
        .unwrap();
    assert!((updated.mutual_trust_score - 0.97).abs() < 1e-9);

    let err = harness
        .protocol
        .establish_bridge(&alice, "agent-1", None)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let revoked = harness
        .protocol
        .revoke_bridge(&alice, &bridge.bridge_id, Some("no longer needed"))
        .unwrap();
    assert_eq!(revoked.status, BridgeStatus::Revoked);
    assert_eq!(revoked.revocation_reason.as_deref(), Some("no longer needed"));

    let listed = harness.protocol.list_bridges(&alice, None).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(
        harness
            .protocol
            .list_bridges(&admin(), Some("alice"))
            .unwrap()
            .len(),
        1
    );
}

#[test]
fn test_inactivity_decay_and_expiry() {
    let harness = TestHarness::new();
    harness.endorsed_agent("agent-1");
    harness.identities.upsert(verified_human("alice"));
    harness.identities.upsert(verified_human("bob"));
    let manager = harness.protocol.bridge_manager();

    let slow = harness
        .protocol
        .establish_bridge(&user("alice"), "agent-1", None)
        .unwrap();
    let fast = harness
        .protocol
        .establish_bridge(
            &user("bob"),
            "agent-1",
            Some(BridgeOptions {
                decay_rate: 0.25,
                ..BridgeOptions::default()
            }),
        )
        .unwrap();

    let sweep_at = slow.established_at.max(fast.established_at) + days(95);
    let report = manager.decay_at(sweep_at).unwrap();
    assert_eq!(report.evaluated, 2);
    assert_eq!(report.expired_count(), 1);

    let slow = manager.get(&slow.bridge_id).unwrap();
    assert!((slow.mutual_trust_score - 0.97).abs() < 1e-9);
    assert!(slow.is_active());

    let fast = manager.get(&fast.bridge_id).unwrap();
    assert_eq!(fast.status, BridgeStatus::Expired);
    assert_eq!(fast.expiry_reason.as_deref(), Some(DECAY_EXPIRY_REASON));

    // A second sweep at the same instant charges nothing
    let again = manager.decay_at(sweep_at).unwrap();
    assert!(again.changed.is_empty());
    let slow_again = manager.get(&slow.bridge_id).unwrap();
    assert_eq!(slow_again.mutual_trust_score, slow.mutual_trust_score);
    assert_eq!(slow_again.version, slow.version);
}

#[test]
fn test_admin_decay_sweep_through_protocol() {
    let harness = TestHarness::new();
    harness.endorsed_agent("agent-1");
    harness.identities.upsert(verified_human("alice"));
    harness
        .protocol
        .establish_bridge(&user("alice"), "agent-1", None)
        .unwrap();

    let report = harness.protocol.run_decay(&admin()).unwrap();
    assert_eq!(report.evaluated, 1);
    assert!(report.changed.is_empty());
    assert_eq!(
        harness.protocol.run_decay(&user("alice")).unwrap_err().kind(),
        ErrorKind::Unauthorized
    );
}

#[tokio::test]
async fn test_background_decay_task_expires_idle_bridge() {
    let harness = TestHarness::new();
    harness.endorsed_agent("agent-1");
    harness.identities.upsert(verified_human("alice"));
    let bridge = harness
        .protocol
        .establish_bridge(&user("alice"), "agent-1", None)
        .unwrap();

    // Age the stored bridge so the next sweep sees months of inactivity
    let mut aged = bridge.clone();
    aged.established_at = now_ms() - days(400);
    aged.expires_at = now_ms() + days(1);
    aged.mutual_trust_score = 0.35;
    aged.version += 1;
    harness.bridge_store.update(&aged, bridge.version).unwrap();

    let (tx, rx) = tokio::sync::watch::channel(false);
    let task = spawn_decay_task(
        harness.protocol.bridge_manager(),
        Duration::from_millis(20),
        rx,
    );
    tokio::time::sleep(Duration::from_millis(100)).await;
    tx.send(true).unwrap();
    task.await.unwrap();

    let expired = harness
        .protocol
        .get_bridge(&user("alice"), &bridge.bridge_id)
        .unwrap();
    assert_eq!(expired.status, BridgeStatus::Expired);
    assert!(expired.mutual_trust_score < 0.3);
}
