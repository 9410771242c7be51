//! Declaration signing and integrity

use crate::test_utils::*;
use trustproto_core::ErrorKind;
use trustproto_crypto::SigningError;
use trustproto_domain::{AuditAction, DeclarationStore};
use trustproto_trust_mesh::ProtocolError;

#[test]
fn test_sign_verify_round_trip() {
    let harness = TestHarness::new();
    let owner = user("owner-1");
    let decl = harness.signed_declaration(&owner, "agent-1");

    let report = harness
        .protocol
        .verify_declaration(&owner, &decl.id)
        .unwrap();
    assert!(report.verification.valid);
    assert_eq!(report.verification.owner_id, "owner-1");
    assert_eq!(report.declaration.agent_id, "agent-1");
    assert_eq!(report.declaration.guilt_score, 0.0);

    let history = harness.protocol.get_declaration(&decl.id).unwrap().audit_history;
    let actions: Vec<_> = history.iter().map(|e| e.action).collect();
    assert_eq!(
        actions,
        vec![
            AuditAction::Created,
            AuditAction::Signed,
            AuditAction::SignatureVerified
        ]
    );
}

#[test]
fn test_tampered_score_is_integrity_mismatch() {
    let harness = TestHarness::new();
    let owner = user("owner-1");
    let decl = harness.signed_declaration(&owner, "agent-1");

    // Bypass the facade: the token itself stays valid
    harness
        .declarations
        .modify(&decl.id, &mut |d| {
            d.compliance_score = 0.5;
            Ok(())
        })
        .unwrap();

    let err = harness
        .protocol
        .verify_declaration(&owner, &decl.id)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IntegrityMismatch);
    match err {
        ProtocolError::Signing(SigningError::IntegrityMismatch { field }) => {
            assert_eq!(field, "compliance_score");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_regenerated_key_invalidates_old_signature() {
    let harness = TestHarness::new();
    let owner = user("owner-1");
    let decl = harness.signed_declaration(&owner, "agent-1");
    let before = harness.protocol.public_keys().unwrap();

    harness.protocol.signer().generate_key_pair("owner-1").unwrap();
    let after = harness.protocol.public_keys().unwrap();
    assert_ne!(
        before.for_owner("owner-1").unwrap().kid,
        after.for_owner("owner-1").unwrap().kid
    );

    let err = harness
        .protocol
        .verify_declaration(&owner, &decl.id)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SignatureInvalid);

    // Re-signing under the new key restores verification
    harness
        .protocol
        .sign_declaration(&owner, &decl.id, "agent-1")
        .unwrap();
    assert!(
        harness
            .protocol
            .verify_declaration(&owner, &decl.id)
            .unwrap()
            .verification
            .valid
    );
}

#[test]
fn test_public_key_set_has_no_private_material() {
    let harness = TestHarness::new();
    harness.signed_declaration(&user("owner-1"), "agent-1");
    harness.signed_declaration(&user("owner-2"), "agent-2");

    let keys = harness.protocol.public_keys().unwrap();
    assert_eq!(keys.len(), 2);
    for key in &keys.keys {
        let value = serde_json::to_value(key).unwrap();
        let object = value.as_object().unwrap();
        assert!(!object.contains_key("d"));
        assert_eq!(object["kty"], "OKP");
    }
}

#[test]
fn test_admin_may_sign_for_owner() {
    let harness = TestHarness::new();
    let owner = user("owner-1");
    let decl = harness.signed_declaration(&owner, "agent-1");
    let resigned = harness
        .protocol
        .sign_declaration(&admin(), &decl.id, "agent-1")
        .unwrap();
    assert_eq!(resigned.signature.unwrap().signed_by, "admin");
    assert!(
        harness
            .protocol
            .verify_declaration(&owner, &decl.id)
            .unwrap()
            .verification
            .valid
    );
}
