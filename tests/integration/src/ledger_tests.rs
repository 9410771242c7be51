//! Ledger integrity through the protocol facade

use crate::test_utils::*;
use trustproto_core::{BreakReason, ErrorKind, IngestRequest, Metadata};

#[test]
fn test_session_chain_verifies_after_many_appends() {
    let harness = TestHarness::new();
    let alice = user("alice");

    let mut previous = None;
    for i in 0..25 {
        let receipt = harness
            .protocol
            .ingest(
                &alice,
                IngestRequest::new("session-1", format!("prompt {i}"), format!("response {i}"))
                    .model("acme", "helper-1"),
            )
            .unwrap();
        assert_eq!(receipt.ledger.prev_hash, previous);
        previous = Some(receipt.ledger.row_hash.clone());
    }

    let report = harness.protocol.verify_session("session-1").unwrap();
    assert!(report.ok);
    assert_eq!(report.count, 25);
}

#[test]
fn test_sessions_are_independent_chains() {
    let harness = TestHarness::new();
    let alice = user("alice");

    let a = harness
        .protocol
        .ingest(&alice, IngestRequest::new("a", "p", "r"))
        .unwrap();
    let b = harness
        .protocol
        .ingest(&alice, IngestRequest::new("b", "p", "r"))
        .unwrap();
    assert!(a.ledger.prev_hash.is_none());
    assert!(b.ledger.prev_hash.is_none());
}

#[test]
fn test_out_of_band_tamper_is_located() {
    let harness = TestHarness::new();
    let alice = user("alice");
    let mut receipts = Vec::new();
    for i in 0..5 {
        receipts.push(
            harness
                .protocol
                .ingest(&alice, IngestRequest::new("s", format!("p{i}"), "r"))
                .unwrap(),
        );
    }

    let ledger = harness.protocol.ledger();
    ledger.__test_drop_immutability_triggers().unwrap();
    ledger
        .__test_execute_raw_sql(&format!(
            "UPDATE interaction_events SET response = 'forged' WHERE event_id = '{}'",
            receipts[2].event_id
        ))
        .unwrap();

    let report = harness.protocol.verify_session("s").unwrap();
    assert!(!report.ok);
    assert_eq!(report.count, 2);
    let chain_break = report.chain_break.unwrap();
    assert_eq!(chain_break.break_at, 2);
    assert_eq!(chain_break.event_id, receipts[2].event_id);
    assert_eq!(chain_break.reason, BreakReason::RowHashMismatch);
}

#[test]
fn test_rows_are_immutable() {
    let harness = TestHarness::new();
    let receipt = harness
        .protocol
        .ingest(&user("alice"), IngestRequest::new("s", "p", "r"))
        .unwrap();
    let ledger = harness.protocol.ledger();

    let err = ledger
        .update_event(&receipt.event_id, &Metadata::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ImmutableViolation);
    let err = ledger.delete_event(&receipt.event_id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ImmutableViolation);

    let err = ledger
        .__test_execute_raw_sql("UPDATE interaction_events SET prompt = 'x'")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ImmutableViolation);
    assert!(harness.protocol.verify_session("s").unwrap().ok);
}

#[test]
fn test_paginated_read_follows_cursor() {
    let harness = TestHarness::new();
    let alice = user("alice");
    for i in 0..7 {
        harness
            .protocol
            .ingest(&alice, IngestRequest::new("s", format!("p{i}"), "r"))
            .unwrap();
    }

    let mut seen = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = harness
            .protocol
            .read_session("s", cursor.as_deref(), 3)
            .unwrap();
        seen.extend(page.events.iter().map(|e| e.prompt.clone()));
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    let expected: Vec<String> = (0..7).map(|i| format!("p{i}")).collect();
    assert_eq!(seen, expected);
}
