// crates/uapk-gateway-core/tests/audit_chain.rs
// ============================================================================
// Module: Audit Chain Tests
// Description: Record hash reproducibility and chain verification tests.
// ============================================================================
//! ## Overview
//! Builds chains by hand and validates hash recomputation, linkage checks,
//! and signature verification failures.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    clippy::missing_docs_in_private_items,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use serde_json::json;
use time::macros::datetime;
use uapk_gateway_core::ChainErrorKind;
use uapk_gateway_core::Decision;
use uapk_gateway_core::InteractionRecord;
use uapk_gateway_core::RecordHashInputs;
use uapk_gateway_core::SignatureVerifier;
use uapk_gateway_core::Timestamp;
use uapk_gateway_core::compute_record_hash;
use uapk_gateway_core::hash_bytes;
use uapk_gateway_core::verify_chain;

// ============================================================================
// SECTION: Fixture
// ============================================================================

/// Verifier accepting `sig-<sha256(message)>` pseudo-signatures.
struct StubSignatureVerifier;

impl SignatureVerifier for StubSignatureVerifier {
    fn verify_base64(&self, message: &[u8], signature: &str) -> bool {
        signature == format!("sig-{}", hash_bytes(message))
    }
}

fn record_at(index: u64, previous: Option<&str>) -> InteractionRecord {
    let created_at =
        Timestamp::new(datetime!(2026-08-01 12:00:00 UTC)).plus_seconds(i64::try_from(index).unwrap());
    let record_id = format!("int-{index:04}");
    let reasons_json = r#"[{"code":"all_checks_passed","message":"All policy checks passed"}]"#;
    let policy_trace_json = r#"{"checks":[]}"#;
    let request_hash = hash_bytes(format!("request-{index}").as_bytes());

    let record_hash = compute_record_hash(&RecordHashInputs {
        record_id: &record_id,
        tenant: "org-1",
        manifest_id: "refund-bot-v1",
        agent_id: "agent-1",
        action_type: "payment",
        tool: "stripe_refund",
        request_hash: &request_hash,
        decision: Decision::Approved,
        reasons_json,
        policy_trace_json,
        result_hash: None,
        previous_record_hash: previous,
        created_at,
    })
    .unwrap();
    let gateway_signature = format!("sig-{}", hash_bytes(record_hash.as_bytes()));

    InteractionRecord {
        record_id: record_id.into(),
        tenant: "org-1".into(),
        manifest_id: "refund-bot-v1".into(),
        agent_id: "agent-1".into(),
        action_type: "payment".to_string(),
        tool: "stripe_refund".to_string(),
        request: json!({"index": index}),
        request_hash,
        decision: Decision::Approved,
        decision_reason: None,
        reasons_json: reasons_json.to_string(),
        policy_trace_json: policy_trace_json.to_string(),
        risk_snapshot_json: None,
        result: None,
        result_hash: None,
        duration_ms: None,
        previous_record_hash: previous.map(str::to_string),
        record_hash,
        gateway_signature,
        created_at,
    }
}

fn chain_of(len: u64) -> Vec<InteractionRecord> {
    let mut records: Vec<InteractionRecord> = Vec::new();
    for index in 0..len {
        let previous = records.last().map(|record| record.record_hash.clone());
        records.push(record_at(index, previous.as_deref()));
    }
    records
}

// ============================================================================
// SECTION: Tests
// ============================================================================

/// Tests that an empty chain verifies.
#[test]
fn test_empty_chain_is_valid() {
    let report = verify_chain(&[], Some(&StubSignatureVerifier));
    assert!(report.valid);
    assert!(report.errors.is_empty());
}

/// Tests that recomputing stored hashes reproduces them byte-for-byte.
#[test]
fn test_record_hash_reproducible() {
    for record in chain_of(4) {
        let recomputed = compute_record_hash(&RecordHashInputs::from_record(&record)).unwrap();
        assert_eq!(recomputed, record.record_hash);
    }
}

/// Tests that a well-formed chain passes full verification.
#[test]
fn test_valid_chain_passes() {
    let records = chain_of(5);
    assert!(records[0].previous_record_hash.is_none());
    let report = verify_chain(&records, Some(&StubSignatureVerifier));
    assert!(report.valid, "chain errors: {:?}", report.errors);
}

/// Tests that a corrupted signature is reported for the right record.
#[test]
fn test_corrupted_signature_reported() {
    let mut records = chain_of(3);
    records[2].gateway_signature = "sig-bogus".to_string();
    let report = verify_chain(&records, Some(&StubSignatureVerifier));
    assert!(!report.valid);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].index, 2);
    assert_eq!(report.errors[0].kind, ChainErrorKind::SignatureInvalid);
}

/// Tests that a broken link is reported without stopping verification.
#[test]
fn test_broken_link_reported_and_verification_continues() {
    let mut records = chain_of(4);
    records[2].previous_record_hash = Some(hash_bytes(b"somewhere else"));
    // The stored hash no longer matches the tampered content either.
    let report = verify_chain(&records, None);
    assert!(!report.valid);
    assert!(report
        .errors
        .iter()
        .any(|error| error.index == 2 && error.kind == ChainErrorKind::PreviousHashMismatch));
    // Record 2's recomputed hash moved with its content, so record 3's link
    // is reported as well.
    assert!(report
        .errors
        .iter()
        .any(|error| error.index == 2 && error.kind == ChainErrorKind::RecordHashMismatch));
    assert!(report
        .errors
        .iter()
        .any(|error| error.index == 3 && error.kind == ChainErrorKind::PreviousHashMismatch));
}
