// crates/uapk-gateway-store-sqlite/tests/sqlite_store_unit.rs
// ============================================================================
// Module: SQLite Store Tests
// Description: Conditional-update and round-trip tests for the gateway store.
// ============================================================================
//! ## Overview
//! Exercises manifest selection, issuer registration, approval one-shot
//! consumption, budget reservation under threads, and audit chain appends
//! with tail conflicts.

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

use std::thread;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use serde_json::json;
use time::macros::datetime;
use uapk_gateway_core::ActionInfo;
use uapk_gateway_core::Approval;
use uapk_gateway_core::ApprovalStatus;
use uapk_gateway_core::ApprovalStore;
use uapk_gateway_core::CounterStore;
use uapk_gateway_core::Decision;
use uapk_gateway_core::InteractionRecord;
use uapk_gateway_core::IssuerRecord;
use uapk_gateway_core::IssuerStatus;
use uapk_gateway_core::IssuerStore;
use uapk_gateway_core::ManifestId;
use uapk_gateway_core::ManifestRecord;
use uapk_gateway_core::ManifestStatus;
use uapk_gateway_core::ManifestStore;
use uapk_gateway_core::ReasonCode;
use uapk_gateway_core::RecordStore;
use uapk_gateway_core::StoreError;
use uapk_gateway_core::TenantId;
use uapk_gateway_core::Timestamp;
use uapk_gateway_store_sqlite::SqliteGatewayStore;
use uapk_gateway_store_sqlite::SqliteStoreConfig;

// ============================================================================
// SECTION: Fixture
// ============================================================================

fn tenant() -> TenantId {
    TenantId::new("org-1")
}

fn manifest_id() -> ManifestId {
    ManifestId::new("refund-bot-v1")
}

fn at(seconds: i64) -> Timestamp {
    Timestamp::new(datetime!(2026-08-01 12:00:00 UTC)).plus_seconds(seconds)
}

fn store() -> SqliteGatewayStore {
    SqliteGatewayStore::open_in_memory().unwrap()
}

fn manifest_at(seconds: i64, status: ManifestStatus, marker: &str) -> ManifestRecord {
    ManifestRecord {
        tenant: tenant(),
        manifest_id: manifest_id(),
        status,
        manifest: json!({"policy": {}, "tools": {marker: {"type": "mock"}}}),
        created_at: at(seconds),
    }
}

fn approval(approval_id: &str, status: ApprovalStatus) -> Approval {
    Approval {
        approval_id: approval_id.into(),
        tenant: tenant(),
        interaction_id: "int-1".into(),
        manifest_id: manifest_id(),
        agent_id: "agent-1".into(),
        action: ActionInfo {
            action_type: "payment".to_string(),
            tool: "stripe_refund".to_string(),
            params: json!({"amount": 75, "currency": "USD"}),
        },
        counterparty: None,
        context: Some(json!({"source": "test"})),
        reason_codes: vec![ReasonCode::AmountRequiresApproval],
        status,
        expires_at: at(24 * 3600),
        consumed_at: None,
        consumed_interaction_id: None,
        approver: None,
        approved_at: None,
        created_at: at(0),
    }
}

fn record(index: i64, previous: Option<&str>) -> InteractionRecord {
    InteractionRecord {
        record_id: format!("int-{index:04}").into(),
        tenant: tenant(),
        manifest_id: manifest_id(),
        agent_id: "agent-1".into(),
        action_type: "payment".to_string(),
        tool: "stripe_refund".to_string(),
        request: json!({"index": index}),
        request_hash: format!("req-hash-{index}"),
        decision: Decision::Approved,
        decision_reason: Some("All policy checks passed".to_string()),
        reasons_json: "[]".to_string(),
        policy_trace_json: r#"{"checks":[]}"#.to_string(),
        risk_snapshot_json: None,
        result: Some(json!({"ok": true})),
        result_hash: Some(format!("res-hash-{index}")),
        duration_ms: Some(3),
        previous_record_hash: previous.map(str::to_string),
        record_hash: format!("rec-hash-{index}"),
        gateway_signature: format!("sig-{index}"),
        created_at: at(index),
    }
}

// ============================================================================
// SECTION: Manifests
// ============================================================================

/// Tests newest-active manifest selection.
#[test]
fn test_newest_active_manifest_selected() {
    let store = store();
    store.insert_manifest(&manifest_at(0, ManifestStatus::Active, "older")).unwrap();
    store.insert_manifest(&manifest_at(60, ManifestStatus::Active, "newer")).unwrap();
    store.insert_manifest(&manifest_at(120, ManifestStatus::Pending, "pending")).unwrap();

    let selected = store.get_active(&tenant(), &manifest_id()).unwrap().unwrap();
    assert_eq!(selected.status, ManifestStatus::Active);
    assert!(selected.manifest["tools"].get("newer").is_some());
}

/// Tests that only active rows are selectable.
#[test]
fn test_inactive_rows_not_selected() {
    let store = store();
    store.insert_manifest(&manifest_at(0, ManifestStatus::Inactive, "inactive")).unwrap();
    assert!(store.get_active(&tenant(), &manifest_id()).unwrap().is_none());
}

/// Tests bulk status transitions for activation flows.
#[test]
fn test_set_manifest_status() {
    let store = store();
    store.insert_manifest(&manifest_at(0, ManifestStatus::Active, "v1")).unwrap();
    let updated =
        store.set_manifest_status(&tenant(), &manifest_id(), ManifestStatus::Archived).unwrap();
    assert_eq!(updated, 1);
    assert!(store.get_active(&tenant(), &manifest_id()).unwrap().is_none());
}

// ============================================================================
// SECTION: Issuers
// ============================================================================

fn issuer(issuer_id: &str) -> IssuerRecord {
    IssuerRecord {
        tenant: tenant(),
        issuer_id: issuer_id.into(),
        name: Some("Partner".to_string()),
        public_key: BASE64_STANDARD.encode([7_u8; 32]),
        status: IssuerStatus::Active,
        created_at: at(0),
    }
}

/// Tests issuer registration, duplicates, and revocation visibility.
#[test]
fn test_issuer_lifecycle() {
    let store = store();
    store.register(issuer("partner-1")).unwrap();

    // Duplicate registration is refused.
    let duplicate = store.register(issuer("partner-1"));
    assert!(matches!(duplicate, Err(StoreError::Conflict(_))));

    let keys = store.active_keys(&tenant()).unwrap();
    assert!(keys.contains_key("partner-1"));

    assert!(store
        .set_status(&tenant(), &"partner-1".into(), IssuerStatus::Revoked)
        .unwrap());
    let keys = store.active_keys(&tenant()).unwrap();
    assert!(keys.is_empty());

    let row = IssuerStore::get(&store, &tenant(), &"partner-1".into()).unwrap().unwrap();
    assert_eq!(row.status, IssuerStatus::Revoked);
}

/// Tests rejection of malformed public keys at registration.
#[test]
fn test_invalid_public_key_rejected() {
    let store = store();
    let mut bad = issuer("partner-2");
    bad.public_key = "not-base64!!".to_string();
    assert!(matches!(store.register(bad), Err(StoreError::Invalid(_))));

    let mut short = issuer("partner-3");
    short.public_key = BASE64_STANDARD.encode([7_u8; 16]);
    assert!(matches!(store.register(short), Err(StoreError::Invalid(_))));
}

// ============================================================================
// SECTION: Approvals
// ============================================================================

/// Tests approval persistence round trip.
#[test]
fn test_approval_round_trip() {
    let store = store();
    let original = approval("appr-1", ApprovalStatus::Pending);
    store.create(original.clone()).unwrap();

    let loaded = ApprovalStore::get(&store, &tenant(), &"appr-1".into()).unwrap().unwrap();
    assert_eq!(loaded, original);
}

/// Tests the pending-to-approved transition and its guard.
#[test]
fn test_decide_only_from_pending() {
    let store = store();
    store.create(approval("appr-1", ApprovalStatus::Pending)).unwrap();

    assert!(store
        .decide(&tenant(), &"appr-1".into(), ApprovalStatus::Approved, "operator", at(10))
        .unwrap());
    let loaded = ApprovalStore::get(&store, &tenant(), &"appr-1".into()).unwrap().unwrap();
    assert_eq!(loaded.status, ApprovalStatus::Approved);
    assert_eq!(loaded.approver.as_deref(), Some("operator"));

    // A second decision attempt finds no pending row.
    assert!(!store
        .decide(&tenant(), &"appr-1".into(), ApprovalStatus::Denied, "operator", at(20))
        .unwrap());
}

/// Tests one-shot consumption of an approved row.
#[test]
fn test_consume_exactly_once() {
    let store = store();
    store.create(approval("appr-1", ApprovalStatus::Approved)).unwrap();

    assert!(store.consume(&tenant(), &"appr-1".into(), &"int-9".into(), at(5)).unwrap());
    let loaded = ApprovalStore::get(&store, &tenant(), &"appr-1".into()).unwrap().unwrap();
    assert_eq!(loaded.consumed_at, Some(at(5)));
    assert_eq!(loaded.consumed_interaction_id, Some("int-9".into()));

    // Replay loses the conditional update.
    assert!(!store.consume(&tenant(), &"appr-1".into(), &"int-10".into(), at(6)).unwrap());
    let loaded = ApprovalStore::get(&store, &tenant(), &"appr-1".into()).unwrap().unwrap();
    assert_eq!(loaded.consumed_interaction_id, Some("int-9".into()));
}

/// Tests that pending rows cannot be consumed.
#[test]
fn test_pending_rows_not_consumable() {
    let store = store();
    store.create(approval("appr-1", ApprovalStatus::Pending)).unwrap();
    assert!(!store.consume(&tenant(), &"appr-1".into(), &"int-9".into(), at(5)).unwrap());
}

/// Tests consumption under concurrent replay attempts.
#[test]
fn test_concurrent_consumption_single_winner() {
    let store = store();
    store.create(approval("appr-1", ApprovalStatus::Approved)).unwrap();

    let mut winners = 0;
    thread::scope(|scope| {
        let mut handles = Vec::new();
        for index in 0..16 {
            let store = store.clone();
            handles.push(scope.spawn(move || {
                store
                    .consume(
                        &tenant(),
                        &"appr-1".into(),
                        &format!("int-{index}").into(),
                        at(5),
                    )
                    .unwrap()
            }));
        }
        for handle in handles {
            if handle.join().unwrap() {
                winners += 1;
            }
        }
    });
    assert_eq!(winners, 1);
}

// ============================================================================
// SECTION: Counters
// ============================================================================

/// Tests count, increment, and conditional reservation.
#[test]
fn test_counter_reservation() {
    let store = store();
    let day = at(0).day();

    assert_eq!(store.count(&tenant(), &manifest_id(), day).unwrap(), 0);
    assert_eq!(store.increment(&tenant(), &manifest_id(), day).unwrap(), 1);
    assert_eq!(store.increment(&tenant(), &manifest_id(), day).unwrap(), 2);

    // Reservation succeeds until the cap is reached.
    assert_eq!(store.reserve(&tenant(), &manifest_id(), day, 3).unwrap(), Some(3));
    assert_eq!(store.reserve(&tenant(), &manifest_id(), day, 3).unwrap(), None);
    assert_eq!(store.count(&tenant(), &manifest_id(), day).unwrap(), 3);

    // A zero cap can never reserve.
    assert_eq!(store.reserve(&tenant(), &"other".into(), day, 0).unwrap(), None);
}

/// Tests the hard cap under concurrent reservations.
#[test]
fn test_concurrent_reservations_respect_cap() {
    let store = store();
    let day = at(0).day();

    let mut reserved = 0;
    thread::scope(|scope| {
        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = store.clone();
            handles.push(
                scope.spawn(move || store.reserve(&tenant(), &manifest_id(), day, 10).unwrap()),
            );
        }
        for handle in handles {
            if handle.join().unwrap().is_some() {
                reserved += 1;
            }
        }
    });

    assert_eq!(reserved, 10);
    assert_eq!(store.count(&tenant(), &manifest_id(), day).unwrap(), 10);
}

// ============================================================================
// SECTION: Records
// ============================================================================

/// Tests record round trip and chain ordering.
#[test]
fn test_record_round_trip() {
    let store = store();
    let first = record(0, None);
    store.append(&first).unwrap();
    let second = record(1, Some("rec-hash-0"));
    store.append(&second).unwrap();

    assert_eq!(
        store.latest_hash(&tenant(), &manifest_id()).unwrap().as_deref(),
        Some("rec-hash-1")
    );
    let records = store.list(&tenant(), &manifest_id()).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0], first);
    assert_eq!(records[1], second);
}

/// Tests that a stale chain tail is reported as a conflict.
#[test]
fn test_stale_tail_conflicts() {
    let store = store();
    store.append(&record(0, None)).unwrap();

    // A second root for the same chain collides with the tail index.
    let stale = record(1, None);
    assert!(matches!(store.append(&stale), Err(StoreError::Conflict(_))));

    // The corrected append succeeds.
    store.append(&record(1, Some("rec-hash-0"))).unwrap();
}

/// Tests that chains are partitioned per manifest.
#[test]
fn test_chains_partitioned_by_manifest() {
    let store = store();
    store.append(&record(0, None)).unwrap();

    let mut other = record(0, None);
    other.manifest_id = ManifestId::new("other-bot");
    store.append(&other).unwrap();

    assert_eq!(
        store.latest_hash(&tenant(), &"other-bot".into()).unwrap().as_deref(),
        Some("rec-hash-0")
    );
}

/// Tests persistence across reopen of a file-backed store.
#[test]
fn test_file_backed_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let config = SqliteStoreConfig::new(dir.path().join("gateway.db"));

    {
        let store = SqliteGatewayStore::open(&config).unwrap();
        store.append(&record(0, None)).unwrap();
    }

    let store = SqliteGatewayStore::open(&config).unwrap();
    assert_eq!(
        store.latest_hash(&tenant(), &manifest_id()).unwrap().as_deref(),
        Some("rec-hash-0")
    );
}
