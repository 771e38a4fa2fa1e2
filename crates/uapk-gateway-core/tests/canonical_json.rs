// crates/uapk-gateway-core/tests/canonical_json.rs
// ============================================================================
// Module: Canonical JSON Tests
// Description: Determinism and normalization tests for canonical hashing.
// ============================================================================
//! ## Overview
//! Validates key ordering, ASCII escaping, float normalization, and hash
//! stability for the canonical serialization behind every gateway digest.

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

use proptest::prelude::*;
use serde_json::Value;
use serde_json::json;
use uapk_gateway_core::canonical_json_string;
use uapk_gateway_core::hash_canonical_json;

// ============================================================================
// SECTION: Determinism
// ============================================================================

/// Tests that key insertion order does not affect the canonical form.
#[test]
fn test_key_order_is_canonical() {
    let value_a = json!({"b": 1, "a": 2, "nested": {"z": 1, "y": 2}});
    let value_b = json!({"nested": {"y": 2, "z": 1}, "a": 2, "b": 1});
    assert_eq!(canonical_json_string(&value_a), canonical_json_string(&value_b));
    assert_eq!(hash_canonical_json(&value_a), hash_canonical_json(&value_b));
}

/// Tests the exact canonical layout: sorted keys, no whitespace.
#[test]
fn test_canonical_layout() {
    let value = json!({"b": [1, 2], "a": null, "c": true});
    assert_eq!(canonical_json_string(&value), r#"{"a":null,"b":[1,2],"c":true}"#);
}

/// Tests that null values are preserved rather than dropped.
#[test]
fn test_null_preserved() {
    let value = json!({"result_hash": null});
    assert_eq!(canonical_json_string(&value), r#"{"result_hash":null}"#);
}

// ============================================================================
// SECTION: Number Normalization
// ============================================================================

/// Tests that integral floats serialize as integers.
#[test]
fn test_integral_float_becomes_integer() {
    let value = json!({"amount": 150.0});
    assert_eq!(canonical_json_string(&value), r#"{"amount":150}"#);
    assert_eq!(
        hash_canonical_json(&json!({"amount": 150.0})),
        hash_canonical_json(&json!({"amount": 150}))
    );
}

/// Tests ten-decimal rounding of non-integral floats.
#[test]
fn test_float_rounding_neutralizes_noise() {
    let noisy = 0.1_f64 + 0.2_f64;
    assert_eq!(
        canonical_json_string(&json!({"x": noisy})),
        canonical_json_string(&json!({"x": 0.3}))
    );
}

// ============================================================================
// SECTION: String Escaping
// ============================================================================

/// Tests ASCII escaping of non-ASCII and control characters.
#[test]
fn test_ascii_escaping() {
    let value = json!({"name": "Müller\n"});
    assert_eq!(canonical_json_string(&value), "{\"name\":\"M\\u00fcller\\n\"}");
}

/// Tests surrogate-pair escaping for astral characters.
#[test]
fn test_astral_escaping() {
    let value = json!({"emoji": "\u{1f600}"});
    assert_eq!(canonical_json_string(&value), "{\"emoji\":\"\\ud83d\\ude00\"}");
}

// ============================================================================
// SECTION: Properties
// ============================================================================

/// Recursive JSON value strategy for canonicalization properties.
fn arbitrary_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "[a-zA-Z0-9 _äöü]{0,12}".prop_map(Value::from),
    ];
    leaf.prop_recursive(4, 32, 8, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::from),
            prop::collection::btree_map("[a-z_]{1,8}", inner, 0..6)
                .prop_map(|map| Value::Object(map.into_iter().collect())),
        ]
    })
}

proptest! {
    /// Canonicalization is stable under serde round-trips of the value.
    #[test]
    fn prop_canonical_roundtrip_stable(value in arbitrary_json()) {
        let canonical = canonical_json_string(&value);
        let reparsed: Value = serde_json::from_str(&canonical).unwrap();
        prop_assert_eq!(canonical_json_string(&reparsed), canonical);
    }

    /// Canonical output is valid JSON and pure ASCII.
    #[test]
    fn prop_canonical_is_ascii(value in arbitrary_json()) {
        let canonical = canonical_json_string(&value);
        prop_assert!(canonical.is_ascii());
        prop_assert!(serde_json::from_str::<Value>(&canonical).is_ok());
    }
}
