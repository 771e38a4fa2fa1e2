// crates/uapk-gateway-tokens/tests/tokens.rs
// ============================================================================
// Module: Token Service Tests
// Description: Issuance, verification, and record signing tests.
// ============================================================================
//! ## Overview
//! Exercises compact token round-trips, expiry, issuer resolution, malformed
//! encodings, and record signature verification.

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

use std::collections::BTreeMap;

use time::macros::datetime;
use uapk_gateway_core::RecordSigner;
use uapk_gateway_core::SignatureVerifier;
use uapk_gateway_core::Timestamp;
use uapk_gateway_core::TokenError;
use uapk_gateway_core::TokenType;
use uapk_gateway_tokens::CapabilityTokenParams;
use uapk_gateway_tokens::GatewayKey;
use uapk_gateway_tokens::OVERRIDE_TOKEN_TTL_SECONDS;
use uapk_gateway_tokens::OverrideTokenParams;
use uapk_gateway_tokens::PublicKeyVerifier;
use uapk_gateway_tokens::encode_compact;
use uapk_gateway_tokens::issue_capability_token;
use uapk_gateway_tokens::issue_override_token;
use uapk_gateway_tokens::verify_compact;

// ============================================================================
// SECTION: Fixture
// ============================================================================

fn issued_at() -> Timestamp {
    Timestamp::new(datetime!(2026-08-01 12:00:00 UTC))
}

fn capability_params() -> CapabilityTokenParams {
    CapabilityTokenParams {
        org_id: "org-1".to_string(),
        manifest_id: "refund-bot-v1".to_string(),
        agent_id: "agent-1".to_string(),
        ttl_seconds: 3600,
        allowed_action_types: vec!["payment".to_string()],
        allowed_tools: Vec::new(),
        constraints: None,
        issued_at: issued_at(),
    }
}

fn no_issuers() -> BTreeMap<String, String> {
    BTreeMap::new()
}

// ============================================================================
// SECTION: Round Trips
// ============================================================================

/// Tests capability token issue and verify round trip.
#[test]
fn test_capability_token_round_trip() {
    let key = GatewayKey::generate();
    let token = issue_capability_token(&key, capability_params()).unwrap();

    let claims = verify_compact(
        &token,
        &no_issuers(),
        &key.verifying_key(),
        issued_at().unix_seconds() + 10,
    )
    .unwrap();
    assert_eq!(claims.iss, "gateway");
    assert_eq!(claims.sub, "agent-1");
    assert_eq!(claims.org_id, "org-1");
    assert_eq!(claims.manifest_id, "refund-bot-v1");
    assert_eq!(claims.token_type, TokenType::Capability);
    assert!(claims.jti.starts_with("cap-"));
    assert_eq!(claims.allowed_action_types, vec!["payment".to_string()]);
    assert!(claims.action_hash.is_none());
}

/// Tests override token binding claims.
#[test]
fn test_override_token_round_trip() {
    let key = GatewayKey::generate();
    let token = issue_override_token(
        &key,
        OverrideTokenParams {
            org_id: "org-1".to_string(),
            manifest_id: "refund-bot-v1".to_string(),
            agent_id: "agent-1".to_string(),
            action_hash: "abc123".to_string(),
            approval_id: "appr-1".to_string(),
            ttl_seconds: OVERRIDE_TOKEN_TTL_SECONDS,
            issued_at: issued_at(),
        },
    )
    .unwrap();

    let claims = verify_compact(
        &token,
        &no_issuers(),
        &key.verifying_key(),
        issued_at().unix_seconds() + 10,
    )
    .unwrap();
    assert_eq!(claims.token_type, TokenType::Override);
    assert_eq!(claims.action_hash.as_deref(), Some("abc123"));
    assert_eq!(claims.approval_id.as_deref(), Some("appr-1"));
    assert!(claims.jti.starts_with("override-"));
    assert_eq!(claims.exp, claims.iat + OVERRIDE_TOKEN_TTL_SECONDS);
}

// ============================================================================
// SECTION: Rejection Paths
// ============================================================================

/// Tests expiry rejection.
#[test]
fn test_expired_token_rejected() {
    let key = GatewayKey::generate();
    let token = issue_capability_token(&key, capability_params()).unwrap();

    let result = verify_compact(
        &token,
        &no_issuers(),
        &key.verifying_key(),
        issued_at().unix_seconds() + 3601,
    );
    assert!(matches!(result, Err(TokenError::Expired)));
}

/// Tests rejection of tokens signed by a different key.
#[test]
fn test_wrong_key_rejected() {
    let key = GatewayKey::generate();
    let other = GatewayKey::generate();
    let token = issue_capability_token(&key, capability_params()).unwrap();

    let result = verify_compact(
        &token,
        &no_issuers(),
        &other.verifying_key(),
        issued_at().unix_seconds(),
    );
    assert!(matches!(result, Err(TokenError::Signature)));
}

/// Tests malformed token structure rejection.
#[test]
fn test_malformed_token_rejected() {
    let key = GatewayKey::generate();
    for bad in ["", "abc", "a.b", "a.b.c.d", "!.!.!"] {
        let result =
            verify_compact(bad, &no_issuers(), &key.verifying_key(), issued_at().unix_seconds());
        assert!(matches!(result, Err(TokenError::Malformed(_))), "accepted: {bad}");
    }
}

/// Tests rejection of payload tampering.
#[test]
fn test_tampered_payload_rejected() {
    let key = GatewayKey::generate();
    let token = issue_capability_token(&key, capability_params()).unwrap();
    let mut parts: Vec<String> = token.split('.').map(str::to_string).collect();
    // Substitute the payload with a differently encoded segment.
    parts[1] = parts[1].chars().rev().collect();
    let tampered = parts.join(".");

    let result = verify_compact(
        &tampered,
        &no_issuers(),
        &key.verifying_key(),
        issued_at().unix_seconds(),
    );
    assert!(result.is_err());
}

fn partner_claims() -> uapk_gateway_core::CapabilityTokenClaims {
    uapk_gateway_core::CapabilityTokenClaims {
        iss: "partner-1".to_string(),
        sub: "agent-1".to_string(),
        org_id: "org-1".to_string(),
        manifest_id: "refund-bot-v1".to_string(),
        iat: issued_at().unix_seconds(),
        exp: issued_at().unix_seconds() + 3600,
        jti: "cap-partner".to_string(),
        token_type: TokenType::Capability,
        allowed_action_types: Vec::new(),
        allowed_tools: Vec::new(),
        constraints: None,
        action_hash: None,
        approval_id: None,
    }
}

/// Tests the unknown-issuer rejection.
#[test]
fn test_unknown_issuer_rejected() {
    let issuer_key = GatewayKey::generate();
    let gateway_key = GatewayKey::generate();
    let token = encode_compact(&partner_claims(), &issuer_key).unwrap();

    let result = verify_compact(
        &token,
        &no_issuers(),
        &gateway_key.verifying_key(),
        issued_at().unix_seconds(),
    );
    assert!(matches!(result, Err(TokenError::UnknownIssuer(issuer)) if issuer == "partner-1"));
}

/// Tests issuer key resolution from the per-tenant map.
#[test]
fn test_issuer_map_resolution() {
    let issuer_key = GatewayKey::generate();
    let gateway_key = GatewayKey::generate();
    let token = encode_compact(&partner_claims(), &issuer_key).unwrap();

    let mut issuers = BTreeMap::new();
    issuers.insert("partner-1".to_string(), issuer_key.public_key_base64());
    let claims = verify_compact(
        &token,
        &issuers,
        &gateway_key.verifying_key(),
        issued_at().unix_seconds(),
    )
    .unwrap();
    assert_eq!(claims.iss, "partner-1");
    assert_eq!(claims.org_id, "org-1");
}

// ============================================================================
// SECTION: Verifier Interface
// ============================================================================

/// Tests the verifier used by the policy engine, clock included.
#[test]
fn test_gateway_token_verifier_expiry() {
    use std::sync::Arc;

    use uapk_gateway_core::ManualClock;
    use uapk_gateway_core::TokenVerifier;
    use uapk_gateway_tokens::GatewayTokenVerifier;

    let key = GatewayKey::generate();
    let token = issue_capability_token(&key, capability_params()).unwrap();

    let clock = Arc::new(ManualClock::new(issued_at().plus_seconds(60)));
    let verifier = GatewayTokenVerifier::with_clock(key.verifying_key(), clock.clone());

    let claims = verifier.verify(&token, &no_issuers()).unwrap();
    assert_eq!(claims.sub, "agent-1");

    clock.advance_seconds(3600);
    assert!(matches!(verifier.verify(&token, &no_issuers()), Err(TokenError::Expired)));
}

// ============================================================================
// SECTION: Record Signing
// ============================================================================

/// Tests record signature round trip through the export verifier.
#[test]
fn test_record_signature_round_trip() {
    let key = GatewayKey::generate();
    let record_hash = "a".repeat(64);
    let signature = key.sign_base64(record_hash.as_bytes());

    let verifier = PublicKeyVerifier::from_base64(&key.public_key_base64()).unwrap();
    assert!(verifier.verify_base64(record_hash.as_bytes(), &signature));
    assert!(!verifier.verify_base64(b"different message", &signature));
    assert!(!verifier.verify_base64(record_hash.as_bytes(), "not-base64!!"));
}

/// Tests PEM round trip through the development key path.
#[test]
fn test_pem_round_trip() {
    let key = GatewayKey::generate();
    let pem = key.to_pkcs8_pem().unwrap();
    let reloaded = GatewayKey::from_pkcs8_pem(&pem).unwrap();
    assert_eq!(key.public_key_base64(), reloaded.public_key_base64());
}
