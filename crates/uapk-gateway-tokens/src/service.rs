// crates/uapk-gateway-tokens/src/service.rs
// ============================================================================
// Module: Token Issuance & Verification Service
// Description: Capability/override token issuance and the verifier interface.
// Purpose: Produce bound tokens and plug verification into the policy engine.
// Dependencies: crate::{jws, keys}, uapk-gateway-core, rand
// ============================================================================

//! ## Overview
//! Issuance constructs claims with server-chosen times and unique `jti`
//! values, then signs them with the gateway key. Override tokens are short
//! lived and bound to one approval plus the canonical hash of the approved
//! action. [`GatewayTokenVerifier`] adapts [`crate::jws::verify_compact`] to
//! the core verification interface consumed by the policy engine.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use ed25519_dalek::VerifyingKey;
use rand::RngCore;
use uapk_gateway_core::CapabilityTokenClaims;
use uapk_gateway_core::Clock;
use uapk_gateway_core::GATEWAY_ISSUER;
use uapk_gateway_core::SystemClock;
use uapk_gateway_core::Timestamp;
use uapk_gateway_core::TokenConstraints;
use uapk_gateway_core::TokenError;
use uapk_gateway_core::TokenType;
use uapk_gateway_core::TokenVerifier;

use crate::jws::EncodeError;
use crate::jws::encode_compact;
use crate::jws::verify_compact;
use crate::keys::GatewayKey;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default lifetime of an override token in seconds.
pub const OVERRIDE_TOKEN_TTL_SECONDS: i64 = 300;

// ============================================================================
// SECTION: Issuance
// ============================================================================

/// Inputs for capability-token issuance.
#[derive(Debug, Clone)]
pub struct CapabilityTokenParams {
    /// Tenant the token is bound to.
    pub org_id: String,
    /// Manifest the token is bound to.
    pub manifest_id: String,
    /// Agent the token is issued to.
    pub agent_id: String,
    /// Token lifetime in seconds.
    pub ttl_seconds: i64,
    /// Action types the token permits (empty = all).
    pub allowed_action_types: Vec<String>,
    /// Tools the token permits (empty = all).
    pub allowed_tools: Vec<String>,
    /// Embedded constraints.
    pub constraints: Option<TokenConstraints>,
    /// Issuance time.
    pub issued_at: Timestamp,
}

/// Inputs for override-token issuance.
#[derive(Debug, Clone)]
pub struct OverrideTokenParams {
    /// Tenant the token is bound to.
    pub org_id: String,
    /// Manifest the token is bound to.
    pub manifest_id: String,
    /// Agent the token is issued to.
    pub agent_id: String,
    /// Canonical hash of the approved action.
    pub action_hash: String,
    /// Approval the token redeems.
    pub approval_id: String,
    /// Token lifetime in seconds.
    pub ttl_seconds: i64,
    /// Issuance time.
    pub issued_at: Timestamp,
}

/// Issues a gateway-signed capability token.
///
/// # Errors
///
/// Returns [`EncodeError`] when claim serialization fails.
pub fn issue_capability_token(
    key: &GatewayKey,
    params: CapabilityTokenParams,
) -> Result<String, EncodeError> {
    let iat = params.issued_at.unix_seconds();
    let claims = CapabilityTokenClaims {
        iss: GATEWAY_ISSUER.to_string(),
        sub: params.agent_id,
        org_id: params.org_id,
        manifest_id: params.manifest_id,
        iat,
        exp: iat.saturating_add(params.ttl_seconds),
        jti: format!("cap-{}", random_hex(16)),
        token_type: TokenType::Capability,
        allowed_action_types: params.allowed_action_types,
        allowed_tools: params.allowed_tools,
        constraints: params.constraints,
        action_hash: None,
        approval_id: None,
    };
    encode_compact(&claims, key)
}

/// Issues a short-lived override token for an approved action.
///
/// The token allows exactly one action, identified by `action_hash`, to
/// bypass the escalation that produced the approval.
///
/// # Errors
///
/// Returns [`EncodeError`] when claim serialization fails.
pub fn issue_override_token(
    key: &GatewayKey,
    params: OverrideTokenParams,
) -> Result<String, EncodeError> {
    let iat = params.issued_at.unix_seconds();
    let claims = CapabilityTokenClaims {
        iss: GATEWAY_ISSUER.to_string(),
        sub: params.agent_id,
        org_id: params.org_id,
        manifest_id: params.manifest_id,
        iat,
        exp: iat.saturating_add(params.ttl_seconds),
        jti: format!("override-{}", random_hex(16)),
        token_type: TokenType::Override,
        allowed_action_types: Vec::new(),
        allowed_tools: Vec::new(),
        constraints: None,
        action_hash: Some(params.action_hash),
        approval_id: Some(params.approval_id),
    };
    encode_compact(&claims, key)
}

/// Returns `len` random bytes as lowercase hex.
fn random_hex(len: usize) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut bytes = vec![0_u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    let mut out = String::with_capacity(len * 2);
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}

// ============================================================================
// SECTION: Verifier
// ============================================================================

/// Token verifier backed by the gateway public key and a clock.
pub struct GatewayTokenVerifier {
    /// Gateway verifying key for `iss = "gateway"` tokens.
    gateway_key: VerifyingKey,
    /// Time source for expiry checks.
    clock: Arc<dyn Clock>,
}

impl GatewayTokenVerifier {
    /// Creates a verifier using the system clock.
    #[must_use]
    pub fn new(gateway_key: VerifyingKey) -> Self {
        Self {
            gateway_key,
            clock: Arc::new(SystemClock),
        }
    }

    /// Creates a verifier with an injected clock (tests, replay).
    #[must_use]
    pub fn with_clock(gateway_key: VerifyingKey, clock: Arc<dyn Clock>) -> Self {
        Self {
            gateway_key,
            clock,
        }
    }
}

impl TokenVerifier for GatewayTokenVerifier {
    fn verify(
        &self,
        token: &str,
        issuer_keys: &BTreeMap<String, String>,
    ) -> Result<CapabilityTokenClaims, TokenError> {
        verify_compact(token, issuer_keys, &self.gateway_key, self.clock.now().unix_seconds())
    }
}
