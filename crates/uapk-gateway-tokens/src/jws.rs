// crates/uapk-gateway-tokens/src/jws.rs
// ============================================================================
// Module: Compact EdDSA JWS
// Description: Encoding and verification of Ed25519-signed compact tokens.
// Purpose: Implement the wire format shared by capability and override tokens.
// Dependencies: uapk-gateway-core, ed25519-dalek, base64, serde_json
// ============================================================================

//! ## Overview
//! Tokens are three base64url segments: canonical JSON header, canonical
//! JSON claims, and an Ed25519 signature over `header.payload`. Verification
//! rejects on any malformed segment, requires the `EdDSA` algorithm, resolves
//! the verifying key by issuer, checks the signature, then the expiry.
//! Semantic claim checks (identity bindings, constraints) stay in the policy
//! engine.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as BASE64_URL;
use ed25519_dalek::Signature;
use ed25519_dalek::VerifyingKey;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;
use uapk_gateway_core::CapabilityTokenClaims;
use uapk_gateway_core::GATEWAY_ISSUER;
use uapk_gateway_core::TokenError;
use uapk_gateway_core::canonical_json_string;
use uapk_gateway_core::canonical_json_value;

use crate::keys::GatewayKey;
use crate::keys::verifying_key_from_base64;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Token encoding errors.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// Claims could not be serialized.
    #[error("failed to serialize claims: {0}")]
    Serialization(String),
}

// ============================================================================
// SECTION: Encoding
// ============================================================================

/// Encodes and signs claims as a compact EdDSA JWS.
///
/// # Errors
///
/// Returns [`EncodeError`] when claim serialization fails.
pub fn encode_compact(
    claims: &CapabilityTokenClaims,
    key: &GatewayKey,
) -> Result<String, EncodeError> {
    let header = canonical_json_string(&json!({"alg": "EdDSA", "typ": "JWT"}));
    let payload =
        canonical_json_value(claims).map_err(|err| EncodeError::Serialization(err.to_string()))?;

    let header_b64 = BASE64_URL.encode(header.as_bytes());
    let payload_b64 = BASE64_URL.encode(payload.as_bytes());
    let signing_input = format!("{header_b64}.{payload_b64}");
    let signature = key.sign(signing_input.as_bytes());
    let signature_b64 = BASE64_URL.encode(signature.to_bytes());

    Ok(format!("{signing_input}.{signature_b64}"))
}

// ============================================================================
// SECTION: Verification
// ============================================================================

/// Verifies a compact token and returns its claims.
///
/// Key resolution order: the per-tenant issuer map keyed by `iss`, then the
/// gateway key when `iss = "gateway"`, otherwise the issuer is unknown.
///
/// # Errors
///
/// Returns [`TokenError`] when any segment is malformed, the algorithm is
/// unsupported, the issuer is unknown, the signature fails, or the token has
/// expired at `now` (unix seconds).
pub fn verify_compact(
    token: &str,
    issuer_keys: &BTreeMap<String, String>,
    gateway_key: &VerifyingKey,
    now: i64,
) -> Result<CapabilityTokenClaims, TokenError> {
    let segments: Vec<&str> = token.split('.').collect();
    let [header_b64, payload_b64, signature_b64] = segments.as_slice() else {
        return Err(TokenError::Malformed("Invalid token format".to_string()));
    };

    let header_bytes = BASE64_URL
        .decode(header_b64)
        .map_err(|_| TokenError::Malformed("Invalid header encoding".to_string()))?;
    let header: Value = serde_json::from_slice(&header_bytes)
        .map_err(|_| TokenError::Malformed("Invalid header encoding".to_string()))?;
    let algorithm = header.get("alg").and_then(Value::as_str).unwrap_or("none");
    if algorithm != "EdDSA" {
        return Err(TokenError::Malformed(format!("Unsupported algorithm: {algorithm}")));
    }

    let payload_bytes = BASE64_URL
        .decode(payload_b64)
        .map_err(|_| TokenError::Malformed("Invalid payload encoding".to_string()))?;
    let claims: CapabilityTokenClaims = serde_json::from_slice(&payload_bytes)
        .map_err(|_| TokenError::Malformed("Invalid payload encoding".to_string()))?;

    let signature_bytes = BASE64_URL
        .decode(signature_b64)
        .map_err(|_| TokenError::Malformed("Invalid signature encoding".to_string()))?;
    let signature = Signature::from_slice(&signature_bytes)
        .map_err(|_| TokenError::Malformed("Invalid signature encoding".to_string()))?;

    let verifying_key = if let Some(encoded) = issuer_keys.get(&claims.iss) {
        verifying_key_from_base64(encoded).map_err(|_| TokenError::Signature)?
    } else if claims.iss == GATEWAY_ISSUER {
        *gateway_key
    } else {
        return Err(TokenError::UnknownIssuer(claims.iss.clone()));
    };

    let signing_input = format!("{header_b64}.{payload_b64}");
    verifying_key
        .verify_strict(signing_input.as_bytes(), &signature)
        .map_err(|_| TokenError::Signature)?;

    if claims.exp > 0 && now > claims.exp {
        return Err(TokenError::Expired);
    }

    Ok(claims)
}
