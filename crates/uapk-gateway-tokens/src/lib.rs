// crates/uapk-gateway-tokens/src/lib.rs
// ============================================================================
// Module: UAPK Gateway Token Service
// Description: Ed25519 key management and EdDSA compact token operations.
// Purpose: Issue and verify capability/override tokens; sign audit records.
// Dependencies: uapk-gateway-core, ed25519-dalek, base64, rand
// ============================================================================

//! ## Overview
//! The token service owns every Ed25519 operation in the gateway: loading
//! the process-wide signing key, issuing capability and override tokens as
//! compact EdDSA JWS, verifying presented tokens against per-tenant issuer
//! keys, and signing interaction record hashes. The policy engine consumes
//! this crate exclusively through the interfaces defined in core.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod jws;
pub mod keys;
pub mod service;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use jws::EncodeError;
pub use jws::encode_compact;
pub use jws::verify_compact;
pub use keys::GATEWAY_PRIVATE_KEY_ENV;
pub use keys::GatewayKey;
pub use keys::KeyError;
pub use keys::PublicKeyVerifier;
pub use keys::verifying_key_from_base64;
pub use service::CapabilityTokenParams;
pub use service::GatewayTokenVerifier;
pub use service::OVERRIDE_TOKEN_TTL_SECONDS;
pub use service::OverrideTokenParams;
pub use service::issue_capability_token;
pub use service::issue_override_token;
