// crates/uapk-gateway-core/src/core/token.rs
// ============================================================================
// Module: UAPK Gateway Token Claims
// Description: Capability and override token claim structures.
// Purpose: Define the claim set verified by the policy engine.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Capability tokens are Ed25519-signed assertions that an agent may perform
//! a bounded set of actions for a bounded time. Override tokens are the
//! single-use variant bound to one approved action hash. This module defines
//! the claims only; signing and verification live in the token service crate.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Issuer identifier denoting the gateway's own signing key.
pub const GATEWAY_ISSUER: &str = "gateway";

// ============================================================================
// SECTION: Token Type
// ============================================================================

/// Token kind carried in the claims.
///
/// # Invariants
/// - `Override` claims must carry `action_hash` and `approval_id`; claims
///   carrying either with any other type are invalid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    /// Standing capability assertion.
    #[default]
    Capability,
    /// Single-use token bound to one approved action.
    Override,
}

// ============================================================================
// SECTION: Constraints
// ============================================================================

/// Constraints embedded in a capability token.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenConstraints {
    /// Maximum amount the token permits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount_max: Option<f64>,
    /// Permitted jurisdictions, compared case-insensitively.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jurisdictions: Option<Vec<String>>,
    /// Permitted counterparty identifiers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counterparty_allowlist: Option<Vec<String>>,
    /// Refused counterparty identifiers; denylist wins.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counterparty_denylist: Option<Vec<String>>,
    /// Constraint-level expiry as unix seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

// ============================================================================
// SECTION: Claims
// ============================================================================

/// Claims carried in a capability or override token.
///
/// # Invariants
/// - `iss = "gateway"` denotes the gateway key; any other issuer must be
///   registered and active for the tenant.
/// - Wire form uses compact JSON with absent optional fields, matching the
///   canonical payload encoding used at signing time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityTokenClaims {
    /// Issuer identifier.
    pub iss: String,
    /// Subject: the agent the token was issued to.
    pub sub: String,
    /// Tenant the token is bound to.
    pub org_id: String,
    /// Manifest the token is bound to.
    pub manifest_id: String,
    /// Issued-at as unix seconds.
    #[serde(default)]
    pub iat: i64,
    /// Expiry as unix seconds; zero means no expiry claim.
    #[serde(default)]
    pub exp: i64,
    /// Unique token identifier.
    #[serde(default)]
    pub jti: String,
    /// Token kind.
    #[serde(default)]
    pub token_type: TokenType,
    /// Action types the token permits (empty = all).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_action_types: Vec<String>,
    /// Tools the token permits (empty = all).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_tools: Vec<String>,
    /// Embedded constraints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<TokenConstraints>,
    /// Canonical hash of the single action an override token authorizes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_hash: Option<String>,
    /// Approval row an override token redeems.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_id: Option<String>,
}

impl CapabilityTokenClaims {
    /// Returns true when the claims carry override binding material.
    #[must_use]
    pub const fn has_override_binding(&self) -> bool {
        self.action_hash.is_some() && self.approval_id.is_some()
    }
}
