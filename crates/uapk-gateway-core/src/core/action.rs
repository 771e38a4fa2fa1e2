// crates/uapk-gateway-core/src/core/action.rs
// ============================================================================
// Module: UAPK Gateway Action Model
// Description: Action requests, counterparties, and gateway decisions.
// Purpose: Define the evaluation input consumed by the policy engine.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! An [`ActionRequest`] is the complete evaluation input: the acting agent,
//! the action it wants to perform, and optional counterparty, context, and
//! token material. Action parameters stay untyped JSON because they are
//! forwarded verbatim to connectors; everything else is explicit.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

use crate::core::identifiers::AgentId;
use crate::core::identifiers::ManifestId;

// ============================================================================
// SECTION: Gateway Decision
// ============================================================================

/// Tri-state outcome of policy evaluation.
///
/// # Invariants
/// - Precedence is `Deny` > `Escalate` > `Allow`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayDecision {
    /// Action is permitted.
    Allow,
    /// Action is refused.
    Deny,
    /// Action requires human approval.
    Escalate,
}

// ============================================================================
// SECTION: Action
// ============================================================================

/// The concrete operation an agent wants to perform.
///
/// # Invariants
/// - `params` is forwarded to the connector unmodified and inspected by
///   policy via dot-path traversal only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionInfo {
    /// Action type label (e.g. `payment`, `send_email`).
    #[serde(rename = "type")]
    pub action_type: String,
    /// Tool name keyed into the manifest tools registry.
    pub tool: String,
    /// Opaque parameters passed to the connector.
    #[serde(default = "empty_object")]
    pub params: Value,
}

/// Returns an empty JSON object for defaulted params.
fn empty_object() -> Value {
    Value::Object(Map::new())
}

/// Counterparty identity attached to an action request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterpartyInfo {
    /// Counterparty identifier checked against allow/deny lists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Counterparty jurisdiction code (case-insensitive comparison).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jurisdiction: Option<String>,
    /// Additional counterparty attributes carried through to audit.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ============================================================================
// SECTION: Action Request
// ============================================================================

/// The evaluation input for the gateway.
///
/// # Invariants
/// - The tenant is supplied out-of-band by the caller's authentication layer
///   and is never read from the request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    /// Manifest identifier governing this action.
    pub manifest_id: ManifestId,
    /// Logical actor performing the action.
    pub agent_id: AgentId,
    /// The requested action.
    pub action: ActionInfo,
    /// Optional counterparty identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counterparty: Option<CounterpartyInfo>,
    /// Opaque caller context carried through to audit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    /// Optional capability token (compact EdDSA JWS).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability_token: Option<String>,
    /// Optional override token (compact EdDSA JWS, single-use).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_token: Option<String>,
}

impl ActionRequest {
    /// Returns the token presented for this request.
    ///
    /// An override token takes precedence when both are supplied; the token
    /// kind is decided by its verified claims, not by the request field.
    #[must_use]
    pub fn presented_token(&self) -> Option<&str> {
        self.override_token.as_deref().or(self.capability_token.as_deref())
    }
}
