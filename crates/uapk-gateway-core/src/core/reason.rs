// crates/uapk-gateway-core/src/core/reason.rs
// ============================================================================
// Module: UAPK Gateway Reason Codes
// Description: Stable reason codes, reason details, and policy trace entries.
// Purpose: Report decisions in-band with machine-readable, stable labels.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Every decision the gateway makes is explained through [`ReasonDetail`]
//! entries with stable codes, and every evaluation stage is recorded in the
//! policy trace. Both are serialized canonically into the audit record, so
//! codes and trace labels must never change meaning once shipped.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

// ============================================================================
// SECTION: Reason Codes
// ============================================================================

/// Stable machine-readable reason codes for gateway decisions.
///
/// # Invariants
/// - Wire labels are stable for programmatic handling; variants are only added.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    /// No manifest exists for the requested identifier.
    ManifestNotFound,
    /// The selected manifest is not in the active state.
    ManifestNotActive,
    /// Policy requires a capability token and none was supplied.
    CapabilityTokenRequired,
    /// Capability token failed verification or structural checks.
    CapabilityTokenInvalid,
    /// Token org does not match the request tenant.
    TokenOrgMismatch,
    /// Token manifest binding does not match the request.
    TokenUapkMismatch,
    /// Token subject does not match the acting agent.
    TokenAgentMismatch,
    /// Token issuer has been revoked.
    TokenIssuerRevoked,
    /// Action type rejected by token claims.
    TokenActionTypeNotAllowed,
    /// Tool rejected by token claims.
    TokenToolNotAllowed,
    /// Amount exceeds the token constraint cap.
    TokenAmountExceedsCap,
    /// Jurisdiction rejected by token constraints.
    TokenJurisdictionNotAllowed,
    /// Counterparty rejected by token constraints.
    TokenCounterpartyNotAllowed,
    /// Override token failed binding checks.
    OverrideTokenInvalid,
    /// Override token's approval was already consumed.
    OverrideTokenAlreadyUsed,
    /// Override token accepted; escalation upgraded to allow.
    OverrideTokenAccepted,
    /// Action type rejected by manifest policy.
    ActionTypeNotAllowed,
    /// Tool rejected by manifest policy or absent from the registry.
    ToolNotAllowed,
    /// Amount exceeds the manifest hard cap.
    AmountExceedsCap,
    /// Amount crosses an approval threshold.
    AmountRequiresApproval,
    /// Jurisdiction rejected by manifest policy.
    JurisdictionNotAllowed,
    /// Counterparty is on the manifest denylist.
    CounterpartyDenied,
    /// Counterparty is missing from the manifest allowlist.
    CounterpartyNotInAllowlist,
    /// Daily action budget exhausted.
    BudgetExceeded,
    /// Daily action budget approaching its cap.
    BudgetThresholdReached,
    /// Action type or tool requires human approval.
    RequiresHumanApproval,
    /// Every policy check passed.
    AllChecksPassed,
}

impl ReasonCode {
    /// Returns the stable wire label for this code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ManifestNotFound => "manifest_not_found",
            Self::ManifestNotActive => "manifest_not_active",
            Self::CapabilityTokenRequired => "capability_token_required",
            Self::CapabilityTokenInvalid => "capability_token_invalid",
            Self::TokenOrgMismatch => "token_org_mismatch",
            Self::TokenUapkMismatch => "token_uapk_mismatch",
            Self::TokenAgentMismatch => "token_agent_mismatch",
            Self::TokenIssuerRevoked => "token_issuer_revoked",
            Self::TokenActionTypeNotAllowed => "token_action_type_not_allowed",
            Self::TokenToolNotAllowed => "token_tool_not_allowed",
            Self::TokenAmountExceedsCap => "token_amount_exceeds_cap",
            Self::TokenJurisdictionNotAllowed => "token_jurisdiction_not_allowed",
            Self::TokenCounterpartyNotAllowed => "token_counterparty_not_allowed",
            Self::OverrideTokenInvalid => "override_token_invalid",
            Self::OverrideTokenAlreadyUsed => "override_token_already_used",
            Self::OverrideTokenAccepted => "override_token_accepted",
            Self::ActionTypeNotAllowed => "action_type_not_allowed",
            Self::ToolNotAllowed => "tool_not_allowed",
            Self::AmountExceedsCap => "amount_exceeds_cap",
            Self::AmountRequiresApproval => "amount_requires_approval",
            Self::JurisdictionNotAllowed => "jurisdiction_not_allowed",
            Self::CounterpartyDenied => "counterparty_denied",
            Self::CounterpartyNotInAllowlist => "counterparty_not_in_allowlist",
            Self::BudgetExceeded => "budget_exceeded",
            Self::BudgetThresholdReached => "budget_threshold_reached",
            Self::RequiresHumanApproval => "requires_human_approval",
            Self::AllChecksPassed => "all_checks_passed",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Reason Detail
// ============================================================================

/// One reason attached to a decision: stable code, human message, details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasonDetail {
    /// Stable machine-readable code.
    pub code: ReasonCode,
    /// Human-readable explanation.
    pub message: String,
    /// Structured details for programmatic consumers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ReasonDetail {
    /// Creates a reason without structured details.
    #[must_use]
    pub fn new(code: ReasonCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Creates a reason with structured details.
    #[must_use]
    pub fn with_details(code: ReasonCode, message: impl Into<String>, details: Value) -> Self {
        Self {
            code,
            message: message.into(),
            details: Some(details),
        }
    }
}

// ============================================================================
// SECTION: Policy Trace
// ============================================================================

/// Outcome of one policy evaluation stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceOutcome {
    /// Stage passed.
    Pass,
    /// Stage failed and produced a denial.
    Fail,
    /// Stage did not apply to this request.
    Skip,
    /// Stage requested escalation.
    Escalate,
}

/// One entry in the ordered policy trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    /// Stage name (stable label).
    pub check: String,
    /// Stage outcome.
    pub result: TraceOutcome,
    /// Structured stage details.
    #[serde(default)]
    pub details: Map<String, Value>,
}

impl TraceEntry {
    /// Creates a trace entry without details.
    #[must_use]
    pub fn new(check: impl Into<String>, result: TraceOutcome) -> Self {
        Self {
            check: check.into(),
            result,
            details: Map::new(),
        }
    }

    /// Creates a trace entry with details.
    #[must_use]
    pub fn with_details(
        check: impl Into<String>,
        result: TraceOutcome,
        details: Map<String, Value>,
    ) -> Self {
        Self {
            check: check.into(),
            result,
            details,
        }
    }
}
