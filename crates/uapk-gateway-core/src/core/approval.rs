// crates/uapk-gateway-core/src/core/approval.rs
// ============================================================================
// Module: UAPK Gateway Approval Model
// Description: Persistent escalation records awaiting a human decision.
// Purpose: Freeze escalated actions so overrides bind to exactly one action.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! An approval is created for every escalated evaluation. It freezes the
//! original action and counterparty so a later override token can be checked
//! against exactly what the human saw. Consumption is a one-way transition
//! enforced by a conditional update in the execute path.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::action::ActionInfo;
use crate::core::action::CounterpartyInfo;
use crate::core::identifiers::AgentId;
use crate::core::identifiers::ApprovalId;
use crate::core::identifiers::InteractionId;
use crate::core::identifiers::ManifestId;
use crate::core::identifiers::TenantId;
use crate::core::reason::ReasonCode;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Approval Status
// ============================================================================

/// Lifecycle state of an approval.
///
/// # Invariants
/// - Transitions are `Pending → Approved | Denied | Expired` only.
/// - Only `Approved` rows can be consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    /// Awaiting a human decision.
    Pending,
    /// Approved by an operator.
    Approved,
    /// Refused by an operator.
    Denied,
    /// Expired before a decision was made.
    Expired,
}

impl ApprovalStatus {
    /// Returns the stable wire label for this status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Denied => "denied",
            Self::Expired => "expired",
        }
    }
}

// ============================================================================
// SECTION: Approval Record
// ============================================================================

/// Persistent escalation record.
///
/// # Invariants
/// - `consumed_at` transitions from `None` to a timestamp exactly once and
///   never reverts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Approval {
    /// Approval identifier.
    pub approval_id: ApprovalId,
    /// Owning tenant.
    pub tenant: TenantId,
    /// Interaction that produced the escalation.
    pub interaction_id: InteractionId,
    /// Manifest governing the escalated action.
    pub manifest_id: ManifestId,
    /// Agent that requested the action.
    pub agent_id: AgentId,
    /// Frozen copy of the escalated action.
    pub action: ActionInfo,
    /// Frozen counterparty, when supplied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counterparty: Option<CounterpartyInfo>,
    /// Opaque caller context, when supplied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    /// Reason codes that triggered the escalation.
    pub reason_codes: Vec<ReasonCode>,
    /// Lifecycle state.
    pub status: ApprovalStatus,
    /// Expiry deadline for the pending decision.
    pub expires_at: Timestamp,
    /// Consumption time, set exactly once by the execute path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumed_at: Option<Timestamp>,
    /// Interaction that consumed this approval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumed_interaction_id: Option<InteractionId>,
    /// Operator that decided the approval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approver: Option<String>,
    /// Decision time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<Timestamp>,
    /// Row creation time.
    pub created_at: Timestamp,
}

impl Approval {
    /// Returns true when the pending window has passed at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        self.expires_at < now
    }
}
