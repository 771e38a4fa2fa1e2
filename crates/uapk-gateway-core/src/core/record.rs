// crates/uapk-gateway-core/src/core/record.rs
// ============================================================================
// Module: UAPK Gateway Interaction Records
// Description: Hash-chained, signed audit records and chain verification.
// Purpose: Make every gateway decision tamper-evident and independently verifiable.
// Dependencies: serde, serde_json, crate::core::hashing
// ============================================================================

//! ## Overview
//! Every decision produces one interaction record. Records for the same
//! `(tenant, manifest_id)` form a hash chain: each record's hash covers its
//! content plus the previous record's hash, and the gateway signs the hash.
//! Verification recomputes everything from stored fields and reports every
//! failure instead of stopping at the first, so a tampered middle record is
//! flagged together with the broken links it causes downstream.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;

use crate::core::hashing::HashError;
use crate::core::hashing::hash_canonical_json;
use crate::core::identifiers::AgentId;
use crate::core::identifiers::InteractionId;
use crate::core::identifiers::ManifestId;
use crate::core::identifiers::TenantId;
use crate::core::time::Timestamp;
use crate::interfaces::SignatureVerifier;

// ============================================================================
// SECTION: Decision
// ============================================================================

/// Persisted decision state of an interaction record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Action was allowed.
    Approved,
    /// Action was denied.
    Denied,
    /// Action escalated and awaits approval.
    Pending,
}

impl Decision {
    /// Returns the stable wire label for this decision.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Denied => "denied",
            Self::Pending => "pending",
        }
    }
}

// ============================================================================
// SECTION: Interaction Record
// ============================================================================

/// One element of a per-`(tenant, manifest_id)` audit chain.
///
/// # Invariants
/// - `record_hash` is a pure function of the content-bearing fields; see
///   [`compute_record_hash`].
/// - `previous_record_hash` equals the prior chain element's `record_hash`,
///   or `None` for the first element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionRecord {
    /// Record identifier (equals the interaction identifier).
    pub record_id: InteractionId,
    /// Owning tenant.
    pub tenant: TenantId,
    /// Manifest chain this record belongs to.
    pub manifest_id: ManifestId,
    /// Acting agent.
    pub agent_id: AgentId,
    /// Action type label.
    pub action_type: String,
    /// Tool name.
    pub tool: String,
    /// Opaque request view as audited.
    pub request: Value,
    /// Canonical hash of the request view.
    pub request_hash: String,
    /// Persisted decision.
    pub decision: Decision,
    /// First reason message, for operator convenience.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_reason: Option<String>,
    /// Canonical JSON of the decision reasons.
    pub reasons_json: String,
    /// Canonical JSON of the policy trace.
    pub policy_trace_json: String,
    /// Canonical JSON of the risk snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_snapshot_json: Option<String>,
    /// Opaque tool result when executed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Canonical hash of the tool result when executed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_hash: Option<String>,
    /// Tool execution duration in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Prior chain element's record hash, `None` for the first element.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_record_hash: Option<String>,
    /// Tamper-evident hash of this record.
    pub record_hash: String,
    /// Base64 Ed25519 signature over the record hash bytes.
    pub gateway_signature: String,
    /// Commit time; chain order within `(tenant, manifest_id)`.
    pub created_at: Timestamp,
}

// ============================================================================
// SECTION: Record Hash
// ============================================================================

/// Content-bearing fields covered by the record hash.
#[derive(Debug, Clone, Copy)]
pub struct RecordHashInputs<'a> {
    /// Record identifier.
    pub record_id: &'a str,
    /// Owning tenant.
    pub tenant: &'a str,
    /// Manifest identifier.
    pub manifest_id: &'a str,
    /// Acting agent.
    pub agent_id: &'a str,
    /// Action type label.
    pub action_type: &'a str,
    /// Tool name.
    pub tool: &'a str,
    /// Canonical request hash.
    pub request_hash: &'a str,
    /// Persisted decision.
    pub decision: Decision,
    /// Canonical reasons JSON.
    pub reasons_json: &'a str,
    /// Canonical policy trace JSON.
    pub policy_trace_json: &'a str,
    /// Canonical result hash when executed.
    pub result_hash: Option<&'a str>,
    /// Prior chain element's record hash.
    pub previous_record_hash: Option<&'a str>,
    /// Commit time.
    pub created_at: Timestamp,
}

impl<'a> RecordHashInputs<'a> {
    /// Borrows the hash inputs from a stored record.
    #[must_use]
    pub fn from_record(record: &'a InteractionRecord) -> Self {
        Self {
            record_id: record.record_id.as_str(),
            tenant: record.tenant.as_str(),
            manifest_id: record.manifest_id.as_str(),
            agent_id: record.agent_id.as_str(),
            action_type: &record.action_type,
            tool: &record.tool,
            request_hash: &record.request_hash,
            decision: record.decision,
            reasons_json: &record.reasons_json,
            policy_trace_json: &record.policy_trace_json,
            result_hash: record.result_hash.as_deref(),
            previous_record_hash: record.previous_record_hash.as_deref(),
            created_at: record.created_at,
        }
    }
}

/// Computes the tamper-evident hash of a record.
///
/// # Errors
///
/// Returns [`HashError`] when the commit timestamp cannot be formatted.
pub fn compute_record_hash(inputs: &RecordHashInputs<'_>) -> Result<String, HashError> {
    let created_at = inputs
        .created_at
        .to_rfc3339()
        .map_err(|err| HashError::Canonicalization(err.to_string()))?;
    let content = json!({
        "record_id": inputs.record_id,
        "tenant": inputs.tenant,
        "manifest_id": inputs.manifest_id,
        "agent_id": inputs.agent_id,
        "action_type": inputs.action_type,
        "tool": inputs.tool,
        "request_hash": inputs.request_hash,
        "decision": inputs.decision.as_str(),
        "reasons_json": inputs.reasons_json,
        "policy_trace_json": inputs.policy_trace_json,
        "result_hash": inputs.result_hash,
        "previous_record_hash": inputs.previous_record_hash,
        "created_at": created_at,
    });
    Ok(hash_canonical_json(&content))
}

// ============================================================================
// SECTION: Chain Verification
// ============================================================================

/// Failure class for one chain verification error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainErrorKind {
    /// `previous_record_hash` does not match the prior element.
    PreviousHashMismatch,
    /// Recomputed record hash differs from the stored hash.
    RecordHashMismatch,
    /// Stored signature does not verify against the record hash.
    SignatureInvalid,
    /// Hash recomputation failed.
    HashComputation,
}

/// One chain verification failure, tied to the failing record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainError {
    /// Failing record identifier.
    pub record_id: InteractionId,
    /// Zero-based index of the failing record in the verified slice.
    pub index: usize,
    /// Failure class.
    pub kind: ChainErrorKind,
    /// Human-readable description.
    pub message: String,
}

/// Result of verifying a chain slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainReport {
    /// True when no errors were found.
    pub valid: bool,
    /// Every verification failure, in record order.
    pub errors: Vec<ChainError>,
}

/// Verifies an ordered slice of records for one `(tenant, manifest_id)`.
///
/// Checks linkage, recomputes every record hash, and (when a verifier is
/// supplied) validates every gateway signature. Verification continues past
/// failures so all damage is reported in one pass. Linkage is checked against
/// the recomputed prior hash: a tampered record therefore also breaks its
/// successor's link even when the stored hashes still agree.
#[must_use]
pub fn verify_chain(
    records: &[InteractionRecord],
    verifier: Option<&dyn SignatureVerifier>,
) -> ChainReport {
    let mut errors = Vec::new();
    let mut expected_previous: Option<String> = None;

    for (index, record) in records.iter().enumerate() {
        if record.previous_record_hash != expected_previous {
            errors.push(ChainError {
                record_id: record.record_id.clone(),
                index,
                kind: ChainErrorKind::PreviousHashMismatch,
                message: format!(
                    "previous_record_hash mismatch: expected {:?}, got {:?}",
                    expected_previous.as_deref(),
                    record.previous_record_hash.as_deref()
                ),
            });
        }

        match compute_record_hash(&RecordHashInputs::from_record(record)) {
            Ok(computed) => {
                if computed != record.record_hash {
                    errors.push(ChainError {
                        record_id: record.record_id.clone(),
                        index,
                        kind: ChainErrorKind::RecordHashMismatch,
                        message: format!(
                            "record_hash mismatch: expected {computed}, got {}",
                            record.record_hash
                        ),
                    });
                }
                expected_previous = Some(computed);
            }
            Err(err) => {
                errors.push(ChainError {
                    record_id: record.record_id.clone(),
                    index,
                    kind: ChainErrorKind::HashComputation,
                    message: format!("failed to recompute record hash: {err}"),
                });
                expected_previous = Some(record.record_hash.clone());
            }
        }

        if let Some(verifier) = verifier
            && !verifier.verify_base64(record.record_hash.as_bytes(), &record.gateway_signature)
        {
            errors.push(ChainError {
                record_id: record.record_id.clone(),
                index,
                kind: ChainErrorKind::SignatureInvalid,
                message: "gateway signature does not verify".to_string(),
            });
        }
    }

    ChainReport {
        valid: errors.is_empty(),
        errors,
    }
}
