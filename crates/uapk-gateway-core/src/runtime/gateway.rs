// crates/uapk-gateway-core/src/runtime/gateway.rs
// ============================================================================
// Module: UAPK Gateway Orchestrator
// Description: Evaluate and execute flows composing policy, tools, and audit.
// Purpose: Produce a decision, run allowed tools, and persist the audit chain.
// Dependencies: crate::{core, interfaces, runtime::engine}
// ============================================================================

//! ## Overview
//! The orchestrator owns the two public operations. `evaluate` decides
//! without side effects beyond the audit record and any escalation approval.
//! `execute` additionally reserves a budget slot, consumes override approvals
//! exactly once, and runs the tool connector. Every path, including denials,
//! commits an interaction record before returning so callers always hold a
//! persisted `interaction_id`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use serde_json::json;

use crate::core::ActionRequest;
use crate::core::Approval;
use crate::core::ApprovalId;
use crate::core::ApprovalStatus;
use crate::core::Decision;
use crate::core::GatewayDecision;
use crate::core::InteractionId;
use crate::core::InteractionRecord;
use crate::core::ReasonCode;
use crate::core::ReasonDetail;
use crate::core::RecordHashInputs;
use crate::core::TenantId;
use crate::core::Timestamp;
use crate::core::compute_record_hash;
use crate::core::hashing::canonical_json_string;
use crate::core::hashing::canonical_json_value;
use crate::core::hashing::hash_canonical_json;
use crate::interfaces::ApprovalStore;
use crate::interfaces::Clock;
use crate::interfaces::ConnectorConfig;
use crate::interfaces::ConnectorDefaults;
use crate::interfaces::ConnectorFactory;
use crate::interfaces::ConnectorResult;
use crate::interfaces::CounterStore;
use crate::interfaces::IssuerStore;
use crate::interfaces::ManifestStore;
use crate::interfaces::RecordSigner;
use crate::interfaces::RecordStore;
use crate::interfaces::SecretResolver;
use crate::interfaces::StoreError;
use crate::interfaces::TokenVerifier;
use crate::interfaces::connector_codes;
use crate::runtime::engine::PolicyContext;
use crate::runtime::engine::PolicyEngine;
use crate::runtime::engine::PolicyResult;
use crate::runtime::engine::PolicyStores;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Gateway orchestration errors.
///
/// Policy denials and connector failures are reported in-band; this error
/// covers internal faults only and never leaks store details to callers.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Internal fault (store failure, audit chain exhaustion).
    #[error("internal_error: {0}")]
    Internal(String),
}

impl From<StoreError> for GatewayError {
    fn from(error: StoreError) -> Self {
        Self::Internal(error.to_string())
    }
}

// ============================================================================
// SECTION: Responses
// ============================================================================

/// Response to an evaluate call.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluateResponse {
    /// Identifier of the persisted interaction record.
    pub interaction_id: InteractionId,
    /// Policy decision.
    pub decision: GatewayDecision,
    /// Decision reasons with stable codes.
    pub reasons: Vec<ReasonDetail>,
    /// Approval created when the decision escalated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_id: Option<ApprovalId>,
    /// Server timestamp.
    pub timestamp: Timestamp,
    /// Policy engine version label.
    pub policy_version: String,
}

/// Response to an execute call.
#[derive(Debug, Clone, Serialize)]
pub struct ExecuteResponse {
    /// Identifier of the interaction record.
    pub interaction_id: InteractionId,
    /// Policy decision after race resolution.
    pub decision: GatewayDecision,
    /// Decision reasons with stable codes.
    pub reasons: Vec<ReasonDetail>,
    /// Approval created when the decision escalated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_id: Option<ApprovalId>,
    /// Server timestamp.
    pub timestamp: Timestamp,
    /// Policy engine version label.
    pub policy_version: String,
    /// Whether the tool connector was invoked.
    pub executed: bool,
    /// Tool result when executed (success or connector failure).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ConnectorResult>,
    /// Set when the connector ran but the audit write failed; operators must
    /// monitor this flag because the tool call is not rolled back.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub audit_write_failed: bool,
}

// ============================================================================
// SECTION: Options & Parts
// ============================================================================

/// Tunable gateway behavior supplied by configuration.
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    /// Policy engine version label reported in responses.
    pub policy_version: String,
    /// Hours until a pending approval expires.
    pub approval_expiry_hours: i64,
    /// Daily budget applied when the manifest sets none.
    pub default_daily_budget: u64,
    /// Connector defaults applied when configs omit them.
    pub connector_defaults: ConnectorDefaults,
}

/// Injected implementations composing a gateway.
pub struct GatewayParts {
    /// Manifest lookup.
    pub manifests: Arc<dyn ManifestStore>,
    /// Issuer registry.
    pub issuers: Arc<dyn IssuerStore>,
    /// Approval persistence.
    pub approvals: Arc<dyn ApprovalStore>,
    /// Budget counters.
    pub counters: Arc<dyn CounterStore>,
    /// Audit record chains.
    pub records: Arc<dyn RecordStore>,
    /// Host secret values.
    pub secrets: Arc<dyn SecretResolver>,
    /// Token signature verification.
    pub verifier: Arc<dyn TokenVerifier>,
    /// Gateway record signing key.
    pub signer: Arc<dyn RecordSigner>,
    /// Connector construction.
    pub connectors: Arc<dyn ConnectorFactory>,
    /// Injected time source.
    pub clock: Arc<dyn Clock>,
}

// ============================================================================
// SECTION: Gateway
// ============================================================================

/// Gateway orchestrator for evaluating and executing agent actions.
pub struct Gateway {
    /// Injected implementations.
    parts: GatewayParts,
    /// Tunable behavior.
    options: GatewayOptions,
}

impl Gateway {
    /// Creates a gateway from its parts and options.
    #[must_use]
    pub const fn new(parts: GatewayParts, options: GatewayOptions) -> Self {
        Self {
            parts,
            options,
        }
    }

    /// Evaluates an action request without executing.
    ///
    /// Side effects are limited to the interaction record and, on
    /// escalation, one approval row.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Internal`] on store faults; policy outcomes
    /// are reported in-band.
    pub fn evaluate(
        &self,
        tenant: &TenantId,
        request: &ActionRequest,
    ) -> Result<EvaluateResponse, GatewayError> {
        let interaction_id = InteractionId::generate();
        let policy_result = self.run_policy(tenant, request)?;

        let approval_id = if policy_result.decision == GatewayDecision::Escalate {
            Some(self.create_approval(tenant, &interaction_id, request, &policy_result)?)
        } else {
            None
        };

        self.write_record(RecordInputs {
            tenant,
            request,
            interaction_id: &interaction_id,
            policy_result: &policy_result,
            decision: policy_result.decision,
            reasons: &policy_result.reasons,
            tool_result: None,
        })?;

        Ok(EvaluateResponse {
            interaction_id,
            decision: policy_result.decision,
            reasons: policy_result.reasons,
            approval_id,
            timestamp: self.parts.clock.now(),
            policy_version: self.options.policy_version.clone(),
        })
    }

    /// Evaluates and, when allowed, executes an action request.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Internal`] on store faults; policy outcomes
    /// and connector failures are reported in-band.
    pub fn execute(
        &self,
        tenant: &TenantId,
        request: &ActionRequest,
    ) -> Result<ExecuteResponse, GatewayError> {
        let interaction_id = InteractionId::generate();
        let policy_result = self.run_policy(tenant, request)?;

        let mut decision = policy_result.decision;
        let mut reasons = policy_result.reasons.clone();
        let mut executed = false;
        let mut tool_result: Option<ConnectorResult> = None;
        let mut approval_id: Option<ApprovalId> = None;

        if decision == GatewayDecision::Allow {
            // Reserve the budget slot first; a lost race is a denial.
            if self.reserve_budget(tenant, request, &policy_result)?.is_none() {
                decision = GatewayDecision::Deny;
                reasons.push(ReasonDetail::with_details(
                    ReasonCode::BudgetExceeded,
                    format!(
                        "Daily action budget exceeded ({limit}/{limit})",
                        limit = policy_result.budget_limit
                    ),
                    json!({"daily_cap": policy_result.budget_limit}),
                ));
            }
        }

        if decision == GatewayDecision::Allow && policy_result.override_valid {
            // One-shot consumption happens before the connector runs so a
            // racing replayer can never execute the action twice.
            if !self.consume_override(tenant, &interaction_id, &policy_result)? {
                decision = GatewayDecision::Deny;
                reasons.push(ReasonDetail::new(
                    ReasonCode::OverrideTokenAlreadyUsed,
                    "Override approval already consumed",
                ));
            }
        }

        if decision == GatewayDecision::Allow {
            executed = true;
            tool_result = Some(self.execute_tool(tenant, request, &policy_result));
        } else if decision == GatewayDecision::Escalate {
            approval_id =
                Some(self.create_approval(tenant, &interaction_id, request, &policy_result)?);
        }

        let audit_write = self.write_record(RecordInputs {
            tenant,
            request,
            interaction_id: &interaction_id,
            policy_result: &policy_result,
            decision,
            reasons: &reasons,
            tool_result: tool_result.as_ref(),
        });
        let audit_write_failed = match audit_write {
            Ok(()) => false,
            // The tool already ran and cannot be rolled back: report the
            // execution and flag the missing audit row instead of failing.
            Err(_) if executed => true,
            Err(err) => return Err(err),
        };

        Ok(ExecuteResponse {
            interaction_id,
            decision,
            reasons,
            approval_id,
            timestamp: self.parts.clock.now(),
            policy_version: self.options.policy_version.clone(),
            executed,
            result: tool_result,
            audit_write_failed,
        })
    }

    /// Runs the policy engine over the configured stores.
    fn run_policy(
        &self,
        tenant: &TenantId,
        request: &ActionRequest,
    ) -> Result<PolicyResult, GatewayError> {
        let engine = PolicyEngine::new(
            PolicyStores {
                manifests: self.parts.manifests.as_ref(),
                issuers: self.parts.issuers.as_ref(),
                approvals: self.parts.approvals.as_ref(),
                counters: self.parts.counters.as_ref(),
            },
            self.parts.verifier.as_ref(),
            self.parts.clock.as_ref(),
            self.options.default_daily_budget,
        );
        engine
            .evaluate(PolicyContext {
                tenant,
                request,
            })
            .map_err(GatewayError::from)
    }

    /// Reserves a budget slot, retrying once on transient conflicts.
    fn reserve_budget(
        &self,
        tenant: &TenantId,
        request: &ActionRequest,
        policy_result: &PolicyResult,
    ) -> Result<Option<u64>, GatewayError> {
        let day = self.parts.clock.now().day();
        let cap = policy_result.budget_limit;
        let reserve = || self.parts.counters.reserve(tenant, &request.manifest_id, day, cap);
        match reserve() {
            Ok(outcome) => Ok(outcome),
            Err(StoreError::Conflict(_)) => reserve().map_err(GatewayError::from),
            Err(err) => Err(err.into()),
        }
    }

    /// Marks the override approval consumed; false when another execute won.
    fn consume_override(
        &self,
        tenant: &TenantId,
        interaction_id: &InteractionId,
        policy_result: &PolicyResult,
    ) -> Result<bool, GatewayError> {
        let Some(approval_id) = policy_result
            .token_claims
            .as_ref()
            .and_then(|claims| claims.approval_id.as_deref())
        else {
            return Ok(true);
        };
        let approval_id = ApprovalId::new(approval_id);
        let consumed = self.parts.approvals.consume(
            tenant,
            &approval_id,
            interaction_id,
            self.parts.clock.now(),
        )?;
        Ok(consumed)
    }

    /// Creates the approval row for an escalated decision.
    fn create_approval(
        &self,
        tenant: &TenantId,
        interaction_id: &InteractionId,
        request: &ActionRequest,
        policy_result: &PolicyResult,
    ) -> Result<ApprovalId, GatewayError> {
        let approval_id = ApprovalId::generate();
        let now = self.parts.clock.now();
        let approval = Approval {
            approval_id: approval_id.clone(),
            tenant: tenant.clone(),
            interaction_id: interaction_id.clone(),
            manifest_id: request.manifest_id.clone(),
            agent_id: request.agent_id.clone(),
            action: request.action.clone(),
            counterparty: request.counterparty.clone(),
            context: request.context.clone(),
            reason_codes: policy_result.reasons.iter().map(|reason| reason.code).collect(),
            status: ApprovalStatus::Pending,
            expires_at: now.plus_hours(self.options.approval_expiry_hours),
            consumed_at: None,
            consumed_interaction_id: None,
            approver: None,
            approved_at: None,
            created_at: now,
        };
        self.parts.approvals.create(approval)?;
        Ok(approval_id)
    }

    /// Resolves the tool configuration and runs the connector.
    ///
    /// Resolution failures surface as failed connector results on an allow
    /// decision, not as policy denials.
    fn execute_tool(
        &self,
        tenant: &TenantId,
        request: &ActionRequest,
        policy_result: &PolicyResult,
    ) -> ConnectorResult {
        let Some(manifest) = policy_result.manifest.as_ref() else {
            return ConnectorResult::failed(
                connector_codes::NO_MANIFEST,
                "No manifest available",
                0,
            );
        };

        let tool = &request.action.tool;
        let Some(entry) = manifest.tool_entry(tool).or_else(|| manifest.default_connector())
        else {
            return ConnectorResult::failed(
                connector_codes::TOOL_NOT_CONFIGURED,
                format!("Tool '{tool}' not configured in manifest"),
                0,
            );
        };

        let config = ConnectorConfig::from_tool_entry(entry);
        let secrets = self.resolve_secrets(tenant, &config);
        let Some(connector) = self.parts.connectors.build(
            &config,
            &secrets,
            &self.options.connector_defaults,
        ) else {
            return ConnectorResult::failed(
                connector_codes::INVALID_CONNECTOR_TYPE,
                format!("Unknown connector type: {}", config.connector_type),
                0,
            );
        };

        connector.execute(&request.action.params)
    }

    /// Resolves secret references to values; unresolvable names are skipped.
    fn resolve_secrets(
        &self,
        tenant: &TenantId,
        config: &ConnectorConfig,
    ) -> BTreeMap<String, String> {
        let names: BTreeSet<&String> = config.secret_refs.values().collect();
        let mut resolved = BTreeMap::new();
        for name in names {
            if let Ok(Some(value)) = self.parts.secrets.resolve(tenant, name) {
                resolved.insert(name.clone(), value);
            }
        }
        resolved
    }

    /// Builds, hashes, signs, and appends the interaction record.
    fn write_record(&self, inputs: RecordInputs<'_>) -> Result<(), GatewayError> {
        let decision = match inputs.decision {
            GatewayDecision::Allow => Decision::Approved,
            GatewayDecision::Deny => Decision::Denied,
            GatewayDecision::Escalate => Decision::Pending,
        };

        let request_view = json!({
            "manifest_id": inputs.request.manifest_id,
            "agent_id": inputs.request.agent_id,
            "action": inputs.request.action,
            "counterparty": inputs.request.counterparty,
            "context": inputs.request.context,
            "capability_token_provided": inputs.request.presented_token().is_some(),
        });
        let request_hash = hash_canonical_json(&request_view);

        let result_value = match inputs.tool_result {
            Some(result) => Some(
                serde_json::to_value(result)
                    .map_err(|err| GatewayError::Internal(err.to_string()))?,
            ),
            None => None,
        };
        let result_hash = result_value.as_ref().map(hash_canonical_json);

        let reasons_json = canonical_json_value(inputs.reasons)
            .map_err(|err| GatewayError::Internal(err.to_string()))?;
        let trace_value = serde_json::to_value(&inputs.policy_result.policy_trace)
            .map_err(|err| GatewayError::Internal(err.to_string()))?;
        let policy_trace_json = canonical_json_string(&json!({"checks": trace_value}));
        let risk_snapshot_json = if inputs.policy_result.risk_indicators.is_empty() {
            None
        } else {
            Some(canonical_json_string(&Value::Object(
                inputs.policy_result.risk_indicators.clone(),
            )))
        };

        // The store linearizes the append: the builder runs against the tail
        // the record will extend.
        self.parts
            .records
            .append_chained(
                inputs.tenant,
                &inputs.request.manifest_id,
                &mut |previous_record_hash| {
                    let created_at = self.parts.clock.now();
                    let record_hash = compute_record_hash(&RecordHashInputs {
                        record_id: inputs.interaction_id.as_str(),
                        tenant: inputs.tenant.as_str(),
                        manifest_id: inputs.request.manifest_id.as_str(),
                        agent_id: inputs.request.agent_id.as_str(),
                        action_type: &inputs.request.action.action_type,
                        tool: &inputs.request.action.tool,
                        request_hash: &request_hash,
                        decision,
                        reasons_json: &reasons_json,
                        policy_trace_json: &policy_trace_json,
                        result_hash: result_hash.as_deref(),
                        previous_record_hash: previous_record_hash.as_deref(),
                        created_at,
                    })
                    .map_err(|err| StoreError::Invalid(err.to_string()))?;
                    let gateway_signature = self.parts.signer.sign_base64(record_hash.as_bytes());

                    Ok(InteractionRecord {
                        record_id: inputs.interaction_id.clone(),
                        tenant: inputs.tenant.clone(),
                        manifest_id: inputs.request.manifest_id.clone(),
                        agent_id: inputs.request.agent_id.clone(),
                        action_type: inputs.request.action.action_type.clone(),
                        tool: inputs.request.action.tool.clone(),
                        request: request_view.clone(),
                        request_hash: request_hash.clone(),
                        decision,
                        decision_reason: inputs.reasons.first().map(|reason| reason.message.clone()),
                        reasons_json: reasons_json.clone(),
                        policy_trace_json: policy_trace_json.clone(),
                        risk_snapshot_json: risk_snapshot_json.clone(),
                        result: result_value.clone(),
                        result_hash: result_hash.clone(),
                        duration_ms: inputs.tool_result.map(|result| result.duration_ms),
                        previous_record_hash,
                        record_hash,
                        gateway_signature,
                        created_at,
                    })
                },
            )
            .map_err(GatewayError::from)?;
        Ok(())
    }
}

// ============================================================================
// SECTION: Record Inputs
// ============================================================================

/// Inputs required to build one interaction record.
struct RecordInputs<'a> {
    /// Owning tenant.
    tenant: &'a TenantId,
    /// Original request.
    request: &'a ActionRequest,
    /// Interaction identifier.
    interaction_id: &'a InteractionId,
    /// Engine output (trace, risk snapshot).
    policy_result: &'a PolicyResult,
    /// Final decision after race resolution.
    decision: GatewayDecision,
    /// Final reasons after race resolution.
    reasons: &'a [ReasonDetail],
    /// Tool result when executed.
    tool_result: Option<&'a ConnectorResult>,
}
