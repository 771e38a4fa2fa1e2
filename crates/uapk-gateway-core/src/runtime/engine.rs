// crates/uapk-gateway-core/src/runtime/engine.rs
// ============================================================================
// Module: UAPK Gateway Policy Engine
// Description: Deterministic multi-stage policy evaluation.
// Purpose: Intersect manifest rules, token claims, and override approvals.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! The policy engine evaluates one action request against the active manifest
//! and any presented token, producing a decision, reason details, and an
//! ordered stage trace. Evaluation is a pure function of its inputs plus the
//! row-level state of counters and approvals: no stage mutates stored state.
//! Override consumption in particular is deliberately absent here; it happens
//! only in the execute path so evaluate calls never burn approvals.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde_json::Map;
use serde_json::Value;
use serde_json::json;

use crate::core::ActionRequest;
use crate::core::ApprovalId;
use crate::core::ApprovalStatus;
use crate::core::CapabilityTokenClaims;
use crate::core::GATEWAY_ISSUER;
use crate::core::GatewayDecision;
use crate::core::IssuerId;
use crate::core::ManifestRecord;
use crate::core::ManifestStatus;
use crate::core::NormalizedPolicy;
use crate::core::ReasonCode;
use crate::core::ReasonDetail;
use crate::core::TenantId;
use crate::core::TokenType;
use crate::core::TraceEntry;
use crate::core::TraceOutcome;
use crate::core::hashing::action_hash;
use crate::core::manifest::extract_amount;
use crate::core::manifest::extract_currency;
use crate::interfaces::ApprovalStore;
use crate::interfaces::Clock;
use crate::interfaces::CounterStore;
use crate::interfaces::IssuerStatus;
use crate::interfaces::IssuerStore;
use crate::interfaces::ManifestStore;
use crate::interfaces::StoreError;
use crate::interfaces::TokenVerifier;

// ============================================================================
// SECTION: Context & Result
// ============================================================================

/// Store handles consulted during evaluation.
#[derive(Clone, Copy)]
pub struct PolicyStores<'a> {
    /// Manifest lookup.
    pub manifests: &'a dyn ManifestStore,
    /// Issuer registry.
    pub issuers: &'a dyn IssuerStore,
    /// Approval rows for override binding.
    pub approvals: &'a dyn ApprovalStore,
    /// Daily budget counters.
    pub counters: &'a dyn CounterStore,
}

/// Evaluation input: the tenant and the action request.
#[derive(Clone, Copy)]
pub struct PolicyContext<'a> {
    /// Tenant established by the caller's authentication layer.
    pub tenant: &'a TenantId,
    /// The action request under evaluation.
    pub request: &'a ActionRequest,
}

/// Outcome of policy evaluation.
#[derive(Debug, Clone)]
pub struct PolicyResult {
    /// Final decision after precedence rules.
    pub decision: GatewayDecision,
    /// Decision reasons with stable codes.
    pub reasons: Vec<ReasonDetail>,
    /// Ordered stage trace.
    pub policy_trace: Vec<TraceEntry>,
    /// The selected manifest, when found.
    pub manifest: Option<ManifestRecord>,
    /// Verified token claims, when a token was presented and valid.
    pub token_claims: Option<CapabilityTokenClaims>,
    /// True when stage 3 validated an override binding.
    pub override_valid: bool,
    /// Budget count observed during evaluation.
    pub budget_count: u64,
    /// Effective daily budget cap.
    pub budget_limit: u64,
    /// Risk indicators snapshot.
    pub risk_indicators: Map<String, Value>,
}

impl PolicyResult {
    /// Creates an empty result defaulting to allow.
    fn new() -> Self {
        Self {
            decision: GatewayDecision::Allow,
            reasons: Vec::new(),
            policy_trace: Vec::new(),
            manifest: None,
            token_claims: None,
            override_valid: false,
            budget_count: 0,
            budget_limit: 0,
            risk_indicators: Map::new(),
        }
    }

    /// Adds a reason without details.
    fn add_reason(&mut self, code: ReasonCode, message: impl Into<String>) {
        self.reasons.push(ReasonDetail::new(code, message));
    }

    /// Adds a reason with structured details.
    fn add_reason_with(&mut self, code: ReasonCode, message: impl Into<String>, details: Value) {
        self.reasons.push(ReasonDetail::with_details(code, message, details));
    }

    /// Adds a trace entry without details.
    fn add_trace(&mut self, check: &str, outcome: TraceOutcome) {
        self.policy_trace.push(TraceEntry::new(check, outcome));
    }

    /// Adds a trace entry with details.
    fn add_trace_with(&mut self, check: &str, outcome: TraceOutcome, details: Value) {
        let details = details.as_object().cloned().unwrap_or_default();
        self.policy_trace.push(TraceEntry::with_details(check, outcome, details));
    }
}

/// Intermediate outcome of a cap stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StageDecision {
    /// Stage passed.
    Allow,
    /// Stage denies the request.
    Deny,
    /// Stage escalates the request.
    Escalate,
}

// ============================================================================
// SECTION: Policy Engine
// ============================================================================

/// Deterministic policy engine for gateway actions.
///
/// Stage order (each stage records one trace entry):
/// manifest selection and status, capability-token verification, override
/// binding, required-token flag, action-type allowlists (manifest, token),
/// tool rules (manifest, registry, token), approval thresholds, amount caps
/// (manifest, token), jurisdiction (manifest, token), counterparty (manifest,
/// token), daily budget, and finally override acceptance.
///
/// # Invariants
/// - Any deny is terminal; a provisional escalate continues so later hard
///   denials are not hidden.
/// - Precedence: deny > escalate > allow.
/// - A valid override upgrades escalate to allow, never deny.
pub struct PolicyEngine<'a> {
    /// Store handles.
    stores: PolicyStores<'a>,
    /// Token signature verification.
    verifier: &'a dyn TokenVerifier,
    /// Injected time source.
    clock: &'a dyn Clock,
    /// Daily budget applied when the manifest sets none.
    default_daily_budget: u64,
}

impl<'a> PolicyEngine<'a> {
    /// Creates a policy engine over the given stores and services.
    #[must_use]
    pub const fn new(
        stores: PolicyStores<'a>,
        verifier: &'a dyn TokenVerifier,
        clock: &'a dyn Clock,
        default_daily_budget: u64,
    ) -> Self {
        Self {
            stores,
            verifier,
            clock,
            default_daily_budget,
        }
    }

    /// Evaluates policies for an action request.
    ///
    /// Validates both manifest and capability-token constraints; the
    /// effective permissions are the intersection of both.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] only for store faults; every policy violation
    /// is reported in-band through the returned decision and reasons.
    pub fn evaluate(&self, ctx: PolicyContext<'_>) -> Result<PolicyResult, StoreError> {
        let mut result = PolicyResult::new();
        let request = ctx.request;

        // Stage 1: manifest selection and status.
        let Some(manifest) = self.get_manifest(ctx)? else {
            result.decision = GatewayDecision::Deny;
            result.add_reason(
                ReasonCode::ManifestNotFound,
                format!("No manifest found for manifest_id: {}", request.manifest_id),
            );
            result.add_trace_with(
                "manifest_lookup",
                TraceOutcome::Fail,
                json!({"manifest_id": request.manifest_id}),
            );
            return Ok(result);
        };
        if manifest.status != ManifestStatus::Active {
            result.decision = GatewayDecision::Deny;
            result.add_reason(
                ReasonCode::ManifestNotActive,
                format!("Manifest is not active (status: {})", manifest.status.as_str()),
            );
            result.add_trace("manifest_status", TraceOutcome::Fail);
            return Ok(result);
        }
        result.add_trace_with(
            "manifest_validation",
            TraceOutcome::Pass,
            json!({"manifest_id": manifest.manifest_id}),
        );

        // Stage 2: capability-token verification.
        if let Some(token) = request.presented_token() {
            if !self.validate_capability_token(ctx, token, &mut result)? {
                result.decision = GatewayDecision::Deny;
                result.add_trace("capability_token_validation", TraceOutcome::Fail);
                return Ok(result);
            }
            let issuer = result.token_claims.as_ref().map(|claims| claims.iss.clone());
            result.add_trace_with(
                "capability_token_validation",
                TraceOutcome::Pass,
                json!({"issuer": issuer}),
            );
        } else {
            result.add_trace_with(
                "capability_token_validation",
                TraceOutcome::Skip,
                json!({"reason": "no_token_provided"}),
            );
        }

        // Stage 3: override-token binding. Side-effect free; consumption is
        // enforced in the execute flow.
        let override_binding =
            result.token_claims.as_ref().is_some_and(CapabilityTokenClaims::has_override_binding);
        if override_binding {
            let approval_id = result
                .token_claims
                .as_ref()
                .and_then(|claims| claims.approval_id.clone())
                .unwrap_or_default();
            if self.validate_override_token(ctx, &mut result)? {
                result.override_valid = true;
                result.add_trace_with(
                    "override_token_validation",
                    TraceOutcome::Pass,
                    json!({"approval_id": approval_id}),
                );
            } else {
                result.decision = GatewayDecision::Deny;
                result.add_trace_with(
                    "override_token_validation",
                    TraceOutcome::Fail,
                    json!({"approval_id": approval_id}),
                );
                return Ok(result);
            }
        } else {
            result.add_trace_with(
                "override_token_validation",
                TraceOutcome::Skip,
                json!({"reason": "not_override_token"}),
            );
        }

        let policy = manifest.policy();

        // Stage 4: required-token flag.
        if policy.require_capability_token && request.presented_token().is_none() {
            result.decision = GatewayDecision::Deny;
            result.add_reason(
                ReasonCode::CapabilityTokenRequired,
                "Policy requires a capability token for all actions",
            );
            result.add_trace("require_capability_token_check", TraceOutcome::Fail);
            return Ok(result);
        }
        result.add_trace("require_capability_token_check", TraceOutcome::Pass);

        // Stage 5: action type allowed (manifest).
        if !check_action_type_allowed(request, &policy, &mut result) {
            result.decision = GatewayDecision::Deny;
            result.add_trace_with(
                "manifest_action_type",
                TraceOutcome::Fail,
                json!({"action_type": request.action.action_type}),
            );
            return Ok(result);
        }
        result.add_trace_with(
            "manifest_action_type",
            TraceOutcome::Pass,
            json!({"action_type": request.action.action_type}),
        );

        // Stage 6: action type allowed (token).
        if result.token_claims.is_some() {
            if !check_token_action_type_allowed(request, &mut result) {
                result.decision = GatewayDecision::Deny;
                result.add_trace_with(
                    "token_action_type",
                    TraceOutcome::Fail,
                    json!({"action_type": request.action.action_type}),
                );
                return Ok(result);
            }
            result.add_trace("token_action_type", TraceOutcome::Pass);
        } else {
            result.add_trace("token_action_type", TraceOutcome::Skip);
        }

        // Stage 7: tool rules (manifest), then registry membership.
        if !check_tool_allowed(request, &policy, &mut result) {
            result.decision = GatewayDecision::Deny;
            result.add_trace_with(
                "manifest_tool",
                TraceOutcome::Fail,
                json!({"tool": request.action.tool}),
            );
            return Ok(result);
        }
        result.add_trace_with(
            "manifest_tool",
            TraceOutcome::Pass,
            json!({"tool": request.action.tool}),
        );

        if !check_tool_configured(request, &manifest, &mut result) {
            result.decision = GatewayDecision::Deny;
            result.add_trace_with(
                "tool_configured",
                TraceOutcome::Fail,
                json!({"tool": request.action.tool}),
            );
            return Ok(result);
        }
        result.add_trace_with(
            "tool_configured",
            TraceOutcome::Pass,
            json!({"tool": request.action.tool}),
        );

        // Stage 8: tool allowed (token).
        if result.token_claims.is_some() {
            if !check_token_tool_allowed(request, &mut result) {
                result.decision = GatewayDecision::Deny;
                result.add_trace_with(
                    "token_tool",
                    TraceOutcome::Fail,
                    json!({"tool": request.action.tool}),
                );
                return Ok(result);
            }
            result.add_trace("token_tool", TraceOutcome::Pass);
        } else {
            result.add_trace("token_tool", TraceOutcome::Skip);
        }

        // Stage 9: approval thresholds. A provisional escalate continues so a
        // later hard denial is not hidden.
        if check_approval_thresholds(request, &policy, &mut result) == StageDecision::Escalate {
            result.decision = GatewayDecision::Escalate;
            result.add_trace("approval_thresholds", TraceOutcome::Escalate);
        } else {
            result.add_trace("approval_thresholds", TraceOutcome::Pass);
        }

        // Stage 10: amount caps (manifest).
        match check_amount_caps(request, &policy, &mut result) {
            StageDecision::Deny => {
                result.decision = GatewayDecision::Deny;
                result.add_trace("manifest_amount_cap", TraceOutcome::Fail);
                return Ok(result);
            }
            StageDecision::Escalate => {
                result.decision = GatewayDecision::Escalate;
                result.add_trace("manifest_amount_cap", TraceOutcome::Escalate);
            }
            StageDecision::Allow => result.add_trace("manifest_amount_cap", TraceOutcome::Pass),
        }

        // Stage 11: amount cap (token).
        if result.token_claims.is_some() {
            if check_token_amount_cap(request, &mut result) == StageDecision::Deny {
                result.decision = GatewayDecision::Deny;
                result.add_trace("token_amount_cap", TraceOutcome::Fail);
                return Ok(result);
            }
            result.add_trace("token_amount_cap", TraceOutcome::Pass);
        } else {
            result.add_trace("token_amount_cap", TraceOutcome::Skip);
        }

        // Stage 12: jurisdiction (manifest, then token).
        if !check_jurisdiction(request, &policy, &mut result) {
            result.decision = GatewayDecision::Deny;
            result.add_trace("manifest_jurisdiction", TraceOutcome::Fail);
            return Ok(result);
        }
        result.add_trace("manifest_jurisdiction", TraceOutcome::Pass);

        if result.token_claims.is_some() {
            if !check_token_jurisdiction(request, &mut result) {
                result.decision = GatewayDecision::Deny;
                result.add_trace("token_jurisdiction", TraceOutcome::Fail);
                return Ok(result);
            }
            result.add_trace("token_jurisdiction", TraceOutcome::Pass);
        } else {
            result.add_trace("token_jurisdiction", TraceOutcome::Skip);
        }

        // Stage 13: counterparty (manifest, then token).
        if !check_counterparty(request, &policy, &mut result) {
            result.decision = GatewayDecision::Deny;
            result.add_trace("manifest_counterparty", TraceOutcome::Fail);
            return Ok(result);
        }
        result.add_trace("manifest_counterparty", TraceOutcome::Pass);

        if result.token_claims.is_some() {
            if !check_token_counterparty(request, &mut result) {
                result.decision = GatewayDecision::Deny;
                result.add_trace("token_counterparty", TraceOutcome::Fail);
                return Ok(result);
            }
            result.add_trace("token_counterparty", TraceOutcome::Pass);
        } else {
            result.add_trace("token_counterparty", TraceOutcome::Skip);
        }

        // Stage 14: daily budget.
        let budget_details = |result: &PolicyResult| {
            json!({"count": result.budget_count, "limit": result.budget_limit})
        };
        match self.check_budget(ctx, &manifest, &mut result)? {
            StageDecision::Deny => {
                result.decision = GatewayDecision::Deny;
                let details = budget_details(&result);
                result.add_trace_with("budget_check", TraceOutcome::Fail, details);
                return Ok(result);
            }
            StageDecision::Escalate if result.decision != GatewayDecision::Escalate => {
                result.decision = GatewayDecision::Escalate;
                let details = budget_details(&result);
                result.add_trace_with("budget_check", TraceOutcome::Escalate, details);
            }
            StageDecision::Escalate | StageDecision::Allow => {
                let details = budget_details(&result);
                result.add_trace_with("budget_check", TraceOutcome::Pass, details);
            }
        }

        result
            .risk_indicators
            .insert("budget_current".to_string(), Value::from(result.budget_count));
        result.risk_indicators.insert("budget_limit".to_string(), Value::from(result.budget_limit));

        // Stage 15: override acceptance. A human already approved this exact
        // action, so a valid override upgrades escalate to allow (never deny).
        if result.override_valid && result.decision == GatewayDecision::Escalate {
            result.decision = GatewayDecision::Allow;
            let approval_id =
                result.token_claims.as_ref().and_then(|claims| claims.approval_id.clone());
            result.add_reason_with(
                ReasonCode::OverrideTokenAccepted,
                "Override token accepted; required approval already granted",
                json!({"approval_id": approval_id}),
            );
            result.add_trace("override_token_applied", TraceOutcome::Pass);
        }

        if result.decision == GatewayDecision::Allow && !result.override_valid {
            result.add_reason(ReasonCode::AllChecksPassed, "All policy checks passed");
        }

        result.manifest = Some(manifest);
        Ok(result)
    }

    /// Looks up the newest active manifest, retrying once on store faults.
    fn get_manifest(&self, ctx: PolicyContext<'_>) -> Result<Option<ManifestRecord>, StoreError> {
        let lookup =
            || self.stores.manifests.get_active(ctx.tenant, &ctx.request.manifest_id);
        match lookup() {
            Ok(found) => Ok(found),
            Err(_) => lookup(),
        }
    }

    /// Verifies capability-token signature, issuer, and identity bindings.
    fn validate_capability_token(
        &self,
        ctx: PolicyContext<'_>,
        token: &str,
        result: &mut PolicyResult,
    ) -> Result<bool, StoreError> {
        let issuer_keys = self.stores.issuers.active_keys(ctx.tenant)?;
        let claims = match self.verifier.verify(token, &issuer_keys) {
            Ok(claims) => claims,
            Err(err) => {
                result.add_reason(
                    ReasonCode::CapabilityTokenInvalid,
                    format!("Invalid capability token: {err}"),
                );
                return Ok(false);
            }
        };

        // Token-type consistency: override binding material and the override
        // type must appear together.
        if claims.action_hash.is_some() || claims.approval_id.is_some() {
            if claims.token_type != TokenType::Override {
                result.add_reason(
                    ReasonCode::CapabilityTokenInvalid,
                    "Token with action_hash/approval_id must have token_type='override'",
                );
                return Ok(false);
            }
        } else if claims.token_type == TokenType::Override {
            result.add_reason(
                ReasonCode::CapabilityTokenInvalid,
                "Override token must have action_hash and approval_id",
            );
            return Ok(false);
        }

        if claims.org_id != ctx.tenant.as_str() {
            result.add_reason(
                ReasonCode::TokenOrgMismatch,
                format!("Token org_id '{}' does not match request tenant", claims.org_id),
            );
            return Ok(false);
        }

        if claims.manifest_id != ctx.request.manifest_id.as_str() {
            result.add_reason(
                ReasonCode::TokenUapkMismatch,
                format!(
                    "Token manifest_id '{}' does not match request manifest_id",
                    claims.manifest_id
                ),
            );
            return Ok(false);
        }

        if claims.sub != ctx.request.agent_id.as_str() {
            result.add_reason(
                ReasonCode::TokenAgentMismatch,
                format!("Token subject '{}' does not match agent_id", claims.sub),
            );
            return Ok(false);
        }

        if claims.iss != GATEWAY_ISSUER {
            let issuer = self.stores.issuers.get(ctx.tenant, &IssuerId::new(&*claims.iss))?;
            let active = issuer.is_some_and(|row| row.status == IssuerStatus::Active);
            if !active {
                result.add_reason(
                    ReasonCode::TokenIssuerRevoked,
                    format!("Token issuer '{}' has been revoked", claims.iss),
                );
                return Ok(false);
            }
        }

        result.token_claims = Some(claims);
        Ok(true)
    }

    /// Validates that an override token is bound to a specific approved action.
    ///
    /// Intentionally side-effect free: it never marks an approval consumed.
    fn validate_override_token(
        &self,
        ctx: PolicyContext<'_>,
        result: &mut PolicyResult,
    ) -> Result<bool, StoreError> {
        let Some(claims) = result.token_claims.clone() else {
            return Ok(true);
        };
        let (Some(token_action_hash), Some(approval_id)) =
            (claims.action_hash.as_deref(), claims.approval_id.as_deref())
        else {
            return Ok(true);
        };

        let request_action_hash = match action_hash(&ctx.request.action) {
            Ok(hash) => hash,
            Err(err) => {
                result.add_reason(
                    ReasonCode::OverrideTokenInvalid,
                    format!("Unable to hash requested action: {err}"),
                );
                return Ok(false);
            }
        };
        if request_action_hash != token_action_hash {
            result.add_reason_with(
                ReasonCode::OverrideTokenInvalid,
                "Override token does not match requested action",
                json!({
                    "expected_action_hash": token_action_hash,
                    "actual_action_hash": request_action_hash,
                }),
            );
            return Ok(false);
        }

        let approval_id = ApprovalId::new(approval_id);
        let Some(approval) = self.stores.approvals.get(ctx.tenant, &approval_id)? else {
            result.add_reason_with(
                ReasonCode::OverrideTokenInvalid,
                format!("Approval '{approval_id}' not found"),
                json!({"approval_id": approval_id}),
            );
            return Ok(false);
        };

        if approval.status != ApprovalStatus::Approved {
            result.add_reason_with(
                ReasonCode::OverrideTokenInvalid,
                format!("Approval '{approval_id}' is not approved"),
                json!({"status": approval.status}),
            );
            return Ok(false);
        }

        if approval.is_expired_at(self.clock.now()) {
            result.add_reason_with(
                ReasonCode::OverrideTokenInvalid,
                format!("Approval '{approval_id}' has expired"),
                json!({"expires_at": approval.expires_at}),
            );
            return Ok(false);
        }

        if approval.manifest_id != ctx.request.manifest_id
            || approval.agent_id != ctx.request.agent_id
        {
            result.add_reason_with(
                ReasonCode::OverrideTokenInvalid,
                "Approval identity does not match request",
                json!({
                    "approval_manifest_id": approval.manifest_id,
                    "request_manifest_id": ctx.request.manifest_id,
                    "approval_agent_id": approval.agent_id,
                    "request_agent_id": ctx.request.agent_id,
                }),
            );
            return Ok(false);
        }

        if approval.consumed_at.is_some() {
            result.add_reason_with(
                ReasonCode::OverrideTokenAlreadyUsed,
                format!("Approval '{approval_id}' already consumed"),
                json!({
                    "consumed_at": approval.consumed_at,
                    "consumed_interaction_id": approval.consumed_interaction_id,
                }),
            );
            return Ok(false);
        }

        // Defense in depth: the frozen approval action must hash to the same
        // value the token was bound to.
        let approval_action_hash = match action_hash(&approval.action) {
            Ok(hash) => hash,
            Err(err) => {
                result.add_reason(
                    ReasonCode::OverrideTokenInvalid,
                    format!("Unable to hash approval action: {err}"),
                );
                return Ok(false);
            }
        };
        if approval_action_hash != token_action_hash {
            result.add_reason_with(
                ReasonCode::OverrideTokenInvalid,
                "Approval action does not match override token",
                json!({
                    "approval_action_hash": approval_action_hash,
                    "token_action_hash": token_action_hash,
                }),
            );
            return Ok(false);
        }

        Ok(true)
    }

    /// Checks the daily budget against the counter row for today.
    fn check_budget(
        &self,
        ctx: PolicyContext<'_>,
        manifest: &ManifestRecord,
        result: &mut PolicyResult,
    ) -> Result<StageDecision, StoreError> {
        let constraints = manifest.constraints();
        let daily_cap = constraints.max_actions_per_day.unwrap_or(self.default_daily_budget);
        let escalate_at_percent = constraints.budget_escalate_at_percent;

        let day = self.clock.now().day();
        let count = self.stores.counters.count(ctx.tenant, &ctx.request.manifest_id, day)?;
        result.budget_count = count;
        result.budget_limit = daily_cap;

        if count >= daily_cap {
            result.add_reason_with(
                ReasonCode::BudgetExceeded,
                format!("Daily action budget exceeded ({count}/{daily_cap})"),
                json!({"current_count": count, "daily_cap": daily_cap}),
            );
            return Ok(StageDecision::Deny);
        }

        let threshold = daily_cap.saturating_mul(escalate_at_percent) / 100;
        if count >= threshold {
            result.add_reason_with(
                ReasonCode::BudgetThresholdReached,
                format!("Approaching daily budget limit ({count}/{daily_cap})"),
                json!({
                    "current_count": count,
                    "daily_cap": daily_cap,
                    "threshold_percent": escalate_at_percent,
                }),
            );
            return Ok(StageDecision::Escalate);
        }

        Ok(StageDecision::Allow)
    }
}

// ============================================================================
// SECTION: Manifest Checks
// ============================================================================

/// Checks the manifest action-type allowlist.
fn check_action_type_allowed(
    request: &ActionRequest,
    policy: &NormalizedPolicy,
    result: &mut PolicyResult,
) -> bool {
    if policy.allowed_action_types.is_empty() {
        return true;
    }
    if !policy.allowed_action_types.contains(&request.action.action_type) {
        result.add_reason_with(
            ReasonCode::ActionTypeNotAllowed,
            format!("Action type '{}' is not allowed", request.action.action_type),
            json!({"allowed_types": policy.allowed_action_types}),
        );
        return false;
    }
    true
}

/// Checks the manifest tool allow/deny lists; denylist wins.
fn check_tool_allowed(
    request: &ActionRequest,
    policy: &NormalizedPolicy,
    result: &mut PolicyResult,
) -> bool {
    if policy.denied_tools.contains(&request.action.tool) {
        result.add_reason(
            ReasonCode::ToolNotAllowed,
            format!("Tool '{}' is explicitly denied", request.action.tool),
        );
        return false;
    }
    if !policy.allowed_tools.is_empty() && !policy.allowed_tools.contains(&request.action.tool) {
        result.add_reason_with(
            ReasonCode::ToolNotAllowed,
            format!("Tool '{}' is not in allowed tools list", request.action.tool),
            json!({"allowed_tools": policy.allowed_tools}),
        );
        return false;
    }
    true
}

/// Checks that the tool exists in the manifest tools registry.
fn check_tool_configured(
    request: &ActionRequest,
    manifest: &ManifestRecord,
    result: &mut PolicyResult,
) -> bool {
    let Some(tools) = manifest.tools().filter(|tools| !tools.is_empty()) else {
        result.add_reason(
            ReasonCode::ToolNotAllowed,
            format!(
                "Tool '{}' not configured in manifest (no tools defined)",
                request.action.tool
            ),
        );
        return false;
    };
    if !tools.contains_key(&request.action.tool) {
        let configured: Vec<&String> = tools.keys().collect();
        result.add_reason_with(
            ReasonCode::ToolNotAllowed,
            format!("Tool '{}' not configured in manifest", request.action.tool),
            json!({"configured_tools": configured}),
        );
        return false;
    }
    true
}

/// Checks manifest approval thresholds for action type, tool, and amount.
fn check_approval_thresholds(
    request: &ActionRequest,
    policy: &NormalizedPolicy,
    result: &mut PolicyResult,
) -> StageDecision {
    let Some(thresholds) = policy.approval_thresholds.as_ref() else {
        return StageDecision::Allow;
    };

    if thresholds.action_types.contains(&request.action.action_type) {
        result.add_reason_with(
            ReasonCode::RequiresHumanApproval,
            format!("Action type '{}' requires human approval", request.action.action_type),
            json!({"action_type": request.action.action_type}),
        );
        return StageDecision::Escalate;
    }

    if thresholds.tools.contains(&request.action.tool) {
        result.add_reason_with(
            ReasonCode::RequiresHumanApproval,
            format!("Tool '{}' requires human approval", request.action.tool),
            json!({"tool": request.action.tool}),
        );
        return StageDecision::Escalate;
    }

    let Some(threshold_amount) = thresholds.amount else {
        return StageDecision::Allow;
    };
    let threshold_currency = thresholds.currency.clone().unwrap_or_else(|| "USD".to_string());

    let paths: Vec<String> = ["amount", "value", "total"].iter().map(ToString::to_string).collect();
    let Some(amount) = extract_amount(&request.action.params, &paths) else {
        return StageDecision::Allow;
    };
    let currency = ["currency", "unit"]
        .iter()
        .find_map(|field| extract_currency(&request.action.params, field));

    let currency_matches =
        threshold_currency.is_empty() || currency == Some(threshold_currency.as_str());
    if currency_matches && amount > threshold_amount {
        let effective_currency = currency.unwrap_or(threshold_currency.as_str());
        result.add_reason_with(
            ReasonCode::AmountRequiresApproval,
            format!(
                "Amount {amount} {effective_currency} exceeds approval threshold \
                 {threshold_amount}"
            ),
            json!({
                "amount": amount,
                "currency": effective_currency,
                "threshold": threshold_amount,
            }),
        );
        return StageDecision::Escalate;
    }

    StageDecision::Allow
}

/// Checks manifest amount caps; per-currency caps take precedence.
fn check_amount_caps(
    request: &ActionRequest,
    policy: &NormalizedPolicy,
    result: &mut PolicyResult,
) -> StageDecision {
    let Some(caps) = policy.amount_caps.as_ref() else {
        return StageDecision::Allow;
    };
    let Some(amount) = extract_amount(&request.action.params, &caps.param_paths) else {
        return StageDecision::Allow;
    };

    if !caps.per_currency.is_empty() {
        let currency = extract_currency(&request.action.params, &caps.currency_field);
        if let Some(currency) = currency
            && let Some(currency_max) = caps.per_currency.get(currency)
        {
            if amount > *currency_max {
                result.add_reason_with(
                    ReasonCode::AmountExceedsCap,
                    format!(
                        "Amount {amount} {currency} exceeds maximum allowed {currency_max} \
                         {currency}"
                    ),
                    json!({"amount": amount, "currency": currency, "max_amount": currency_max}),
                );
                return StageDecision::Deny;
            }
            return StageDecision::Allow;
        }
        // Currency missing or uncapped: fall back to the conservative
        // max_amount derived at normalization time.
    }

    if let Some(max_amount) = caps.max_amount
        && amount > max_amount
    {
        result.add_reason_with(
            ReasonCode::AmountExceedsCap,
            format!("Amount {amount} exceeds maximum allowed {max_amount}"),
            json!({"amount": amount, "max_amount": max_amount}),
        );
        return StageDecision::Deny;
    }

    if let Some(escalate_above) = caps.escalate_above
        && amount > escalate_above
    {
        result.add_reason_with(
            ReasonCode::AmountRequiresApproval,
            format!("Amount {amount} exceeds threshold {escalate_above}, requires approval"),
            json!({"amount": amount, "escalate_above": escalate_above}),
        );
        return StageDecision::Escalate;
    }

    StageDecision::Allow
}

/// Checks the manifest jurisdiction allowlist, case-insensitively.
fn check_jurisdiction(
    request: &ActionRequest,
    policy: &NormalizedPolicy,
    result: &mut PolicyResult,
) -> bool {
    if policy.allowed_jurisdictions.is_empty() {
        return true;
    }
    let Some(jurisdiction) =
        request.counterparty.as_ref().and_then(|cp| cp.jurisdiction.as_deref())
    else {
        // Missing counterparty jurisdiction is permissive.
        return true;
    };
    let jurisdiction = jurisdiction.to_uppercase();
    let allowed = policy
        .allowed_jurisdictions
        .iter()
        .any(|entry| entry.to_uppercase() == jurisdiction);
    if !allowed {
        result.add_reason_with(
            ReasonCode::JurisdictionNotAllowed,
            format!("Jurisdiction '{jurisdiction}' is not in allowed list"),
            json!({"allowed_jurisdictions": policy.allowed_jurisdictions}),
        );
        return false;
    }
    true
}

/// Checks the manifest counterparty rules; denylist wins.
fn check_counterparty(
    request: &ActionRequest,
    policy: &NormalizedPolicy,
    result: &mut PolicyResult,
) -> bool {
    let rules = &policy.counterparty;
    if rules.allowlist.is_empty() && rules.denylist.is_empty() {
        return true;
    }
    let Some(cp_id) = request.counterparty.as_ref().and_then(|cp| cp.id.as_deref()) else {
        return true;
    };

    if rules.denylist.iter().any(|entry| entry == cp_id) {
        result.add_reason(
            ReasonCode::CounterpartyDenied,
            format!("Counterparty '{cp_id}' is in denylist"),
        );
        return false;
    }

    if !rules.allowlist.is_empty() && !rules.allowlist.iter().any(|entry| entry == cp_id) {
        result.add_reason(
            ReasonCode::CounterpartyNotInAllowlist,
            format!("Counterparty '{cp_id}' is not in allowlist"),
        );
        return false;
    }

    true
}

// ============================================================================
// SECTION: Token Checks
// ============================================================================

/// Checks the token action-type allowlist.
fn check_token_action_type_allowed(request: &ActionRequest, result: &mut PolicyResult) -> bool {
    let Some(claims) = result.token_claims.clone() else {
        return true;
    };
    if claims.allowed_action_types.is_empty() {
        return true;
    }
    if !claims.allowed_action_types.contains(&request.action.action_type) {
        result.add_reason_with(
            ReasonCode::TokenActionTypeNotAllowed,
            format!(
                "Action type '{}' not allowed by capability token",
                request.action.action_type
            ),
            json!({"token_allowed_types": claims.allowed_action_types}),
        );
        return false;
    }
    true
}

/// Checks the token tool allowlist.
fn check_token_tool_allowed(request: &ActionRequest, result: &mut PolicyResult) -> bool {
    let Some(claims) = result.token_claims.clone() else {
        return true;
    };
    if claims.allowed_tools.is_empty() {
        return true;
    }
    if !claims.allowed_tools.contains(&request.action.tool) {
        result.add_reason_with(
            ReasonCode::TokenToolNotAllowed,
            format!("Tool '{}' not allowed by capability token", request.action.tool),
            json!({"token_allowed_tools": claims.allowed_tools}),
        );
        return false;
    }
    true
}

/// Checks the token amount cap.
fn check_token_amount_cap(request: &ActionRequest, result: &mut PolicyResult) -> StageDecision {
    let Some(amount_max) = result
        .token_claims
        .as_ref()
        .and_then(|claims| claims.constraints.as_ref())
        .and_then(|constraints| constraints.amount_max)
    else {
        return StageDecision::Allow;
    };

    let paths: Vec<String> = ["amount", "value", "total"].iter().map(ToString::to_string).collect();
    let Some(amount) = extract_amount(&request.action.params, &paths) else {
        return StageDecision::Allow;
    };

    if amount > amount_max {
        result.add_reason_with(
            ReasonCode::TokenAmountExceedsCap,
            format!("Amount {amount} exceeds token cap {amount_max}"),
            json!({"amount": amount, "token_max_amount": amount_max}),
        );
        return StageDecision::Deny;
    }
    StageDecision::Allow
}

/// Checks the token jurisdiction constraint, case-insensitively.
fn check_token_jurisdiction(request: &ActionRequest, result: &mut PolicyResult) -> bool {
    let Some(jurisdictions) = result
        .token_claims
        .as_ref()
        .and_then(|claims| claims.constraints.as_ref())
        .and_then(|constraints| constraints.jurisdictions.clone())
    else {
        return true;
    };
    if jurisdictions.is_empty() {
        return true;
    }
    let Some(jurisdiction) =
        request.counterparty.as_ref().and_then(|cp| cp.jurisdiction.as_deref())
    else {
        return true;
    };
    let jurisdiction = jurisdiction.to_uppercase();
    if !jurisdictions.iter().any(|entry| entry.to_uppercase() == jurisdiction) {
        result.add_reason_with(
            ReasonCode::TokenJurisdictionNotAllowed,
            format!("Jurisdiction '{jurisdiction}' not allowed by capability token"),
            json!({"token_allowed_jurisdictions": jurisdictions}),
        );
        return false;
    }
    true
}

/// Checks the token counterparty constraints; denylist wins.
fn check_token_counterparty(request: &ActionRequest, result: &mut PolicyResult) -> bool {
    let Some(constraints) =
        result.token_claims.as_ref().and_then(|claims| claims.constraints.clone())
    else {
        return true;
    };
    let Some(cp_id) = request.counterparty.as_ref().and_then(|cp| cp.id.as_deref()) else {
        return true;
    };

    if let Some(denylist) = constraints.counterparty_denylist.as_ref()
        && denylist.iter().any(|entry| entry == cp_id)
    {
        result.add_reason(
            ReasonCode::TokenCounterpartyNotAllowed,
            format!("Counterparty '{cp_id}' denied by capability token"),
        );
        return false;
    }

    if let Some(allowlist) = constraints.counterparty_allowlist.as_ref()
        && !allowlist.is_empty()
        && !allowlist.iter().any(|entry| entry == cp_id)
    {
        result.add_reason(
            ReasonCode::TokenCounterpartyNotAllowed,
            format!("Counterparty '{cp_id}' not in token allowlist"),
        );
        return false;
    }

    true
}
