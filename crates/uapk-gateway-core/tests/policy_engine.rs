// crates/uapk-gateway-core/tests/policy_engine.rs
// ============================================================================
// Module: Policy Engine Tests
// Description: Stage-by-stage tests for deterministic policy evaluation.
// ============================================================================
//! ## Overview
//! Exercises manifest selection, normalization, token intersection, amount
//! caps, jurisdiction/counterparty rules, and budget checks.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    clippy::missing_docs_in_private_items,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use std::collections::BTreeMap;

use serde_json::Value;
use serde_json::json;
use time::macros::datetime;
use uapk_gateway_core::ActionInfo;
use uapk_gateway_core::ActionRequest;
use uapk_gateway_core::ApprovalStatus;
use uapk_gateway_core::CapabilityTokenClaims;
use uapk_gateway_core::GatewayDecision;
use uapk_gateway_core::InMemoryApprovalStore;
use uapk_gateway_core::InMemoryCounterStore;
use uapk_gateway_core::InMemoryIssuerStore;
use uapk_gateway_core::InMemoryManifestStore;
use uapk_gateway_core::ManifestRecord;
use uapk_gateway_core::ManifestStatus;
use uapk_gateway_core::ManualClock;
use uapk_gateway_core::PolicyContext;
use uapk_gateway_core::PolicyEngine;
use uapk_gateway_core::PolicyStores;
use uapk_gateway_core::ReasonCode;
use uapk_gateway_core::TenantId;
use uapk_gateway_core::Timestamp;
use uapk_gateway_core::TokenError;
use uapk_gateway_core::TokenType;
use uapk_gateway_core::TokenVerifier;
use uapk_gateway_core::interfaces::ApprovalStore;
use uapk_gateway_core::interfaces::CounterStore;

// ============================================================================
// SECTION: Fixture
// ============================================================================

/// Default daily budget used by the fixture engine.
const DEFAULT_BUDGET: u64 = 1000;

struct Fixture {
    manifests: InMemoryManifestStore,
    issuers: InMemoryIssuerStore,
    approvals: InMemoryApprovalStore,
    counters: InMemoryCounterStore,
    clock: ManualClock,
}

impl Fixture {
    fn new() -> Self {
        Self {
            manifests: InMemoryManifestStore::new(),
            issuers: InMemoryIssuerStore::new(),
            approvals: InMemoryApprovalStore::new(),
            counters: InMemoryCounterStore::new(),
            clock: ManualClock::new(start_time()),
        }
    }

    fn evaluate(
        &self,
        verifier: &dyn TokenVerifier,
        request: &ActionRequest,
    ) -> uapk_gateway_core::PolicyResult {
        let engine = PolicyEngine::new(
            PolicyStores {
                manifests: &self.manifests,
                issuers: &self.issuers,
                approvals: &self.approvals,
                counters: &self.counters,
            },
            verifier,
            &self.clock,
            DEFAULT_BUDGET,
        );
        engine
            .evaluate(PolicyContext {
                tenant: &tenant(),
                request,
            })
            .unwrap()
    }
}

fn start_time() -> Timestamp {
    Timestamp::new(datetime!(2026-08-01 12:00:00 UTC))
}

fn tenant() -> TenantId {
    TenantId::new("org-1")
}

/// Verifier that accepts the token string "valid" with fixed claims.
struct StaticVerifier {
    claims: CapabilityTokenClaims,
}

impl TokenVerifier for StaticVerifier {
    fn verify(
        &self,
        token: &str,
        _issuer_keys: &BTreeMap<String, String>,
    ) -> Result<CapabilityTokenClaims, TokenError> {
        if token == "valid" {
            Ok(self.claims.clone())
        } else {
            Err(TokenError::Malformed("Invalid token format".to_string()))
        }
    }
}

/// Verifier for requests that carry no token.
struct NoTokenVerifier;

impl TokenVerifier for NoTokenVerifier {
    fn verify(
        &self,
        _token: &str,
        _issuer_keys: &BTreeMap<String, String>,
    ) -> Result<CapabilityTokenClaims, TokenError> {
        Err(TokenError::Malformed("Invalid token format".to_string()))
    }
}

fn manifest_with(policy: Value, constraints: Option<Value>) -> ManifestRecord {
    let mut body = json!({
        "policy": policy,
        "tools": {"stripe_refund": {"type": "mock", "config": {}}},
    });
    if let Some(constraints) = constraints {
        body["constraints"] = constraints;
    }
    ManifestRecord {
        tenant: tenant(),
        manifest_id: "refund-bot-v1".into(),
        status: ManifestStatus::Active,
        manifest: body,
        created_at: start_time(),
    }
}

fn payment_request(amount: f64, currency: &str) -> ActionRequest {
    ActionRequest {
        manifest_id: "refund-bot-v1".into(),
        agent_id: "agent-1".into(),
        action: ActionInfo {
            action_type: "payment".to_string(),
            tool: "stripe_refund".to_string(),
            params: json!({"amount": amount, "currency": currency}),
        },
        counterparty: None,
        context: None,
        capability_token: None,
        override_token: None,
    }
}

fn base_claims() -> CapabilityTokenClaims {
    CapabilityTokenClaims {
        iss: "gateway".to_string(),
        sub: "agent-1".to_string(),
        org_id: "org-1".to_string(),
        manifest_id: "refund-bot-v1".to_string(),
        iat: 0,
        exp: 0,
        jti: "cap-test".to_string(),
        token_type: TokenType::Capability,
        allowed_action_types: Vec::new(),
        allowed_tools: Vec::new(),
        constraints: None,
        action_hash: None,
        approval_id: None,
    }
}

fn has_reason(result: &uapk_gateway_core::PolicyResult, code: ReasonCode) -> bool {
    result.reasons.iter().any(|reason| reason.code == code)
}

// ============================================================================
// SECTION: Manifest Selection
// ============================================================================

/// Tests that a missing manifest denies.
#[test]
fn test_missing_manifest_denies() {
    let fixture = Fixture::new();
    let result = fixture.evaluate(&NoTokenVerifier, &payment_request(10.0, "USD"));
    assert_eq!(result.decision, GatewayDecision::Deny);
    assert!(has_reason(&result, ReasonCode::ManifestNotFound));
}

/// Tests that the newest active manifest wins selection.
#[test]
fn test_newest_active_manifest_selected() {
    let fixture = Fixture::new();
    // Older active manifest registers the tool; the newer one does not.
    let older = manifest_with(json!({}), None);
    let mut newer = older.clone();
    newer.manifest = json!({"policy": {}, "tools": {"other_tool": {"type": "mock"}}});
    newer.created_at = start_time().plus_seconds(60);
    fixture.manifests.insert(older).unwrap();
    fixture.manifests.insert(newer).unwrap();

    let result = fixture.evaluate(&NoTokenVerifier, &payment_request(10.0, "USD"));
    assert_eq!(result.decision, GatewayDecision::Deny);
    assert!(has_reason(&result, ReasonCode::ToolNotAllowed));
}

/// Tests that non-active manifests are never selected.
#[test]
fn test_inactive_manifest_not_selected() {
    let fixture = Fixture::new();
    let mut record = manifest_with(json!({}), None);
    record.status = ManifestStatus::Inactive;
    fixture.manifests.insert(record).unwrap();

    let result = fixture.evaluate(&NoTokenVerifier, &payment_request(10.0, "USD"));
    assert_eq!(result.decision, GatewayDecision::Deny);
    assert!(has_reason(&result, ReasonCode::ManifestNotFound));
}

// ============================================================================
// SECTION: Amount Caps
// ============================================================================

/// Tests denial above a per-currency hard cap with a matching currency.
#[test]
fn test_amount_over_cap_denies() {
    let fixture = Fixture::new();
    fixture
        .manifests
        .insert(manifest_with(
            json!({
                "amount_caps": {"USD": 100},
                "approval_thresholds": {"amount": 50, "currency": "USD"},
            }),
            None,
        ))
        .unwrap();

    let result = fixture.evaluate(&NoTokenVerifier, &payment_request(150.0, "USD"));
    assert_eq!(result.decision, GatewayDecision::Deny);
    assert!(has_reason(&result, ReasonCode::AmountExceedsCap));
}

/// Tests escalation between the approval threshold and the hard cap.
#[test]
fn test_amount_over_threshold_escalates() {
    let fixture = Fixture::new();
    fixture
        .manifests
        .insert(manifest_with(
            json!({
                "amount_caps": {"USD": 100},
                "approval_thresholds": {"amount": 50, "currency": "USD"},
            }),
            None,
        ))
        .unwrap();

    let result = fixture.evaluate(&NoTokenVerifier, &payment_request(75.0, "USD"));
    assert_eq!(result.decision, GatewayDecision::Escalate);
    assert!(has_reason(&result, ReasonCode::AmountRequiresApproval));
}

/// Tests the conservative min-value fallback for legacy per-currency caps.
#[test]
fn test_legacy_caps_min_value_fallback() {
    let fixture = Fixture::new();
    fixture
        .manifests
        .insert(manifest_with(json!({"amount_caps": {"USD": 1000, "EUR": 500}}), None))
        .unwrap();

    // No currency in params: the min across currencies (500) applies.
    let mut request = payment_request(600.0, "USD");
    request.action.params = json!({"amount": 600.0});
    let result = fixture.evaluate(&NoTokenVerifier, &request);
    assert_eq!(result.decision, GatewayDecision::Deny);
    assert!(has_reason(&result, ReasonCode::AmountExceedsCap));

    // Currency present: the USD-specific cap (1000) applies.
    let result = fixture.evaluate(&NoTokenVerifier, &payment_request(600.0, "USD"));
    assert_eq!(result.decision, GatewayDecision::Allow);
    assert!(has_reason(&result, ReasonCode::AllChecksPassed));
}

/// Tests dot-path extraction for nested amounts.
#[test]
fn test_nested_amount_param_path() {
    let fixture = Fixture::new();
    fixture
        .manifests
        .insert(manifest_with(
            json!({
                "amount_caps": {
                    "max_amount": 100,
                    "param_paths": ["payment.amount"],
                },
            }),
            None,
        ))
        .unwrap();

    let mut request = payment_request(0.0, "USD");
    request.action.params = json!({"payment": {"amount": 250}});
    let result = fixture.evaluate(&NoTokenVerifier, &request);
    assert_eq!(result.decision, GatewayDecision::Deny);
    assert!(has_reason(&result, ReasonCode::AmountExceedsCap));
}

// ============================================================================
// SECTION: Tool & Action Type Rules
// ============================================================================

/// Tests that the tool denylist wins over the allowlist.
#[test]
fn test_tool_denylist_wins() {
    let fixture = Fixture::new();
    fixture
        .manifests
        .insert(manifest_with(
            json!({
                "tool_allowlist": ["stripe_refund"],
                "tool_denylist": ["stripe_refund"],
            }),
            None,
        ))
        .unwrap();

    let result = fixture.evaluate(&NoTokenVerifier, &payment_request(1.0, "USD"));
    assert_eq!(result.decision, GatewayDecision::Deny);
    assert!(has_reason(&result, ReasonCode::ToolNotAllowed));
}

/// Tests that an unregistered tool denies even when the allowlist permits it.
#[test]
fn test_unregistered_tool_denies() {
    let fixture = Fixture::new();
    let mut record = manifest_with(json!({}), None);
    record.manifest["tools"] = json!({});
    fixture.manifests.insert(record).unwrap();

    let result = fixture.evaluate(&NoTokenVerifier, &payment_request(1.0, "USD"));
    assert_eq!(result.decision, GatewayDecision::Deny);
    assert!(has_reason(&result, ReasonCode::ToolNotAllowed));
}

/// Tests the manifest action-type allowlist.
#[test]
fn test_action_type_allowlist() {
    let fixture = Fixture::new();
    fixture
        .manifests
        .insert(manifest_with(json!({"allowed_action_types": ["send_email"]}), None))
        .unwrap();

    let result = fixture.evaluate(&NoTokenVerifier, &payment_request(1.0, "USD"));
    assert_eq!(result.decision, GatewayDecision::Deny);
    assert!(has_reason(&result, ReasonCode::ActionTypeNotAllowed));
}

// ============================================================================
// SECTION: Jurisdiction & Counterparty
// ============================================================================

/// Tests case-insensitive jurisdiction matching via the legacy spelling.
#[test]
fn test_jurisdiction_case_insensitive() {
    let fixture = Fixture::new();
    fixture
        .manifests
        .insert(manifest_with(json!({"jurisdiction_allowlist": ["de", "at"]}), None))
        .unwrap();

    let mut request = payment_request(1.0, "USD");
    request.counterparty = serde_json::from_value(json!({"id": "acme", "jurisdiction": "DE"}))
        .unwrap();
    let result = fixture.evaluate(&NoTokenVerifier, &request);
    assert_eq!(result.decision, GatewayDecision::Allow);

    request.counterparty = serde_json::from_value(json!({"id": "acme", "jurisdiction": "FR"}))
        .unwrap();
    let result = fixture.evaluate(&NoTokenVerifier, &request);
    assert_eq!(result.decision, GatewayDecision::Deny);
    assert!(has_reason(&result, ReasonCode::JurisdictionNotAllowed));
}

/// Tests that a missing counterparty jurisdiction is permissive.
#[test]
fn test_missing_jurisdiction_is_permissive() {
    let fixture = Fixture::new();
    fixture
        .manifests
        .insert(manifest_with(json!({"allowed_jurisdictions": ["DE"]}), None))
        .unwrap();

    let result = fixture.evaluate(&NoTokenVerifier, &payment_request(1.0, "USD"));
    assert_eq!(result.decision, GatewayDecision::Allow);
}

/// Tests flat counterparty denylist normalization and precedence.
#[test]
fn test_counterparty_denylist() {
    let fixture = Fixture::new();
    fixture
        .manifests
        .insert(manifest_with(
            json!({
                "counterparty_allowlist": ["acme"],
                "counterparty_denylist": ["acme"],
            }),
            None,
        ))
        .unwrap();

    let mut request = payment_request(1.0, "USD");
    request.counterparty = serde_json::from_value(json!({"id": "acme"})).unwrap();
    let result = fixture.evaluate(&NoTokenVerifier, &request);
    assert_eq!(result.decision, GatewayDecision::Deny);
    assert!(has_reason(&result, ReasonCode::CounterpartyDenied));
}

// ============================================================================
// SECTION: Budget
// ============================================================================

/// Tests budget denial at the cap and escalation near it.
#[test]
fn test_budget_deny_and_escalate() {
    let fixture = Fixture::new();
    fixture
        .manifests
        .insert(manifest_with(json!({}), Some(json!({"max_actions_per_day": 10}))))
        .unwrap();

    let day = start_time().day();
    for _ in 0..9 {
        fixture.counters.increment(&tenant(), &"refund-bot-v1".into(), day).unwrap();
    }

    // 9/10 crosses the default 90% escalation threshold.
    let result = fixture.evaluate(&NoTokenVerifier, &payment_request(1.0, "USD"));
    assert_eq!(result.decision, GatewayDecision::Escalate);
    assert!(has_reason(&result, ReasonCode::BudgetThresholdReached));
    assert_eq!(result.budget_count, 9);
    assert_eq!(result.budget_limit, 10);

    fixture.counters.increment(&tenant(), &"refund-bot-v1".into(), day).unwrap();
    let result = fixture.evaluate(&NoTokenVerifier, &payment_request(1.0, "USD"));
    assert_eq!(result.decision, GatewayDecision::Deny);
    assert!(has_reason(&result, ReasonCode::BudgetExceeded));
}

// ============================================================================
// SECTION: Capability Tokens
// ============================================================================

/// Tests the require_capability_token policy flag.
#[test]
fn test_capability_token_required() {
    let fixture = Fixture::new();
    fixture
        .manifests
        .insert(manifest_with(json!({"require_capability_token": true}), None))
        .unwrap();

    let result = fixture.evaluate(&NoTokenVerifier, &payment_request(1.0, "USD"));
    assert_eq!(result.decision, GatewayDecision::Deny);
    assert!(has_reason(&result, ReasonCode::CapabilityTokenRequired));
}

/// Tests denial when the token org does not match the tenant.
#[test]
fn test_token_org_mismatch() {
    let fixture = Fixture::new();
    fixture.manifests.insert(manifest_with(json!({}), None)).unwrap();

    let mut claims = base_claims();
    claims.org_id = "other-org".to_string();
    let verifier = StaticVerifier {
        claims,
    };

    let mut request = payment_request(1.0, "USD");
    request.capability_token = Some("valid".to_string());
    let result = fixture.evaluate(&verifier, &request);
    assert_eq!(result.decision, GatewayDecision::Deny);
    assert!(has_reason(&result, ReasonCode::TokenOrgMismatch));
}

/// Tests denial when the token subject does not match the agent.
#[test]
fn test_token_agent_mismatch() {
    let fixture = Fixture::new();
    fixture.manifests.insert(manifest_with(json!({}), None)).unwrap();

    let mut claims = base_claims();
    claims.sub = "someone-else".to_string();
    let verifier = StaticVerifier {
        claims,
    };

    let mut request = payment_request(1.0, "USD");
    request.capability_token = Some("valid".to_string());
    let result = fixture.evaluate(&verifier, &request);
    assert_eq!(result.decision, GatewayDecision::Deny);
    assert!(has_reason(&result, ReasonCode::TokenAgentMismatch));
}

/// Tests that token allowlists intersect with manifest policy.
#[test]
fn test_token_tool_restriction() {
    let fixture = Fixture::new();
    fixture.manifests.insert(manifest_with(json!({}), None)).unwrap();

    let mut claims = base_claims();
    claims.allowed_tools = vec!["other_tool".to_string()];
    let verifier = StaticVerifier {
        claims,
    };

    let mut request = payment_request(1.0, "USD");
    request.capability_token = Some("valid".to_string());
    let result = fixture.evaluate(&verifier, &request);
    assert_eq!(result.decision, GatewayDecision::Deny);
    assert!(has_reason(&result, ReasonCode::TokenToolNotAllowed));
}

/// Tests the token amount constraint.
#[test]
fn test_token_amount_cap() {
    let fixture = Fixture::new();
    fixture.manifests.insert(manifest_with(json!({}), None)).unwrap();

    let mut claims = base_claims();
    claims.constraints = Some(uapk_gateway_core::TokenConstraints {
        amount_max: Some(50.0),
        ..Default::default()
    });
    let verifier = StaticVerifier {
        claims,
    };

    let mut request = payment_request(80.0, "USD");
    request.capability_token = Some("valid".to_string());
    let result = fixture.evaluate(&verifier, &request);
    assert_eq!(result.decision, GatewayDecision::Deny);
    assert!(has_reason(&result, ReasonCode::TokenAmountExceedsCap));
}

/// Tests rejection of claims carrying override material without the type.
#[test]
fn test_override_material_requires_override_type() {
    let fixture = Fixture::new();
    fixture.manifests.insert(manifest_with(json!({}), None)).unwrap();

    let mut claims = base_claims();
    claims.action_hash = Some("abc".to_string());
    claims.approval_id = Some("appr-1".to_string());
    let verifier = StaticVerifier {
        claims,
    };

    let mut request = payment_request(1.0, "USD");
    request.capability_token = Some("valid".to_string());
    let result = fixture.evaluate(&verifier, &request);
    assert_eq!(result.decision, GatewayDecision::Deny);
    assert!(has_reason(&result, ReasonCode::CapabilityTokenInvalid));
}

// ============================================================================
// SECTION: Override Tokens
// ============================================================================

fn approved_approval(action: &ActionInfo) -> uapk_gateway_core::Approval {
    uapk_gateway_core::Approval {
        approval_id: "appr-1".into(),
        tenant: tenant(),
        interaction_id: "int-0".into(),
        manifest_id: "refund-bot-v1".into(),
        agent_id: "agent-1".into(),
        action: action.clone(),
        counterparty: None,
        context: None,
        reason_codes: vec![ReasonCode::AmountRequiresApproval],
        status: ApprovalStatus::Approved,
        expires_at: start_time().plus_hours(24),
        consumed_at: None,
        consumed_interaction_id: None,
        approver: Some("operator".to_string()),
        approved_at: Some(start_time()),
        created_at: start_time(),
    }
}

fn override_claims(action: &ActionInfo) -> CapabilityTokenClaims {
    let mut claims = base_claims();
    claims.token_type = TokenType::Override;
    claims.action_hash = Some(uapk_gateway_core::action_hash(action).unwrap());
    claims.approval_id = Some("appr-1".to_string());
    claims
}

/// Tests that a valid override upgrades escalate to allow.
#[test]
fn test_override_upgrades_escalate() {
    let fixture = Fixture::new();
    fixture
        .manifests
        .insert(manifest_with(
            json!({
                "amount_caps": {"USD": 100},
                "approval_thresholds": {"amount": 50, "currency": "USD"},
            }),
            None,
        ))
        .unwrap();

    let request = payment_request(75.0, "USD");
    fixture.approvals.create(approved_approval(&request.action)).unwrap();
    let verifier = StaticVerifier {
        claims: override_claims(&request.action),
    };

    let mut request = request;
    request.override_token = Some("valid".to_string());
    let result = fixture.evaluate(&verifier, &request);
    assert_eq!(result.decision, GatewayDecision::Allow);
    assert!(result.override_valid);
    assert!(has_reason(&result, ReasonCode::OverrideTokenAccepted));
}

/// Tests that a valid override never upgrades a hard denial.
#[test]
fn test_override_never_upgrades_deny() {
    let fixture = Fixture::new();
    fixture
        .manifests
        .insert(manifest_with(json!({"amount_caps": {"USD": 100}}), None))
        .unwrap();

    let request = payment_request(150.0, "USD");
    fixture.approvals.create(approved_approval(&request.action)).unwrap();
    let verifier = StaticVerifier {
        claims: override_claims(&request.action),
    };

    let mut request = request;
    request.override_token = Some("valid".to_string());
    let result = fixture.evaluate(&verifier, &request);
    assert_eq!(result.decision, GatewayDecision::Deny);
    assert!(has_reason(&result, ReasonCode::AmountExceedsCap));
}

/// Tests that changed params invalidate the override binding.
#[test]
fn test_override_params_mismatch_denies() {
    let fixture = Fixture::new();
    fixture
        .manifests
        .insert(manifest_with(
            json!({"approval_thresholds": {"tools": ["stripe_refund"]}}),
            None,
        ))
        .unwrap();

    // Approval and token were issued for a different recipient.
    let mut approved_action = payment_request(75.0, "USD").action;
    approved_action.params = json!({"to": "user@example.com"});
    fixture.approvals.create(approved_approval(&approved_action)).unwrap();
    let verifier = StaticVerifier {
        claims: override_claims(&approved_action),
    };

    let mut request = payment_request(75.0, "USD");
    request.action.params = json!({"to": "attacker@example.com"});
    request.override_token = Some("valid".to_string());
    let result = fixture.evaluate(&verifier, &request);
    assert_eq!(result.decision, GatewayDecision::Deny);
    assert!(has_reason(&result, ReasonCode::OverrideTokenInvalid));

    // The approval was not touched by evaluation.
    let approval = fixture.approvals.get(&tenant(), &"appr-1".into()).unwrap().unwrap();
    assert!(approval.consumed_at.is_none());
}

/// Tests rejection of overrides pointing at consumed approvals.
#[test]
fn test_consumed_approval_rejected() {
    let fixture = Fixture::new();
    fixture
        .manifests
        .insert(manifest_with(
            json!({"approval_thresholds": {"tools": ["stripe_refund"]}}),
            None,
        ))
        .unwrap();

    let request = payment_request(75.0, "USD");
    let mut approval = approved_approval(&request.action);
    approval.consumed_at = Some(start_time());
    approval.consumed_interaction_id = Some("int-prev".into());
    fixture.approvals.create(approval).unwrap();
    let verifier = StaticVerifier {
        claims: override_claims(&request.action),
    };

    let mut request = request;
    request.override_token = Some("valid".to_string());
    let result = fixture.evaluate(&verifier, &request);
    assert_eq!(result.decision, GatewayDecision::Deny);
    assert!(has_reason(&result, ReasonCode::OverrideTokenAlreadyUsed));
}

/// Tests rejection of overrides pointing at expired approvals.
#[test]
fn test_expired_approval_rejected() {
    let fixture = Fixture::new();
    fixture
        .manifests
        .insert(manifest_with(
            json!({"approval_thresholds": {"tools": ["stripe_refund"]}}),
            None,
        ))
        .unwrap();

    let request = payment_request(75.0, "USD");
    fixture.approvals.create(approved_approval(&request.action)).unwrap();
    let verifier = StaticVerifier {
        claims: override_claims(&request.action),
    };

    fixture.clock.advance_seconds(25 * 3600);

    let mut request = request;
    request.override_token = Some("valid".to_string());
    let result = fixture.evaluate(&verifier, &request);
    assert_eq!(result.decision, GatewayDecision::Deny);
    assert!(has_reason(&result, ReasonCode::OverrideTokenInvalid));
}
