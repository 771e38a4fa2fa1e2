// crates/uapk-gateway-core/src/core/manifest.rs
// ============================================================================
// Module: UAPK Gateway Manifest Model
// Description: Stored manifests, lifecycle states, and the normalized policy view.
// Purpose: Turn opaque manifest JSON into one typed policy structure.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Stored manifest bodies are opaque JSON uploaded by operators. The gateway
//! reads only known keys and tolerates both legacy and canonical spellings by
//! normalizing once, up front, into [`NormalizedPolicy`]. Evaluation code
//! never branches on legacy names.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

use crate::core::identifiers::ManifestId;
use crate::core::identifiers::TenantId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default dot paths probed for an action amount.
const DEFAULT_AMOUNT_PARAM_PATHS: [&str; 3] = ["amount", "value", "total"];
/// Default parameter field holding the currency code.
const DEFAULT_CURRENCY_FIELD: &str = "currency";
/// Structured amount-cap keys distinguishing the canonical shape from the
/// legacy flat per-currency map.
const STRUCTURED_AMOUNT_CAP_KEYS: [&str; 4] =
    ["max_amount", "escalate_above", "param_paths", "currency_field"];

// ============================================================================
// SECTION: Manifest Record
// ============================================================================

/// Lifecycle state of a stored manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManifestStatus {
    /// Uploaded but not yet activated.
    Pending,
    /// Selectable for evaluation.
    Active,
    /// Deactivated; retained for history.
    Inactive,
    /// Permanently retired.
    Archived,
}

impl ManifestStatus {
    /// Returns the stable wire label for this status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Archived => "archived",
        }
    }
}

/// One stored manifest row.
///
/// # Invariants
/// - `manifest` is opaque JSON; only known keys are read, via the normalized
///   accessors on this type.
/// - Selection picks the newest `Active` row per `(tenant, manifest_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestRecord {
    /// Owning tenant.
    pub tenant: TenantId,
    /// Stable manifest identifier.
    pub manifest_id: ManifestId,
    /// Lifecycle state.
    pub status: ManifestStatus,
    /// Opaque manifest body.
    pub manifest: Value,
    /// Row creation time; newest active row wins selection.
    pub created_at: Timestamp,
}

impl ManifestRecord {
    /// Returns the normalized policy view of this manifest.
    #[must_use]
    pub fn policy(&self) -> NormalizedPolicy {
        NormalizedPolicy::from_manifest(&self.manifest)
    }

    /// Returns the budget constraints section of this manifest.
    #[must_use]
    pub fn constraints(&self) -> BudgetConstraints {
        BudgetConstraints::from_manifest(&self.manifest)
    }

    /// Returns the tools registry when present.
    #[must_use]
    pub fn tools(&self) -> Option<&Map<String, Value>> {
        self.manifest.get("tools").and_then(Value::as_object)
    }

    /// Returns the registry entry for a tool when configured.
    ///
    /// A `null` registry entry registers the tool for policy purposes but
    /// defers its connector configuration to the manifest-level
    /// `default_connector`.
    #[must_use]
    pub fn tool_entry(&self, tool: &str) -> Option<&Value> {
        self.tools().and_then(|tools| tools.get(tool)).filter(|entry| !entry.is_null())
    }

    /// Returns the manifest-level default connector when configured.
    #[must_use]
    pub fn default_connector(&self) -> Option<&Value> {
        self.manifest.get("default_connector")
    }
}

// ============================================================================
// SECTION: Normalized Policy
// ============================================================================

/// Counterparty allow/deny rules.
///
/// # Invariants
/// - Denylist wins over allowlist; an empty allowlist permits all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CounterpartyRules {
    /// Permitted counterparty identifiers (empty = all).
    pub allowlist: Vec<String>,
    /// Refused counterparty identifiers.
    pub denylist: Vec<String>,
}

/// Structured amount caps after normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct AmountCaps {
    /// Hard cap; amounts above this are denied.
    pub max_amount: Option<f64>,
    /// Escalation threshold; amounts above this escalate.
    pub escalate_above: Option<f64>,
    /// Dot paths probed for the amount.
    pub param_paths: Vec<String>,
    /// Parameter field holding the currency code.
    pub currency_field: String,
    /// Per-currency hard caps taking precedence over `max_amount`.
    pub per_currency: BTreeMap<String, f64>,
}

/// Approval thresholds forcing human review.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApprovalThresholds {
    /// Action types always requiring approval.
    pub action_types: Vec<String>,
    /// Tools always requiring approval.
    pub tools: Vec<String>,
    /// Amount above which approval is required.
    pub amount: Option<f64>,
    /// Currency the amount threshold applies to.
    pub currency: Option<String>,
}

/// Typed, canonical view of a manifest's policy section.
///
/// # Invariants
/// - Legacy spellings (`tool_allowlist`, flat `counterparty_allowlist`, flat
///   per-currency `amount_caps`, …) are folded in here exactly once; the
///   stored manifest is never mutated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedPolicy {
    /// Whether a capability token is mandatory for every action.
    pub require_capability_token: bool,
    /// Permitted action types (empty = all).
    pub allowed_action_types: Vec<String>,
    /// Permitted tools (empty = all).
    pub allowed_tools: Vec<String>,
    /// Refused tools; denylist wins.
    pub denied_tools: Vec<String>,
    /// Permitted jurisdictions, compared case-insensitively (empty = all).
    pub allowed_jurisdictions: Vec<String>,
    /// Counterparty allow/deny rules.
    pub counterparty: CounterpartyRules,
    /// Amount caps when configured.
    pub amount_caps: Option<AmountCaps>,
    /// Approval thresholds when configured.
    pub approval_thresholds: Option<ApprovalThresholds>,
}

impl NormalizedPolicy {
    /// Builds the normalized policy view from a manifest body.
    #[must_use]
    pub fn from_manifest(manifest: &Value) -> Self {
        let Some(policy) = manifest.get("policy").and_then(Value::as_object) else {
            return Self::default();
        };

        Self {
            require_capability_token: policy
                .get("require_capability_token")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            allowed_action_types: string_list(policy.get("allowed_action_types")),
            allowed_tools: first_string_list(policy, &["allowed_tools", "tool_allowlist"]),
            denied_tools: first_string_list(policy, &["denied_tools", "tool_denylist"]),
            allowed_jurisdictions: first_string_list(
                policy,
                &["allowed_jurisdictions", "jurisdiction_allowlist"],
            ),
            counterparty: normalize_counterparty(policy),
            amount_caps: normalize_amount_caps(policy.get("amount_caps")),
            approval_thresholds: normalize_approval_thresholds(policy.get("approval_thresholds")),
        }
    }
}

/// Budget constraints read from the manifest `constraints` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BudgetConstraints {
    /// Daily action cap; the configured gateway default applies when absent.
    pub max_actions_per_day: Option<u64>,
    /// Percentage of the cap at which evaluations escalate.
    pub budget_escalate_at_percent: u64,
}

impl BudgetConstraints {
    /// Default escalation threshold as a percentage of the daily cap.
    pub const DEFAULT_ESCALATE_AT_PERCENT: u64 = 90;

    /// Reads budget constraints from a manifest body.
    #[must_use]
    pub fn from_manifest(manifest: &Value) -> Self {
        let constraints = manifest.get("constraints").and_then(Value::as_object);
        Self {
            max_actions_per_day: constraints
                .and_then(|section| section.get("max_actions_per_day"))
                .and_then(Value::as_u64),
            budget_escalate_at_percent: constraints
                .and_then(|section| section.get("budget_escalate_at_percent"))
                .and_then(Value::as_u64)
                .unwrap_or(Self::DEFAULT_ESCALATE_AT_PERCENT),
        }
    }
}

// ============================================================================
// SECTION: Normalization Helpers
// ============================================================================

/// Reads the first present key as a string list.
fn first_string_list(policy: &Map<String, Value>, keys: &[&str]) -> Vec<String> {
    for key in keys {
        if let Some(value) = policy.get(*key) {
            return string_list(Some(value));
        }
    }
    Vec::new()
}

/// Converts a JSON array of strings into a vector, dropping non-strings.
fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items.iter().filter_map(Value::as_str).map(str::to_string).collect::<Vec<String>>()
        })
        .unwrap_or_default()
}

/// Folds nested and flat counterparty rules into one structure.
fn normalize_counterparty(policy: &Map<String, Value>) -> CounterpartyRules {
    if let Some(rules) = policy.get("counterparty").and_then(Value::as_object) {
        return CounterpartyRules {
            allowlist: string_list(rules.get("allowlist")),
            denylist: string_list(rules.get("denylist")),
        };
    }
    CounterpartyRules {
        allowlist: string_list(policy.get("counterparty_allowlist")),
        denylist: string_list(policy.get("counterparty_denylist")),
    }
}

/// Normalizes amount caps, expanding the legacy flat per-currency map.
///
/// The legacy shape `{"USD": 1000, "EUR": 500}` becomes a structured cap with
/// `max_amount = min(values)` as the conservative fallback when no currency
/// can be extracted from the request.
fn normalize_amount_caps(value: Option<&Value>) -> Option<AmountCaps> {
    let caps = value.and_then(Value::as_object)?;
    if caps.is_empty() {
        return None;
    }

    let structured = STRUCTURED_AMOUNT_CAP_KEYS.iter().any(|key| caps.contains_key(*key));
    if structured {
        return Some(AmountCaps {
            max_amount: caps.get("max_amount").and_then(Value::as_f64),
            escalate_above: caps.get("escalate_above").and_then(Value::as_f64),
            param_paths: amount_param_paths(caps.get("param_paths")),
            currency_field: caps
                .get("currency_field")
                .and_then(Value::as_str)
                .unwrap_or(DEFAULT_CURRENCY_FIELD)
                .to_string(),
            per_currency: per_currency_map(caps.get("per_currency")),
        });
    }

    // Legacy flat shape: every value is a per-currency cap.
    let mut per_currency = BTreeMap::new();
    for (currency, cap) in caps {
        if let Some(cap) = cap.as_f64() {
            per_currency.insert(currency.clone(), cap);
        }
    }
    if per_currency.is_empty() {
        return None;
    }
    let min_value = per_currency.values().copied().fold(f64::INFINITY, f64::min);
    Some(AmountCaps {
        max_amount: Some(min_value),
        escalate_above: None,
        param_paths: DEFAULT_AMOUNT_PARAM_PATHS.iter().map(ToString::to_string).collect(),
        currency_field: DEFAULT_CURRENCY_FIELD.to_string(),
        per_currency,
    })
}

/// Reads configured amount paths, falling back to the defaults.
fn amount_param_paths(value: Option<&Value>) -> Vec<String> {
    let paths = string_list(value);
    if paths.is_empty() {
        DEFAULT_AMOUNT_PARAM_PATHS.iter().map(ToString::to_string).collect()
    } else {
        paths
    }
}

/// Reads a per-currency cap map.
fn per_currency_map(value: Option<&Value>) -> BTreeMap<String, f64> {
    let mut map = BTreeMap::new();
    if let Some(entries) = value.and_then(Value::as_object) {
        for (currency, cap) in entries {
            if let Some(cap) = cap.as_f64() {
                map.insert(currency.clone(), cap);
            }
        }
    }
    map
}

/// Reads approval thresholds.
fn normalize_approval_thresholds(value: Option<&Value>) -> Option<ApprovalThresholds> {
    let thresholds = value.and_then(Value::as_object)?;
    if thresholds.is_empty() {
        return None;
    }
    Some(ApprovalThresholds {
        action_types: string_list(thresholds.get("action_types")),
        tools: string_list(thresholds.get("tools")),
        amount: thresholds.get("amount").and_then(Value::as_f64),
        currency: thresholds.get("currency").and_then(Value::as_str).map(str::to_string),
    })
}

// ============================================================================
// SECTION: Parameter Traversal
// ============================================================================

/// Resolves a dot path against untyped action parameters.
#[must_use]
pub fn nested_value<'a>(params: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = params;
    for key in path.split('.') {
        current = current.as_object()?.get(key)?;
    }
    Some(current)
}

/// Extracts the first numeric amount found at the given dot paths.
///
/// Numeric strings are accepted the way legacy manifests supplied them.
#[must_use]
pub fn extract_amount(params: &Value, paths: &[String]) -> Option<f64> {
    for path in paths {
        if let Some(value) = nested_value(params, path) {
            if let Some(amount) = value.as_f64() {
                return Some(amount);
            }
            if let Some(amount) = value.as_str().and_then(|text| text.parse::<f64>().ok()) {
                return Some(amount);
            }
        }
    }
    None
}

/// Extracts the currency string at the configured field.
#[must_use]
pub fn extract_currency<'a>(params: &'a Value, currency_field: &str) -> Option<&'a str> {
    nested_value(params, currency_field).and_then(Value::as_str)
}
