// crates/uapk-gateway-core/src/interfaces/mod.rs
// ============================================================================
// Module: UAPK Gateway Interfaces
// Description: Backend-agnostic interfaces for storage, tokens, and connectors.
// Purpose: Define the contract surfaces used by the gateway runtime.
// Dependencies: crate::core
// ============================================================================

//! ## Overview
//! Interfaces define how the gateway integrates with persistence, token
//! cryptography, secrets, and outbound connectors without embedding
//! backend-specific details. Implementations must be deterministic and fail
//! closed on missing or invalid data.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;

use crate::core::Approval;
use crate::core::ApprovalId;
use crate::core::ApprovalStatus;
use crate::core::CapabilityTokenClaims;
use crate::core::DayStamp;
use crate::core::InteractionId;
use crate::core::InteractionRecord;
use crate::core::IssuerId;
use crate::core::ManifestId;
use crate::core::ManifestRecord;
use crate::core::TenantId;
use crate::core::Timestamp;
use crate::core::hashing::hash_canonical_json;

// ============================================================================
// SECTION: Store Errors
// ============================================================================

/// Persistent store errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Store I/O error.
    #[error("store io error: {0}")]
    Io(String),
    /// Conditional write lost a race (unique constraint, moved chain tail).
    #[error("store conflict: {0}")]
    Conflict(String),
    /// Store data is invalid or fails integrity checks.
    #[error("store invalid data: {0}")]
    Invalid(String),
    /// Store is unavailable.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

// ============================================================================
// SECTION: Manifest Store
// ============================================================================

/// Read access to stored manifests.
pub trait ManifestStore: Send + Sync {
    /// Returns the newest `active` manifest for `(tenant, manifest_id)`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the lookup fails.
    fn get_active(
        &self,
        tenant: &TenantId,
        manifest_id: &ManifestId,
    ) -> Result<Option<ManifestRecord>, StoreError>;
}

// ============================================================================
// SECTION: Issuer Store
// ============================================================================

/// Lifecycle state of a registered issuer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssuerStatus {
    /// Issuer keys are trusted.
    Active,
    /// Issuer keys are no longer trusted.
    Revoked,
}

impl IssuerStatus {
    /// Returns the stable wire label for this status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Revoked => "revoked",
        }
    }
}

/// One registered capability-token issuer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssuerRecord {
    /// Owning tenant.
    pub tenant: TenantId,
    /// Issuer identifier referenced by token `iss` claims.
    pub issuer_id: IssuerId,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Base64-encoded Ed25519 public key.
    pub public_key: String,
    /// Lifecycle state.
    pub status: IssuerStatus,
    /// Registration time.
    pub created_at: Timestamp,
}

/// Per-tenant issuer registry.
pub trait IssuerStore: Send + Sync {
    /// Registers an issuer; refuses duplicates.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when the `(tenant, issuer_id)` pair
    /// already exists, or another [`StoreError`] on failure.
    fn register(&self, issuer: IssuerRecord) -> Result<(), StoreError>;

    /// Returns an issuer row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the lookup fails.
    fn get(
        &self,
        tenant: &TenantId,
        issuer_id: &IssuerId,
    ) -> Result<Option<IssuerRecord>, StoreError>;

    /// Updates an issuer's lifecycle state.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the update fails.
    fn set_status(
        &self,
        tenant: &TenantId,
        issuer_id: &IssuerId,
        status: IssuerStatus,
    ) -> Result<bool, StoreError>;

    /// Returns `issuer_id → base64 public key` for all active issuers.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the listing fails.
    fn active_keys(&self, tenant: &TenantId) -> Result<BTreeMap<String, String>, StoreError>;
}

// ============================================================================
// SECTION: Approval Store
// ============================================================================

/// Persistent approvals with one-shot consumption.
pub trait ApprovalStore: Send + Sync {
    /// Persists a new approval.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the insert fails.
    fn create(&self, approval: Approval) -> Result<(), StoreError>;

    /// Returns an approval row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the lookup fails.
    fn get(
        &self,
        tenant: &TenantId,
        approval_id: &ApprovalId,
    ) -> Result<Option<Approval>, StoreError>;

    /// Transitions a pending approval to `Approved` or `Denied`.
    ///
    /// Returns false when the row is missing or no longer pending.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the update fails.
    fn decide(
        &self,
        tenant: &TenantId,
        approval_id: &ApprovalId,
        status: ApprovalStatus,
        approver: &str,
        at: Timestamp,
    ) -> Result<bool, StoreError>;

    /// Atomically consumes an approved row.
    ///
    /// The update must require `consumed_at` to still be unset; exactly one
    /// concurrent caller observes `true`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the update fails.
    fn consume(
        &self,
        tenant: &TenantId,
        approval_id: &ApprovalId,
        interaction_id: &InteractionId,
        at: Timestamp,
    ) -> Result<bool, StoreError>;
}

// ============================================================================
// SECTION: Counter Store
// ============================================================================

/// Per-tenant-per-day action counters.
pub trait CounterStore: Send + Sync {
    /// Returns today's count without creating a row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn count(
        &self,
        tenant: &TenantId,
        manifest_id: &ManifestId,
        day: DayStamp,
    ) -> Result<u64, StoreError>;

    /// Upserts the row for `day` and increments it, returning the new count.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the upsert fails.
    fn increment(
        &self,
        tenant: &TenantId,
        manifest_id: &ManifestId,
        day: DayStamp,
    ) -> Result<u64, StoreError>;

    /// Atomically increments only while `count < cap`.
    ///
    /// Returns the new count, or `None` when the cap was reached. The
    /// implementation must perform the conditional increment in a single
    /// atomic operation so concurrent reservations never exceed the cap.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the upsert fails.
    fn reserve(
        &self,
        tenant: &TenantId,
        manifest_id: &ManifestId,
        day: DayStamp,
        cap: u64,
    ) -> Result<Option<u64>, StoreError>;
}

// ============================================================================
// SECTION: Record Store
// ============================================================================

/// Bounded retries for the default chain-append implementation.
const CHAIN_APPEND_RETRIES: u32 = 8;

/// Builds a record against the chain tail observed by the store.
pub type RecordBuilder<'a> =
    dyn FnMut(Option<String>) -> Result<InteractionRecord, StoreError> + 'a;

/// Append-only interaction record chains.
pub trait RecordStore: Send + Sync {
    /// Returns the newest record hash for `(tenant, manifest_id)`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn latest_hash(
        &self,
        tenant: &TenantId,
        manifest_id: &ManifestId,
    ) -> Result<Option<String>, StoreError>;

    /// Appends a record to its chain.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when the chain tail moved since the
    /// caller read it (the caller rebuilds and retries), or another
    /// [`StoreError`] on failure.
    fn append(&self, record: &InteractionRecord) -> Result<(), StoreError>;

    /// Builds and appends a record linearized against the chain tail.
    ///
    /// Implementations should read the tail and insert the built record
    /// inside one critical section or transaction. The default falls back to
    /// optimistic retries over [`RecordStore::latest_hash`] and
    /// [`RecordStore::append`].
    ///
    /// # Errors
    ///
    /// Returns the builder's error, or [`StoreError`] when persistence fails
    /// or the bounded retries are exhausted.
    fn append_chained(
        &self,
        tenant: &TenantId,
        manifest_id: &ManifestId,
        build: &mut RecordBuilder<'_>,
    ) -> Result<InteractionRecord, StoreError> {
        for _ in 0..CHAIN_APPEND_RETRIES {
            let tail = self.latest_hash(tenant, manifest_id)?;
            let record = build(tail)?;
            match self.append(&record) {
                Ok(()) => return Ok(record),
                Err(StoreError::Conflict(_)) => {}
                Err(err) => return Err(err),
            }
        }
        Err(StoreError::Conflict("chain append retries exhausted".to_string()))
    }

    /// Returns the ordered chain for `(tenant, manifest_id)`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn list(
        &self,
        tenant: &TenantId,
        manifest_id: &ManifestId,
    ) -> Result<Vec<InteractionRecord>, StoreError>;
}

// ============================================================================
// SECTION: Secret Resolver
// ============================================================================

/// Host-provided secret values referenced by connector configs.
pub trait SecretResolver: Send + Sync {
    /// Resolves a named secret for a tenant.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when resolution fails; a missing secret is
    /// `Ok(None)` and the referencing header is simply not injected.
    fn resolve(&self, tenant: &TenantId, name: &str) -> Result<Option<String>, StoreError>;
}

// ============================================================================
// SECTION: Token Verification
// ============================================================================

/// Token verification errors surfaced as reason messages.
///
/// # Invariants
/// - Variants are stable for programmatic handling; messages are safe to
///   embed in decision reasons.
#[derive(Debug, Error)]
pub enum TokenError {
    /// Token structure or encoding is invalid.
    #[error("{0}")]
    Malformed(String),
    /// No verifying key is known for the issuer.
    #[error("Unknown issuer: {0}")]
    UnknownIssuer(String),
    /// Signature does not verify.
    #[error("Invalid signature")]
    Signature,
    /// Token expiry has passed.
    #[error("Token expired")]
    Expired,
}

/// Cryptographic verification of compact capability tokens.
///
/// Implementations verify structure, signature, and expiry only; identity
/// bindings and semantic checks belong to the policy engine.
pub trait TokenVerifier: Send + Sync {
    /// Verifies a compact token and returns its claims.
    ///
    /// `issuer_keys` maps issuer identifiers to base64 Ed25519 public keys;
    /// the gateway's own key is used for `iss = "gateway"`.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError`] when verification fails.
    fn verify(
        &self,
        token: &str,
        issuer_keys: &BTreeMap<String, String>,
    ) -> Result<CapabilityTokenClaims, TokenError>;
}

// ============================================================================
// SECTION: Record Signing
// ============================================================================

/// Gateway-side signing of record hashes.
pub trait RecordSigner: Send + Sync {
    /// Signs a message and returns the base64 signature.
    fn sign_base64(&self, message: &[u8]) -> String;

    /// Returns the base64 public key for export bundles.
    fn public_key_base64(&self) -> String;
}

/// Signature verification for audit chains.
pub trait SignatureVerifier: Send + Sync {
    /// Verifies a base64 signature over a message.
    fn verify_base64(&self, message: &[u8], signature: &str) -> bool;
}

// ============================================================================
// SECTION: Clock
// ============================================================================

/// Injected time source; the core never reads wall-clock time directly.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> Timestamp;
}

// ============================================================================
// SECTION: Connector Contract
// ============================================================================

/// Stable connector error codes shared with the orchestrator.
pub mod connector_codes {
    /// URL host failed the domain allowlist.
    pub const DOMAIN_NOT_ALLOWED: &str = "DOMAIN_NOT_ALLOWED";
    /// URL failed SSRF validation (scheme, host, blocked IP range).
    pub const SSRF_BLOCKED: &str = "SSRF_BLOCKED";
    /// DNS answer changed between validation and request.
    pub const SSRF_DNS_DRIFT: &str = "SSRF_DNS_DRIFT";
    /// Request exceeded its timeout.
    pub const TIMEOUT: &str = "TIMEOUT";
    /// Request failed below the HTTP layer.
    pub const REQUEST_ERROR: &str = "REQUEST_ERROR";
    /// Response exceeded the configured size cap.
    pub const RESPONSE_TOO_LARGE: &str = "RESPONSE_TOO_LARGE";
    /// Unclassified connector failure.
    pub const UNKNOWN_ERROR: &str = "UNKNOWN_ERROR";
    /// Tool has no registry entry and no default connector exists.
    pub const TOOL_NOT_CONFIGURED: &str = "TOOL_NOT_CONFIGURED";
    /// Registry entry names an unknown connector type.
    pub const INVALID_CONNECTOR_TYPE: &str = "INVALID_CONNECTOR_TYPE";
    /// No manifest was available to resolve the tool.
    pub const NO_MANIFEST: &str = "NO_MANIFEST";
}

/// Structured connector error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorError {
    /// Stable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

/// Result envelope returned by every connector invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorResult {
    /// Whether the tool call succeeded.
    pub success: bool,
    /// Response payload on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Structured error on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ConnectorError>,
    /// Upstream HTTP status when a response was received.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// Wall time spent executing.
    pub duration_ms: u64,
    /// Canonical hash of the success envelope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_hash: Option<String>,
}

impl ConnectorResult {
    /// Builds a success result and computes its envelope hash.
    #[must_use]
    pub fn succeeded(data: Value, status_code: Option<u16>, duration_ms: u64) -> Self {
        let envelope = json!({
            "success": true,
            "data": &data,
            "status_code": status_code,
        });
        Self {
            success: true,
            data: Some(data),
            error: None,
            status_code,
            duration_ms,
            result_hash: Some(hash_canonical_json(&envelope)),
        }
    }

    /// Builds a failure result with a stable code.
    #[must_use]
    pub fn failed(code: &str, message: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ConnectorError {
                code: code.to_string(),
                message: message.into(),
            }),
            status_code: None,
            duration_ms,
            result_hash: None,
        }
    }

    /// Attaches the upstream status code to a failure result.
    #[must_use]
    pub const fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }
}

/// Parsed connector configuration from a manifest tools-registry entry.
///
/// # Invariants
/// - Both the canonical `{type, config}` shape and the legacy flat shape are
///   accepted; `http` is an alias of `http_request`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectorConfig {
    /// Connector type label.
    pub connector_type: String,
    /// Target URL, possibly templated with `{param}` placeholders.
    pub url: Option<String>,
    /// HTTP method.
    pub method: String,
    /// Static request headers.
    pub headers: BTreeMap<String, String>,
    /// Request timeout override in seconds.
    pub timeout_seconds: Option<u64>,
    /// Header-name to secret-name references.
    pub secret_refs: BTreeMap<String, String>,
    /// Connector-specific extras (`allowed_domains`, `max_response_bytes`, …).
    pub extra: Map<String, Value>,
}

impl ConnectorConfig {
    /// Parses a tools-registry entry, tolerating legacy shapes.
    #[must_use]
    pub fn from_tool_entry(entry: &Value) -> Self {
        let empty = Map::new();
        let outer = entry.as_object().unwrap_or(&empty);
        let connector_type = outer
            .get("type")
            .or_else(|| outer.get("connector_type"))
            .and_then(Value::as_str)
            .unwrap_or("mock");
        let config = outer.get("config").and_then(Value::as_object).unwrap_or(outer);

        Self {
            connector_type: connector_type.to_string(),
            url: config.get("url").and_then(Value::as_str).map(str::to_string),
            method: config
                .get("method")
                .and_then(Value::as_str)
                .unwrap_or("POST")
                .to_ascii_uppercase(),
            headers: string_map(config.get("headers")),
            timeout_seconds: config.get("timeout_seconds").and_then(Value::as_u64),
            secret_refs: string_map(config.get("secret_refs")),
            extra: config.get("extra").and_then(Value::as_object).cloned().unwrap_or_default(),
        }
    }
}

/// Reads a JSON object of strings into an ordered map.
fn string_map(value: Option<&Value>) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    if let Some(entries) = value.and_then(Value::as_object) {
        for (key, entry) in entries {
            if let Some(text) = entry.as_str() {
                map.insert(key.clone(), text.to_string());
            }
        }
    }
    map
}

/// Gateway-level connector defaults applied when configs omit them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorDefaults {
    /// Default request timeout in seconds.
    pub timeout_seconds: u64,
    /// Default maximum response size in bytes.
    pub max_response_bytes: usize,
    /// Global outbound domain allowlist.
    pub allowed_domains: Vec<String>,
}

/// One executable tool connector.
pub trait ToolConnector: Send + Sync {
    /// Executes the tool with the action parameters.
    fn execute(&self, params: &Value) -> ConnectorResult;
}

/// Builds connectors from parsed configuration.
pub trait ConnectorFactory: Send + Sync {
    /// Builds a connector, or `None` for an unknown connector type.
    fn build(
        &self,
        config: &ConnectorConfig,
        secrets: &BTreeMap<String, String>,
        defaults: &ConnectorDefaults,
    ) -> Option<Box<dyn ToolConnector>>;
}
