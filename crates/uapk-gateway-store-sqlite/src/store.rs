// crates/uapk-gateway-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Gateway Store
// Description: Durable store implementing every gateway storage interface.
// Purpose: Persist gateway state with conditional updates for linearized ops.
// Dependencies: uapk-gateway-core, rusqlite, serde_json, base64
// ============================================================================

//! ## Overview
//! This module implements [`ManifestStore`], [`IssuerStore`],
//! [`ApprovalStore`], [`CounterStore`], and [`RecordStore`] over one SQLite
//! database in WAL mode. Conditional writes return row counts or `RETURNING`
//! rows so every linearization decision happens inside SQLite in a single
//! round trip.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use rusqlite::Connection;
use rusqlite::ErrorCode;
use rusqlite::OptionalExtension;
use rusqlite::Row;
use rusqlite::params;
use serde::Deserialize;
use thiserror::Error;
use uapk_gateway_core::Approval;
use uapk_gateway_core::ApprovalId;
use uapk_gateway_core::ApprovalStatus;
use uapk_gateway_core::ApprovalStore;
use uapk_gateway_core::CounterStore;
use uapk_gateway_core::DayStamp;
use uapk_gateway_core::Decision;
use uapk_gateway_core::InteractionId;
use uapk_gateway_core::InteractionRecord;
use uapk_gateway_core::IssuerId;
use uapk_gateway_core::IssuerRecord;
use uapk_gateway_core::IssuerStatus;
use uapk_gateway_core::IssuerStore;
use uapk_gateway_core::ManifestId;
use uapk_gateway_core::ManifestRecord;
use uapk_gateway_core::ManifestStatus;
use uapk_gateway_core::ManifestStore;
use uapk_gateway_core::RecordStore;
use uapk_gateway_core::StoreError;
use uapk_gateway_core::TenantId;
use uapk_gateway_core::Timestamp;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// SQLite schema version for the store.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

// ============================================================================
// SECTION: Config
// ============================================================================

/// SQLite journal mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteStoreMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode (legacy).
    Delete,
}

impl SqliteStoreMode {
    /// Returns the SQLite pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// SQLite sync mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode (balanced).
    Normal,
}

impl SqliteSyncMode {
    /// Returns the SQLite pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for the SQLite gateway store.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteStoreConfig {
    /// Path to the SQLite database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// SQLite journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// SQLite sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

impl SqliteStoreConfig {
    /// Creates a config with defaults for the given database path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: SqliteStoreMode::default(),
            sync_mode: SqliteSyncMode::default(),
        }
    }
}

/// Returns the default busy timeout for SQLite connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// SQLite store errors.
#[derive(Debug, Error)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// SQLite engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Conditional write lost a race or a unique constraint fired.
    #[error("sqlite store conflict: {0}")]
    Conflict(String),
    /// Stored data failed validation.
    #[error("sqlite store invalid data: {0}")]
    Invalid(String),
}

impl From<SqliteStoreError> for StoreError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Io(message) | SqliteStoreError::Db(message) => Self::Io(message),
            SqliteStoreError::Conflict(message) => Self::Conflict(message),
            SqliteStoreError::Invalid(message) => Self::Invalid(message),
        }
    }
}

impl From<rusqlite::Error> for SqliteStoreError {
    fn from(error: rusqlite::Error) -> Self {
        match &error {
            rusqlite::Error::SqliteFailure(failure, _)
                if failure.code == ErrorCode::ConstraintViolation =>
            {
                Self::Conflict(error.to_string())
            }
            _ => Self::Db(error.to_string()),
        }
    }
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// SQLite-backed gateway store with WAL support.
#[derive(Clone)]
pub struct SqliteGatewayStore {
    /// Shared SQLite connection guarded by a mutex.
    connection: Arc<Mutex<Connection>>,
}

impl SqliteGatewayStore {
    /// Opens an SQLite-backed gateway store.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the database cannot be opened or
    /// initialized.
    pub fn open(config: &SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        ensure_parent_dir(&config.path)?;
        let connection = Connection::open(&config.path)?;
        apply_pragmas(&connection, config)?;
        initialize_schema(&connection)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Opens an in-memory store (tests).
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when initialization fails.
    pub fn open_in_memory() -> Result<Self, SqliteStoreError> {
        let connection = Connection::open_in_memory()?;
        initialize_schema(&connection)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Locks the shared connection.
    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.connection
            .lock()
            .map_err(|_| StoreError::Unavailable("sqlite connection mutex poisoned".to_string()))
    }

    /// Inserts a manifest row (operator upload path and tests).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the insert fails.
    pub fn insert_manifest(&self, record: &ManifestRecord) -> Result<(), StoreError> {
        let connection = self.lock()?;
        let manifest_json = record.manifest.to_string();
        connection
            .execute(
                "INSERT INTO manifests (
                    tenant, manifest_id, status, manifest_json,
                    created_at, created_at_unix
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.tenant.as_str(),
                    record.manifest_id.as_str(),
                    record.status.as_str(),
                    manifest_json,
                    timestamp_text(record.created_at)?,
                    record.created_at.unix_seconds(),
                ],
            )
            .map_err(SqliteStoreError::from)?;
        Ok(())
    }

    /// Updates the status of every manifest row for `(tenant, manifest_id)`.
    ///
    /// Activation flows use this to retire older rows before inserting the
    /// replacement.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the update fails.
    pub fn set_manifest_status(
        &self,
        tenant: &TenantId,
        manifest_id: &ManifestId,
        status: ManifestStatus,
    ) -> Result<usize, StoreError> {
        let connection = self.lock()?;
        let updated = connection
            .execute(
                "UPDATE manifests SET status = ?3 WHERE tenant = ?1 AND manifest_id = ?2",
                params![tenant.as_str(), manifest_id.as_str(), status.as_str()],
            )
            .map_err(SqliteStoreError::from)?;
        Ok(updated)
    }
}

// ============================================================================
// SECTION: Schema
// ============================================================================

/// Applies SQLite pragmas required for durability.
fn apply_pragmas(
    connection: &Connection,
    config: &SqliteStoreConfig,
) -> Result<(), SqliteStoreError> {
    connection
        .execute_batch(&format!("PRAGMA journal_mode = {};", config.journal_mode.pragma_value()))?;
    connection
        .execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))?;
    connection.busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))?;
    Ok(())
}

/// Creates tables and indexes; validates the schema version.
fn initialize_schema(connection: &Connection) -> Result<(), SqliteStoreError> {
    let version: i64 =
        connection.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version > SCHEMA_VERSION {
        return Err(SqliteStoreError::Invalid(format!(
            "unsupported schema version {version} (supported {SCHEMA_VERSION})"
        )));
    }

    connection.execute_batch(
        "CREATE TABLE IF NOT EXISTS manifests (
            id INTEGER PRIMARY KEY,
            tenant TEXT NOT NULL,
            manifest_id TEXT NOT NULL,
            status TEXT NOT NULL,
            manifest_json TEXT NOT NULL,
            created_at TEXT NOT NULL,
            created_at_unix INTEGER NOT NULL
         );
         CREATE INDEX IF NOT EXISTS idx_manifests_selection
            ON manifests (tenant, manifest_id, status, created_at_unix);

         CREATE TABLE IF NOT EXISTS issuers (
            tenant TEXT NOT NULL,
            issuer_id TEXT NOT NULL,
            name TEXT,
            public_key TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE (tenant, issuer_id)
         );

         CREATE TABLE IF NOT EXISTS approvals (
            tenant TEXT NOT NULL,
            approval_id TEXT NOT NULL,
            interaction_id TEXT NOT NULL,
            manifest_id TEXT NOT NULL,
            agent_id TEXT NOT NULL,
            action_json TEXT NOT NULL,
            counterparty_json TEXT,
            context_json TEXT,
            reason_codes_json TEXT NOT NULL,
            status TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            consumed_at TEXT,
            consumed_interaction_id TEXT,
            approver TEXT,
            approved_at TEXT,
            created_at TEXT NOT NULL,
            UNIQUE (tenant, approval_id)
         );

         CREATE TABLE IF NOT EXISTS interaction_records (
            id INTEGER PRIMARY KEY,
            record_id TEXT NOT NULL,
            tenant TEXT NOT NULL,
            manifest_id TEXT NOT NULL,
            agent_id TEXT NOT NULL,
            action_type TEXT NOT NULL,
            tool TEXT NOT NULL,
            request_json TEXT NOT NULL,
            request_hash TEXT NOT NULL,
            decision TEXT NOT NULL,
            decision_reason TEXT,
            reasons_json TEXT NOT NULL,
            policy_trace_json TEXT NOT NULL,
            risk_snapshot_json TEXT,
            result_json TEXT,
            result_hash TEXT,
            duration_ms INTEGER,
            previous_record_hash TEXT,
            record_hash TEXT NOT NULL,
            gateway_signature TEXT NOT NULL,
            created_at TEXT NOT NULL
         );
         CREATE INDEX IF NOT EXISTS idx_records_chain
            ON interaction_records (tenant, manifest_id, id);
         CREATE UNIQUE INDEX IF NOT EXISTS idx_records_chain_tail
            ON interaction_records (tenant, manifest_id, COALESCE(previous_record_hash, ''));

         CREATE TABLE IF NOT EXISTS action_counters (
            tenant TEXT NOT NULL,
            manifest_id TEXT NOT NULL,
            day TEXT NOT NULL,
            count INTEGER NOT NULL,
            UNIQUE (tenant, manifest_id, day)
         );",
    )?;

    connection.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}

/// Creates the parent directory for the database file.
fn ensure_parent_dir(path: &Path) -> Result<(), SqliteStoreError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))?;
    }
    Ok(())
}

// ============================================================================
// SECTION: Manifest Store
// ============================================================================

impl ManifestStore for SqliteGatewayStore {
    fn get_active(
        &self,
        tenant: &TenantId,
        manifest_id: &ManifestId,
    ) -> Result<Option<ManifestRecord>, StoreError> {
        let connection = self.lock()?;
        let row = connection
            .query_row(
                "SELECT status, manifest_json, created_at FROM manifests
                 WHERE tenant = ?1 AND manifest_id = ?2 AND status = 'active'
                 ORDER BY created_at_unix DESC, id DESC LIMIT 1",
                params![tenant.as_str(), manifest_id.as_str()],
                |row| {
                    let status: String = row.get(0)?;
                    let manifest_json: String = row.get(1)?;
                    let created_at: String = row.get(2)?;
                    Ok((status, manifest_json, created_at))
                },
            )
            .optional()
            .map_err(SqliteStoreError::from)?;

        let Some((status, manifest_json, created_at)) = row else {
            return Ok(None);
        };
        Ok(Some(ManifestRecord {
            tenant: tenant.clone(),
            manifest_id: manifest_id.clone(),
            status: parse_manifest_status(&status)?,
            manifest: parse_json(&manifest_json)?,
            created_at: parse_timestamp(&created_at)?,
        }))
    }
}

// ============================================================================
// SECTION: Issuer Store
// ============================================================================

impl IssuerStore for SqliteGatewayStore {
    fn register(&self, issuer: IssuerRecord) -> Result<(), StoreError> {
        validate_public_key(&issuer.public_key)?;
        let connection = self.lock()?;
        let result = connection.execute(
            "INSERT INTO issuers (tenant, issuer_id, name, public_key, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                issuer.tenant.as_str(),
                issuer.issuer_id.as_str(),
                issuer.name.as_deref(),
                issuer.public_key,
                issuer.status.as_str(),
                timestamp_text(issuer.created_at)?,
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(failure, _))
                if failure.code == ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::Conflict(format!(
                    "issuer '{}' already registered",
                    issuer.issuer_id
                )))
            }
            Err(err) => Err(SqliteStoreError::from(err).into()),
        }
    }

    fn get(
        &self,
        tenant: &TenantId,
        issuer_id: &IssuerId,
    ) -> Result<Option<IssuerRecord>, StoreError> {
        let connection = self.lock()?;
        let row = connection
            .query_row(
                "SELECT name, public_key, status, created_at FROM issuers
                 WHERE tenant = ?1 AND issuer_id = ?2",
                params![tenant.as_str(), issuer_id.as_str()],
                |row| {
                    let name: Option<String> = row.get(0)?;
                    let public_key: String = row.get(1)?;
                    let status: String = row.get(2)?;
                    let created_at: String = row.get(3)?;
                    Ok((name, public_key, status, created_at))
                },
            )
            .optional()
            .map_err(SqliteStoreError::from)?;

        let Some((name, public_key, status, created_at)) = row else {
            return Ok(None);
        };
        Ok(Some(IssuerRecord {
            tenant: tenant.clone(),
            issuer_id: issuer_id.clone(),
            name,
            public_key,
            status: parse_issuer_status(&status)?,
            created_at: parse_timestamp(&created_at)?,
        }))
    }

    fn set_status(
        &self,
        tenant: &TenantId,
        issuer_id: &IssuerId,
        status: IssuerStatus,
    ) -> Result<bool, StoreError> {
        let connection = self.lock()?;
        let updated = connection
            .execute(
                "UPDATE issuers SET status = ?3 WHERE tenant = ?1 AND issuer_id = ?2",
                params![tenant.as_str(), issuer_id.as_str(), status.as_str()],
            )
            .map_err(SqliteStoreError::from)?;
        Ok(updated > 0)
    }

    fn active_keys(&self, tenant: &TenantId) -> Result<BTreeMap<String, String>, StoreError> {
        let connection = self.lock()?;
        let mut statement = connection
            .prepare(
                "SELECT issuer_id, public_key FROM issuers
                 WHERE tenant = ?1 AND status = 'active'",
            )
            .map_err(SqliteStoreError::from)?;
        let rows = statement
            .query_map(params![tenant.as_str()], |row| {
                let issuer_id: String = row.get(0)?;
                let public_key: String = row.get(1)?;
                Ok((issuer_id, public_key))
            })
            .map_err(SqliteStoreError::from)?;

        let mut keys = BTreeMap::new();
        for row in rows {
            let (issuer_id, public_key) = row.map_err(SqliteStoreError::from)?;
            keys.insert(issuer_id, public_key);
        }
        Ok(keys)
    }
}

/// Validates a base64-encoded 32-byte Ed25519 public key.
fn validate_public_key(encoded: &str) -> Result<(), StoreError> {
    let decoded = BASE64_STANDARD
        .decode(encoded.trim())
        .map_err(|_| StoreError::Invalid("invalid public key format".to_string()))?;
    if decoded.len() != 32 {
        return Err(StoreError::Invalid("invalid public key format".to_string()));
    }
    Ok(())
}

// ============================================================================
// SECTION: Approval Store
// ============================================================================

impl ApprovalStore for SqliteGatewayStore {
    fn create(&self, approval: Approval) -> Result<(), StoreError> {
        let connection = self.lock()?;
        let action_json = to_json_text(&approval.action)?;
        let counterparty_json = approval
            .counterparty
            .as_ref()
            .map(to_json_text)
            .transpose()?;
        let context_json = approval.context.as_ref().map(|value| value.to_string());
        let reason_codes_json = to_json_text(&approval.reason_codes)?;

        connection
            .execute(
                "INSERT INTO approvals (
                    tenant, approval_id, interaction_id, manifest_id, agent_id,
                    action_json, counterparty_json, context_json, reason_codes_json,
                    status, expires_at, consumed_at, consumed_interaction_id,
                    approver, approved_at, created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                params![
                    approval.tenant.as_str(),
                    approval.approval_id.as_str(),
                    approval.interaction_id.as_str(),
                    approval.manifest_id.as_str(),
                    approval.agent_id.as_str(),
                    action_json,
                    counterparty_json,
                    context_json,
                    reason_codes_json,
                    approval.status.as_str(),
                    timestamp_text(approval.expires_at)?,
                    approval.consumed_at.map(timestamp_text).transpose()?,
                    approval.consumed_interaction_id.as_ref().map(InteractionId::as_str),
                    approval.approver.as_deref(),
                    approval.approved_at.map(timestamp_text).transpose()?,
                    timestamp_text(approval.created_at)?,
                ],
            )
            .map_err(SqliteStoreError::from)?;
        Ok(())
    }

    fn get(
        &self,
        tenant: &TenantId,
        approval_id: &ApprovalId,
    ) -> Result<Option<Approval>, StoreError> {
        let connection = self.lock()?;
        connection
            .query_row(
                "SELECT interaction_id, manifest_id, agent_id, action_json,
                        counterparty_json, context_json, reason_codes_json, status,
                        expires_at, consumed_at, consumed_interaction_id, approver,
                        approved_at, created_at
                 FROM approvals WHERE tenant = ?1 AND approval_id = ?2",
                params![tenant.as_str(), approval_id.as_str()],
                |row| approval_row(row, tenant, approval_id),
            )
            .optional()
            .map_err(SqliteStoreError::from)?
            .map(|parsed| parsed.map_err(StoreError::from))
            .transpose()
    }

    fn decide(
        &self,
        tenant: &TenantId,
        approval_id: &ApprovalId,
        status: ApprovalStatus,
        approver: &str,
        at: Timestamp,
    ) -> Result<bool, StoreError> {
        let connection = self.lock()?;
        let updated = connection
            .execute(
                "UPDATE approvals SET status = ?3, approver = ?4, approved_at = ?5
                 WHERE tenant = ?1 AND approval_id = ?2 AND status = 'pending'",
                params![
                    tenant.as_str(),
                    approval_id.as_str(),
                    status.as_str(),
                    approver,
                    timestamp_text(at)?,
                ],
            )
            .map_err(SqliteStoreError::from)?;
        Ok(updated > 0)
    }

    fn consume(
        &self,
        tenant: &TenantId,
        approval_id: &ApprovalId,
        interaction_id: &InteractionId,
        at: Timestamp,
    ) -> Result<bool, StoreError> {
        let connection = self.lock()?;
        // One conditional update: exactly one concurrent caller can observe
        // an affected row.
        let updated = connection
            .execute(
                "UPDATE approvals SET consumed_at = ?3, consumed_interaction_id = ?4
                 WHERE tenant = ?1 AND approval_id = ?2
                   AND status = 'approved' AND consumed_at IS NULL",
                params![
                    tenant.as_str(),
                    approval_id.as_str(),
                    timestamp_text(at)?,
                    interaction_id.as_str(),
                ],
            )
            .map_err(SqliteStoreError::from)?;
        Ok(updated > 0)
    }
}

/// Maps an approval row into the typed record.
fn approval_row(
    row: &Row<'_>,
    tenant: &TenantId,
    approval_id: &ApprovalId,
) -> rusqlite::Result<Result<Approval, SqliteStoreError>> {
    let interaction_id: String = row.get(0)?;
    let manifest_id: String = row.get(1)?;
    let agent_id: String = row.get(2)?;
    let action_json: String = row.get(3)?;
    let counterparty_json: Option<String> = row.get(4)?;
    let context_json: Option<String> = row.get(5)?;
    let reason_codes_json: String = row.get(6)?;
    let status: String = row.get(7)?;
    let expires_at: String = row.get(8)?;
    let consumed_at: Option<String> = row.get(9)?;
    let consumed_interaction_id: Option<String> = row.get(10)?;
    let approver: Option<String> = row.get(11)?;
    let approved_at: Option<String> = row.get(12)?;
    let created_at: String = row.get(13)?;

    Ok(build_approval(ApprovalColumns {
        tenant: tenant.clone(),
        approval_id: approval_id.clone(),
        interaction_id,
        manifest_id,
        agent_id,
        action_json,
        counterparty_json,
        context_json,
        reason_codes_json,
        status,
        expires_at,
        consumed_at,
        consumed_interaction_id,
        approver,
        approved_at,
        created_at,
    }))
}

/// Raw approval columns before parsing.
struct ApprovalColumns {
    /// Owning tenant.
    tenant: TenantId,
    /// Approval identifier.
    approval_id: ApprovalId,
    /// Originating interaction.
    interaction_id: String,
    /// Manifest identifier.
    manifest_id: String,
    /// Agent identifier.
    agent_id: String,
    /// Frozen action JSON.
    action_json: String,
    /// Frozen counterparty JSON.
    counterparty_json: Option<String>,
    /// Caller context JSON.
    context_json: Option<String>,
    /// Escalation reason codes JSON.
    reason_codes_json: String,
    /// Status label.
    status: String,
    /// Expiry timestamp text.
    expires_at: String,
    /// Consumption timestamp text.
    consumed_at: Option<String>,
    /// Consuming interaction identifier.
    consumed_interaction_id: Option<String>,
    /// Deciding operator.
    approver: Option<String>,
    /// Decision timestamp text.
    approved_at: Option<String>,
    /// Creation timestamp text.
    created_at: String,
}

/// Parses raw approval columns into the typed record.
fn build_approval(columns: ApprovalColumns) -> Result<Approval, SqliteStoreError> {
    Ok(Approval {
        approval_id: columns.approval_id,
        tenant: columns.tenant,
        interaction_id: InteractionId::new(columns.interaction_id),
        manifest_id: ManifestId::new(columns.manifest_id),
        agent_id: columns.agent_id.into(),
        action: parse_json_as(&columns.action_json)?,
        counterparty: columns.counterparty_json.as_deref().map(parse_json_as).transpose()?,
        context: columns.context_json.as_deref().map(parse_json).transpose()?,
        reason_codes: parse_json_as(&columns.reason_codes_json)?,
        status: parse_approval_status(&columns.status)?,
        expires_at: parse_timestamp(&columns.expires_at)?,
        consumed_at: columns.consumed_at.as_deref().map(parse_timestamp).transpose()?,
        consumed_interaction_id: columns.consumed_interaction_id.map(InteractionId::new),
        approver: columns.approver,
        approved_at: columns.approved_at.as_deref().map(parse_timestamp).transpose()?,
        created_at: parse_timestamp(&columns.created_at)?,
    })
}

// ============================================================================
// SECTION: Counter Store
// ============================================================================

impl CounterStore for SqliteGatewayStore {
    fn count(
        &self,
        tenant: &TenantId,
        manifest_id: &ManifestId,
        day: DayStamp,
    ) -> Result<u64, StoreError> {
        let connection = self.lock()?;
        let count: Option<i64> = connection
            .query_row(
                "SELECT count FROM action_counters
                 WHERE tenant = ?1 AND manifest_id = ?2 AND day = ?3",
                params![tenant.as_str(), manifest_id.as_str(), day.as_iso_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(SqliteStoreError::from)?;
        Ok(count.map_or(0, |value| u64::try_from(value).unwrap_or(0)))
    }

    fn increment(
        &self,
        tenant: &TenantId,
        manifest_id: &ManifestId,
        day: DayStamp,
    ) -> Result<u64, StoreError> {
        let connection = self.lock()?;
        let count: i64 = connection
            .query_row(
                "INSERT INTO action_counters (tenant, manifest_id, day, count)
                 VALUES (?1, ?2, ?3, 1)
                 ON CONFLICT (tenant, manifest_id, day)
                 DO UPDATE SET count = count + 1
                 RETURNING count",
                params![tenant.as_str(), manifest_id.as_str(), day.as_iso_string()],
                |row| row.get(0),
            )
            .map_err(SqliteStoreError::from)?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    fn reserve(
        &self,
        tenant: &TenantId,
        manifest_id: &ManifestId,
        day: DayStamp,
        cap: u64,
    ) -> Result<Option<u64>, StoreError> {
        if cap == 0 {
            return Ok(None);
        }
        let connection = self.lock()?;
        // Single round trip: the conditional upsert only increments while the
        // current count is below the cap; zero returned rows means the cap
        // was reached.
        let cap = i64::try_from(cap).unwrap_or(i64::MAX);
        let count: Option<i64> = connection
            .query_row(
                "INSERT INTO action_counters (tenant, manifest_id, day, count)
                 VALUES (?1, ?2, ?3, 1)
                 ON CONFLICT (tenant, manifest_id, day)
                 DO UPDATE SET count = count + 1 WHERE action_counters.count < ?4
                 RETURNING count",
                params![tenant.as_str(), manifest_id.as_str(), day.as_iso_string(), cap],
                |row| row.get(0),
            )
            .optional()
            .map_err(SqliteStoreError::from)?;
        Ok(count.map(|value| u64::try_from(value).unwrap_or(0)))
    }
}

// ============================================================================
// SECTION: Record Store
// ============================================================================

impl RecordStore for SqliteGatewayStore {
    fn latest_hash(
        &self,
        tenant: &TenantId,
        manifest_id: &ManifestId,
    ) -> Result<Option<String>, StoreError> {
        let connection = self.lock()?;
        connection
            .query_row(
                "SELECT record_hash FROM interaction_records
                 WHERE tenant = ?1 AND manifest_id = ?2
                 ORDER BY id DESC LIMIT 1",
                params![tenant.as_str(), manifest_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| SqliteStoreError::from(err).into())
    }

    fn append(&self, record: &InteractionRecord) -> Result<(), StoreError> {
        let connection = self.lock()?;
        insert_record(&connection, record)
    }

    fn list(
        &self,
        tenant: &TenantId,
        manifest_id: &ManifestId,
    ) -> Result<Vec<InteractionRecord>, StoreError> {
        let connection = self.lock()?;
        let mut statement = connection
            .prepare(
                "SELECT record_id, agent_id, action_type, tool, request_json,
                        request_hash, decision, decision_reason, reasons_json,
                        policy_trace_json, risk_snapshot_json, result_json,
                        result_hash, duration_ms, previous_record_hash,
                        record_hash, gateway_signature, created_at
                 FROM interaction_records
                 WHERE tenant = ?1 AND manifest_id = ?2
                 ORDER BY id ASC",
            )
            .map_err(SqliteStoreError::from)?;

        let rows = statement
            .query_map(params![tenant.as_str(), manifest_id.as_str()], record_columns)
            .map_err(SqliteStoreError::from)?;

        let mut records = Vec::new();
        for row in rows {
            let columns = row.map_err(SqliteStoreError::from)?;
            records.push(build_record(tenant, manifest_id, columns)?);
        }
        Ok(records)
    }

    fn append_chained(
        &self,
        tenant: &TenantId,
        manifest_id: &ManifestId,
        build: &mut uapk_gateway_core::interfaces::RecordBuilder<'_>,
    ) -> Result<InteractionRecord, StoreError> {
        let mut guard = self.lock()?;
        // Tail read and insert share one immediate transaction, so the
        // builder always sees the tail its record will extend.
        let tx = guard
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)
            .map_err(SqliteStoreError::from)?;
        let tail: Option<String> = tx
            .query_row(
                "SELECT record_hash FROM interaction_records
                 WHERE tenant = ?1 AND manifest_id = ?2
                 ORDER BY id DESC LIMIT 1",
                params![tenant.as_str(), manifest_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(SqliteStoreError::from)?;
        let record = build(tail)?;
        insert_record(&tx, &record)?;
        tx.commit().map_err(SqliteStoreError::from)?;
        Ok(record)
    }
}

/// Inserts one interaction record, mapping tail collisions to conflicts.
fn insert_record(connection: &Connection, record: &InteractionRecord) -> Result<(), StoreError> {
    let result = connection.execute(
        "INSERT INTO interaction_records (
            record_id, tenant, manifest_id, agent_id, action_type, tool,
            request_json, request_hash, decision, decision_reason,
            reasons_json, policy_trace_json, risk_snapshot_json,
            result_json, result_hash, duration_ms, previous_record_hash,
            record_hash, gateway_signature, created_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
                   ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)",
        params![
            record.record_id.as_str(),
            record.tenant.as_str(),
            record.manifest_id.as_str(),
            record.agent_id.as_str(),
            record.action_type,
            record.tool,
            record.request.to_string(),
            record.request_hash,
            record.decision.as_str(),
            record.decision_reason.as_deref(),
            record.reasons_json,
            record.policy_trace_json,
            record.risk_snapshot_json.as_deref(),
            record.result.as_ref().map(ToString::to_string),
            record.result_hash.as_deref(),
            record.duration_ms.map(|value| i64::try_from(value).unwrap_or(i64::MAX)),
            record.previous_record_hash.as_deref(),
            record.record_hash,
            record.gateway_signature,
            timestamp_text(record.created_at)?,
        ],
    );
    match result {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(failure, _))
            if failure.code == ErrorCode::ConstraintViolation =>
        {
            Err(StoreError::Conflict("chain tail moved".to_string()))
        }
        Err(err) => Err(SqliteStoreError::from(err).into()),
    }
}

/// Raw record columns before parsing.
struct RecordColumns {
    /// Record identifier.
    record_id: String,
    /// Agent identifier.
    agent_id: String,
    /// Action type label.
    action_type: String,
    /// Tool name.
    tool: String,
    /// Request view JSON.
    request_json: String,
    /// Request hash.
    request_hash: String,
    /// Decision label.
    decision: String,
    /// First reason message.
    decision_reason: Option<String>,
    /// Canonical reasons JSON.
    reasons_json: String,
    /// Canonical trace JSON.
    policy_trace_json: String,
    /// Canonical risk snapshot JSON.
    risk_snapshot_json: Option<String>,
    /// Tool result JSON.
    result_json: Option<String>,
    /// Tool result hash.
    result_hash: Option<String>,
    /// Execution duration.
    duration_ms: Option<i64>,
    /// Prior chain hash.
    previous_record_hash: Option<String>,
    /// Record hash.
    record_hash: String,
    /// Gateway signature.
    gateway_signature: String,
    /// Commit timestamp text.
    created_at: String,
}

/// Reads raw record columns from a row.
fn record_columns(row: &Row<'_>) -> rusqlite::Result<RecordColumns> {
    Ok(RecordColumns {
        record_id: row.get(0)?,
        agent_id: row.get(1)?,
        action_type: row.get(2)?,
        tool: row.get(3)?,
        request_json: row.get(4)?,
        request_hash: row.get(5)?,
        decision: row.get(6)?,
        decision_reason: row.get(7)?,
        reasons_json: row.get(8)?,
        policy_trace_json: row.get(9)?,
        risk_snapshot_json: row.get(10)?,
        result_json: row.get(11)?,
        result_hash: row.get(12)?,
        duration_ms: row.get(13)?,
        previous_record_hash: row.get(14)?,
        record_hash: row.get(15)?,
        gateway_signature: row.get(16)?,
        created_at: row.get(17)?,
    })
}

/// Parses raw record columns into the typed record.
fn build_record(
    tenant: &TenantId,
    manifest_id: &ManifestId,
    columns: RecordColumns,
) -> Result<InteractionRecord, StoreError> {
    Ok(InteractionRecord {
        record_id: InteractionId::new(columns.record_id),
        tenant: tenant.clone(),
        manifest_id: manifest_id.clone(),
        agent_id: columns.agent_id.into(),
        action_type: columns.action_type,
        tool: columns.tool,
        request: parse_json(&columns.request_json)?,
        request_hash: columns.request_hash,
        decision: parse_decision(&columns.decision)?,
        decision_reason: columns.decision_reason,
        reasons_json: columns.reasons_json,
        policy_trace_json: columns.policy_trace_json,
        risk_snapshot_json: columns.risk_snapshot_json,
        result: columns.result_json.as_deref().map(parse_json).transpose()?,
        result_hash: columns.result_hash,
        duration_ms: columns.duration_ms.map(|value| u64::try_from(value).unwrap_or(0)),
        previous_record_hash: columns.previous_record_hash,
        record_hash: columns.record_hash,
        gateway_signature: columns.gateway_signature,
        created_at: parse_timestamp(&columns.created_at)?,
    })
}

// ============================================================================
// SECTION: Label & Parse Helpers
// ============================================================================

/// Parses a stored manifest status label.
fn parse_manifest_status(text: &str) -> Result<ManifestStatus, SqliteStoreError> {
    match text {
        "pending" => Ok(ManifestStatus::Pending),
        "active" => Ok(ManifestStatus::Active),
        "inactive" => Ok(ManifestStatus::Inactive),
        "archived" => Ok(ManifestStatus::Archived),
        other => Err(SqliteStoreError::Invalid(format!("unknown manifest status: {other}"))),
    }
}

/// Parses a stored issuer status label.
fn parse_issuer_status(text: &str) -> Result<IssuerStatus, SqliteStoreError> {
    match text {
        "active" => Ok(IssuerStatus::Active),
        "revoked" => Ok(IssuerStatus::Revoked),
        other => Err(SqliteStoreError::Invalid(format!("unknown issuer status: {other}"))),
    }
}

/// Parses a stored approval status label.
fn parse_approval_status(text: &str) -> Result<ApprovalStatus, SqliteStoreError> {
    match text {
        "pending" => Ok(ApprovalStatus::Pending),
        "approved" => Ok(ApprovalStatus::Approved),
        "denied" => Ok(ApprovalStatus::Denied),
        "expired" => Ok(ApprovalStatus::Expired),
        other => Err(SqliteStoreError::Invalid(format!("unknown approval status: {other}"))),
    }
}

/// Parses a stored decision label.
fn parse_decision(text: &str) -> Result<Decision, SqliteStoreError> {
    match text {
        "approved" => Ok(Decision::Approved),
        "denied" => Ok(Decision::Denied),
        "pending" => Ok(Decision::Pending),
        other => Err(SqliteStoreError::Invalid(format!("unknown decision: {other}"))),
    }
}

/// Formats a timestamp for storage.
fn timestamp_text(at: Timestamp) -> Result<String, StoreError> {
    at.to_rfc3339().map_err(|err| StoreError::Invalid(err.to_string()))
}

/// Parses a stored timestamp.
fn parse_timestamp(text: &str) -> Result<Timestamp, SqliteStoreError> {
    Timestamp::parse_rfc3339(text).map_err(|err| SqliteStoreError::Invalid(err.to_string()))
}

/// Parses stored JSON text.
fn parse_json(text: &str) -> Result<serde_json::Value, SqliteStoreError> {
    serde_json::from_str(text).map_err(|err| SqliteStoreError::Invalid(err.to_string()))
}

/// Parses stored JSON text into a typed value.
fn parse_json_as<T: serde::de::DeserializeOwned>(text: &str) -> Result<T, SqliteStoreError> {
    serde_json::from_str(text).map_err(|err| SqliteStoreError::Invalid(err.to_string()))
}

/// Serializes a value as JSON text.
fn to_json_text<T: serde::Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|err| StoreError::Invalid(err.to_string()))
}
