// crates/uapk-gateway-core/src/runtime/memory.rs
// ============================================================================
// Module: UAPK Gateway In-Memory Stores
// Description: Mutex-backed store implementations and clock sources.
// Purpose: Back tests and embedded deployments without external storage.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! Every store interface has an in-memory implementation here. The mutex
//! serializes each operation, which makes the conditional updates (budget
//! reservation, approval consumption) trivially atomic and gives tests the
//! same linearization guarantees the SQLite store provides.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Mutex;

use time::OffsetDateTime;

use crate::core::Approval;
use crate::core::ApprovalId;
use crate::core::ApprovalStatus;
use crate::core::DayStamp;
use crate::core::InteractionId;
use crate::core::InteractionRecord;
use crate::core::IssuerId;
use crate::core::ManifestId;
use crate::core::ManifestRecord;
use crate::core::ManifestStatus;
use crate::core::TenantId;
use crate::core::Timestamp;
use crate::interfaces::ApprovalStore;
use crate::interfaces::Clock;
use crate::interfaces::CounterStore;
use crate::interfaces::IssuerRecord;
use crate::interfaces::IssuerStatus;
use crate::interfaces::IssuerStore;
use crate::interfaces::ManifestStore;
use crate::interfaces::RecordStore;
use crate::interfaces::SecretResolver;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: Lock Helper
// ============================================================================

/// Locks a store mutex, mapping poisoning to a store error.
fn lock<'a, T>(mutex: &'a Mutex<T>, label: &str) -> Result<std::sync::MutexGuard<'a, T>, StoreError> {
    mutex.lock().map_err(|_| StoreError::Unavailable(format!("{label} mutex poisoned")))
}

// ============================================================================
// SECTION: Manifest Store
// ============================================================================

/// In-memory manifest store.
#[derive(Default)]
pub struct InMemoryManifestStore {
    /// All stored manifest rows, append order.
    rows: Mutex<Vec<ManifestRecord>>,
}

impl InMemoryManifestStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a manifest row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store is unavailable.
    pub fn insert(&self, record: ManifestRecord) -> Result<(), StoreError> {
        lock(&self.rows, "manifest store")?.push(record);
        Ok(())
    }
}

impl ManifestStore for InMemoryManifestStore {
    fn get_active(
        &self,
        tenant: &TenantId,
        manifest_id: &ManifestId,
    ) -> Result<Option<ManifestRecord>, StoreError> {
        let rows = lock(&self.rows, "manifest store")?;
        Ok(rows
            .iter()
            .filter(|row| {
                &row.tenant == tenant
                    && &row.manifest_id == manifest_id
                    && row.status == ManifestStatus::Active
            })
            .max_by_key(|row| row.created_at)
            .cloned())
    }
}

// ============================================================================
// SECTION: Issuer Store
// ============================================================================

/// In-memory issuer registry.
#[derive(Default)]
pub struct InMemoryIssuerStore {
    /// Issuer rows keyed by `(tenant, issuer_id)`.
    rows: Mutex<HashMap<(TenantId, IssuerId), IssuerRecord>>,
}

impl InMemoryIssuerStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl IssuerStore for InMemoryIssuerStore {
    fn register(&self, issuer: IssuerRecord) -> Result<(), StoreError> {
        let mut rows = lock(&self.rows, "issuer store")?;
        let key = (issuer.tenant.clone(), issuer.issuer_id.clone());
        if rows.contains_key(&key) {
            return Err(StoreError::Conflict(format!(
                "issuer '{}' already registered",
                issuer.issuer_id
            )));
        }
        rows.insert(key, issuer);
        Ok(())
    }

    fn get(
        &self,
        tenant: &TenantId,
        issuer_id: &IssuerId,
    ) -> Result<Option<IssuerRecord>, StoreError> {
        let rows = lock(&self.rows, "issuer store")?;
        Ok(rows.get(&(tenant.clone(), issuer_id.clone())).cloned())
    }

    fn set_status(
        &self,
        tenant: &TenantId,
        issuer_id: &IssuerId,
        status: IssuerStatus,
    ) -> Result<bool, StoreError> {
        let mut rows = lock(&self.rows, "issuer store")?;
        match rows.get_mut(&(tenant.clone(), issuer_id.clone())) {
            Some(row) => {
                row.status = status;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn active_keys(&self, tenant: &TenantId) -> Result<BTreeMap<String, String>, StoreError> {
        let rows = lock(&self.rows, "issuer store")?;
        let mut keys = BTreeMap::new();
        for ((row_tenant, issuer_id), row) in rows.iter() {
            if row_tenant == tenant && row.status == IssuerStatus::Active {
                keys.insert(issuer_id.as_str().to_string(), row.public_key.clone());
            }
        }
        Ok(keys)
    }
}

// ============================================================================
// SECTION: Approval Store
// ============================================================================

/// In-memory approval store with one-shot consumption.
#[derive(Default)]
pub struct InMemoryApprovalStore {
    /// Approval rows keyed by `(tenant, approval_id)`.
    rows: Mutex<HashMap<(TenantId, ApprovalId), Approval>>,
}

impl InMemoryApprovalStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ApprovalStore for InMemoryApprovalStore {
    fn create(&self, approval: Approval) -> Result<(), StoreError> {
        let mut rows = lock(&self.rows, "approval store")?;
        let key = (approval.tenant.clone(), approval.approval_id.clone());
        if rows.contains_key(&key) {
            return Err(StoreError::Conflict(format!(
                "approval '{}' already exists",
                approval.approval_id
            )));
        }
        rows.insert(key, approval);
        Ok(())
    }

    fn get(
        &self,
        tenant: &TenantId,
        approval_id: &ApprovalId,
    ) -> Result<Option<Approval>, StoreError> {
        let rows = lock(&self.rows, "approval store")?;
        Ok(rows.get(&(tenant.clone(), approval_id.clone())).cloned())
    }

    fn decide(
        &self,
        tenant: &TenantId,
        approval_id: &ApprovalId,
        status: ApprovalStatus,
        approver: &str,
        at: Timestamp,
    ) -> Result<bool, StoreError> {
        let mut rows = lock(&self.rows, "approval store")?;
        let Some(row) = rows.get_mut(&(tenant.clone(), approval_id.clone())) else {
            return Ok(false);
        };
        if row.status != ApprovalStatus::Pending {
            return Ok(false);
        }
        row.status = status;
        row.approver = Some(approver.to_string());
        row.approved_at = Some(at);
        Ok(true)
    }

    fn consume(
        &self,
        tenant: &TenantId,
        approval_id: &ApprovalId,
        interaction_id: &InteractionId,
        at: Timestamp,
    ) -> Result<bool, StoreError> {
        let mut rows = lock(&self.rows, "approval store")?;
        let Some(row) = rows.get_mut(&(tenant.clone(), approval_id.clone())) else {
            return Ok(false);
        };
        if row.status != ApprovalStatus::Approved || row.consumed_at.is_some() {
            return Ok(false);
        }
        row.consumed_at = Some(at);
        row.consumed_interaction_id = Some(interaction_id.clone());
        Ok(true)
    }
}

// ============================================================================
// SECTION: Counter Store
// ============================================================================

/// In-memory daily action counters.
#[derive(Default)]
pub struct InMemoryCounterStore {
    /// Counts keyed by `(tenant, manifest_id, day)`.
    rows: Mutex<HashMap<(TenantId, ManifestId, DayStamp), u64>>,
}

impl InMemoryCounterStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CounterStore for InMemoryCounterStore {
    fn count(
        &self,
        tenant: &TenantId,
        manifest_id: &ManifestId,
        day: DayStamp,
    ) -> Result<u64, StoreError> {
        let rows = lock(&self.rows, "counter store")?;
        Ok(rows.get(&(tenant.clone(), manifest_id.clone(), day)).copied().unwrap_or(0))
    }

    fn increment(
        &self,
        tenant: &TenantId,
        manifest_id: &ManifestId,
        day: DayStamp,
    ) -> Result<u64, StoreError> {
        let mut rows = lock(&self.rows, "counter store")?;
        let entry = rows.entry((tenant.clone(), manifest_id.clone(), day)).or_insert(0);
        *entry += 1;
        Ok(*entry)
    }

    fn reserve(
        &self,
        tenant: &TenantId,
        manifest_id: &ManifestId,
        day: DayStamp,
        cap: u64,
    ) -> Result<Option<u64>, StoreError> {
        let mut rows = lock(&self.rows, "counter store")?;
        let entry = rows.entry((tenant.clone(), manifest_id.clone(), day)).or_insert(0);
        if *entry >= cap {
            return Ok(None);
        }
        *entry += 1;
        Ok(Some(*entry))
    }
}

// ============================================================================
// SECTION: Record Store
// ============================================================================

/// In-memory interaction record chains.
#[derive(Default)]
pub struct InMemoryRecordStore {
    /// Chains keyed by `(tenant, manifest_id)`, append order.
    chains: Mutex<HashMap<(TenantId, ManifestId), Vec<InteractionRecord>>>,
}

impl InMemoryRecordStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for InMemoryRecordStore {
    fn latest_hash(
        &self,
        tenant: &TenantId,
        manifest_id: &ManifestId,
    ) -> Result<Option<String>, StoreError> {
        let chains = lock(&self.chains, "record store")?;
        Ok(chains
            .get(&(tenant.clone(), manifest_id.clone()))
            .and_then(|chain| chain.last())
            .map(|record| record.record_hash.clone()))
    }

    fn append(&self, record: &InteractionRecord) -> Result<(), StoreError> {
        let mut chains = lock(&self.chains, "record store")?;
        let chain =
            chains.entry((record.tenant.clone(), record.manifest_id.clone())).or_default();
        let tail_hash = chain.last().map(|tail| tail.record_hash.as_str());
        if record.previous_record_hash.as_deref() != tail_hash {
            return Err(StoreError::Conflict("chain tail moved".to_string()));
        }
        chain.push(record.clone());
        Ok(())
    }

    fn list(
        &self,
        tenant: &TenantId,
        manifest_id: &ManifestId,
    ) -> Result<Vec<InteractionRecord>, StoreError> {
        let chains = lock(&self.chains, "record store")?;
        Ok(chains.get(&(tenant.clone(), manifest_id.clone())).cloned().unwrap_or_default())
    }

    fn append_chained(
        &self,
        tenant: &TenantId,
        manifest_id: &ManifestId,
        build: &mut crate::interfaces::RecordBuilder<'_>,
    ) -> Result<InteractionRecord, StoreError> {
        // Tail read and insert happen under one lock, so the builder always
        // sees the tail its record will extend.
        let mut chains = lock(&self.chains, "record store")?;
        let chain = chains.entry((tenant.clone(), manifest_id.clone())).or_default();
        let tail = chain.last().map(|record| record.record_hash.clone());
        let record = build(tail)?;
        chain.push(record.clone());
        Ok(record)
    }
}

// ============================================================================
// SECTION: Secret Resolver
// ============================================================================

/// Secret resolver over a static map.
#[derive(Default)]
pub struct StaticSecretResolver {
    /// Secret values keyed by `(tenant, name)`.
    secrets: Mutex<HashMap<(TenantId, String), String>>,
}

impl StaticSecretResolver {
    /// Creates an empty resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a secret value.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the resolver is unavailable.
    pub fn insert(
        &self,
        tenant: &TenantId,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), StoreError> {
        lock(&self.secrets, "secret resolver")?
            .insert((tenant.clone(), name.into()), value.into());
        Ok(())
    }
}

impl SecretResolver for StaticSecretResolver {
    fn resolve(&self, tenant: &TenantId, name: &str) -> Result<Option<String>, StoreError> {
        let secrets = lock(&self.secrets, "secret resolver")?;
        Ok(secrets.get(&(tenant.clone(), name.to_string())).cloned())
    }
}

// ============================================================================
// SECTION: Clocks
// ============================================================================

/// Clock reading the system wall clock in UTC.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::new(OffsetDateTime::now_utc())
    }
}

/// Manually advanced clock for deterministic tests.
pub struct ManualClock {
    /// Current time.
    now: Mutex<Timestamp>,
}

impl ManualClock {
    /// Creates a clock frozen at the given time.
    #[must_use]
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Advances the clock by whole seconds.
    pub fn advance_seconds(&self, seconds: i64) {
        if let Ok(mut now) = self.now.lock() {
            *now = now.plus_seconds(seconds);
        }
    }

    /// Replaces the current time.
    pub fn set(&self, at: Timestamp) {
        if let Ok(mut now) = self.now.lock() {
            *now = at;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.lock().map_or_else(|poisoned| *poisoned.into_inner(), |now| *now)
    }
}
