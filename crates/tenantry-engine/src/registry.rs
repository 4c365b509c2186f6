//! Tenant Engine Registry
//!
//! Authoritative in-memory mapping from tenant to engine state. The map
//! itself is a sharded `DashMap` whose locks are only held for structural
//! changes; each entry (a `TenantSlot`) carries its own async lock that
//! serializes lifecycle transitions for that tenant, plus a watch channel
//! publishing the entry's current record to anyone waiting on it.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, OwnedMutexGuard, watch};
use tracing::debug;

use tenantry_core::{
    CancellationToken, ConfigVersion, Error, LifecycleError, LifecycleState, Result, TenantEngine,
    TenantId,
};
use tenantry_observability::Metrics;

/// Snapshot of one tenant's registry entry
#[derive(Clone)]
pub struct TenantEngineRecord {
    pub tenant_id: TenantId,
    pub state: LifecycleState,
    /// Version of the configuration the running engine was started or
    /// reconfigured with
    pub config_version: Option<ConfigVersion>,
    /// Most recent failure, cleared by the next successful transition
    pub last_error: Option<LifecycleError>,
    /// Initialization attempts made for this entry
    pub attempts: u64,
    pub updated_at: DateTime<Utc>,
    pub(crate) revision: u64,
    engine: Option<Arc<dyn TenantEngine>>,
}

impl TenantEngineRecord {
    fn new(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            state: LifecycleState::Initializing,
            config_version: None,
            last_error: None,
            attempts: 0,
            updated_at: Utc::now(),
            revision: 0,
            engine: None,
        }
    }

    /// Hosted engine instance, present while it holds runtime resources
    pub fn engine(&self) -> Option<&Arc<dyn TenantEngine>> {
        self.engine.as_ref()
    }

    pub fn is_started(&self) -> bool {
        self.state == LifecycleState::Started
    }

    pub(crate) fn set_engine(&mut self, engine: Option<Arc<dyn TenantEngine>>) {
        self.engine = engine;
    }
}

impl fmt::Debug for TenantEngineRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantEngineRecord")
            .field("tenant_id", &self.tenant_id)
            .field("state", &self.state)
            .field("config_version", &self.config_version)
            .field("last_error", &self.last_error)
            .field("attempts", &self.attempts)
            .field("updated_at", &self.updated_at)
            .field("has_engine", &self.engine.is_some())
            .finish()
    }
}

/// Pending restart or removal of a tenant slot
pub(crate) struct InterruptGuard {
    slot: Arc<TenantSlot>,
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        self.slot
            .interrupts
            .send_modify(|pending| *pending = pending.saturating_sub(1));
    }
}

/// Registry entry for one tenant
pub(crate) struct TenantSlot {
    tenant_id: TenantId,
    record: watch::Sender<TenantEngineRecord>,
    /// Held for the duration of every lifecycle transition
    lock: Arc<Mutex<()>>,
    /// Cancels the initialization currently in flight, if any
    inflight: StdMutex<Option<CancellationToken>>,
    /// Set once the entry has been removed from the registry
    detached: AtomicBool,
    /// Restarts and removals that have interrupted this entry and not yet finished
    interrupts: watch::Sender<usize>,
    metrics: Option<Arc<Metrics>>,
}

impl TenantSlot {
    fn new(tenant_id: TenantId, metrics: Option<Arc<Metrics>>) -> Self {
        let (record, _) = watch::channel(TenantEngineRecord::new(tenant_id.clone()));
        if let Some(metrics) = &metrics {
            metrics.record_state_change(None, Some(LifecycleState::Initializing.as_str()));
        }
        Self {
            tenant_id,
            record,
            lock: Arc::new(Mutex::new(())),
            inflight: StdMutex::new(None),
            detached: AtomicBool::new(false),
            interrupts: watch::channel(0).0,
            metrics,
        }
    }

    pub(crate) fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    /// Current record
    pub(crate) fn record(&self) -> TenantEngineRecord {
        self.record.borrow().clone()
    }

    /// Acquire the tenant's lifecycle lock
    pub(crate) async fn lock(&self) -> OwnedMutexGuard<()> {
        self.lock.clone().lock_owned().await
    }

    /// Move the entry to `next`, applying `update` to the record.
    ///
    /// Callers must hold the lifecycle lock.
    pub(crate) fn transition(
        &self,
        next: LifecycleState,
        update: impl FnOnce(&mut TenantEngineRecord),
    ) -> Result<TenantEngineRecord> {
        let current = self.record.borrow().state;
        if !current.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                tenant_id: self.tenant_id.clone(),
                from: current,
                to: next,
            });
        }

        self.record.send_modify(|record| {
            record.state = next;
            update(record);
            record.revision += 1;
            record.updated_at = Utc::now();
        });

        if let Some(metrics) = &self.metrics {
            metrics.record_state_change(Some(current.as_str()), Some(next.as_str()));
        }
        debug!(tenant_id = %self.tenant_id, from = %current, to = %next, "Lifecycle transition");

        Ok(self.record())
    }

    /// Register a cancellation token for a starting initialization
    pub(crate) fn begin_initialization(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.inflight_guard() = Some(token.clone());
        token
    }

    pub(crate) fn end_initialization(&self) {
        self.inflight_guard().take();
    }

    /// Cancel the initialization in flight; returns whether there was one
    pub(crate) fn cancel_initialization(&self) -> bool {
        match self.inflight_guard().take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn inflight_guard(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.inflight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn detach(&self) {
        self.detached.store(true, Ordering::SeqCst);
    }

    /// Whether the entry was removed; holders must look the tenant up again
    pub(crate) fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }

    /// Mark an interrupting operation as pending until the guard drops.
    ///
    /// Must be taken before cancelling the initialization in flight, so
    /// the interrupted caller defers to it instead of retrying.
    pub(crate) fn begin_interrupt(self: &Arc<Self>) -> InterruptGuard {
        self.interrupts.send_modify(|pending| *pending += 1);
        InterruptGuard { slot: self.clone() }
    }

    pub(crate) fn is_interrupted(&self) -> bool {
        *self.interrupts.borrow() > 0
    }

    /// Wait until no interrupting operation is pending
    pub(crate) async fn wait_for_interrupts(&self) {
        let mut rx = self.interrupts.subscribe();
        let _ = rx.wait_for(|pending| *pending == 0).await;
    }

    /// Wait until the record changes from the given revision
    pub(crate) async fn wait_for_change(&self, revision: u64) {
        let mut rx = self.record.subscribe();
        // The sender lives as long as `self`, so this cannot fail
        let _ = rx.wait_for(|record| record.revision != revision).await;
    }
}

/// Concurrency-safe tenant to engine state mapping
pub(crate) struct TenantEngineRegistry {
    slots: DashMap<TenantId, Arc<TenantSlot>>,
    metrics: Option<Arc<Metrics>>,
}

impl TenantEngineRegistry {
    pub(crate) fn new(metrics: Option<Arc<Metrics>>) -> Self {
        Self {
            slots: DashMap::new(),
            metrics,
        }
    }

    /// Snapshot of a tenant's record
    pub(crate) fn lookup(&self, tenant_id: &TenantId) -> Option<TenantEngineRecord> {
        self.slots.get(tenant_id).map(|slot| slot.record())
    }

    pub(crate) fn slot(&self, tenant_id: &TenantId) -> Option<Arc<TenantSlot>> {
        self.slots.get(tenant_id).map(|slot| slot.clone())
    }

    /// Return the tenant's entry, creating it in `Initializing` if absent.
    ///
    /// Exactly one of any number of racing callers creates the entry; it
    /// alone receives the entry's lifecycle lock, already acquired, and
    /// owns the first initialization.
    pub(crate) fn insert_if_absent(
        &self,
        tenant_id: &TenantId,
    ) -> (Arc<TenantSlot>, Option<OwnedMutexGuard<()>>) {
        match self.slots.entry(tenant_id.clone()) {
            Entry::Occupied(entry) => (entry.get().clone(), None),
            Entry::Vacant(entry) => {
                let slot = Arc::new(TenantSlot::new(tenant_id.clone(), self.metrics.clone()));
                // Uncontended: nobody else can see the slot yet
                let guard = slot.lock.clone().try_lock_owned().ok();
                entry.insert(slot.clone());
                debug!(tenant_id = %tenant_id, "Registered tenant engine entry");
                (slot, guard)
            }
        }
    }

    /// Remove a tenant's entry; absent entries are ignored
    pub(crate) fn remove(&self, tenant_id: &TenantId) -> Option<Arc<TenantSlot>> {
        let (_, slot) = self.slots.remove(tenant_id)?;
        self.forget(&slot);
        Some(slot)
    }

    fn forget(&self, slot: &TenantSlot) {
        if let Some(metrics) = &self.metrics {
            metrics.record_state_change(Some(slot.record.borrow().state.as_str()), None);
        }
        debug!(tenant_id = %slot.tenant_id, "Deregistered tenant engine entry");
    }

    /// Snapshot of every record, ordered by tenant
    pub(crate) fn list_all(&self) -> Vec<TenantEngineRecord> {
        let mut records: Vec<TenantEngineRecord> =
            self.slots.iter().map(|slot| slot.record()).collect();
        records.sort_by(|a, b| a.tenant_id.cmp(&b.tenant_id));
        records
    }

    pub(crate) fn tenant_ids(&self) -> Vec<TenantId> {
        let mut ids: Vec<TenantId> = self.slots.iter().map(|slot| slot.key().clone()).collect();
        ids.sort();
        ids
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }
}
