//! Tenant Engine Lifecycle Manager
//!
//! Creates, starts, reconfigures, restarts and removes tenant engines.
//! Both on-demand calls and configuration events end up here, and every
//! transition of a tenant runs under that tenant's lifecycle lock, so at
//! most one operation (in particular one initialization) is in flight per
//! tenant. Operations on different tenants run concurrently on a shared,
//! bounded pool of lifecycle workers.

use bytes::Bytes;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use tenantry_core::{
    ConfigStore, Error, LifecycleState, Result, TenantConfiguration, TenantEngineFactory, TenantId,
};
use tenantry_observability::Metrics;

use crate::bulk::BulkOperationReport;
use crate::config::ManagerConfig;
use crate::lifecycle::LifecycleOperation;
use crate::paths::TenantPathResolver;
use crate::registry::{TenantEngineRecord, TenantEngineRegistry, TenantSlot};

pub(crate) struct ManagerInner {
    pub(crate) registry: TenantEngineRegistry,
    pub(crate) store: Arc<dyn ConfigStore>,
    pub(crate) factory: Arc<dyn TenantEngineFactory>,
    pub(crate) paths: TenantPathResolver,
    pub(crate) config: ManagerConfig,
    /// Shared lifecycle worker pool
    pub(crate) workers: Arc<Semaphore>,
    pub(crate) metrics: Option<Arc<Metrics>>,
}

/// Builder for `TenantEngineManager`
pub struct TenantEngineManagerBuilder {
    store: Arc<dyn ConfigStore>,
    factory: Arc<dyn TenantEngineFactory>,
    config: ManagerConfig,
    metrics: Option<Arc<Metrics>>,
}

impl TenantEngineManagerBuilder {
    pub fn config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> Result<TenantEngineManager> {
        self.config.validate()?;
        let paths = TenantPathResolver::new(&self.config.paths)?;

        info!(
            root = paths.root(),
            workers = self.config.max_concurrent_operations,
            "Tenant engine manager configured"
        );

        Ok(TenantEngineManager {
            inner: Arc::new(ManagerInner {
                registry: TenantEngineRegistry::new(self.metrics.clone()),
                store: self.store,
                factory: self.factory,
                paths,
                workers: Arc::new(Semaphore::new(self.config.max_concurrent_operations)),
                config: self.config,
                metrics: self.metrics,
            }),
        })
    }
}

/// Lifecycle manager for the tenant engines hosted by this service
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct TenantEngineManager {
    inner: Arc<ManagerInner>,
}

impl TenantEngineManager {
    /// Start building a manager over a configuration store and engine factory
    pub fn builder(
        store: Arc<dyn ConfigStore>,
        factory: Arc<dyn TenantEngineFactory>,
    ) -> TenantEngineManagerBuilder {
        TenantEngineManagerBuilder {
            store,
            factory,
            config: ManagerConfig::default(),
            metrics: None,
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    pub fn paths(&self) -> &TenantPathResolver {
        &self.inner.paths
    }

    pub fn store(&self) -> &Arc<dyn ConfigStore> {
        &self.inner.store
    }

    pub fn metrics(&self) -> Option<&Arc<Metrics>> {
        self.inner.metrics.as_ref()
    }

    /// Current record of a tenant's engine; never creates one
    pub fn get_tenant_engine_by_tenant_id(&self, tenant_id: &TenantId) -> Option<TenantEngineRecord> {
        self.inner.registry.lookup(tenant_id)
    }

    /// Snapshot of every registered tenant engine
    pub fn list_tenant_engines(&self) -> Vec<TenantEngineRecord> {
        self.inner.registry.list_all()
    }

    pub fn tenant_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Ensure the tenant's engine exists and is started, waiting at most
    /// the configured `assure_timeout_secs`.
    pub async fn assure_tenant_engine_available(
        &self,
        tenant_id: &TenantId,
    ) -> Result<TenantEngineRecord> {
        self.assure_tenant_engine_available_within(tenant_id, self.inner.config.assure_timeout())
            .await
    }

    /// Ensure the tenant's engine exists and is started within `timeout`.
    ///
    /// Concurrent callers for the same tenant share one initialization
    /// and observe its outcome. A `Failed` engine is retried by the next
    /// call. A tenant without configuration fails with
    /// `TenantNotConfigured`, immediately or (when configured to wait)
    /// once `timeout` elapses without the configuration arriving.
    ///
    /// # Errors
    /// - `Error::TenantNotConfigured` if no configuration exists
    /// - `Error::TenantEngineNotAvailable` on timeout or failed initialization,
    ///   carrying the recorded cause
    pub async fn assure_tenant_engine_available_within(
        &self,
        tenant_id: &TenantId,
        timeout: Duration,
    ) -> Result<TenantEngineRecord> {
        let result = match tokio::time::timeout(timeout, self.inner.assure(tenant_id)).await {
            Ok(result) => result,
            Err(_) => Err(self.inner.assure_timed_out(tenant_id, timeout)),
        };

        if let Some(metrics) = &self.inner.metrics {
            let outcome = match &result {
                Ok(_) => "started",
                Err(Error::TenantNotConfigured(_)) => "not_configured",
                Err(Error::TenantEngineNotAvailable { .. }) => "not_available",
                Err(_) => "error",
            };
            metrics.record_assure(outcome);
        }

        if let Err(e) = &result {
            debug!(tenant_id = %tenant_id, error = %e, "Tenant engine not available");
        }
        result
    }

    /// Read a tenant's configuration payload from the store
    pub async fn get_tenant_configuration(&self, tenant_id: &TenantId) -> Result<Bytes> {
        self.inner
            .load_configuration(tenant_id)
            .await?
            .map(|config| config.data)
            .ok_or_else(|| Error::TenantNotConfigured(tenant_id.clone()))
    }

    /// Write a tenant's configuration payload to the store.
    ///
    /// Engine state is not touched here; the store's change notification
    /// is applied by the reconciliation pipeline like any other change.
    pub async fn update_tenant_configuration(
        &self,
        tenant_id: &TenantId,
        data: impl Into<Bytes>,
    ) -> Result<()> {
        let path = self.inner.paths.configuration_path(tenant_id);
        self.inner.store.write(&path, data.into()).await?;
        info!(tenant_id = %tenant_id, path = %path, "Tenant configuration updated");
        Ok(())
    }

    /// Create, reconfigure or restart the tenant's engine so that it runs
    /// `config`. A started engine already running this version is left
    /// untouched.
    pub async fn apply_tenant_configuration(
        &self,
        tenant_id: &TenantId,
        config: TenantConfiguration,
    ) -> Result<TenantEngineRecord> {
        loop {
            let (slot, created) = self.inner.registry.insert_if_absent(tenant_id);
            let guard = match created {
                Some(guard) => guard,
                None => {
                    let guard = slot.lock().await;
                    if slot.is_detached() {
                        continue;
                    }
                    guard
                }
            };

            return self
                .inner
                .spawn_locked(slot, guard, LifecycleOperation::Reconfigure, |inner, slot| {
                    async move { inner.reconfigure_locked(&slot, config).await }
                })
                .await;
        }
    }

    /// Restart a registered tenant engine with its stored configuration.
    ///
    /// An initialization in progress is cancelled first; callers waiting
    /// on it receive the restarted engine.
    ///
    /// # Errors
    /// - `Error::NotFound` if the tenant has no registry entry
    /// - `Error::Lifecycle` if stopping or starting the engine failed
    /// - `Error::TenantNotConfigured` if the configuration is gone
    pub async fn restart_tenant_engine(&self, tenant_id: &TenantId) -> Result<TenantEngineRecord> {
        let slot = self
            .inner
            .registry
            .slot(tenant_id)
            .ok_or_else(|| Error::NotFound(tenant_id.clone()))?;

        let _interrupt = slot.begin_interrupt();
        if slot.cancel_initialization() {
            info!(tenant_id = %tenant_id, "Interrupting initialization for restart");
        }
        let guard = slot.lock().await;
        if slot.is_detached() {
            return Err(Error::NotFound(tenant_id.clone()));
        }

        self.inner
            .spawn_locked(slot, guard, LifecycleOperation::Restart, |inner, slot| {
                async move { inner.restart_locked(&slot, None).await }
            })
            .await
    }

    /// Restart every registered tenant engine concurrently.
    ///
    /// One tenant's failure neither aborts nor delays the others; the
    /// report lists each tenant's outcome.
    pub async fn restart_all_tenant_engines(&self) -> BulkOperationReport {
        let tenants = self.inner.registry.tenant_ids();
        info!(tenants = tenants.len(), "Restarting all tenant engines");

        let results = join_all(tenants.into_iter().map(|tenant_id| async move {
            let result = self.restart_tenant_engine(&tenant_id).await.map(|_| ());
            (tenant_id, result)
        }))
        .await;

        log_report(BulkOperationReport::from_results("restart", results))
    }

    /// Stop (best effort) and deregister a tenant's engine.
    ///
    /// Removing an absent tenant succeeds. An initialization in progress
    /// is cancelled and its callers fail with `TenantEngineNotAvailable`.
    pub async fn remove_tenant_engine(&self, tenant_id: &TenantId) -> Result<()> {
        let Some(slot) = self.inner.registry.slot(tenant_id) else {
            debug!(tenant_id = %tenant_id, "Tenant engine already absent");
            return Ok(());
        };

        let _interrupt = slot.begin_interrupt();
        if slot.cancel_initialization() {
            info!(tenant_id = %tenant_id, "Interrupting initialization for removal");
        }
        let guard = slot.lock().await;
        if slot.is_detached() {
            return Ok(());
        }

        self.inner
            .spawn_locked(slot, guard, LifecycleOperation::Remove, |inner, slot| {
                async move { inner.remove_locked(&slot).await }
            })
            .await
    }

    /// Remove every registered tenant engine concurrently
    pub async fn remove_all_tenant_engines(&self) -> BulkOperationReport {
        let tenants = self.inner.registry.tenant_ids();
        info!(tenants = tenants.len(), "Removing all tenant engines");

        let results = join_all(tenants.into_iter().map(|tenant_id| async move {
            let result = self.remove_tenant_engine(&tenant_id).await;
            (tenant_id, result)
        }))
        .await;

        log_report(BulkOperationReport::from_results("remove", results))
    }
}

fn log_report(report: BulkOperationReport) -> BulkOperationReport {
    if report.is_success() {
        info!("{}", report);
    } else {
        for (tenant_id, error) in &report.failed {
            warn!(tenant_id = %tenant_id, error = %error, operation = %report.operation, "Bulk operation failed for tenant");
        }
        warn!("{}", report);
    }
    report
}

impl ManagerInner {
    async fn assure(self: &Arc<Self>, tenant_id: &TenantId) -> Result<TenantEngineRecord> {
        loop {
            let (slot, created) = self.registry.insert_if_absent(tenant_id);

            let guard = match created {
                Some(guard) => guard,
                None => {
                    let observed = slot.record();
                    if observed.is_started() {
                        return Ok(observed);
                    }
                    if slot.is_interrupted() {
                        self.defer_to_interrupt(&slot).await?;
                        continue;
                    }

                    if observed.state == LifecycleState::Unconfigured
                        && self.config.wait_for_configuration
                        && !self.configuration_exists(tenant_id).await?
                    {
                        debug!(tenant_id = %tenant_id, "Waiting for tenant configuration");
                        slot.wait_for_change(observed.revision).await;
                        continue;
                    }

                    let guard = slot.lock().await;
                    if slot.is_detached() {
                        continue;
                    }

                    // Adopt the outcome of an attempt that finished while we waited
                    let current = slot.record();
                    let settled_since =
                        current.attempts > observed.attempts || observed.state.is_transient();
                    if settled_since && !current.state.is_transient() {
                        drop(guard);
                        match self.assure_outcome(&slot, current).await? {
                            Some(record) => return Ok(record),
                            None => continue,
                        }
                    }
                    guard
                }
            };

            let record = self
                .spawn_locked(
                    slot.clone(),
                    guard,
                    LifecycleOperation::Initialize,
                    |inner, slot| async move { inner.initialize_locked(&slot, None).await },
                )
                .await?;

            if let Some(record) = self.assure_outcome(&slot, record).await? {
                return Ok(record);
            }
        }
    }

    /// Wait out the restart or removal that interrupted this entry.
    ///
    /// A removed entry stays removed for the interrupted caller.
    async fn defer_to_interrupt(&self, slot: &TenantSlot) -> Result<()> {
        debug!(tenant_id = %slot.tenant_id(), "Waiting for interrupting operation");
        slot.wait_for_interrupts().await;
        if slot.is_detached() {
            return Err(Error::TenantEngineNotAvailable {
                tenant_id: slot.tenant_id().clone(),
                reason: "tenant engine was removed".to_string(),
                cause: None,
            });
        }
        Ok(())
    }

    /// Final result of an availability request, or `None` to keep trying
    async fn assure_outcome(
        &self,
        slot: &TenantSlot,
        record: TenantEngineRecord,
    ) -> Result<Option<TenantEngineRecord>> {
        match record.state {
            LifecycleState::Started => Ok(Some(record)),
            LifecycleState::Failed => Err(Error::TenantEngineNotAvailable {
                tenant_id: record.tenant_id,
                reason: "initialization failed".to_string(),
                cause: record.last_error,
            }),
            LifecycleState::Unconfigured if !self.config.wait_for_configuration => {
                Err(Error::TenantNotConfigured(record.tenant_id))
            }
            // Only a restart or removal cancels an initialization
            LifecycleState::Stopped => {
                self.defer_to_interrupt(slot).await?;
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    fn assure_timed_out(&self, tenant_id: &TenantId, timeout: Duration) -> Error {
        match self.registry.lookup(tenant_id) {
            Some(record) if record.state == LifecycleState::Unconfigured => {
                Error::TenantNotConfigured(tenant_id.clone())
            }
            record => Error::TenantEngineNotAvailable {
                tenant_id: tenant_id.clone(),
                reason: format!("engine not started within {:?}", timeout),
                cause: record.and_then(|record| record.last_error),
            },
        }
    }

    async fn configuration_exists(&self, tenant_id: &TenantId) -> Result<bool> {
        let path = self.paths.configuration_path(tenant_id);
        Ok(self.store.read(&path).await?.is_some())
    }
}
