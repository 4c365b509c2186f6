//! Service wiring
//!
//! Builds the lifecycle manager over a configuration store, runs the
//! startup reconciliation and the event dispatcher, and tears every
//! tenant engine down on shutdown.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use tenantry_core::{CancellationToken, ConfigStore, TenantEngineFactory};
use tenantry_engine::{
    BulkOperationReport, ManagerConfig, ReconciliationCoordinator, TenantEngineManager,
};
use tenantry_observability::{Metrics, ReadinessChecker, TenantStatus};

/// Ready once the startup reconciliation has finished
pub struct ManagerReadiness {
    manager: TenantEngineManager,
    reconciled: AtomicBool,
}

impl ManagerReadiness {
    pub fn new(manager: TenantEngineManager) -> Self {
        Self {
            manager,
            reconciled: AtomicBool::new(false),
        }
    }

    pub fn mark_reconciled(&self) {
        self.reconciled.store(true, Ordering::Release);
    }
}

impl ReadinessChecker for ManagerReadiness {
    fn is_ready(&self) -> bool {
        self.reconciled.load(Ordering::Acquire)
    }

    fn tenant_statuses(&self) -> Vec<TenantStatus> {
        self.manager
            .list_tenant_engines()
            .into_iter()
            .map(|record| TenantStatus {
                tenant_id: record.tenant_id.to_string(),
                state: record.state.to_string(),
                last_error: record.last_error.map(|e| e.to_string()),
            })
            .collect()
    }
}

/// A running tenant host
pub struct TenantHost {
    pub manager: TenantEngineManager,
    pub readiness: Arc<ManagerReadiness>,
    cancel: CancellationToken,
    dispatcher: JoinHandle<()>,
}

impl TenantHost {
    /// Wire the manager and start reconciling.
    ///
    /// The watch is opened before existing configurations are applied,
    /// so changes made during startup are dispatched afterwards.
    pub async fn start(
        store: Arc<dyn ConfigStore>,
        factory: Arc<dyn TenantEngineFactory>,
        config: ManagerConfig,
        metrics: Option<Arc<Metrics>>,
    ) -> anyhow::Result<Self> {
        let mut builder = TenantEngineManager::builder(store, factory).config(config);
        if let Some(metrics) = metrics {
            builder = builder.metrics(metrics);
        }
        let manager = builder.build()?;
        let coordinator = ReconciliationCoordinator::new(manager.clone());
        let readiness = Arc::new(ManagerReadiness::new(manager.clone()));

        let events = coordinator.watch().await?;
        let report = coordinator.reconcile_existing().await?;
        if !report.is_success() {
            warn!(
                failed = report.failed.len(),
                "Some tenant engines failed to start; they are retried on their next configuration change"
            );
        }
        readiness.mark_reconciled();

        let cancel = CancellationToken::new();
        let dispatcher = coordinator.spawn(events, cancel.clone());
        info!(tenants = manager.tenant_count(), "Tenant host started");

        Ok(Self {
            manager,
            readiness,
            cancel,
            dispatcher,
        })
    }

    /// Stop dispatching events, then remove every tenant engine
    pub async fn shutdown(self) -> BulkOperationReport {
        self.cancel.cancel();
        if let Err(e) = self.dispatcher.await {
            warn!(error = %e, "Reconciliation dispatcher ended abnormally");
        }
        self.manager.remove_all_tenant_engines().await
    }
}
