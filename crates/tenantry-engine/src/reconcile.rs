//! Reconciliation Coordinator
//!
//! Translates configuration store events into lifecycle manager calls.
//! Events are routed into per-tenant lanes: each lane is an unbounded
//! queue drained by one task, so events for the same tenant are applied
//! in delivery order while different tenants proceed concurrently. A lane
//! exists only while it has work and retires itself once drained.

use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::StreamExt;
use futures::future::join_all;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, debug_span, info, warn};

use tenantry_core::{
    CancellationToken, ConfigEvent, ConfigEventKind, ConfigEventStream, Error, Result,
    TenantConfiguration, TenantId,
};

use crate::bulk::BulkOperationReport;
use crate::manager::TenantEngineManager;
use crate::registry::TenantEngineRecord;

/// What handling a configuration event did
#[derive(Debug)]
pub enum ReconcileOutcome {
    /// The path is not a tenant configuration of this service
    Ignored,
    /// The tenant's engine runs the delivered configuration
    Applied(TenantEngineRecord),
    /// The tenant's engine was removed
    Removed(TenantId),
}

impl ReconcileOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            ReconcileOutcome::Ignored => "ignored",
            ReconcileOutcome::Applied(_) => "applied",
            ReconcileOutcome::Removed(_) => "removed",
        }
    }
}

struct Lane {
    id: u64,
    sender: mpsc::UnboundedSender<ConfigEvent>,
}

/// Maps configuration events to lifecycle transitions
#[derive(Clone)]
pub struct ReconciliationCoordinator {
    manager: TenantEngineManager,
    lanes: Arc<DashMap<TenantId, Lane>>,
    next_lane_id: Arc<AtomicU64>,
}

impl ReconciliationCoordinator {
    pub fn new(manager: TenantEngineManager) -> Self {
        Self {
            manager,
            lanes: Arc::new(DashMap::new()),
            next_lane_id: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn manager(&self) -> &TenantEngineManager {
        &self.manager
    }

    /// A configuration appeared. Treated like an update when the tenant is
    /// already registered, since deliveries may be duplicated.
    pub async fn on_configuration_added(&self, path: &str, data: Bytes) -> Result<ReconcileOutcome> {
        self.apply(path, data).await
    }

    /// A configuration changed. Delivering the version the engine already
    /// runs changes nothing.
    pub async fn on_configuration_updated(
        &self,
        path: &str,
        data: Bytes,
    ) -> Result<ReconcileOutcome> {
        self.apply(path, data).await
    }

    /// A configuration was deleted; the tenant's engine is removed
    pub async fn on_configuration_deleted(&self, path: &str) -> Result<ReconcileOutcome> {
        let Some(tenant_id) = self.resolve(path) else {
            return Ok(ReconcileOutcome::Ignored);
        };
        self.manager.remove_tenant_engine(&tenant_id).await?;
        Ok(ReconcileOutcome::Removed(tenant_id))
    }

    async fn apply(&self, path: &str, data: Bytes) -> Result<ReconcileOutcome> {
        let Some(tenant_id) = self.resolve(path) else {
            return Ok(ReconcileOutcome::Ignored);
        };
        let config = TenantConfiguration::new(path, data);
        let record = self
            .manager
            .apply_tenant_configuration(&tenant_id, config)
            .await?;
        Ok(ReconcileOutcome::Applied(record))
    }

    fn resolve(&self, path: &str) -> Option<TenantId> {
        let tenant_id = self.manager.paths().resolve(path);
        if tenant_id.is_none() {
            debug!(path = %path, "Ignoring path outside tenant configurations");
        }
        tenant_id
    }

    /// Handle one event to completion, recording its outcome
    pub async fn handle_event(&self, event: ConfigEvent) -> Result<ReconcileOutcome> {
        let span = debug_span!("config_event", path = %event.path, kind = %event.kind);
        let kind = event.kind;

        let result = async move {
            match (event.kind, event.data) {
                (ConfigEventKind::Added, Some(data)) => {
                    self.on_configuration_added(&event.path, data).await
                }
                (ConfigEventKind::Updated, Some(data)) => {
                    self.on_configuration_updated(&event.path, data).await
                }
                (ConfigEventKind::Deleted, _) => self.on_configuration_deleted(&event.path).await,
                (kind, None) => Err(Error::ConfigStore(format!(
                    "{} event for '{}' carries no payload",
                    kind, event.path
                ))),
            }
        }
        .instrument(span)
        .await;

        if let Some(metrics) = self.manager.metrics() {
            let outcome = match &result {
                Ok(outcome) => outcome.as_str(),
                Err(_) => "failed",
            };
            metrics.record_config_event(kind.as_str(), outcome);
        }
        result
    }

    /// Queue an event on its tenant's lane
    pub fn dispatch(&self, event: ConfigEvent) {
        let Some(tenant_id) = self.manager.paths().resolve(&event.path) else {
            debug!(path = %event.path, "Ignoring path outside tenant configurations");
            if let Some(metrics) = self.manager.metrics() {
                metrics.record_config_event(event.kind.as_str(), "ignored");
            }
            return;
        };

        match self.lanes.entry(tenant_id.clone()) {
            Entry::Occupied(mut entry) => {
                if let Err(mpsc::error::SendError(event)) = entry.get().sender.send(event) {
                    // The lane's task is gone; start a new one
                    entry.insert(self.open_lane(tenant_id, event));
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(self.open_lane(tenant_id, event));
            }
        }
    }

    /// Number of tenants with queued or in-progress events
    pub fn active_lanes(&self) -> usize {
        self.lanes.len()
    }

    fn open_lane(&self, tenant_id: TenantId, first: ConfigEvent) -> Lane {
        let id = self.next_lane_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();
        // The receiver is alive, so this cannot fail
        let _ = sender.send(first);

        let coordinator = self.clone();
        tokio::spawn(async move { coordinator.drain_lane(tenant_id, id, receiver).await });

        Lane { id, sender }
    }

    async fn drain_lane(
        self,
        tenant_id: TenantId,
        lane_id: u64,
        mut receiver: mpsc::UnboundedReceiver<ConfigEvent>,
    ) {
        loop {
            match receiver.try_recv() {
                Ok(event) => {
                    let kind = event.kind;
                    if let Err(e) = self.handle_event(event).await {
                        warn!(
                            tenant_id = %tenant_id,
                            kind = %kind,
                            error = %e,
                            "Failed to reconcile configuration event"
                        );
                    }
                }
                Err(TryRecvError::Empty) => {
                    // Senders hold the map entry while sending, so the
                    // emptiness check cannot race with a new event
                    let retired = self
                        .lanes
                        .remove_if(&tenant_id, |_, lane| {
                            lane.id == lane_id && receiver.is_empty()
                        })
                        .is_some();
                    let replaced = !self
                        .lanes
                        .get(&tenant_id)
                        .is_some_and(|lane| lane.id == lane_id);
                    if retired || (replaced && receiver.is_empty()) {
                        break;
                    }
                }
                Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    /// Dispatch events from `events` until it ends or `cancel` fires
    pub async fn run(&self, mut events: ConfigEventStream, cancel: CancellationToken) {
        info!(root = self.manager.paths().root(), "Reconciliation dispatcher started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Reconciliation dispatcher stopping");
                    break;
                }
                next = events.next() => match next {
                    Some(Ok(event)) => self.dispatch(event),
                    Some(Err(e)) => warn!(error = %e, "Configuration watch error"),
                    None => {
                        warn!("Configuration watch stream ended");
                        break;
                    }
                },
            }
        }
    }

    /// Open a watch on the tenant configuration root
    pub async fn watch(&self) -> Result<ConfigEventStream> {
        self.manager.store().watch(self.manager.paths().root()).await
    }

    /// Run the dispatcher in a background task
    pub fn spawn(&self, events: ConfigEventStream, cancel: CancellationToken) -> JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move { coordinator.run(events, cancel).await })
    }

    /// Apply every tenant configuration already in the store.
    ///
    /// Meant for startup: open the watch first, reconcile, then start the
    /// dispatcher on that watch. Changes made meanwhile are then applied
    /// after the snapshot, in order, and replays of the snapshot itself
    /// are no-ops.
    pub async fn reconcile_existing(&self) -> Result<BulkOperationReport> {
        let store = self.manager.store();
        let paths = store.list(self.manager.paths().root()).await?;

        let tenants: Vec<(TenantId, String)> = paths
            .into_iter()
            .filter_map(|path| self.resolve(&path).map(|tenant_id| (tenant_id, path)))
            .collect();
        info!(tenants = tenants.len(), "Reconciling existing tenant configurations");

        let results = join_all(tenants.into_iter().map(|(tenant_id, path)| async move {
            let result = match store.read(&path).await {
                Ok(Some(data)) => self
                    .manager
                    .apply_tenant_configuration(&tenant_id, TenantConfiguration::new(path, data))
                    .await
                    .map(|_| ()),
                // Deleted since listing
                Ok(None) => Ok(()),
                Err(e) => Err(e),
            };
            (tenant_id, result)
        }))
        .await;

        let report = BulkOperationReport::from_results("reconcile", results);
        if report.is_success() {
            info!("{}", report);
        } else {
            for (tenant_id, error) in &report.failed {
                warn!(tenant_id = %tenant_id, error = %error, "Failed to reconcile tenant configuration");
            }
            warn!("{}", report);
        }
        Ok(report)
    }
}
