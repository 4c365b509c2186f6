//! Lifecycle procedures
//!
//! Everything here runs while holding the tenant's lifecycle lock, inside
//! a task spawned by `spawn_locked`. Running the procedure in its own task
//! means a caller that stops waiting (timeout, dropped request) never
//! abandons an engine halfway through a transition.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::OwnedMutexGuard;
use tracing::{Instrument, debug, info, info_span, warn};

use tenantry_core::{
    Error, LifecycleError, LifecyclePhase, LifecycleState, Reconfiguration, Result,
    TenantConfiguration, TenantId,
};

use crate::manager::ManagerInner;
use crate::registry::{TenantEngineRecord, TenantSlot};

/// Lifecycle operation, as labelled in logs and metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LifecycleOperation {
    Initialize,
    Reconfigure,
    Restart,
    Remove,
}

impl LifecycleOperation {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            LifecycleOperation::Initialize => "initialize",
            LifecycleOperation::Reconfigure => "reconfigure",
            LifecycleOperation::Restart => "restart",
            LifecycleOperation::Remove => "remove",
        }
    }
}

/// Outcome label of a finished operation
pub(crate) trait OperationOutput {
    fn outcome(&self) -> &'static str;
}

impl OperationOutput for () {
    fn outcome(&self) -> &'static str {
        "success"
    }
}

impl OperationOutput for TenantEngineRecord {
    fn outcome(&self) -> &'static str {
        if self.is_started() {
            "success"
        } else {
            self.state.as_str()
        }
    }
}

/// Map a settled record to the result of a restart or reconfiguration
pub(crate) fn settle(record: TenantEngineRecord) -> Result<TenantEngineRecord> {
    let state = record.state;
    match state {
        LifecycleState::Started => Ok(record),
        LifecycleState::Unconfigured => Err(Error::TenantNotConfigured(record.tenant_id)),
        LifecycleState::Stopped => Err(Error::Cancelled),
        _ => {
            let cause = record.last_error.unwrap_or_else(|| {
                LifecycleError::new(
                    LifecyclePhase::Initialize,
                    format!("engine ended in state {}", state),
                )
            });
            Err(Error::Lifecycle {
                tenant_id: record.tenant_id,
                cause,
            })
        }
    }
}

impl ManagerInner {
    /// Run `work` in its own task while holding `guard` and a worker permit
    pub(crate) async fn spawn_locked<F, Fut, T>(
        self: &Arc<Self>,
        slot: Arc<TenantSlot>,
        guard: OwnedMutexGuard<()>,
        operation: LifecycleOperation,
        work: F,
    ) -> Result<T>
    where
        F: FnOnce(Arc<ManagerInner>, Arc<TenantSlot>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: OperationOutput + Send + 'static,
    {
        let span = info_span!(
            "tenant_lifecycle",
            tenant_id = %slot.tenant_id(),
            operation = operation.as_str()
        );
        let inner = self.clone();

        let task = async move {
            let _guard = guard;
            let _permit = inner
                .workers
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| Error::Internal("lifecycle worker pool closed".to_string()))?;

            let started = Instant::now();
            let result = work(inner.clone(), slot).await;

            if let Some(metrics) = &inner.metrics {
                let outcome = match &result {
                    Ok(output) => output.outcome(),
                    Err(_) => "failure",
                };
                metrics.record_operation(
                    operation.as_str(),
                    outcome,
                    started.elapsed().as_secs_f64(),
                );
            }
            result
        };

        tokio::spawn(task.instrument(span))
            .await
            .map_err(|e| Error::Internal(format!("{} task failed: {}", operation.as_str(), e)))?
    }

    /// Read a tenant's configuration from the store
    pub(crate) async fn load_configuration(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Option<TenantConfiguration>> {
        let path = self.paths.configuration_path(tenant_id);
        let data = self.store.read(&path).await?;
        Ok(data.map(|data| TenantConfiguration::new(path, data)))
    }

    /// Create, initialize and start a fresh engine.
    ///
    /// Uses `config` when given, otherwise the tenant's configuration in
    /// the store. Returns the settled record: `Started`, `Failed`,
    /// `Unconfigured` (no configuration) or `Stopped` (cancelled).
    pub(crate) async fn initialize_locked(
        &self,
        slot: &TenantSlot,
        config: Option<TenantConfiguration>,
    ) -> Result<TenantEngineRecord> {
        let tenant_id = slot.tenant_id();
        let leftover = slot.record().engine().cloned();
        if let Some(engine) = leftover {
            // Left behind by an earlier failed stop
            if let Err(e) = engine.stop().await {
                warn!(error = %e, "Discarding tenant engine that failed to stop");
            }
        }
        slot.transition(LifecycleState::Initializing, |record| {
            record.attempts += 1;
            record.set_engine(None);
        })?;

        let config = match config {
            Some(config) => config,
            None => match self.load_configuration(tenant_id).await {
                Ok(Some(config)) => config,
                Ok(None) => {
                    info!("No configuration found for tenant");
                    let cause =
                        LifecycleError::new(LifecyclePhase::Configure, "no configuration found");
                    return slot.transition(LifecycleState::Unconfigured, |record| {
                        record.config_version = None;
                        record.last_error = Some(cause);
                    });
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load tenant configuration");
                    return fail(slot, LifecycleError::new(LifecyclePhase::Configure, &e));
                }
            },
        };

        let engine = match self.factory.create(tenant_id) {
            Ok(engine) => engine,
            Err(e) => {
                warn!(error = %e, "Failed to create tenant engine");
                return fail(slot, LifecycleError::new(LifecyclePhase::Initialize, &e));
            }
        };

        let cancel = slot.begin_initialization();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err((LifecyclePhase::Initialize, Error::Cancelled)),
            result = async {
                if let Err(e) = engine.initialize(&config, &cancel).await {
                    return Err((LifecyclePhase::Initialize, e));
                }
                engine.start(&cancel).await.map_err(|e| (LifecyclePhase::Start, e))
            } => result,
        };
        slot.end_initialization();

        match outcome {
            Ok(()) => {
                info!(version = config.version.short(), "Tenant engine started");
                slot.transition(LifecycleState::Started, |record| {
                    record.config_version = Some(config.version.clone());
                    record.last_error = None;
                    record.set_engine(Some(engine));
                })
            }
            Err((phase, Error::Cancelled)) => {
                info!(phase = phase.as_str(), "Tenant engine initialization cancelled");
                if let Err(e) = engine.stop().await {
                    debug!(error = %e, "Stopping interrupted engine failed");
                }
                slot.transition(LifecycleState::Stopped, |record| {
                    record.config_version = None;
                })
            }
            Err((phase, e)) => {
                warn!(phase = phase.as_str(), error = %e, "Tenant engine failed to start");
                // Initialization succeeded, so the engine holds resources
                if phase == LifecyclePhase::Start
                    && let Err(stop_err) = engine.stop().await
                {
                    debug!(error = %stop_err, "Stopping engine after failed start failed");
                }
                fail(slot, LifecycleError::new(phase, &e))
            }
        }
    }

    /// Stop a started engine; on failure the entry is marked `Failed`
    /// and keeps its engine.
    async fn stop_locked(&self, slot: &TenantSlot) -> Result<()> {
        let record = slot.record();
        slot.transition(LifecycleState::Stopping, |_| {})?;

        let result = match record.engine() {
            Some(engine) => engine.stop().await,
            None => Ok(()),
        };

        match result {
            Ok(()) => {
                slot.transition(LifecycleState::Stopped, |record| record.set_engine(None))?;
                info!("Tenant engine stopped");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Tenant engine failed to stop");
                let cause = LifecycleError::new(LifecyclePhase::Stop, &e);
                slot.transition(LifecycleState::Failed, |record| {
                    record.last_error = Some(cause.clone());
                })?;
                Err(Error::Lifecycle {
                    tenant_id: slot.tenant_id().clone(),
                    cause,
                })
            }
        }
    }

    /// Stop the running engine (if any) and initialize a fresh one
    pub(crate) async fn restart_locked(
        &self,
        slot: &TenantSlot,
        config: Option<TenantConfiguration>,
    ) -> Result<TenantEngineRecord> {
        if slot.record().is_started() {
            self.stop_locked(slot).await?;
        }

        let record = self.initialize_locked(slot, config).await?;
        settle(record)
    }

    /// Bring the engine in line with `config`: nothing if it already runs
    /// that version, in place if the engine supports it, else by restart.
    pub(crate) async fn reconfigure_locked(
        &self,
        slot: &TenantSlot,
        config: TenantConfiguration,
    ) -> Result<TenantEngineRecord> {
        let record = slot.record();
        if record.is_started() && record.config_version.as_ref() == Some(&config.version) {
            debug!(version = config.version.short(), "Configuration unchanged");
            return Ok(record);
        }

        let engine = match (record.state, record.engine()) {
            (LifecycleState::Started, Some(engine)) => engine.clone(),
            _ => {
                let record = self.initialize_locked(slot, Some(config)).await?;
                return settle(record);
            }
        };

        match engine.reconfigure(&config).await {
            Ok(Reconfiguration::Applied) => {
                info!(version = config.version.short(), "Configuration applied in place");
                slot.transition(LifecycleState::Started, |record| {
                    record.config_version = Some(config.version.clone());
                    record.last_error = None;
                })
            }
            Ok(Reconfiguration::RestartRequired) => {
                info!(version = config.version.short(), "Configuration requires restart");
                self.restart_locked(slot, Some(config)).await
            }
            Err(e) => {
                warn!(error = %e, "In-place reconfiguration failed, restarting");
                self.restart_locked(slot, Some(config)).await
            }
        }
    }

    /// Stop (best effort) and deregister the tenant's engine
    pub(crate) async fn remove_locked(&self, slot: &TenantSlot) -> Result<()> {
        let record = slot.record();
        if let Err(e) = slot.transition(LifecycleState::Removing, |_| {}) {
            warn!(error = %e, "Removing tenant engine from unexpected state");
        }

        if let Some(engine) = record.engine() {
            match engine.stop().await {
                Ok(()) => debug!("Tenant engine stopped for removal"),
                Err(e) => warn!(error = %e, "Tenant engine failed to stop during removal"),
            }
        }

        slot.detach();
        self.registry.remove(slot.tenant_id());
        info!("Tenant engine removed");
        Ok(())
    }
}

fn fail(slot: &TenantSlot, cause: LifecycleError) -> Result<TenantEngineRecord> {
    slot.transition(LifecycleState::Failed, |record| {
        record.last_error = Some(cause);
    })
}
