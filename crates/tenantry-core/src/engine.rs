//! Tenant engine lifecycle contract
//!
//! A tenant engine is the runtime instance that processes one tenant's
//! data. The lifecycle manager only ever talks to engines through the
//! `TenantEngine` trait and creates them through a `TenantEngineFactory`,
//! so any number of engine variants can be hosted side by side.

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::{Result, TenantConfiguration, TenantId};

/// Outcome of offering a new configuration to a running engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconfiguration {
    /// The engine applied the configuration in place
    Applied,
    /// The engine must be restarted to pick up the configuration
    RestartRequired,
}

/// Lifecycle contract implemented by hosted tenant engines.
///
/// Each call is scoped: an engine must release whatever it allocated in a
/// call that fails, as well as on `stop`. `initialize` and `start` receive
/// a cancellation token and should return `Error::Cancelled` promptly once
/// it fires; the manager cancels it when a restart or removal interrupts
/// an in-progress initialization.
#[async_trait]
pub trait TenantEngine: Send + Sync {
    /// Prepare the engine from its configuration payload
    async fn initialize(
        &self,
        config: &TenantConfiguration,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Start processing
    async fn start(&self, cancel: &CancellationToken) -> Result<()>;

    /// Stop processing and release runtime resources
    async fn stop(&self) -> Result<()>;

    /// Offer a new configuration to a started engine
    ///
    /// Engines that cannot reconfigure in place keep the default, which
    /// asks the manager for a restart with the new configuration.
    async fn reconfigure(&self, _config: &TenantConfiguration) -> Result<Reconfiguration> {
        Ok(Reconfiguration::RestartRequired)
    }
}

/// Creates a fresh engine instance for a tenant.
///
/// Called once per initialization attempt; instances are never reused
/// across a remove/recreate cycle.
pub trait TenantEngineFactory: Send + Sync {
    fn create(&self, tenant_id: &TenantId) -> Result<Arc<dyn TenantEngine>>;
}

impl<F> TenantEngineFactory for F
where
    F: Fn(&TenantId) -> Result<Arc<dyn TenantEngine>> + Send + Sync,
{
    fn create(&self, tenant_id: &TenantId) -> Result<Arc<dyn TenantEngine>> {
        self(tenant_id)
    }
}
