//! Sample hosted engine
//!
//! `HeartbeatEngine` emits a log line per tenant on a fixed period. The
//! ticker is one tokio task per tenant, stopped through its own
//! cancellation token. A changed period is applied in place; a changed
//! label needs a restart.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use tenantry_core::{
    CancellationToken, Error, Reconfiguration, Result, TenantConfiguration, TenantEngine,
    TenantEngineFactory, TenantId,
};

/// Per-tenant heartbeat settings, read from the tenant's configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatSettings {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    #[serde(default = "default_label")]
    pub label: String,
}

fn default_interval_secs() -> u64 {
    10
}

fn default_label() -> String {
    "heartbeat".to_string()
}

impl HeartbeatSettings {
    pub fn parse(config: &TenantConfiguration) -> Result<Self> {
        let settings: HeartbeatSettings = serde_yaml::from_slice(&config.data)
            .map_err(|e| Error::Config(format!("Invalid heartbeat settings in {}: {}", config.path, e)))?;
        if settings.interval_secs == 0 {
            return Err(Error::Config("interval_secs must be greater than 0".to_string()));
        }
        Ok(settings)
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

struct Ticker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct HeartbeatEngine {
    tenant_id: TenantId,
    settings: Mutex<Option<HeartbeatSettings>>,
    interval: watch::Sender<Duration>,
    ticker: Mutex<Option<Ticker>>,
    ticks: Arc<AtomicU64>,
}

impl HeartbeatEngine {
    pub fn new(tenant_id: TenantId) -> Self {
        let (interval, _) = watch::channel(Duration::from_secs(default_interval_secs()));
        Self {
            tenant_id,
            settings: Mutex::new(None),
            interval,
            ticker: Mutex::new(None),
            ticks: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Heartbeats emitted so far
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.ticker
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .is_some()
    }

    #[cfg(test)]
    pub fn current_interval(&self) -> Duration {
        *self.interval.borrow()
    }

    fn label(&self) -> Result<String> {
        self.settings
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .map(|settings| settings.label.clone())
            .ok_or_else(|| Error::Engine("heartbeat engine not initialized".to_string()))
    }
}

async fn run_ticker(
    tenant_id: TenantId,
    label: String,
    mut interval_rx: watch::Receiver<Duration>,
    ticks: Arc<AtomicU64>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(*interval_rx.borrow_and_update());
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = interval_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let period = *interval_rx.borrow_and_update();
                debug!(tenant_id = %tenant_id, period_secs = period.as_secs(), "Heartbeat period changed");
                ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            }
            _ = ticker.tick() => {
                let n = ticks.fetch_add(1, Ordering::Relaxed) + 1;
                info!(tenant_id = %tenant_id, label = %label, tick = n, "Heartbeat");
            }
        }
    }
}

#[async_trait]
impl TenantEngine for HeartbeatEngine {
    async fn initialize(
        &self,
        config: &TenantConfiguration,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        let settings = HeartbeatSettings::parse(config)?;
        self.interval.send_replace(settings.interval());
        *self.settings.lock().unwrap_or_else(|p| p.into_inner()) = Some(settings);
        Ok(())
    }

    async fn start(&self, _cancel: &CancellationToken) -> Result<()> {
        let label = self.label()?;
        let mut ticker = self.ticker.lock().unwrap_or_else(|p| p.into_inner());
        if ticker.is_some() {
            return Ok(());
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_ticker(
            self.tenant_id.clone(),
            label,
            self.interval.subscribe(),
            self.ticks.clone(),
            cancel.clone(),
        ));
        *ticker = Some(Ticker { cancel, handle });
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let ticker = self.ticker.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(ticker) = ticker {
            ticker.cancel.cancel();
            ticker
                .handle
                .await
                .map_err(|e| Error::Engine(format!("heartbeat task failed: {}", e)))?;
            debug!(tenant_id = %self.tenant_id, ticks = self.ticks(), "Heartbeat stopped");
        }
        Ok(())
    }

    async fn reconfigure(&self, config: &TenantConfiguration) -> Result<Reconfiguration> {
        let settings = HeartbeatSettings::parse(config)?;
        if settings.label != self.label()? {
            return Ok(Reconfiguration::RestartRequired);
        }

        self.interval.send_replace(settings.interval());
        *self.settings.lock().unwrap_or_else(|p| p.into_inner()) = Some(settings);
        Ok(Reconfiguration::Applied)
    }
}

/// Creates one `HeartbeatEngine` per tenant
#[derive(Debug, Default, Clone)]
pub struct HeartbeatEngineFactory;

impl TenantEngineFactory for HeartbeatEngineFactory {
    fn create(&self, tenant_id: &TenantId) -> Result<Arc<dyn TenantEngine>> {
        Ok(Arc::new(HeartbeatEngine::new(tenant_id.clone())))
    }
}
