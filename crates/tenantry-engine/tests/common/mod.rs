//! Shared fakes for lifecycle manager integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tenantry_config_memory::InMemoryConfigStore;
use tenantry_core::{
    CancellationToken, Error, Reconfiguration, Result, TenantConfiguration, TenantEngine,
    TenantEngineFactory, TenantId,
};
use tenantry_engine::{ManagerConfig, TenantEngineManager};

pub fn tenant(id: &str) -> TenantId {
    TenantId::parse(id).unwrap()
}

pub fn config_path(id: &str) -> String {
    format!("/tenants/{}/engine.yaml", id)
}

/// Counters and failure switches shared by every engine a factory creates
#[derive(Default)]
pub struct EngineScript {
    pub created: AtomicUsize,
    pub initializing: AtomicUsize,
    pub max_initializing: AtomicUsize,
    pub started: AtomicUsize,
    pub stopped: AtomicUsize,
    pub init_delay_ms: AtomicU64,
    pub hot_reconfigure: AtomicBool,
    pub fail_init: Mutex<HashSet<String>>,
    pub fail_start: Mutex<HashSet<String>>,
    pub fail_stop: Mutex<HashSet<String>>,
    /// (tenant, payload) for every initialize and applied reconfigure
    pub applied: Mutex<Vec<(String, String)>>,
}

impl EngineScript {
    fn fails(set: &Mutex<HashSet<String>>, tenant_id: &str) -> bool {
        set.lock().unwrap().contains(tenant_id)
    }
}

/// Decrements the in-flight initialization count even when the
/// initialization future is dropped by cancellation
struct InitializingGuard<'a>(&'a AtomicUsize);

impl Drop for InitializingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct TestEngine {
    tenant_id: String,
    script: Arc<EngineScript>,
    running: AtomicBool,
}

#[async_trait]
impl TenantEngine for TestEngine {
    async fn initialize(
        &self,
        config: &TenantConfiguration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let now = self.script.initializing.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InitializingGuard(&self.script.initializing);
        self.script.max_initializing.fetch_max(now, Ordering::SeqCst);

        let delay = Duration::from_millis(self.script.init_delay_ms.load(Ordering::SeqCst));
        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }

        if EngineScript::fails(&self.script.fail_init, &self.tenant_id) {
            return Err(Error::Engine(format!("{} rejected configuration", self.tenant_id)));
        }

        self.script.applied.lock().unwrap().push((
            self.tenant_id.clone(),
            String::from_utf8_lossy(&config.data).to_string(),
        ));
        Ok(())
    }

    async fn start(&self, _cancel: &CancellationToken) -> Result<()> {
        if EngineScript::fails(&self.script.fail_start, &self.tenant_id) {
            return Err(Error::Engine(format!("{} port in use", self.tenant_id)));
        }
        self.running.store(true, Ordering::SeqCst);
        self.script.started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if EngineScript::fails(&self.script.fail_stop, &self.tenant_id) {
            return Err(Error::Engine(format!("{} stop timed out", self.tenant_id)));
        }
        if self.running.swap(false, Ordering::SeqCst) {
            self.script.stopped.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn reconfigure(&self, config: &TenantConfiguration) -> Result<Reconfiguration> {
        if !self.script.hot_reconfigure.load(Ordering::SeqCst) {
            return Ok(Reconfiguration::RestartRequired);
        }
        self.script.applied.lock().unwrap().push((
            self.tenant_id.clone(),
            String::from_utf8_lossy(&config.data).to_string(),
        ));
        Ok(Reconfiguration::Applied)
    }
}

/// Factory handing out `TestEngine`s driven by one shared script
#[derive(Clone, Default)]
pub struct TestEngineFactory {
    pub script: Arc<EngineScript>,
}

impl TestEngineFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created(&self) -> usize {
        self.script.created.load(Ordering::SeqCst)
    }

    pub fn initializing(&self) -> usize {
        self.script.initializing.load(Ordering::SeqCst)
    }

    pub fn max_initializing(&self) -> usize {
        self.script.max_initializing.load(Ordering::SeqCst)
    }

    pub fn stopped(&self) -> usize {
        self.script.stopped.load(Ordering::SeqCst)
    }

    pub fn set_init_delay(&self, delay: Duration) {
        self.script
            .init_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_hot_reconfigure(&self, enabled: bool) {
        self.script.hot_reconfigure.store(enabled, Ordering::SeqCst);
    }

    pub fn fail_init(&self, tenant_id: &str, fail: bool) {
        toggle(&self.script.fail_init, tenant_id, fail);
    }

    pub fn fail_start(&self, tenant_id: &str, fail: bool) {
        toggle(&self.script.fail_start, tenant_id, fail);
    }

    pub fn fail_stop(&self, tenant_id: &str, fail: bool) {
        toggle(&self.script.fail_stop, tenant_id, fail);
    }

    /// Payloads applied to a tenant's engines, oldest first
    pub fn applied(&self, tenant_id: &str) -> Vec<String> {
        self.script
            .applied
            .lock()
            .unwrap()
            .iter()
            .filter(|(tenant, _)| tenant == tenant_id)
            .map(|(_, payload)| payload.clone())
            .collect()
    }
}

fn toggle(set: &Mutex<HashSet<String>>, tenant_id: &str, enabled: bool) {
    let mut set = set.lock().unwrap();
    if enabled {
        set.insert(tenant_id.to_string());
    } else {
        set.remove(tenant_id);
    }
}

impl TenantEngineFactory for TestEngineFactory {
    fn create(&self, tenant_id: &TenantId) -> Result<Arc<dyn TenantEngine>> {
        self.script.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(TestEngine {
            tenant_id: tenant_id.to_string(),
            script: self.script.clone(),
            running: AtomicBool::new(false),
        }))
    }
}

pub fn manager_with_config(
    store: Arc<InMemoryConfigStore>,
    factory: &TestEngineFactory,
    config: ManagerConfig,
) -> TenantEngineManager {
    TenantEngineManager::builder(store, Arc::new(factory.clone()))
        .config(config)
        .build()
        .unwrap()
}

pub fn manager(store: Arc<InMemoryConfigStore>, factory: &TestEngineFactory) -> TenantEngineManager {
    manager_with_config(store, factory, ManagerConfig::default())
}

/// Poll `condition` until it holds, panicking after five seconds
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
