//! In-memory ConfigStore implementation

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use std::collections::BTreeMap;
use std::sync::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use tenantry_core::{
    Error, Result,
    config_store::{
        ConfigEvent, ConfigEventStream, ConfigStore, is_under_prefix, normalize_path,
    },
};

/// Default number of undelivered events a slow watcher may fall behind by
const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// In-memory configuration store
///
/// Writes and deletes are applied under one lock and broadcast while it is
/// held, so watchers observe changes to a path in the order they were made.
#[derive(Debug)]
pub struct InMemoryConfigStore {
    entries: RwLock<BTreeMap<String, Bytes>>,
    events: broadcast::Sender<ConfigEvent>,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// Create a store whose watchers may lag by at most `capacity` events
    pub fn with_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            entries: RwLock::new(BTreeMap::new()),
            events,
        }
    }

    /// Deliver an event to watchers without touching stored data.
    ///
    /// Used to reproduce duplicate or out-of-order delivery.
    pub fn inject(&self, event: ConfigEvent) {
        self.broadcast(event);
    }

    /// Re-deliver the current payload at `path` as an `Updated` event
    pub fn redeliver(&self, path: &str) -> Result<bool> {
        let path = normalize_path(path)?;
        let entries = self
            .entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match entries.get(&path) {
            Some(data) => {
                self.broadcast(ConfigEvent::updated(path, data.clone()));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Number of stored paths
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn broadcast(&self, event: ConfigEvent) {
        if self.events.send(event).is_err() {
            debug!("No configuration watchers registered");
        }
    }
}

impl Default for InMemoryConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConfigStore for InMemoryConfigStore {
    async fn read(&self, path: &str) -> Result<Option<Bytes>> {
        let path = normalize_path(path)?;
        let entries = self
            .entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(entries.get(&path).cloned())
    }

    async fn write(&self, path: &str, data: Bytes) -> Result<()> {
        let path = normalize_path(path)?;
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let event = match entries.insert(path.clone(), data.clone()) {
            Some(_) => ConfigEvent::updated(path, data),
            None => ConfigEvent::added(path, data),
        };
        debug!(path = %event.path, kind = %event.kind, "Configuration written");
        self.broadcast(event);
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let path = normalize_path(path)?;
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if entries.remove(&path).is_some() {
            debug!(path = %path, "Configuration deleted");
            self.broadcast(ConfigEvent::deleted(path));
        }
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let entries = self
            .entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(entries
            .keys()
            .filter(|path| is_under_prefix(path, prefix))
            .cloned()
            .collect())
    }

    async fn watch(&self, prefix: &str) -> Result<ConfigEventStream> {
        let rx = self.events.subscribe();
        let prefix = prefix.to_string();

        let stream = stream::unfold((rx, prefix), |(mut rx, prefix)| async move {
            loop {
                match rx.recv().await {
                    Ok(event) if is_under_prefix(&event.path, &prefix) => {
                        return Some((Ok(event), (rx, prefix)));
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, prefix = %prefix, "Configuration watcher lagged");
                        let err = Error::ConfigStore(format!(
                            "watcher lagged, {} events dropped",
                            skipped
                        ));
                        return Some((Err(err), (rx, prefix)));
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });

        Ok(Box::pin(stream))
    }
}
