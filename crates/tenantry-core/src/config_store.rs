//! Configuration store trait
//!
//! The `ConfigStore` trait abstracts the hierarchical, path-addressed and
//! watchable key/value store that holds tenant configuration. Paths are
//! `/`-separated strings such as `/tenants/acme/engine.yaml`; payloads are
//! opaque bytes.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::fmt;

use crate::{Error, Result};

/// Type alias for configuration change streams
pub type ConfigEventStream = BoxStream<'static, Result<ConfigEvent>>;

/// Kind of change reported for a path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigEventKind {
    Added,
    Updated,
    Deleted,
}

impl ConfigEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigEventKind::Added => "added",
            ConfigEventKind::Updated => "updated",
            ConfigEventKind::Deleted => "deleted",
        }
    }
}

impl fmt::Display for ConfigEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration change notification
///
/// Delivery is at-least-once and not ordered across unrelated paths.
#[derive(Debug, Clone)]
pub struct ConfigEvent {
    /// Store path that changed
    pub path: String,

    /// Kind of change
    pub kind: ConfigEventKind,

    /// Payload after the change (None for deletions)
    pub data: Option<Bytes>,

    /// Timestamp of the change
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ConfigEvent {
    pub fn added(path: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self::new(path, ConfigEventKind::Added, Some(data.into()))
    }

    pub fn updated(path: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self::new(path, ConfigEventKind::Updated, Some(data.into()))
    }

    pub fn deleted(path: impl Into<String>) -> Self {
        Self::new(path, ConfigEventKind::Deleted, None)
    }

    fn new(path: impl Into<String>, kind: ConfigEventKind, data: Option<Bytes>) -> Self {
        Self {
            path: path.into(),
            kind,
            data,
            timestamp: chrono::Utc::now(),
        }
    }
}

/// Configuration store trait
///
/// Implementations:
/// - `InMemoryConfigStore`: in-process store (tests, embedding)
/// - `FileConfigStore`: directory tree on disk, watched with `notify`
///
/// # Example
/// ```no_run
/// # use tenantry_core::config_store::ConfigStore;
/// # async fn example(store: &dyn ConfigStore) -> tenantry_core::Result<()> {
/// store.write("/tenants/acme/engine.yaml", "interval_secs: 5".into()).await?;
/// let data = store.read("/tenants/acme/engine.yaml").await?;
/// assert!(data.is_some());
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Read the payload stored at `path`
    ///
    /// Returns `Ok(None)` if nothing is stored there.
    async fn read(&self, path: &str) -> Result<Option<Bytes>>;

    /// Create or replace the payload stored at `path`
    ///
    /// Watchers of a matching prefix receive an `Added` or `Updated`
    /// notification afterwards.
    async fn write(&self, path: &str, data: Bytes) -> Result<()>;

    /// Delete the payload stored at `path`
    ///
    /// Deleting a missing path is not an error.
    async fn delete(&self, _path: &str) -> Result<()> {
        Err(Error::ConfigStore(
            "Delete not supported by this store".to_string(),
        ))
    }

    /// List every path stored under `prefix`
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Watch for changes under `prefix`
    ///
    /// Returns a stream of notifications for every path starting with
    /// `prefix`. The stream ends when the store shuts down.
    async fn watch(&self, prefix: &str) -> Result<ConfigEventStream>;
}

/// Normalize a store path: leading `/`, no empty segments, no trailing `/`.
pub fn normalize_path(path: &str) -> Result<String> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return Err(Error::InvalidPath(format!("'{}' has no segments", path)));
    }
    if let Some(bad) = segments.iter().find(|s| **s == "." || **s == "..") {
        return Err(Error::InvalidPath(format!(
            "'{}' contains relative segment '{}'",
            path, bad
        )));
    }
    Ok(format!("/{}", segments.join("/")))
}

/// Whether a normalized `path` lies under `prefix`, compared segment-wise.
///
/// `/tenants` covers `/tenants/acme/engine.yaml` but not `/tenantsx/a`;
/// an empty prefix or `/` covers everything.
pub fn is_under_prefix(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return true;
    }
    path == prefix
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}
