//! File-based ConfigStore implementation

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use tenantry_core::{
    Error, Result,
    config_store::{
        ConfigEvent, ConfigEventStream, ConfigStore, is_under_prefix, normalize_path,
    },
};

/// How often the watcher thread checks whether its stream was dropped
const WATCH_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Sequence for temporary file names used by atomic writes
static WRITE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Directory-backed configuration store
///
/// Every store path maps to a regular file below `root`. Files and
/// directories whose name starts with `.` are not part of the store; writes
/// go to such a temporary file first and are renamed into place, so readers
/// and watchers never see a partially written payload.
#[derive(Debug)]
pub struct FileConfigStore {
    /// Canonical store root directory
    root: PathBuf,
}

impl FileConfigStore {
    /// Open (and create if missing) a store rooted at `root`
    ///
    /// # Errors
    /// - `Error::Config` if `~` cannot be expanded
    /// - `Error::Io` if the root cannot be created or resolved
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = expand_home(root.into())?;

        std::fs::create_dir_all(&root).map_err(|e| {
            error!("Failed to create store root {:?}: {}", root, e);
            Error::Io(e)
        })?;
        let root = std::fs::canonicalize(&root)?;

        info!("Initialized FileConfigStore at {:?}", root);
        Ok(Self { root })
    }

    /// Store root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a store path to its normalized form and file location
    fn locate(&self, path: &str) -> Result<(String, PathBuf)> {
        let logical = normalize_path(path)?;
        let mut file = self.root.clone();
        for segment in logical.split('/').filter(|s| !s.is_empty()) {
            if segment.starts_with('.') {
                return Err(Error::InvalidPath(format!(
                    "'{}' contains hidden segment '{}'",
                    path, segment
                )));
            }
            file.push(segment);
        }
        Ok((logical, file))
    }
}

fn expand_home(path: PathBuf) -> Result<PathBuf> {
    match path.strip_prefix("~") {
        Ok(rest) => Ok(dirs::home_dir()
            .ok_or_else(|| Error::Config("Could not determine home directory".to_string()))?
            .join(rest)),
        Err(_) => Ok(path),
    }
}

/// Store path of a file below `root`, if it belongs to the store
fn logical_path(root: &Path, file: &Path) -> Option<String> {
    let relative = file.strip_prefix(root).ok()?;
    let mut segments = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(name) => {
                let name = name.to_str()?;
                if name.starts_with('.') {
                    return None;
                }
                segments.push(name);
            }
            _ => return None,
        }
    }
    if segments.is_empty() {
        return None;
    }
    Some(format!("/{}", segments.join("/")))
}

fn read_file(file: &Path) -> std::io::Result<Option<Bytes>> {
    if file.is_dir() {
        return Ok(None);
    }
    match std::fs::read(file) {
        Ok(data) => Ok(Some(Bytes::from(data))),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<String>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let path = entry.path();
        if file_type.is_dir() {
            if logical_path(root, &path).is_some() {
                collect_files(root, &path, out)?;
            }
        } else if file_type.is_file()
            && let Some(logical) = logical_path(root, &path)
        {
            out.push(logical);
        }
    }
    Ok(())
}

/// Translate a filesystem notification into store events
///
/// Renames surface as modifications, so a file moved into place is
/// reported as `Updated` even when it is new to the store.
fn translate(root: &Path, event: &Event) -> Vec<ConfigEvent> {
    let mut changes = Vec::new();

    for file in &event.paths {
        let Some(path) = logical_path(root, file) else {
            continue;
        };

        let change = match event.kind {
            EventKind::Create(_) | EventKind::Modify(_) => {
                if file.is_dir() {
                    continue;
                }
                match read_file(file) {
                    Ok(Some(data)) if matches!(event.kind, EventKind::Create(_)) => {
                        ConfigEvent::added(path, data)
                    }
                    Ok(Some(data)) => ConfigEvent::updated(path, data),
                    Ok(None) => ConfigEvent::deleted(path),
                    Err(e) => {
                        warn!("Failed to read changed file {:?}: {}", file, e);
                        continue;
                    }
                }
            }
            EventKind::Remove(_) => ConfigEvent::deleted(path),
            _ => continue,
        };

        changes.push(change);
    }

    changes
}

#[async_trait]
impl ConfigStore for FileConfigStore {
    async fn read(&self, path: &str) -> Result<Option<Bytes>> {
        let (_, file) = self.locate(path)?;
        read_file(&file).map_err(|e| {
            error!("Failed to read {:?}: {}", file, e);
            Error::Io(e)
        })
    }

    async fn write(&self, path: &str, data: Bytes) -> Result<()> {
        let (logical, file) = self.locate(path)?;
        let (Some(parent), Some(name)) = (file.parent(), file.file_name()) else {
            return Err(Error::InvalidPath(logical));
        };
        std::fs::create_dir_all(parent)?;

        let temp = parent.join(format!(
            ".{}.{}.tmp",
            name.to_string_lossy(),
            WRITE_SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        std::fs::write(&temp, &data)?;
        if let Err(e) = std::fs::rename(&temp, &file) {
            error!("Failed to move {:?} into place: {}", temp, e);
            // Best effort; the temporary file is invisible to the store anyway
            let _ = std::fs::remove_file(&temp);
            return Err(Error::Io(e));
        }

        debug!(path = %logical, bytes = data.len(), "Configuration written");
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let (logical, file) = self.locate(path)?;
        match std::fs::remove_file(&file) {
            Ok(()) => {
                debug!(path = %logical, "Configuration deleted");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let dir = if prefix.trim_matches('/').is_empty() {
            self.root.clone()
        } else {
            self.locate(prefix)?.1
        };

        let mut paths = Vec::new();
        if dir.is_file() {
            paths.extend(logical_path(&self.root, &dir));
        } else if dir.is_dir() {
            collect_files(&self.root, &dir, &mut paths)?;
        }
        paths.sort();
        Ok(paths)
    }

    async fn watch(&self, prefix: &str) -> Result<ConfigEventStream> {
        let (tx, rx) = mpsc::channel(256);
        let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();

        let root = self.root.clone();
        let prefix = prefix.to_string();

        // notify delivers on its own thread; bridge it in a blocking task
        tokio::task::spawn_blocking(move || {
            let (notify_tx, notify_rx) = std::sync::mpsc::channel();

            // Use std::result::Result to avoid conflict with our Result type
            let mut watcher = match RecommendedWatcher::new(
                move |res: std::result::Result<Event, notify::Error>| {
                    if notify_tx.send(res).is_err() {
                        debug!("File watch receiver dropped");
                    }
                },
                notify::Config::default(),
            ) {
                Ok(w) => w,
                Err(e) => {
                    let _ = ready_tx.send(Err(Error::ConfigStore(format!(
                        "Failed to create file watcher: {}",
                        e
                    ))));
                    return;
                }
            };

            if let Err(e) = watcher.watch(&root, RecursiveMode::Recursive) {
                let _ = ready_tx.send(Err(Error::ConfigStore(format!(
                    "Failed to watch {:?}: {}",
                    root, e
                ))));
                return;
            }

            if ready_tx.send(Ok(())).is_err() {
                return;
            }
            info!("Watching {:?} for configuration changes under '{}'", root, prefix);

            loop {
                match notify_rx.recv_timeout(WATCH_POLL_INTERVAL) {
                    Ok(Ok(event)) => {
                        for change in translate(&root, &event) {
                            if !is_under_prefix(&change.path, &prefix) {
                                continue;
                            }
                            if tx.blocking_send(Ok(change)).is_err() {
                                debug!("Config event stream closed, stopping watcher");
                                return;
                            }
                        }
                    }
                    Ok(Err(e)) => {
                        warn!("File watch error: {}", e);
                        if tx
                            .blocking_send(Err(Error::ConfigStore(format!(
                                "File watch error: {}",
                                e
                            ))))
                            .is_err()
                        {
                            return;
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        if tx.is_closed() {
                            debug!("Config event stream closed, stopping watcher");
                            return;
                        }
                    }
                    Err(RecvTimeoutError::Disconnected) => return,
                }
            }
        });

        match ready_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("{}", e);
                return Err(e);
            }
            Err(_) => {
                return Err(Error::Internal(
                    "File watcher exited during setup".to_string(),
                ));
            }
        }

        // Convert mpsc receiver to stream
        let stream = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });

        Ok(Box::pin(stream))
    }
}
