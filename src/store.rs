/// The usage store: one persisted record with change notifications.
///
/// The storage file is a JSON object; the record lives under `usageData`
/// and any other keys are left untouched. Writes go to a temp file that is
/// renamed over the original, under an exclusive lock so processes sharing
/// the data directory never interleave. Concurrent writers race on a
/// last-write-wins basis.
///
/// Records written by other processes are picked up by polling the file
/// (`watch_external`) and broadcast like local writes.
use crate::data_dir::DataDir;
use crate::extractor::ExtractionResult;
use crate::presenter::{self, Derived};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

/// Key holding the record inside the storage file.
pub const USAGE_KEY: &str = "usageData";

const CHANGE_CHANNEL_CAPACITY: usize = 16;

/// The single persisted usage snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    #[serde(rename = "messagesUsed")]
    pub used: u64,
    /// Zero when missing from a stored file; treated as undefined.
    #[serde(rename = "messagesLimit", default)]
    pub limit: u64,
    #[serde(rename = "lastUpdated")]
    pub last_updated: DateTime<Utc>,
}

impl UsageRecord {
    pub fn new(used: u64, limit: u64, last_updated: DateTime<Utc>) -> Self {
        Self {
            used,
            limit,
            last_updated,
        }
    }

    /// Fold an extraction result into a record stamped now.
    pub fn stamped(result: ExtractionResult) -> Self {
        Self::new(result.used, result.limit, Utc::now())
    }

    /// Percentage and tier for this record.
    pub fn derive(&self) -> Derived {
        presenter::derive(self.used, Some(self.limit))
    }
}

/// Handle to the storage area. Clones share the lock and change channel.
#[derive(Clone)]
pub struct UsageStore {
    path: PathBuf,
    lock_path: PathBuf,
    /// Serializes writes and polls; holds the last record this handle
    /// wrote or announced.
    last_seen: Arc<Mutex<Option<UsageRecord>>>,
    changes: broadcast::Sender<UsageRecord>,
}

impl UsageStore {
    pub fn new(path: PathBuf, lock_path: PathBuf) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            path,
            lock_path,
            last_seen: Arc::new(Mutex::new(None)),
            changes,
        }
    }

    /// Store backed by the data directory's storage file.
    pub fn open(data_dir: &DataDir) -> Self {
        Self::new(data_dir.storage(), data_dir.lock())
    }

    /// Path to the storage file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the record. A missing file or key yields `None`.
    pub async fn get(&self) -> Result<Option<UsageRecord>, StoreError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };

        let mut area = parse_area(&self.path, &contents)?;
        match area.remove(USAGE_KEY) {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| StoreError::Parse {
                    path: self.path.clone(),
                    source: e,
                }),
            None => Ok(None),
        }
    }

    /// Replace the record wholesale and notify subscribers once.
    pub async fn set(&self, record: UsageRecord) -> Result<(), StoreError> {
        let mut last_seen = self.last_seen.lock().await;

        let path = self.path.clone();
        let lock_path = self.lock_path.clone();
        tokio::task::spawn_blocking(move || write_record(&path, &lock_path, &record))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))??;

        tracing::debug!(
            used = record.used,
            limit = record.limit,
            path = %self.path.display(),
            "usage record stored"
        );

        *last_seen = Some(record);
        // No subscribers is fine.
        let _ = self.changes.send(record);
        Ok(())
    }

    /// Broadcast the stored record if it differs from the last one this
    /// handle wrote or announced. Returns whether a change was sent.
    pub async fn poll_external(&self) -> bool {
        let mut last_seen = self.last_seen.lock().await;
        let record = match self.get().await {
            Ok(Some(record)) => record,
            Ok(None) => return false,
            Err(e) => {
                tracing::debug!(error = %e, "storage poll failed");
                return false;
            }
        };
        if *last_seen == Some(record) {
            return false;
        }

        *last_seen = Some(record);
        tracing::debug!(
            used = record.used,
            limit = record.limit,
            "usage record changed on disk"
        );
        let _ = self.changes.send(record);
        true
    }

    /// Follow writes made by other processes, polling every `interval`.
    ///
    /// The record on disk when this is called counts as already seen.
    pub async fn watch_external(&self, interval: Duration) -> JoinHandle<()> {
        {
            let mut last_seen = self.last_seen.lock().await;
            if last_seen.is_none() {
                *last_seen = self.get().await.ok().flatten();
            }
        }

        let store = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                store.poll_external().await;
            }
        })
    }

    /// Receiver for every record written after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<UsageRecord> {
        self.changes.subscribe()
    }

    /// Invoke `listener` for every change, on its own task.
    pub fn on_change<F>(&self, mut listener: F) -> JoinHandle<()>
    where
        F: FnMut(UsageRecord) + Send + 'static,
    {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(record) => listener(record),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "usage change listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

fn parse_area(
    path: &Path,
    contents: &str,
) -> Result<serde_json::Map<String, serde_json::Value>, StoreError> {
    if contents.trim().is_empty() {
        return Ok(serde_json::Map::new());
    }
    serde_json::from_str(contents).map_err(|e| StoreError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

fn write_record(path: &Path, lock_path: &Path, record: &UsageRecord) -> Result<(), StoreError> {
    let lock_file = std::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(lock_path)
        .map_err(|e| StoreError::Lock {
            path: lock_path.to_path_buf(),
            source: e,
        })?;
    lock_file.lock_exclusive().map_err(|e| StoreError::Lock {
        path: lock_path.to_path_buf(),
        source: e,
    })?;

    let result = replace_key(path, record);

    if let Err(e) = lock_file.unlock() {
        tracing::warn!(error = %e, "failed to release storage lock");
    }
    result
}

fn replace_key(path: &Path, record: &UsageRecord) -> Result<(), StoreError> {
    let mut area = match std::fs::read_to_string(path) {
        Ok(contents) => parse_area(path, &contents)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => serde_json::Map::new(),
        Err(e) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };

    let value = serde_json::to_value(record).map_err(|e| StoreError::Serialize { source: e })?;
    area.insert(USAGE_KEY.to_string(), value);
    let json = serde_json::to_string_pretty(&area).map_err(|e| StoreError::Serialize { source: e })?;

    let tmp_path = temp_path(path);

    std::fs::write(&tmp_path, json.as_bytes()).map_err(|e| StoreError::Io {
        path: tmp_path.clone(),
        source: e,
    })?;

    std::fs::rename(&tmp_path, path).map_err(|e| StoreError::Rename {
        from: tmp_path,
        to: path.to_path_buf(),
        source: e,
    })
}

/// Sibling temp file for an atomic replace of `path`.
fn temp_path(path: &Path) -> PathBuf {
    let dir = path.parent().unwrap_or(Path::new("."));
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "storage.json".to_string());
    dir.join(format!(".{name}.tmp.{}", std::process::id()))
}

/// Errors from storage operations.
#[derive(Debug)]
pub enum StoreError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    Serialize {
        source: serde_json::Error,
    },
    Rename {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
    Lock {
        path: PathBuf,
        source: std::io::Error,
    },
    Task(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Io { path, source } => {
                write!(f, "storage I/O error on {}: {source}", path.display())
            }
            StoreError::Parse { path, source } => {
                write!(f, "failed to parse storage {}: {source}", path.display())
            }
            StoreError::Serialize { source } => write!(f, "failed to serialize record: {source}"),
            StoreError::Rename { from, to, source } => {
                write!(
                    f,
                    "failed to rename {} -> {}: {source}",
                    from.display(),
                    to.display()
                )
            }
            StoreError::Lock { path, source } => {
                write!(f, "failed to lock {}: {source}", path.display())
            }
            StoreError::Task(msg) => write!(f, "storage task failed: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io { source, .. } => Some(source),
            StoreError::Parse { source, .. } => Some(source),
            StoreError::Serialize { source } => Some(source),
            StoreError::Rename { source, .. } => Some(source),
            StoreError::Lock { source, .. } => Some(source),
            StoreError::Task(_) => None,
        }
    }
}
