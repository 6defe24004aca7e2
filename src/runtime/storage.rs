use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use crate::error::StoreError;
use crate::runtime::snapshot::Snapshot;

/// A persisted snapshot and the version it was stored under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSnapshot {
    pub snapshot: Snapshot,
    pub version: u64,
}

// --- Interface ---

/// Persistence for instance snapshots with optimistic concurrency.
///
/// The engine cannot tell two advances of the same logical instance apart;
/// callers load a snapshot with its version and save with that version as
/// `expected_version`. A stale writer gets `VersionConflict` instead of
/// silently overwriting the other's progress.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn load(&self, instance_id: Uuid) -> Result<Option<StoredSnapshot>, StoreError>;

    /// `expected_version = None` creates the record and fails if it exists.
    /// Returns the new version.
    async fn save(&self, instance_id: Uuid, snapshot: &Snapshot, expected_version: Option<u64>) -> Result<u64, StoreError>;

    /// Returns whether a record was removed.
    async fn delete(&self, instance_id: Uuid) -> Result<bool, StoreError>;
}

pub(crate) fn conflict(instance_id: Uuid, expected: Option<u64>, actual: Option<u64>) -> StoreError {
    warn!(%instance_id, ?expected, ?actual, "snapshot version conflict");
    StoreError::VersionConflict {
        instance_id,
        expected,
        actual,
    }
}

// --- In-Memory Implementation ---

#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    records: DashMap<Uuid, StoredSnapshot>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn load(&self, instance_id: Uuid) -> Result<Option<StoredSnapshot>, StoreError> {
        Ok(self.records.get(&instance_id).map(|r| r.value().clone()))
    }

    async fn save(&self, instance_id: Uuid, snapshot: &Snapshot, expected_version: Option<u64>) -> Result<u64, StoreError> {
        // the entry guard holds the shard lock across compare and swap
        match self.records.entry(instance_id) {
            Entry::Vacant(vacant) => {
                if expected_version.is_some() {
                    return Err(conflict(instance_id, expected_version, None));
                }
                vacant.insert(StoredSnapshot {
                    snapshot: snapshot.clone(),
                    version: 1,
                });
                Ok(1)
            }
            Entry::Occupied(mut occupied) => {
                let current = occupied.get().version;
                if expected_version != Some(current) {
                    return Err(conflict(instance_id, expected_version, Some(current)));
                }
                let next = current + 1;
                occupied.insert(StoredSnapshot {
                    snapshot: snapshot.clone(),
                    version: next,
                });
                Ok(next)
            }
        }
    }

    async fn delete(&self, instance_id: Uuid) -> Result<bool, StoreError> {
        Ok(self.records.remove(&instance_id).is_some())
    }
}

// --- File Implementation ---

/// One `<instance_id>.json` file per instance. Version checks are atomic
/// within one process only.
#[derive(Debug)]
pub struct FileSnapshotStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileSnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, instance_id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.json", instance_id))
    }

    async fn read(&self, instance_id: Uuid) -> Result<Option<StoredSnapshot>, StoreError> {
        let path = self.path_for(instance_id);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str(&content)
                .map(Some)
                .map_err(|e| StoreError::Snapshot(format!("{}: {}", path.display(), e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Backend(e.into())),
        }
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn load(&self, instance_id: Uuid) -> Result<Option<StoredSnapshot>, StoreError> {
        self.read(instance_id).await
    }

    async fn save(&self, instance_id: Uuid, snapshot: &Snapshot, expected_version: Option<u64>) -> Result<u64, StoreError> {
        let _guard = self.write_lock.lock().await;
        let current = self.read(instance_id).await?.map(|r| r.version);
        if current != expected_version {
            return Err(conflict(instance_id, expected_version, current));
        }
        let record = StoredSnapshot {
            snapshot: snapshot.clone(),
            version: current.map_or(1, |v| v + 1),
        };
        let body = serde_json::to_vec_pretty(&record).map_err(|e| StoreError::Backend(e.into()))?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;
        // write then rename so readers never see a half-written file
        let tmp = self.dir.join(format!(".{}.json.tmp", instance_id));
        tokio::fs::write(&tmp, body).await.map_err(|e| StoreError::Backend(e.into()))?;
        tokio::fs::rename(&tmp, self.path_for(instance_id))
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;
        Ok(record.version)
    }

    async fn delete(&self, instance_id: Uuid) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(self.path_for(instance_id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::Backend(e.into())),
        }
    }
}
