use crate::chunk::ChunkDescriptor;
use crate::error::{Result, ShaleError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

/// Number of entries in the per-key lock table. Keys hash onto a fixed set of
/// async mutexes so same-key mutations serialize while unrelated paths and
/// users proceed concurrently.
const LOCK_SHARDS: usize = 64;

/// Metadata for one uploaded file: its canonical path, total size, and the
/// ordered chunk placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub owner: String,
    pub path: String,
    pub size: u64,
    pub chunks: Vec<ChunkDescriptor>,
}

/// On-disk form of a record inside the snapshot: owner and path live in the
/// surrounding map keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SnapshotRecord {
    size: u64,
    chunks: Vec<ChunkDescriptor>,
}

/// FileCatalog maps owner identity -> canonical file path -> FileRecord.
///
/// The whole catalog is persisted as a single JSON snapshot on every mutation
/// and loaded once at startup. At most one record exists per `(owner, path)`
/// pair; `insert` refuses to replace an existing record.
pub struct FileCatalog {
    entries: RwLock<HashMap<String, HashMap<String, FileRecord>>>,
    key_locks: Vec<Arc<Mutex<()>>>,
    snapshot_path: PathBuf,
    snapshot_lock: Mutex<()>,
}

impl FileCatalog {
    /// Load the catalog from `snapshot_path`, starting empty if the snapshot
    /// does not exist yet. An unreadable snapshot is logged and treated as
    /// empty, matching the behavior of the persisted-state loader it replaces.
    pub async fn load(snapshot_path: PathBuf) -> Result<Self> {
        if let Some(parent) = snapshot_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let entries = match fs::read(&snapshot_path).await {
            Ok(data) => match serde_json::from_slice::<HashMap<String, HashMap<String, SnapshotRecord>>>(&data) {
                Ok(snapshot) => {
                    let mut entries = HashMap::new();
                    for (owner, files) in snapshot {
                        let records: HashMap<String, FileRecord> = files
                            .into_iter()
                            .map(|(path, record)| {
                                let record = FileRecord {
                                    owner: owner.clone(),
                                    path: path.clone(),
                                    size: record.size,
                                    chunks: record.chunks,
                                };
                                (path, record)
                            })
                            .collect();
                        entries.insert(owner, records);
                    }
                    entries
                }
                Err(error) => {
                    tracing::warn!(
                        "Catalog snapshot {:?} is unreadable, starting empty: {}",
                        snapshot_path,
                        error
                    );
                    HashMap::new()
                }
            },
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(error) => return Err(error.into()),
        };

        Ok(Self {
            entries: RwLock::new(entries),
            key_locks: (0..LOCK_SHARDS).map(|_| Arc::new(Mutex::new(()))).collect(),
            snapshot_path,
            snapshot_lock: Mutex::new(()),
        })
    }

    /// Acquire the mutation lock for `(owner, path)`. Callers hold the guard
    /// across their whole check-then-write sequence.
    pub async fn lock_key(&self, owner: &str, path: &str) -> OwnedMutexGuard<()> {
        let index = lock_index(owner, path);
        self.key_locks[index].clone().lock_owned().await
    }

    pub async fn contains(&self, owner: &str, path: &str) -> bool {
        let entries = self.entries.read().await;
        entries
            .get(owner)
            .map(|files| files.contains_key(path))
            .unwrap_or(false)
    }

    pub async fn get(&self, owner: &str, path: &str) -> Option<FileRecord> {
        let entries = self.entries.read().await;
        entries.get(owner).and_then(|files| files.get(path)).cloned()
    }

    /// Insert a new record and persist the snapshot. Fails with
    /// `AlreadyExists` if a record is present for the same `(owner, path)`.
    pub async fn insert(&self, record: FileRecord) -> Result<()> {
        {
            let mut entries = self.entries.write().await;
            let files = entries.entry(record.owner.clone()).or_default();
            if files.contains_key(&record.path) {
                return Err(ShaleError::AlreadyExists(record.path));
            }
            files.insert(record.path.clone(), record);
        }
        self.persist().await
    }

    /// Remove the record for `(owner, path)` and persist the snapshot.
    /// Returns the removed record, or `None` if nothing was present.
    pub async fn remove(&self, owner: &str, path: &str) -> Result<Option<FileRecord>> {
        let removed = {
            let mut entries = self.entries.write().await;
            let removed = entries.get_mut(owner).and_then(|files| files.remove(path));
            if entries.get(owner).map(|files| files.is_empty()).unwrap_or(false) {
                entries.remove(owner);
            }
            removed
        };

        if removed.is_some() {
            self.persist().await?;
        }
        Ok(removed)
    }

    /// Rewrite the snapshot wholesale: serialize under the snapshot lock,
    /// write a temporary file, then rename so a crash never leaves truncated
    /// state behind.
    async fn persist(&self) -> Result<()> {
        let _guard = self.snapshot_lock.lock().await;

        let data = {
            let entries = self.entries.read().await;
            let mut snapshot: HashMap<String, HashMap<String, SnapshotRecord>> = HashMap::new();
            for (owner, files) in entries.iter() {
                let records = files
                    .iter()
                    .map(|(path, record)| {
                        (
                            path.clone(),
                            SnapshotRecord {
                                size: record.size,
                                chunks: record.chunks.clone(),
                            },
                        )
                    })
                    .collect();
                snapshot.insert(owner.clone(), records);
            }
            serde_json::to_vec_pretty(&snapshot)?
        };

        let temp_path = self.snapshot_path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(&data).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &self.snapshot_path).await?;
        Ok(())
    }
}

fn lock_index(owner: &str, path: &str) -> usize {
    let mut hasher = DefaultHasher::new();
    owner.hash(&mut hasher);
    path.hash(&mut hasher);
    (hasher.finish() as usize) % LOCK_SHARDS
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::chunk_key;

    fn record(owner: &str, path: &str, size: u64) -> FileRecord {
        FileRecord {
            owner: owner.to_string(),
            path: path.to_string(),
            size,
            chunks: vec![ChunkDescriptor {
                shard_id: 0,
                chunk_key: chunk_key(owner, path, 0),
                size,
                sequence: 0,
            }],
        }
    }

    #[tokio::test]
    async fn test_insert_get_remove() {
        let temp_dir = tempfile::tempdir().unwrap();
        let catalog = FileCatalog::load(temp_dir.path().join("catalog.json"))
            .await
            .unwrap();

        catalog.insert(record("alice", "/a.txt", 10)).await.unwrap();
        assert!(catalog.contains("alice", "/a.txt").await);
        assert_eq!(catalog.get("alice", "/a.txt").await.unwrap().size, 10);

        let removed = catalog.remove("alice", "/a.txt").await.unwrap();
        assert_eq!(removed.unwrap().path, "/a.txt");
        assert!(!catalog.contains("alice", "/a.txt").await);
        assert!(catalog.remove("alice", "/a.txt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_duplicate_fails_without_mutation() {
        let temp_dir = tempfile::tempdir().unwrap();
        let catalog = FileCatalog::load(temp_dir.path().join("catalog.json"))
            .await
            .unwrap();

        catalog.insert(record("alice", "/a.txt", 10)).await.unwrap();
        let err = catalog.insert(record("alice", "/a.txt", 99)).await.unwrap_err();
        assert!(matches!(err, ShaleError::AlreadyExists(_)));
        assert_eq!(catalog.get("alice", "/a.txt").await.unwrap().size, 10);
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let snapshot_path = temp_dir.path().join("catalog.json");

        {
            let catalog = FileCatalog::load(snapshot_path.clone()).await.unwrap();
            catalog.insert(record("alice", "/a.txt", 10)).await.unwrap();
            catalog.insert(record("bob", "/b.txt", 20)).await.unwrap();
        }

        let reloaded = FileCatalog::load(snapshot_path).await.unwrap();
        assert_eq!(reloaded.get("alice", "/a.txt").await.unwrap().size, 10);
        assert_eq!(reloaded.get("bob", "/b.txt").await.unwrap().size, 20);
        let rec = reloaded.get("bob", "/b.txt").await.unwrap();
        assert_eq!(rec.owner, "bob");
        assert_eq!(rec.chunks.len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_starts_empty() {
        let temp_dir = tempfile::tempdir().unwrap();
        let snapshot_path = temp_dir.path().join("catalog.json");
        std::fs::write(&snapshot_path, b"{not json").unwrap();

        let catalog = FileCatalog::load(snapshot_path).await.unwrap();
        assert!(!catalog.contains("alice", "/a.txt").await);
    }

    #[tokio::test]
    async fn test_owners_are_isolated() {
        let temp_dir = tempfile::tempdir().unwrap();
        let catalog = FileCatalog::load(temp_dir.path().join("catalog.json"))
            .await
            .unwrap();

        catalog.insert(record("alice", "/same.txt", 1)).await.unwrap();
        catalog.insert(record("bob", "/same.txt", 2)).await.unwrap();
        assert_eq!(catalog.get("alice", "/same.txt").await.unwrap().size, 1);
        assert_eq!(catalog.get("bob", "/same.txt").await.unwrap().size, 2);
    }
}
