//! Storage node: the chunk API over a local blob store, plus replica
//! propagation for primaries and the queue poller for backups.

use crate::blob_store::BlobStore;
use crate::error::{Result, ShaleError};
use crate::rpc::{ChunkUpload, QueueApi, ShardApi};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

/// How a primary pushes its mutations to the backup.
pub enum PropagationMode {
    /// Synchronous call to the backup's chunk API.
    Direct,
    /// Enqueue to the replication queue; the backup's poller applies it.
    Queue {
        queue: Arc<dyn QueueApi>,
        channel: String,
    },
}

/// Backup wiring for a primary shard. The backup endpoint is always present:
/// chunk deletes propagate by direct call even in queue mode, there is no
/// queued delete path.
pub struct Replication {
    pub backup: Arc<dyn ShardApi>,
    pub mode: PropagationMode,
}

/// A storage node. Role and replication mode are fixed configuration:
/// primaries carry a `Replication`, backups (and standalone shards) carry
/// none.
pub struct ShardNode {
    store: BlobStore,
    replication: Option<Replication>,
}

/// Reject keys that could escape the shard's storage namespace. Valid keys
/// are plain names built from `[A-Za-z0-9._-]`, not starting with a dot.
pub fn validate_chunk_key(key: &str) -> Result<()> {
    let well_formed = !key.is_empty()
        && key.len() <= 256
        && !key.starts_with('.')
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'_' || b == b'-');

    if well_formed {
        Ok(())
    } else {
        Err(ShaleError::InvalidKey(key.to_string()))
    }
}

impl ShardNode {
    pub fn new(store: BlobStore, replication: Option<Replication>) -> Self {
        Self { store, replication }
    }

    /// Write a chunk locally, then propagate to the backup if this node is a
    /// primary. Propagation is fire-and-forget: a replica failure is logged
    /// and the caller still gets a success once the local write lands.
    pub async fn put_chunk(&self, key: &str, content: Bytes) -> Result<()> {
        validate_chunk_key(key)?;
        self.store.put(key, &content).await?;

        if let Some(replication) = &self.replication {
            match &replication.mode {
                PropagationMode::Direct => {
                    if let Err(error) = replication.backup.put_chunk(key, content).await {
                        tracing::warn!("Replica put for chunk {} failed: {}", key, error);
                    }
                }
                PropagationMode::Queue { queue, channel } => {
                    let body = ChunkUpload::new(key, &content);
                    match serde_json::to_value(&body) {
                        Ok(body) => {
                            if let Err(error) = queue.enqueue(channel, body).await {
                                tracing::warn!(
                                    "Enqueue of chunk {} for channel {} failed: {}",
                                    key,
                                    channel,
                                    error
                                );
                            }
                        }
                        Err(error) => {
                            tracing::warn!("Could not encode replication job for {}: {}", key, error);
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Read a chunk from local storage. Never forwards: the gateway addresses
    /// the shard that holds the chunk.
    pub async fn get_chunk(&self, key: &str) -> Result<Bytes> {
        validate_chunk_key(key)?;
        self.store.get(key).await
    }

    /// Delete each present blob in `keys`, ignoring absent ones, then
    /// propagate the same batch to the backup by direct call.
    pub async fn delete_chunks(&self, keys: &[String]) -> Result<()> {
        for key in keys {
            validate_chunk_key(key)?;
        }
        for key in keys {
            self.store.delete(key).await?;
        }

        if let Some(replication) = &self.replication {
            if let Err(error) = replication.backup.delete_chunks(keys).await {
                tracing::warn!("Replica delete of {} chunks failed: {}", keys.len(), error);
            }
        }

        Ok(())
    }
}

#[async_trait]
impl ShardApi for ShardNode {
    async fn put_chunk(&self, key: &str, content: Bytes) -> Result<()> {
        ShardNode::put_chunk(self, key, content).await
    }

    async fn get_chunk(&self, key: &str) -> Result<Bytes> {
        ShardNode::get_chunk(self, key).await
    }

    async fn delete_chunks(&self, keys: &[String]) -> Result<()> {
        ShardNode::delete_chunks(self, keys).await
    }
}

/// Background consumer run by a backup shard in queue mode: dequeues the
/// jobs for its channel and replays each as a local chunk write.
pub struct ReplicationPoller {
    shard: Arc<ShardNode>,
    queue: Arc<dyn QueueApi>,
    channel: String,
    poll_interval: Duration,
}

impl ReplicationPoller {
    pub fn new(
        shard: Arc<ShardNode>,
        queue: Arc<dyn QueueApi>,
        channel: String,
        poll_interval: Duration,
    ) -> Self {
        Self {
            shard,
            queue,
            channel,
            poll_interval,
        }
    }

    /// Run forever on a fixed interval. A failed cycle is logged and retried
    /// on the next tick; it never takes the shard down.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.poll_interval);
        loop {
            interval.tick().await;
            match self.poll_once().await {
                Ok(applied) if applied > 0 => {
                    tracing::info!("Applied {} replication jobs on channel {}", applied, self.channel);
                }
                Ok(_) => {}
                Err(error) => {
                    tracing::warn!("Replication poll for channel {} failed: {}", self.channel, error);
                }
            }
        }
    }

    /// One dequeue-apply-ack cycle. Returns how many jobs were applied.
    pub async fn poll_once(&self) -> Result<usize> {
        let jobs = self.queue.dequeue(&self.channel).await?;
        let mut applied = 0;

        for job in jobs {
            let upload: ChunkUpload = match serde_json::from_value(job.body.clone()) {
                Ok(upload) => upload,
                Err(error) => {
                    // A malformed job can never apply; drop it instead of
                    // redelivering forever.
                    tracing::error!(
                        "Dropping malformed replication job {} on channel {}: {}",
                        job.job_id,
                        self.channel,
                        error
                    );
                    self.queue.ack(&self.channel, job.job_id).await?;
                    continue;
                }
            };

            let content = match upload.decode_content() {
                Ok(content) => content,
                Err(error) => {
                    tracing::error!(
                        "Dropping undecodable replication job {} on channel {}: {}",
                        job.job_id,
                        self.channel,
                        error
                    );
                    self.queue.ack(&self.channel, job.job_id).await?;
                    continue;
                }
            };

            match self.shard.put_chunk(&upload.chunk_key, content).await {
                Ok(()) => {
                    self.queue.ack(&self.channel, job.job_id).await?;
                    applied += 1;
                }
                Err(error) => {
                    // Leave the job leased; it is redelivered after the
                    // visibility timeout and the overwrite makes the retry
                    // safe.
                    tracing::warn!(
                        "Replay of job {} (chunk {}) failed: {}",
                        job.job_id,
                        upload.chunk_key,
                        error
                    );
                }
            }
        }

        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::JobStore;

    fn local_shard(dir: &std::path::Path) -> ShardNode {
        ShardNode::new(BlobStore::new(dir.to_path_buf()).unwrap(), None)
    }

    #[test]
    fn test_validate_chunk_key() {
        assert!(validate_chunk_key("abc123-DEF_4.5").is_ok());
        assert!(validate_chunk_key("").is_err());
        assert!(validate_chunk_key("a/b").is_err());
        assert!(validate_chunk_key("..").is_err());
        assert!(validate_chunk_key("../escape").is_err());
        assert!(validate_chunk_key(".hidden").is_err());
        assert!(validate_chunk_key("a\\b").is_err());
    }

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let shard = local_shard(temp_dir.path());

        let content = Bytes::from("chunk bytes");
        shard.put_chunk("key1", content.clone()).await.unwrap();
        assert_eq!(shard.get_chunk("key1").await.unwrap(), content);
    }

    #[tokio::test]
    async fn test_get_missing_chunk() {
        let temp_dir = tempfile::tempdir().unwrap();
        let shard = local_shard(temp_dir.path());
        assert!(matches!(
            shard.get_chunk("nope").await,
            Err(ShaleError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_traversal_key_is_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let shard = local_shard(temp_dir.path());
        assert!(matches!(
            shard.put_chunk("../../etc/passwd", Bytes::from("x")).await,
            Err(ShaleError::InvalidKey(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_chunks_is_idempotent() {
        let temp_dir = tempfile::tempdir().unwrap();
        let shard = local_shard(temp_dir.path());

        shard.put_chunk("k1", Bytes::from("a")).await.unwrap();
        shard.put_chunk("k2", Bytes::from("b")).await.unwrap();

        let keys = vec!["k1".to_string(), "k2".to_string(), "k3".to_string()];
        shard.delete_chunks(&keys).await.unwrap();
        // second delete with an overlapping set: no error, nothing left
        shard.delete_chunks(&keys).await.unwrap();

        assert!(shard.get_chunk("k1").await.is_err());
        assert!(shard.get_chunk("k2").await.is_err());
    }

    #[tokio::test]
    async fn test_direct_replication_reaches_backup() {
        let primary_dir = tempfile::tempdir().unwrap();
        let backup_dir = tempfile::tempdir().unwrap();

        let backup = Arc::new(local_shard(backup_dir.path()));
        let primary = ShardNode::new(
            BlobStore::new(primary_dir.path().to_path_buf()).unwrap(),
            Some(Replication {
                backup: backup.clone(),
                mode: PropagationMode::Direct,
            }),
        );

        let content = Bytes::from("replicated");
        primary.put_chunk("key1", content.clone()).await.unwrap();
        assert_eq!(backup.get_chunk("key1").await.unwrap(), content);

        primary.delete_chunks(&["key1".to_string()]).await.unwrap();
        assert!(backup.get_chunk("key1").await.is_err());
    }

    #[tokio::test]
    async fn test_queue_replication_applies_after_poll() {
        let primary_dir = tempfile::tempdir().unwrap();
        let backup_dir = tempfile::tempdir().unwrap();
        let queue_dir = tempfile::tempdir().unwrap();

        let queue: Arc<JobStore> =
            Arc::new(JobStore::new(queue_dir.path().join("queue.db"), 60_000).unwrap());
        let backup = Arc::new(local_shard(backup_dir.path()));
        let primary = ShardNode::new(
            BlobStore::new(primary_dir.path().to_path_buf()).unwrap(),
            Some(Replication {
                backup: backup.clone(),
                mode: PropagationMode::Queue {
                    queue: queue.clone(),
                    channel: "shard-0-backup".to_string(),
                },
            }),
        );

        let content = Bytes::from("queued bytes");
        primary.put_chunk("key1", content.clone()).await.unwrap();

        // not on the backup until a poller cycle runs
        assert!(backup.get_chunk("key1").await.is_err());

        let poller = ReplicationPoller::new(
            backup.clone(),
            queue.clone(),
            "shard-0-backup".to_string(),
            Duration::from_secs(5),
        );
        assert_eq!(poller.poll_once().await.unwrap(), 1);
        assert_eq!(backup.get_chunk("key1").await.unwrap(), content);

        // applied jobs are acked, the next cycle finds nothing
        assert_eq!(poller.poll_once().await.unwrap(), 0);
        assert_eq!(queue.pending_count("shard-0-backup").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_poller_drops_malformed_jobs() {
        let backup_dir = tempfile::tempdir().unwrap();
        let queue_dir = tempfile::tempdir().unwrap();

        let queue: Arc<JobStore> =
            Arc::new(JobStore::new(queue_dir.path().join("queue.db"), 0).unwrap());
        let backup = Arc::new(local_shard(backup_dir.path()));

        queue
            .enqueue_job("ch", &serde_json::json!({"unexpected": true}))
            .unwrap();

        let poller = ReplicationPoller::new(
            backup,
            queue.clone(),
            "ch".to_string(),
            Duration::from_secs(5),
        );
        assert_eq!(poller.poll_once().await.unwrap(), 0);
        assert_eq!(queue.pending_count("ch").unwrap(), 0);
    }
}
