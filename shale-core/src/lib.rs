//! Shale Core - Core library for a minimal distributed object store
//!
//! A gateway splits uploaded files into fixed-size chunks, scatters them
//! across a fixed shard set, and keeps a per-owner file catalog. Shards are
//! content stores over a local blob primitive; a primary shard propagates
//! every mutation to its backup, directly or through a durable replication
//! queue polled by the backup.

pub mod blob_store;
pub mod catalog;
pub mod chunk;
pub mod error;
pub mod gateway;
pub mod placement;
pub mod queue;
pub mod rpc;
pub mod shard;

pub use blob_store::BlobStore;
pub use catalog::{FileCatalog, FileRecord};
pub use chunk::{ChunkDescriptor, DEFAULT_CHUNK_SIZE, chunk_count, chunk_key, split_into_chunks};
pub use error::{Result, ShaleError};
pub use gateway::{Gateway, PartialUploadWarning, UploadOutcome, canonicalize_path};
pub use placement::ShardSet;
pub use queue::JobStore;
pub use rpc::{
    ChunkDelete, ChunkDownload, ChunkUpload, EnqueueResponse, HttpQueueClient, HttpShardClient,
    QueueApi, ReplicationJob, ShardApi,
};
pub use shard::{
    PropagationMode, Replication, ReplicationPoller, ShardNode, validate_chunk_key,
};
