//! Gateway: file-level operations over the chunk placement layer.
//!
//! The gateway splits uploads into fixed-size chunks, scatters them across
//! the shard set, and keeps the per-owner file catalog that makes the
//! placement retrievable.

use crate::catalog::{FileCatalog, FileRecord};
use crate::chunk::{ChunkDescriptor, chunk_key, split_into_chunks};
use crate::error::{Result, ShaleError};
use crate::placement::ShardSet;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, future};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Lexically resolve `path` to a canonical absolute form: relative paths are
/// anchored at `/`, `.` and empty components are dropped, `..` folds upward
/// without escaping the root.
pub fn canonicalize_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}

/// Some chunk writes failed and were dropped from the committed record: the
/// file is retrievable but under-represents the uploaded bytes.
#[derive(Debug, Clone, Serialize)]
pub struct PartialUploadWarning {
    pub dropped_sequences: Vec<u32>,
}

impl fmt::Display for PartialUploadWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} chunk(s) failed to store and were dropped from the record: sequences {:?}",
            self.dropped_sequences.len(),
            self.dropped_sequences
        )
    }
}

/// Result of an upload: the committed record, plus a warning when chunk
/// writes were dropped.
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub record: FileRecord,
    pub warning: Option<PartialUploadWarning>,
}

pub struct Gateway {
    catalog: Arc<FileCatalog>,
    shards: ShardSet,
    chunk_size: usize,
}

impl Gateway {
    pub fn new(catalog: Arc<FileCatalog>, shards: ShardSet, chunk_size: usize) -> Self {
        Self {
            catalog,
            shards,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn catalog(&self) -> &Arc<FileCatalog> {
        &self.catalog
    }

    /// Store a file: split into chunks, scatter across the shard set, commit
    /// the record. Fails with `AlreadyExists` if the path is taken; the check
    /// and the insert happen under the same per-key lock, so two concurrent
    /// uploads of the same new path cannot both pass.
    ///
    /// Chunk writes run concurrently; the record is assembled by sequence,
    /// never by completion order. A failed chunk write is dropped from the
    /// record and reported through the returned warning.
    pub async fn upload(&self, owner: &str, file_path: &str, data: Bytes) -> Result<UploadOutcome> {
        let path = canonicalize_path(file_path);
        tracing::info!("Upload of {} for {} ({} bytes)", path, owner, data.len());

        if self.shards.is_empty() {
            return Err(ShaleError::UpstreamUnavailable(
                "no shards configured".to_string(),
            ));
        }

        let _guard = self.catalog.lock_key(owner, &path).await;
        if self.catalog.contains(owner, &path).await {
            return Err(ShaleError::AlreadyExists(path));
        }

        let total_size = data.len() as u64;
        let parts = split_into_chunks(&data, self.chunk_size);

        let puts = parts.into_iter().enumerate().map(|(index, part)| {
            let sequence = index as u32;
            let key = chunk_key(owner, &path, sequence);
            let (shard_id, shard) = self.shards.pick_random();
            async move {
                let size = part.len() as u64;
                match shard.put_chunk(&key, part).await {
                    Ok(()) => Some(ChunkDescriptor {
                        shard_id,
                        chunk_key: key,
                        size,
                        sequence,
                    }),
                    Err(error) => {
                        tracing::warn!(
                            "Chunk write failed, dropping sequence {} (key {}, shard {}): {}",
                            sequence,
                            key,
                            shard_id,
                            error
                        );
                        None
                    }
                }
            }
        });

        let results = future::join_all(puts).await;
        let dropped: Vec<u32> = results
            .iter()
            .enumerate()
            .filter(|(_, descriptor)| descriptor.is_none())
            .map(|(index, _)| index as u32)
            .collect();

        let mut chunks: Vec<ChunkDescriptor> = results.into_iter().flatten().collect();
        chunks.sort_by_key(|descriptor| descriptor.sequence);

        let record = FileRecord {
            owner: owner.to_string(),
            path: path.clone(),
            size: total_size,
            chunks,
        };
        self.catalog.insert(record.clone()).await?;

        let warning = if dropped.is_empty() {
            None
        } else {
            Some(PartialUploadWarning {
                dropped_sequences: dropped,
            })
        };

        Ok(UploadOutcome { record, warning })
    }

    /// Retrieve a file as a lazy chunk stream in catalog order. Any chunk
    /// fetch failure surfaces as `UpstreamUnavailable` and ends the stream;
    /// calling again restarts from the first chunk.
    pub async fn download(
        &self,
        owner: &str,
        file_path: &str,
    ) -> Result<BoxStream<'static, Result<Bytes>>> {
        let path = canonicalize_path(file_path);
        let record = self
            .catalog
            .get(owner, &path)
            .await
            .ok_or_else(|| ShaleError::NotFound(path.clone()))?;
        tracing::info!("Download of {} for {}", path, owner);

        let shards = self.shards.clone();
        let stream = futures_util::stream::iter(record.chunks)
            .then(move |descriptor| {
                let shards = shards.clone();
                async move {
                    let shard = shards.get(descriptor.shard_id).ok_or_else(|| {
                        ShaleError::UpstreamUnavailable(format!(
                            "shard {} from the catalog is not configured",
                            descriptor.shard_id
                        ))
                    })?;
                    shard
                        .get_chunk(&descriptor.chunk_key)
                        .await
                        .map_err(|error| {
                            ShaleError::UpstreamUnavailable(format!(
                                "chunk {} on shard {}: {}",
                                descriptor.chunk_key, descriptor.shard_id, error
                            ))
                        })
                }
            })
            .scan(false, |failed, item| {
                let emit = if *failed {
                    None
                } else {
                    if item.is_err() {
                        *failed = true;
                    }
                    Some(item)
                };
                future::ready(emit)
            })
            .boxed();

        Ok(stream)
    }

    /// Total size of the file as recorded at upload.
    pub async fn stat(&self, owner: &str, file_path: &str) -> Result<u64> {
        let path = canonicalize_path(file_path);
        self.catalog
            .get(owner, &path)
            .await
            .map(|record| record.size)
            .ok_or(ShaleError::NotFound(path))
    }

    /// Remove a file: one batched chunk delete per shard that holds any of
    /// its chunks (best-effort), then drop the record. A second delete of the
    /// same path fails with `NotFound`.
    pub async fn delete(&self, owner: &str, file_path: &str) -> Result<()> {
        let path = canonicalize_path(file_path);
        tracing::info!("Delete of {} for {}", path, owner);

        let _guard = self.catalog.lock_key(owner, &path).await;
        let record = self
            .catalog
            .get(owner, &path)
            .await
            .ok_or_else(|| ShaleError::NotFound(path.clone()))?;

        let mut keys_by_shard: BTreeMap<usize, Vec<String>> = BTreeMap::new();
        for descriptor in &record.chunks {
            keys_by_shard
                .entry(descriptor.shard_id)
                .or_default()
                .push(descriptor.chunk_key.clone());
        }

        for (shard_id, keys) in keys_by_shard {
            match self.shards.get(shard_id) {
                Some(shard) => {
                    if let Err(error) = shard.delete_chunks(&keys).await {
                        tracing::warn!(
                            "Chunk delete on shard {} failed ({} keys): {}",
                            shard_id,
                            keys.len(),
                            error
                        );
                    }
                }
                None => {
                    tracing::warn!("Shard {} from the catalog is not configured", shard_id);
                }
            }
        }

        self.catalog.remove(owner, &path).await?;
        Ok(())
    }
}
