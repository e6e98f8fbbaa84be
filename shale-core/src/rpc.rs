//! RPC seams between the gateway, shards, and the replication queue.
//!
//! The boundaries are traits so the transport stays abstract: production
//! wires up the reqwest-backed HTTP clients, while in-process nodes and
//! tests implement the same traits directly.

use crate::error::{Result, ShaleError};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Chunk-level API exposed by every storage shard.
#[async_trait]
pub trait ShardApi: Send + Sync {
    async fn put_chunk(&self, key: &str, content: Bytes) -> Result<()>;
    async fn get_chunk(&self, key: &str) -> Result<Bytes>;
    async fn delete_chunks(&self, keys: &[String]) -> Result<()>;
}

/// Durable job-queue API used to defer replica propagation.
#[async_trait]
pub trait QueueApi: Send + Sync {
    async fn enqueue(&self, target: &str, body: serde_json::Value) -> Result<i64>;
    async fn dequeue(&self, target: &str) -> Result<Vec<ReplicationJob>>;
    async fn ack(&self, target: &str, job_id: i64) -> Result<()>;
}

/// A pending replication job as handed to a consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationJob {
    pub job_id: i64,
    pub target: String,
    pub body: serde_json::Value,
}

/// Wire form of a chunk write. Content is base64 so arbitrary bytes survive
/// the JSON body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkUpload {
    pub chunk_key: String,
    pub content: String,
}

impl ChunkUpload {
    pub fn new(chunk_key: &str, content: &Bytes) -> Self {
        Self {
            chunk_key: chunk_key.to_string(),
            content: BASE64.encode(content),
        }
    }

    pub fn decode_content(&self) -> Result<Bytes> {
        let decoded = BASE64
            .decode(&self.content)
            .map_err(|error| ShaleError::Internal(format!("invalid chunk encoding: {}", error)))?;
        Ok(Bytes::from(decoded))
    }
}

/// Wire form of a chunk read response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkDownload {
    pub chunk_key: String,
    pub content: String,
}

/// Wire form of a batched chunk delete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkDelete {
    pub chunk_keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueResponse {
    pub job_id: i64,
}

/// HTTP client for a shard endpoint, with a bounded per-request timeout.
pub struct HttpShardClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpShardClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| ShaleError::Http(error.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl ShardApi for HttpShardClient {
    async fn put_chunk(&self, key: &str, content: Bytes) -> Result<()> {
        let url = format!("{}/chunk", self.base_url);
        let payload = ChunkUpload::new(key, &content);
        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                ShaleError::UpstreamUnavailable(format!("put chunk to {}: {}", self.base_url, error))
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else if status == reqwest::StatusCode::BAD_REQUEST {
            Err(ShaleError::InvalidKey(key.to_string()))
        } else {
            Err(ShaleError::UpstreamUnavailable(format!(
                "shard {} returned {} for put",
                self.base_url, status
            )))
        }
    }

    async fn get_chunk(&self, key: &str) -> Result<Bytes> {
        let url = format!("{}/chunk/{}", self.base_url, key);
        let response = self.client.get(&url).send().await.map_err(|error| {
            ShaleError::UpstreamUnavailable(format!("get chunk from {}: {}", self.base_url, error))
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ShaleError::NotFound(key.to_string()));
        }
        if !status.is_success() {
            return Err(ShaleError::UpstreamUnavailable(format!(
                "shard {} returned {} for get",
                self.base_url, status
            )));
        }

        let payload: ChunkDownload = response.json().await.map_err(|error| {
            ShaleError::UpstreamUnavailable(format!("chunk body from {}: {}", self.base_url, error))
        })?;
        let decoded = BASE64
            .decode(&payload.content)
            .map_err(|error| ShaleError::Internal(format!("invalid chunk encoding: {}", error)))?;
        Ok(Bytes::from(decoded))
    }

    async fn delete_chunks(&self, keys: &[String]) -> Result<()> {
        let url = format!("{}/chunk", self.base_url);
        let payload = ChunkDelete {
            chunk_keys: keys.to_vec(),
        };
        let response = self
            .client
            .delete(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                ShaleError::UpstreamUnavailable(format!(
                    "delete chunks on {}: {}",
                    self.base_url, error
                ))
            })?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(ShaleError::UpstreamUnavailable(format!(
                "shard {} returned {} for delete",
                self.base_url,
                response.status()
            )))
        }
    }
}

/// HTTP client for the replication queue service.
pub struct HttpQueueClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpQueueClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| ShaleError::Http(error.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl QueueApi for HttpQueueClient {
    async fn enqueue(&self, target: &str, body: serde_json::Value) -> Result<i64> {
        let url = format!("{}/enqueue", self.base_url);
        let response = self
            .client
            .post(&url)
            .query(&[("target", target)])
            .json(&body)
            .send()
            .await
            .map_err(|error| {
                ShaleError::StoreUnavailable(format!("enqueue to {}: {}", self.base_url, error))
            })?;

        if !response.status().is_success() {
            return Err(ShaleError::StoreUnavailable(format!(
                "queue {} returned {} for enqueue",
                self.base_url,
                response.status()
            )));
        }

        let payload: EnqueueResponse = response.json().await.map_err(|error| {
            ShaleError::StoreUnavailable(format!("enqueue body from {}: {}", self.base_url, error))
        })?;
        Ok(payload.job_id)
    }

    async fn dequeue(&self, target: &str) -> Result<Vec<ReplicationJob>> {
        let url = format!("{}/dequeue", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("target", target)])
            .send()
            .await
            .map_err(|error| {
                ShaleError::StoreUnavailable(format!("dequeue from {}: {}", self.base_url, error))
            })?;

        if !response.status().is_success() {
            return Err(ShaleError::StoreUnavailable(format!(
                "queue {} returned {} for dequeue",
                self.base_url,
                response.status()
            )));
        }

        response.json().await.map_err(|error| {
            ShaleError::StoreUnavailable(format!("dequeue body from {}: {}", self.base_url, error))
        })
    }

    async fn ack(&self, target: &str, job_id: i64) -> Result<()> {
        let url = format!("{}/ack", self.base_url);
        let job_id = job_id.to_string();
        let response = self
            .client
            .post(&url)
            .query(&[("target", target), ("job_id", job_id.as_str())])
            .send()
            .await
            .map_err(|error| {
                ShaleError::StoreUnavailable(format!("ack to {}: {}", self.base_url, error))
            })?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(ShaleError::StoreUnavailable(format!(
                "queue {} returned {} for ack",
                self.base_url,
                response.status()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_upload_round_trips_binary_content() {
        let content = Bytes::from(vec![0u8, 159, 146, 150, 255]);
        let upload = ChunkUpload::new("key", &content);
        assert_eq!(upload.decode_content().unwrap(), content);
    }

    #[test]
    fn test_chunk_upload_rejects_bad_encoding() {
        let upload = ChunkUpload {
            chunk_key: "key".to_string(),
            content: "not base64 !!!".to_string(),
        };
        assert!(upload.decode_content().is_err());
    }
}
