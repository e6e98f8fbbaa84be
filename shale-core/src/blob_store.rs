use crate::error::{Result, ShaleError};
use bytes::Bytes;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// BlobStore is the per-shard local storage primitive: raw byte sequences
/// keyed by an opaque string. No retries, no replication. Key validation is
/// the shard's responsibility, the store trusts its caller.
pub struct BlobStore {
    base_path: PathBuf,
}

impl BlobStore {
    pub fn new(base_path: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&base_path)?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &PathBuf {
        &self.base_path
    }

    /// Write `data` under `key`, overwriting any existing blob.
    pub async fn put(&self, key: &str, data: &Bytes) -> Result<()> {
        let blob_path = self.blob_path(key);

        // Write to temporary file first, then rename for atomicity
        let temp_path = blob_path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &blob_path).await?;

        tracing::debug!("Stored blob {} ({} bytes)", key, data.len());
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Bytes> {
        let blob_path = self.blob_path(key);

        if !blob_path.exists() {
            return Err(ShaleError::NotFound(key.to_string()));
        }

        let data = fs::read(&blob_path).await?;
        Ok(Bytes::from(data))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.blob_path(key).exists()
    }

    /// Delete the blob under `key`; an absent key is not an error.
    pub async fn delete(&self, key: &str) -> Result<()> {
        let blob_path = self.blob_path(key);
        if blob_path.exists() {
            fs::remove_file(&blob_path).await?;
        }
        Ok(())
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        self.base_path.join(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(temp_dir.path().to_path_buf()).unwrap();

        let data = Bytes::from("blob content");
        store.put("abc123", &data).await.unwrap();
        assert!(store.contains("abc123"));
        assert_eq!(store.get("abc123").await.unwrap(), data);

        store.delete("abc123").await.unwrap();
        assert!(!store.contains("abc123"));
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(temp_dir.path().to_path_buf()).unwrap();

        match store.get("missing").await {
            Err(ShaleError::NotFound(key)) => assert_eq!(key, "missing"),
            other => panic!("expected NotFound, got {:?}", other.map(|b| b.len())),
        }
    }

    #[tokio::test]
    async fn test_delete_absent_is_ok() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(temp_dir.path().to_path_buf()).unwrap();
        store.delete("never-written").await.unwrap();
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(temp_dir.path().to_path_buf()).unwrap();

        store.put("k", &Bytes::from("first")).await.unwrap();
        store.put("k", &Bytes::from("second")).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Bytes::from("second"));
    }
}
