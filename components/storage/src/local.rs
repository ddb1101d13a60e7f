use std::path::{Path, PathBuf};

use async_trait::async_trait;
use mapscan_core::ContentHash;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::{BlobStore, StorageError};

/// Filesystem-backed blob store. Keys are sharded two levels deep by the
/// first two bytes of the hash, exactly as the teacher's
/// `blob::local::LocalBlobStore::get_path` shards `BlobId` hashes, so a
/// single directory never accumulates millions of entries.
pub struct LocalBlobStore {
    base_path: PathBuf,
}

impl LocalBlobStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        LocalBlobStore { base_path: base_path.into() }
    }

    fn path_for(&self, hash: &ContentHash) -> PathBuf {
        let hex = hash.to_hex();
        let mut path = self.base_path.clone();
        path.push(&hex[0..2]);
        path.push(&hex[2..4]);
        path.push(&hex);
        path
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, hash: &ContentHash, bytes: &[u8], _content_type: &str) -> Result<(), StorageError> {
        let path = self.path_for(hash);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        // Idempotent: a prior identical write already produced these
        // bytes under a content-addressed name, so skip re-writing.
        if fs::metadata(&path).await.is_ok() {
            return Ok(());
        }
        let tmp_path = tmp_path_for(&path);
        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);
        fs::rename(&tmp_path, &path).await?;
        Ok(())
    }

    async fn get(&self, hash: &ContentHash) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.path_for(hash);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, hash: &ContentHash) -> Result<bool, StorageError> {
        Ok(fs::metadata(self.path_for(hash)).await.is_ok())
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path());
        let hash = ContentHash::from_bytes([0xAB; 16]);
        store.put(&hash, b"hello", "image/webp").await.unwrap();
        assert_eq!(store.get(&hash).await.unwrap(), Some(b"hello".to_vec()));
        assert!(store.exists(&hash).await.unwrap());
    }

    #[tokio::test]
    async fn missing_hash_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path());
        let hash = ContentHash::from_bytes([0x01; 16]);
        assert_eq!(store.get(&hash).await.unwrap(), None);
        assert!(!store.exists(&hash).await.unwrap());
    }

    #[tokio::test]
    async fn second_put_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path());
        let hash = ContentHash::from_bytes([0x02; 16]);
        store.put(&hash, b"first", "image/webp").await.unwrap();
        store.put(&hash, b"first", "image/webp").await.unwrap();
        assert_eq!(store.get(&hash).await.unwrap(), Some(b"first".to_vec()));
    }
}
