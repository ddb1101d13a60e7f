//! The content-addressed blob store T (spec.md §6): `save(hash, stream,
//! content_type)` and `get(hash) -> stream`. Grounded on the teacher's
//! `components/store/src/blob/{mod,local,s3}.rs` — same trait shape, same
//! sharded local-directory layout, S3 filled in rather than left `todo!`.

pub mod local;
pub mod s3;

use async_trait::async_trait;
use mapscan_core::ContentHash;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("S3 error: {0}")]
    S3(String),
}

pub const TILE_CONTENT_TYPE: &str = "image/webp";

/// Implementations are idempotent: a second `put` with the same hash is a
/// no-op (or an overwrite of identical bytes), per spec.md §6.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, hash: &ContentHash, bytes: &[u8], content_type: &str) -> Result<(), StorageError>;
    async fn get(&self, hash: &ContentHash) -> Result<Option<Vec<u8>>, StorageError>;
    async fn exists(&self, hash: &ContentHash) -> Result<bool, StorageError>;
}

pub use local::LocalBlobStore;
pub use s3::S3BlobStore;
