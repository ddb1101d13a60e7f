use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use mapscan_core::ContentHash;

use crate::{BlobStore, StorageError};

/// S3-compatible blob store, keyed by the hash's hex form directly (S3
/// buckets don't suffer from the small-directory-entry-count pressure a
/// local filesystem does, so no sharding prefix is needed here, unlike
/// [`crate::local::LocalBlobStore`]).
pub struct S3BlobStore {
    client: Client,
    bucket: String,
}

impl S3BlobStore {
    pub async fn new(bucket: impl Into<String>, region: Option<String>, endpoint: Option<String>) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region));
        }
        if let Some(endpoint) = endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let config = loader.load().await;
        S3BlobStore { client: Client::new(&config), bucket: bucket.into() }
    }

    fn key_for(&self, hash: &ContentHash) -> String {
        format!("tiles/{}", hash.to_hex())
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(&self, hash: &ContentHash, bytes: &[u8], content_type: &str) -> Result<(), StorageError> {
        if self.exists(hash).await? {
            return Ok(());
        }
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.key_for(hash))
            .content_type(content_type)
            .body(ByteStream::from(bytes.to_vec()))
            .send()
            .await
            .map_err(|e| StorageError::S3(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, hash: &ContentHash) -> Result<Option<Vec<u8>>, StorageError> {
        let result = self.client.get_object().bucket(&self.bucket).key(self.key_for(hash)).send().await;
        match result {
            Ok(output) => {
                let bytes = output.body.collect().await.map_err(|e| StorageError::S3(e.to_string()))?;
                Ok(Some(bytes.into_bytes().to_vec()))
            }
            Err(aws_sdk_s3::error::SdkError::ServiceError(e)) if e.err().is_no_such_key() => Ok(None),
            Err(e) => Err(StorageError::S3(e.to_string())),
        }
    }

    async fn exists(&self, hash: &ContentHash) -> Result<bool, StorageError> {
        match self.client.head_object().bucket(&self.bucket).key(self.key_for(hash)).send().await {
            Ok(_) => Ok(true),
            Err(aws_sdk_s3::error::SdkError::ServiceError(e)) if e.raw().status().as_u16() == 404 => Ok(false),
            Err(e) => Err(StorageError::S3(e.to_string())),
        }
    }
}
