//! Remote object storage.
//!
//! [`ObjectStore`] is the seam the file store talks to; [`S3ObjectStore`]
//! implements it for any S3-compatible service (AWS, Backblaze B2, MinIO).

use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;

use crate::config::RemoteConfig;
use crate::error::StorageError;

/// Minimal object-store operations used by the pipeline.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Short backend label for logs.
    fn name(&self) -> &str;

    async fn put_object(&self, key: &str, body: Vec<u8>) -> Result<(), StorageError>;

    async fn get_object(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// A time-limited URL that allows an anonymous GET of `key`.
    async fn presign_get(&self, key: &str, ttl: Duration) -> Result<String, StorageError>;
}

/// S3-compatible bucket client.
#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    /// Build a client with static credentials.
    ///
    /// A custom endpoint switches to path-style addressing, which
    /// S3-compatible providers expect.
    pub fn new(config: &RemoteConfig) -> Self {
        let credentials = Credentials::new(
            config.key_id.clone(),
            config.secret_key.clone(),
            None,
            None,
            "polyslim-static",
        );

        let mut builder = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn name(&self) -> &str {
        "s3"
    }

    async fn put_object(&self, key: &str, body: Vec<u8>) -> Result<(), StorageError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| StorageError::Backend(DisplayErrorContext(&e).to_string()))?;
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let service_error = e.into_service_error();
                if service_error.is_no_such_key() {
                    StorageError::NotFound(key.to_string())
                } else {
                    StorageError::Backend(DisplayErrorContext(&service_error).to_string())
                }
            })?;

        let data = output
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Backend(format!("reading {key}: {e}")))?;
        Ok(data.into_bytes().to_vec())
    }

    async fn presign_get(&self, key: &str, ttl: Duration) -> Result<String, StorageError> {
        let presigning = PresigningConfig::expires_in(ttl)
            .map_err(|e| StorageError::Backend(format!("invalid presign ttl: {e}")))?;
        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|e| StorageError::Backend(DisplayErrorContext(&e).to_string()))?;
        Ok(request.uri().to_string())
    }
}
