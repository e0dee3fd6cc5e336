//! The file store facade over the local and remote backends.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use polyslim_core::storage_ref::StorageRef;

use crate::config::StorageConfig;
use crate::error::StorageError;
use crate::local::{publish_bytes, publish_copy, LocalBackend};
use crate::remote::{ObjectStore, S3ObjectStore};

/// Placeholder returned when a download URL cannot be produced.
pub const UNAVAILABLE_URL: &str = "#";

/// Stores blobs remotely when a bucket is configured, locally otherwise.
///
/// A failed remote write degrades to the local backend instead of failing
/// the caller, and reads always try the local backend first, so references
/// created during a remote outage keep resolving.
pub struct FileStore {
    local: LocalBackend,
    remote: Option<Arc<dyn ObjectStore>>,
    public_base: String,
    default_ttl: Duration,
    sign_failures: AtomicU64,
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore")
            .field("local", &self.local)
            .field("remote", &self.remote.as_ref().map(|r| r.name().to_string()))
            .field("public_base", &self.public_base)
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

impl FileStore {
    pub fn new(
        local: LocalBackend,
        remote: Option<Arc<dyn ObjectStore>>,
        public_base: impl Into<String>,
        default_ttl: Duration,
    ) -> Self {
        Self {
            local,
            remote,
            public_base: public_base.into(),
            default_ttl,
            sign_failures: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        let remote = config.remote.as_ref().map(|remote| {
            tracing::info!(
                bucket = %remote.bucket,
                region = %remote.region,
                endpoint = ?remote.endpoint,
                "Remote storage enabled"
            );
            Arc::new(S3ObjectStore::new(remote)) as Arc<dyn ObjectStore>
        });
        if remote.is_none() {
            tracing::info!(root = %config.local_root.display(), "Using local storage only");
        }
        Self::new(
            LocalBackend::new(&config.local_root),
            remote,
            config.public_base.clone(),
            config.signed_url_ttl,
        )
    }

    pub fn remote_enabled(&self) -> bool {
        self.remote.is_some()
    }

    pub fn local(&self) -> &LocalBackend {
        &self.local
    }

    /// Number of download URLs that degraded to [`UNAVAILABLE_URL`].
    pub fn sign_failures(&self) -> u64 {
        self.sign_failures.load(Ordering::Relaxed)
    }

    // -- writes ---------------------------------------------------------------

    /// Store `bytes` under `logical_name`.
    pub async fn put(&self, bytes: Vec<u8>, logical_name: &str) -> Result<StorageRef, StorageError> {
        if let Some(remote) = &self.remote {
            match remote.put_object(logical_name, bytes.clone()).await {
                Ok(()) => return Ok(StorageRef::Remote(logical_name.to_string())),
                Err(e) => tracing::warn!(
                    backend = remote.name(),
                    key = logical_name,
                    error = %e,
                    "Remote upload failed, storing locally"
                ),
            }
        }
        let path = self.local.put(&bytes, logical_name).await?;
        Ok(StorageRef::Local(path))
    }

    /// Store the file at `source` under `logical_name`.
    pub async fn put_file(
        &self,
        source: &Path,
        logical_name: &str,
    ) -> Result<StorageRef, StorageError> {
        if self.remote.is_some() {
            let bytes = tokio::fs::read(source).await?;
            return self.put(bytes, logical_name).await;
        }
        let target = self.local.path_for(logical_name)?;
        publish_copy(source, &target).await?;
        Ok(StorageRef::Local(target))
    }

    // -- reads ----------------------------------------------------------------

    /// Fetch the blob behind `reference`.
    pub async fn get(&self, reference: &StorageRef) -> Result<Vec<u8>, StorageError> {
        if let Some(path) = self.local.resolve(reference).await {
            return Ok(tokio::fs::read(path).await?);
        }
        match (reference, &self.remote) {
            (StorageRef::Remote(key), Some(remote)) => remote.get_object(key).await,
            _ => Err(StorageError::NotFound(reference.to_string())),
        }
    }

    /// Materialise the blob behind `reference` at `dest`.
    pub async fn get_to_path(
        &self,
        reference: &StorageRef,
        dest: &Path,
    ) -> Result<(), StorageError> {
        if let Some(path) = self.local.resolve(reference).await {
            return publish_copy(&path, dest).await;
        }
        let bytes = self.get(reference).await?;
        publish_bytes(&bytes, dest).await
    }

    // -- download URLs --------------------------------------------------------

    /// A URL the caller can fetch `reference` from.
    ///
    /// Never fails: on any error the placeholder [`UNAVAILABLE_URL`] is
    /// returned and the failure is logged and counted.
    pub async fn sign_download(&self, reference: &StorageRef, ttl: Option<Duration>) -> String {
        match self.try_sign(reference, ttl.unwrap_or(self.default_ttl)).await {
            Ok(url) => url,
            Err(e) => {
                self.sign_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(reference = %reference, error = %e, "Could not produce download URL");
                UNAVAILABLE_URL.to_string()
            }
        }
    }

    async fn try_sign(&self, reference: &StorageRef, ttl: Duration) -> Result<String, StorageError> {
        match reference {
            StorageRef::Local(path) => self
                .local_url(path)
                .ok_or_else(|| StorageError::InvalidKey(path.display().to_string())),
            StorageRef::Remote(key) => {
                if let Some(remote) = &self.remote {
                    return remote.presign_get(key, ttl).await;
                }
                let path = self
                    .local
                    .resolve(reference)
                    .await
                    .ok_or_else(|| StorageError::NotFound(key.clone()))?;
                self.local_url(&path)
                    .ok_or_else(|| StorageError::InvalidKey(key.clone()))
            }
        }
    }

    fn local_url(&self, path: &Path) -> Option<String> {
        let relative = self.local.public_path(path).or_else(|| {
            path.is_relative()
                .then(|| self.local.public_path(&self.local.root().join(path)))
                .flatten()
        })?;
        Some(format!("{}/{relative}", self.public_base.trim_end_matches('/')))
    }
}
