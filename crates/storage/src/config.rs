use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use polyslim_core::config::{env_lookup, lookup_string, parse_or};
use polyslim_core::error::CoreError;

/// Default lifetime of a signed remote download URL.
pub const DEFAULT_SIGNED_URL_TTL: Duration = Duration::from_secs(3600);

/// Remote bucket connection settings.
#[derive(Clone)]
pub struct RemoteConfig {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint for S3-compatible providers; `None` uses AWS.
    pub endpoint: Option<String>,
    pub key_id: String,
    pub secret_key: String,
}

impl fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("key_id", &self.key_id)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// File store configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Root directory of the local backend.
    pub local_root: PathBuf,
    /// URL path under which the local root is served.
    pub public_base: String,
    /// Remote backend settings; `None` when credentials are absent.
    pub remote: Option<RemoteConfig>,
    pub signed_url_ttl: Duration,
}

impl StorageConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var               | Default            |
    /// |-----------------------|--------------------|
    /// | `LOCAL_STORAGE_ROOT`  | `./storage`        |
    /// | `LOCAL_PUBLIC_BASE`   | `/files`           |
    /// | `S3_BUCKET`           | `poly-slimmer`     |
    /// | `S3_REGION`           | `us-west-004`      |
    /// | `S3_ENDPOINT`         | unset (AWS)        |
    /// | `S3_KEY_ID`           | unset              |
    /// | `S3_SECRET_KEY`       | unset              |
    /// | `SIGNED_URL_TTL_SECS` | `3600`             |
    ///
    /// The remote backend is enabled only when both `S3_KEY_ID` and
    /// `S3_SECRET_KEY` are set.
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let local_root = PathBuf::from(
            lookup_string(&lookup, "LOCAL_STORAGE_ROOT").unwrap_or_else(|| "./storage".into()),
        );
        let public_base =
            lookup_string(&lookup, "LOCAL_PUBLIC_BASE").unwrap_or_else(|| "/files".into());

        let remote = match (
            lookup_string(&lookup, "S3_KEY_ID"),
            lookup_string(&lookup, "S3_SECRET_KEY"),
        ) {
            (Some(key_id), Some(secret_key)) => Some(RemoteConfig {
                bucket: lookup_string(&lookup, "S3_BUCKET")
                    .unwrap_or_else(|| "poly-slimmer".into()),
                region: lookup_string(&lookup, "S3_REGION")
                    .unwrap_or_else(|| "us-west-004".into()),
                endpoint: lookup_string(&lookup, "S3_ENDPOINT"),
                key_id,
                secret_key,
            }),
            _ => None,
        };

        let ttl_secs: u64 = parse_or(
            &lookup,
            "SIGNED_URL_TTL_SECS",
            DEFAULT_SIGNED_URL_TTL.as_secs(),
        )?;

        Ok(Self {
            local_root,
            public_base,
            remote,
            signed_url_ttl: Duration::from_secs(ttl_secs),
        })
    }

    /// Local-only configuration rooted at `local_root`.
    pub fn local(local_root: impl Into<PathBuf>) -> Self {
        Self {
            local_root: local_root.into(),
            public_base: "/files".into(),
            remote: None,
            signed_url_ttl: DEFAULT_SIGNED_URL_TTL,
        }
    }
}
