//! File storage for job inputs and outputs.
//!
//! [`FileStore`] presents one get/put/sign interface over a local
//! filesystem backend and an optional S3-compatible remote backend, and
//! owns the fallback policy between them.

pub mod config;
pub mod error;
pub mod file_store;
pub mod local;
pub mod remote;

pub use config::{RemoteConfig, StorageConfig};
pub use error::StorageError;
pub use file_store::{FileStore, UNAVAILABLE_URL};
pub use local::LocalBackend;
pub use remote::{ObjectStore, S3ObjectStore};
