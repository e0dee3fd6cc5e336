use polyslim_core::error::CoreError;

/// Errors raised by storage backends.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The reference does not resolve on any configured backend.
    #[error("file not found: {0}")]
    NotFound(String),

    /// The remote backend rejected or failed the request.
    #[error("remote storage error: {0}")]
    Backend(String),

    /// A reference or key that would escape the storage root.
    #[error("invalid storage key: {0}")]
    InvalidKey(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StorageError> for CoreError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(location) => CoreError::NotFound {
                entity: "file",
                id: location,
            },
            other => CoreError::Storage(other.to_string()),
        }
    }
}
