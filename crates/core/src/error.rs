/// Domain error taxonomy shared by every pipeline crate.
///
/// Lower layers (storage backends, the process runner, the job store)
/// convert their own errors into one of these variants so that the worker
/// can classify any failure into a human-readable `error_detail`.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Bad input from the caller. Raised before a job is created.
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not found: {entity} {id}")]
    NotFound { entity: &'static str, id: String },

    /// A storage backend was unreachable or a read/write failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// The optimizer ran and exited with a non-zero status.
    #[error("optimizer exited with code {exit_code}: {stderr}")]
    ProcessFailure { exit_code: i32, stderr: String },

    /// The optimizer exceeded its wall-clock budget and was killed.
    #[error("optimizer timed out after {secs}s")]
    Timeout { secs: u64 },

    /// An illegal job state transition was requested.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Shorthand for a missing job record.
    pub fn job_not_found(id: crate::types::DbId) -> Self {
        Self::NotFound {
            entity: "job",
            id: id.to_string(),
        }
    }

    /// Stable classification label used as the `error_detail` prefix.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::NotFound { .. } => "not_found",
            Self::Storage(_) => "storage_error",
            Self::ProcessFailure { .. } => "process_failure",
            Self::Timeout { .. } => "timeout",
            Self::Conflict(_) => "conflict",
            Self::Forbidden(_) => "forbidden",
            Self::Internal(_) => "internal_error",
        }
    }
}
