//! The job record store contract.

use async_trait::async_trait;
use chrono::Utc;
use polyslim_core::error::CoreError;
use polyslim_core::job::{JobRecord, JobStatus, NewJob, Transition};
use polyslim_core::types::{DbId, Timestamp};

/// A closure applied to a record inside the store's atomic read-modify-write.
///
/// Returning an error aborts the update and leaves the stored record untouched.
pub type Mutator = Box<dyn FnOnce(&mut JobRecord) -> Result<(), CoreError> + Send>;

/// Durable, keyed storage of job records.
///
/// Implementations must make [`JobStore::update`] atomic with respect to
/// other updates of the same id.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new pending record and return it with its assigned id.
    async fn create(&self, new: NewJob) -> Result<JobRecord, CoreError>;

    async fn get(&self, id: DbId) -> Result<Option<JobRecord>, CoreError>;

    /// Atomically read, mutate and write back one record.
    ///
    /// Fails with `CoreError::NotFound` if the id does not exist.
    async fn update(&self, id: DbId, mutator: Mutator) -> Result<JobRecord, CoreError>;

    /// Records in `status`, oldest first.
    async fn list_by_status(
        &self,
        status: JobStatus,
        limit: i64,
    ) -> Result<Vec<JobRecord>, CoreError>;

    /// Records still `processing` whose last update is older than `cutoff`.
    async fn list_stale(&self, cutoff: Timestamp, limit: i64)
        -> Result<Vec<JobRecord>, CoreError>;

    /// Apply one state-machine transition to a record.
    async fn transition(&self, id: DbId, transition: Transition) -> Result<JobRecord, CoreError> {
        self.update(id, Box::new(move |job| job.apply(transition, Utc::now())))
            .await
    }

    /// Claim a pending job for execution.
    ///
    /// Returns `None` when the job exists but is no longer pending, which is
    /// how a second concurrent claimant learns it lost the race.
    async fn claim(&self, id: DbId) -> Result<Option<JobRecord>, CoreError> {
        match self.transition(id, Transition::Claim).await {
            Ok(job) => Ok(Some(job)),
            Err(CoreError::Conflict(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
