//! In-process job store.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use polyslim_core::error::CoreError;
use polyslim_core::job::{JobRecord, JobStatus, NewJob};
use polyslim_core::types::{DbId, Timestamp};
use tokio::sync::RwLock;

use crate::store::{JobStore, Mutator};

/// A [`JobStore`] held entirely in memory.
///
/// Updates run under a single write lock, so they are atomic per store.
/// Records are lost when the process exits.
#[derive(Debug)]
pub struct InMemoryJobStore {
    jobs: RwLock<BTreeMap<DbId, JobRecord>>,
    next_id: AtomicI64,
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(BTreeMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    /// Overwrite a record wholesale, bypassing the state machine.
    ///
    /// Test hook for simulating records left behind by other processes.
    pub async fn insert_raw(&self, job: JobRecord) {
        self.next_id.fetch_max(job.id + 1, Ordering::SeqCst);
        self.jobs.write().await.insert(job.id, job);
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, new: NewJob) -> Result<JobRecord, CoreError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let job = JobRecord::from_new(id, new, Utc::now());
        self.jobs.write().await.insert(id, job.clone());
        Ok(job)
    }

    async fn get(&self, id: DbId) -> Result<Option<JobRecord>, CoreError> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn update(&self, id: DbId, mutator: Mutator) -> Result<JobRecord, CoreError> {
        let mut jobs = self.jobs.write().await;
        let current = jobs.get(&id).ok_or_else(|| CoreError::job_not_found(id))?;

        // Mutate a copy so a rejected mutation leaves the stored record intact.
        let mut next = current.clone();
        mutator(&mut next)?;
        jobs.insert(id, next.clone());
        Ok(next)
    }

    async fn list_by_status(
        &self,
        status: JobStatus,
        limit: i64,
    ) -> Result<Vec<JobRecord>, CoreError> {
        let jobs = self.jobs.read().await;
        Ok(jobs
            .values()
            .filter(|j| j.status == status)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn list_stale(
        &self,
        cutoff: Timestamp,
        limit: i64,
    ) -> Result<Vec<JobRecord>, CoreError> {
        let jobs = self.jobs.read().await;
        Ok(jobs
            .values()
            .filter(|j| j.status == JobStatus::Processing && j.updated_at < cutoff)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}
