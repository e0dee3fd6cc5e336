use std::sync::Arc;

use chrono::Utc;
use polyslim_core::error::CoreError;
use polyslim_core::job::{JobStatus, NewJob};
use polyslim_core::optimize::{resolve_target, validate_extension, validate_size};
use polyslim_core::storage_ref::{upload_key, Owner};
use polyslim_core::types::{DbId, Timestamp};
use polyslim_db::JobStore;
use polyslim_storage::{FileStore, UNAVAILABLE_URL};
use polyslim_worker::{JobQueue, OptimizationWorker, Outcome};
use serde::Serialize;

/// One model upload, as handed over by the transport layer.
#[derive(Debug, Clone)]
pub struct Submission {
    pub bytes: Vec<u8>,
    /// Client-side file name; only its extension is used.
    pub file_name: String,
    /// Requested triangle budget. `0` on a preview selects the default.
    pub target_triangle_count: i64,
    pub owner: Owner,
    pub preview_only: bool,
    pub is_billable: bool,
}

/// Read-only snapshot returned by [`JobService::get_status`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatusView {
    pub job_id: DbId,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vertex_count_before: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vertex_count_after: Option<i64>,
    /// Set for completed preview jobs whose files have not expired.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,
    /// Whether [`JobService::get_download_url`] can succeed for the owner.
    pub download_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Submission and query entry point.
pub struct JobService {
    jobs: Arc<dyn JobStore>,
    files: Arc<FileStore>,
    queue: Arc<dyn JobQueue>,
    worker: Arc<OptimizationWorker>,
}

impl JobService {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        files: Arc<FileStore>,
        queue: Arc<dyn JobQueue>,
        worker: Arc<OptimizationWorker>,
    ) -> Self {
        Self {
            jobs,
            files,
            queue,
            worker,
        }
    }

    /// Validate, store and enqueue a model. Returns the new job's id.
    ///
    /// Invalid submissions fail with `CoreError::Validation` before anything
    /// is written. If the queue refuses the job it is executed inline, so
    /// the returned job is terminal in that case.
    pub async fn submit(&self, submission: Submission) -> Result<DbId, CoreError> {
        let extension = validate_extension(&submission.file_name)?;
        validate_size(submission.bytes.len())?;
        let target = resolve_target(submission.target_triangle_count, submission.preview_only)?;

        let key = upload_key(&submission.owner, &extension);
        let input_ref = self.files.put(submission.bytes, &key).await?;

        let job = self
            .jobs
            .create(NewJob::new(
                submission.owner,
                input_ref,
                target,
                submission.preview_only,
                submission.is_billable,
                Utc::now(),
            ))
            .await?;
        tracing::info!(
            job_id = job.id,
            owner = %job.owner,
            input_ref = %job.input_ref,
            target,
            preview_only = job.preview_only,
            "Job created",
        );

        if let Err(e) = self.queue.enqueue(job.id, job.preview_only).await {
            tracing::warn!(job_id = job.id, error = %e, "Enqueue failed, running job inline");
            if let Outcome::Failed(detail) = self.worker.execute(job.id).await {
                tracing::warn!(job_id = job.id, detail = %detail, "Inline job failed");
            }
        }

        Ok(job.id)
    }

    /// Current state of a job.
    ///
    /// Counts and status are stable once terminal; the preview URL is
    /// re-signed on every call.
    pub async fn get_status(&self, job_id: DbId) -> Result<JobStatusView, CoreError> {
        let job = self
            .jobs
            .get(job_id)
            .await?
            .ok_or_else(|| CoreError::job_not_found(job_id))?;

        let live = job.status == JobStatus::Completed && !job.is_expired(Utc::now());
        let preview_url = match (&job.preview_ref, live) {
            (Some(preview), true) => Some(self.files.sign_download(preview, None).await),
            _ => None,
        };

        Ok(JobStatusView {
            job_id: job.id,
            status: job.status,
            vertex_count_before: job.vertex_count_before,
            vertex_count_after: job.vertex_count_after,
            preview_url,
            download_available: live && job.output_ref.is_some(),
            error_detail: job.error_detail,
            created_at: job.created_at,
            updated_at: job.updated_at,
        })
    }

    /// A download URL for a completed job's output.
    ///
    /// Only the owning identity may download; anonymous jobs have no owner
    /// to match. Signing problems degrade to [`UNAVAILABLE_URL`] rather than
    /// an error.
    pub async fn get_download_url(
        &self,
        job_id: DbId,
        caller: &Owner,
    ) -> Result<String, CoreError> {
        let job = self
            .jobs
            .get(job_id)
            .await?
            .ok_or_else(|| CoreError::job_not_found(job_id))?;

        let is_owner = matches!(
            (&job.owner, caller),
            (Owner::User(owner), Owner::User(identity)) if owner == identity
        );
        if !is_owner {
            return Err(CoreError::Forbidden(format!(
                "You don't have permission to access job {job_id}"
            )));
        }
        if job.status != JobStatus::Completed {
            return Err(CoreError::Conflict(format!(
                "Job is not ready for download. Current status: {}",
                job.status.as_str()
            )));
        }
        if job.is_expired(Utc::now()) {
            return Err(CoreError::NotFound {
                entity: "file",
                id: format!("output of job {job_id} (expired)"),
            });
        }
        let output = job.output_ref.as_ref().ok_or_else(|| CoreError::NotFound {
            entity: "file",
            id: format!("output of job {job_id}"),
        })?;

        let url = self.files.sign_download(output, None).await;
        if url == UNAVAILABLE_URL {
            tracing::warn!(job_id, "Download URL unavailable");
        }
        Ok(url)
    }
}
