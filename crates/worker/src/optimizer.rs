//! End-to-end execution of one optimization job.
//!
//! [`OptimizationWorker::execute`] claims a pending job and walks it through
//! fetch, probe, optimize, probe, store and finalize. Every error after the
//! claim is caught here and recorded as a `failed` transition, so a job
//! never stays in `processing` because of a failure this worker saw.

use std::ffi::OsString;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use polyslim_core::error::CoreError;
use polyslim_core::job::{Completion, JobRecord, Transition};
use polyslim_core::optimize::{
    format_ratio, preview_vertex_estimate, simplification_ratio, truncate_detail,
};
use polyslim_core::storage_ref::output_key;
use polyslim_core::types::DbId;
use polyslim_db::JobStore;
use polyslim_storage::FileStore;

use crate::config::WorkerConfig;
use crate::probe::VertexProbe;
use crate::process;

/// Input vertex count reported by degraded-mode synthetic completions.
pub const SYNTHETIC_VERTEX_COUNT: i64 = 100_000;

/// How a call to [`OptimizationWorker::execute`] ended.
#[derive(Debug)]
pub enum Outcome {
    Completed(JobRecord),
    /// The job was failed with this detail.
    Failed(String),
    /// Nothing to do: the job was missing, already claimed, or terminal.
    Skipped,
}

/// Runs optimization jobs against the job store and file store it was
/// built with.
pub struct OptimizationWorker {
    jobs: Arc<dyn JobStore>,
    files: Arc<FileStore>,
    probe: VertexProbe,
    config: WorkerConfig,
}

impl OptimizationWorker {
    pub fn new(jobs: Arc<dyn JobStore>, files: Arc<FileStore>, config: WorkerConfig) -> Self {
        if config.degraded_mode {
            if files.remote_enabled() {
                tracing::warn!(
                    "DEGRADED_MODE is enabled while remote storage is configured; \
                     preview jobs with unreadable inputs will complete with synthetic counts",
                );
            } else {
                tracing::info!("Degraded mode enabled");
            }
        }
        Self {
            probe: VertexProbe::new(&config.optimizer_path, config.probe_timeout),
            jobs,
            files,
            config,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Claim and run one job to a terminal state.
    pub async fn execute(&self, job_id: DbId) -> Outcome {
        let job = match self.jobs.claim(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                tracing::info!(job_id, "Job is no longer pending, skipping");
                return Outcome::Skipped;
            }
            Err(CoreError::NotFound { .. }) => {
                tracing::warn!(job_id, "Job not found, skipping");
                return Outcome::Skipped;
            }
            Err(e) => {
                // The record may still be pending; try to close it out anyway.
                let detail = truncate_detail(&format!("Failed to claim job: {e}"));
                self.fail(job_id, &detail).await;
                return Outcome::Failed(detail);
            }
        };

        tracing::info!(
            job_id,
            owner = %job.owner,
            preview_only = job.preview_only,
            target = job.target_triangle_count,
            "Job claimed",
        );

        match self.process(&job).await {
            Ok(done) => {
                tracing::info!(
                    job_id,
                    vertex_count_before = ?done.vertex_count_before,
                    vertex_count_after = ?done.vertex_count_after,
                    "Job completed",
                );
                Outcome::Completed(done)
            }
            Err(e) => {
                let detail = truncate_detail(&e.to_string());
                self.fail(job_id, &detail).await;
                Outcome::Failed(detail)
            }
        }
    }

    /// Best-effort `failed` transition. Never returns an error.
    pub async fn fail(&self, job_id: DbId, detail: &str) {
        let transition = Transition::Fail {
            detail: detail.to_string(),
        };
        match self.jobs.transition(job_id, transition).await {
            Ok(_) => tracing::error!(job_id, detail, "Job failed"),
            Err(e) => tracing::error!(
                job_id,
                detail,
                error = %e,
                "Could not record job failure",
            ),
        }
    }

    async fn process(&self, job: &JobRecord) -> Result<JobRecord, CoreError> {
        if job.is_expired(Utc::now()) {
            return Err(CoreError::NotFound {
                entity: "file",
                id: format!("{} (expired at {})", job.input_ref, job.expiry_at),
            });
        }

        let scratch = tempfile::Builder::new()
            .prefix("polyslim-")
            .tempdir()
            .map_err(|e| CoreError::Internal(format!("Failed to create scratch dir: {e}")))?;
        let extension = job.input_ref.extension().unwrap_or_else(|| ".glb".into());
        let input = scratch.path().join(format!("input{extension}"));

        // 1. Materialize input.
        if let Err(e) = self.files.get_to_path(&job.input_ref, &input).await {
            if self.config.degraded_mode && job.preview_only {
                tracing::warn!(
                    job_id = job.id,
                    error = %e,
                    "Input unavailable, completing preview with synthetic counts",
                );
                return self.complete_synthetic(job).await;
            }
            return Err(e.into());
        }

        // 2. Probe input.
        let before = self
            .probe
            .count_or(&input, self.config.default_vertex_count)
            .await;
        self.jobs
            .transition(
                job.id,
                Transition::RecordVertexCounts {
                    before: Some(before),
                    after: None,
                },
            )
            .await?;

        // 3. Preview short-circuit.
        if job.preview_only {
            let completion = Completion {
                output_ref: None,
                preview_ref: Some(job.input_ref.clone()),
                vertex_count_before: Some(before),
                vertex_count_after: Some(preview_vertex_estimate(before)),
            };
            return self.jobs.transition(job.id, Transition::Complete(completion)).await;
        }

        // 4. Invoke optimizer.
        let output = scratch.path().join("output.glb");
        self.optimize(job, &input, &output, before).await?;

        // 5. Probe output.
        let after = self.probe.count_or(&output, job.target_triangle_count).await;

        // 6. Persist output.
        let output_ref = self
            .files
            .put_file(&output, &output_key(&job.owner, job.id))
            .await?;

        // 7. Finalize.
        let completion = Completion {
            output_ref: Some(output_ref),
            preview_ref: None,
            vertex_count_before: Some(before),
            vertex_count_after: Some(after),
        };
        self.jobs.transition(job.id, Transition::Complete(completion)).await
    }

    async fn optimize(
        &self,
        job: &JobRecord,
        input: &Path,
        output: &Path,
        vertex_count_before: i64,
    ) -> Result<(), CoreError> {
        let ratio = format_ratio(simplification_ratio(
            job.target_triangle_count,
            vertex_count_before,
        ));
        let args: [OsString; 7] = [
            "-i".into(),
            input.into(),
            "-o".into(),
            output.into(),
            "-si".into(),
            ratio.as_str().into(),
            "-cc".into(),
        ];
        tracing::info!(job_id = job.id, ratio = %ratio, "Running optimizer");

        let timeout = self.config.optimizer_timeout;
        let result = process::run(&self.config.optimizer_path, &args, timeout)
            .await
            .map_err(|e| match e {
                process::ProcessError::Timeout { .. } => CoreError::Timeout {
                    secs: timeout.as_secs(),
                },
                other => other.into(),
            })?;

        if !result.success() {
            return Err(CoreError::ProcessFailure {
                exit_code: result.exit_code,
                stderr: result.stderr,
            });
        }
        if !matches!(tokio::fs::try_exists(output).await, Ok(true)) {
            return Err(CoreError::ProcessFailure {
                exit_code: result.exit_code,
                stderr: "no output file was produced".into(),
            });
        }
        tracing::debug!(job_id = job.id, duration_ms = result.duration_ms, "Optimizer finished");
        Ok(())
    }

    async fn complete_synthetic(&self, job: &JobRecord) -> Result<JobRecord, CoreError> {
        let completion = Completion {
            output_ref: None,
            preview_ref: Some(job.input_ref.clone()),
            vertex_count_before: Some(SYNTHETIC_VERTEX_COUNT),
            vertex_count_after: Some(preview_vertex_estimate(SYNTHETIC_VERTEX_COUNT)),
        };
        self.jobs.transition(job.id, Transition::Complete(completion)).await
    }
}
