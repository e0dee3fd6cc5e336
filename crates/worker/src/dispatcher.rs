//! In-process job queue and bounded worker pool.
//!
//! Jobs are de-duplicated by `optimize:{job_id}` while queued or running, so
//! a job never has two executions in this process. The store's claim
//! transition covers the cross-process case. Two background sweeps keep the
//! store honest: pending records whose enqueue was lost get re-queued, and
//! `processing` records nobody is working on get failed.

use std::any::Any;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use polyslim_core::error::CoreError;
use polyslim_core::job::JobStatus;
use polyslim_core::types::DbId;
use polyslim_db::JobStore;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::DispatcherConfig;
use crate::optimizer::{OptimizationWorker, Outcome};

/// Namespace tag of the in-flight de-duplication key.
const DEDUP_NAMESPACE: &str = "optimize";

/// Records fetched per sweep.
const SWEEP_BATCH: i64 = 100;

/// `error_detail` written by the stale-job sweep.
pub const ABANDONED_DETAIL: &str = "Job abandoned while processing";

/// De-duplication key for `job_id`.
pub fn dedup_key(job_id: DbId) -> String {
    format!("{DEDUP_NAMESPACE}:{job_id}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueState {
    /// Accepted and scheduled.
    Queued,
    /// The key was already queued or running; nothing was scheduled.
    AlreadyQueued,
}

/// Receipt for an accepted `enqueue` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub job_id: DbId,
    pub key: String,
    pub state: EnqueueState,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("job queue is full")]
    QueueFull,

    #[error("job queue is closed")]
    Closed,
}

/// Accepts job ids for asynchronous execution.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Schedule `job_id`. Fails synchronously when the job cannot be
    /// accepted, so the caller can fall back to running it inline.
    async fn enqueue(&self, job_id: DbId, preview_only: bool) -> Result<JobHandle, DispatchError>;
}

#[derive(Debug)]
struct QueuedJob {
    job_id: DbId,
    preview_only: bool,
}

/// Feeds queued job ids to a bounded pool of [`OptimizationWorker`] runs.
pub struct Dispatcher {
    worker: Arc<OptimizationWorker>,
    jobs: Arc<dyn JobStore>,
    config: DispatcherConfig,
    sender: mpsc::Sender<QueuedJob>,
    slots: Arc<Semaphore>,
    in_flight: Mutex<HashSet<String>>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl Dispatcher {
    /// Create the dispatcher and spawn its queue loop and sweeps.
    pub fn start(
        worker: Arc<OptimizationWorker>,
        jobs: Arc<dyn JobStore>,
        config: DispatcherConfig,
    ) -> Arc<Self> {
        let (sender, receiver) = mpsc::channel(config.queue_capacity);
        let dispatcher = Arc::new(Self {
            worker,
            jobs,
            slots: Arc::new(Semaphore::new(config.max_concurrent_jobs)),
            config,
            sender,
            in_flight: Mutex::new(HashSet::new()),
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        });

        dispatcher
            .tracker
            .spawn(Arc::clone(&dispatcher).run_queue(receiver));
        dispatcher.tracker.spawn(Arc::clone(&dispatcher).run_sweeps());
        dispatcher
    }

    /// Number of jobs currently queued or running.
    pub fn in_flight(&self) -> usize {
        self.in_flight_set().len()
    }

    pub fn is_in_flight(&self, job_id: DbId) -> bool {
        self.in_flight_set().contains(&dedup_key(job_id))
    }

    /// Stop accepting work and wait for running jobs to finish.
    ///
    /// Jobs still waiting in the queue stay `pending` in the store and are
    /// picked up by the next process's pending sweep.
    pub async fn shutdown(&self) {
        tracing::info!(in_flight = self.in_flight(), "Dispatcher shutting down");
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        tracing::info!("Dispatcher drained");
    }

    // -- sweeps ---------------------------------------------------------------

    /// Enqueue pending records not already in flight. Returns how many
    /// were newly queued.
    pub async fn sweep_pending(&self) -> Result<usize, CoreError> {
        let pending = self.jobs.list_by_status(JobStatus::Pending, SWEEP_BATCH).await?;
        let mut queued = 0;
        for job in pending {
            match self.enqueue(job.id, job.preview_only).await {
                Ok(JobHandle {
                    state: EnqueueState::Queued,
                    ..
                }) => queued += 1,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(job_id = job.id, error = %e, "Pending sweep stopped early");
                    break;
                }
            }
        }
        if queued > 0 {
            tracing::info!(queued, "Re-queued pending jobs");
        }
        Ok(queued)
    }

    /// Fail `processing` records that nobody here is running and that have
    /// not been touched for the configured stale interval.
    pub async fn sweep_stale(&self) -> Result<usize, CoreError> {
        let stale_after = chrono::Duration::from_std(self.config.stale_after)
            .map_err(|e| CoreError::Internal(format!("Invalid stale interval: {e}")))?;
        let cutoff = Utc::now() - stale_after;

        let stale = self.jobs.list_stale(cutoff, SWEEP_BATCH).await?;
        let mut failed = 0;
        for job in stale {
            if self.is_in_flight(job.id) {
                continue;
            }
            tracing::warn!(job_id = job.id, updated_at = %job.updated_at, "Failing abandoned job");
            self.worker.fail(job.id, ABANDONED_DETAIL).await;
            failed += 1;
        }
        Ok(failed)
    }

    // -- internals ------------------------------------------------------------

    fn in_flight_set(&self) -> MutexGuard<'_, HashSet<String>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, job_id: DbId) {
        self.in_flight_set().remove(&dedup_key(job_id));
    }

    async fn run_queue(self: Arc<Self>, mut receiver: mpsc::Receiver<QueuedJob>) {
        tracing::info!(
            max_concurrent_jobs = self.config.max_concurrent_jobs,
            queue_capacity = self.config.queue_capacity,
            job_timeout_secs = self.config.job_timeout.as_secs(),
            "Job dispatcher started",
        );

        loop {
            let job = tokio::select! {
                _ = self.cancel.cancelled() => break,
                next = receiver.recv() => match next {
                    Some(job) => job,
                    None => break,
                },
            };

            let permit = tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.release(job.job_id);
                    break;
                }
                permit = Arc::clone(&self.slots).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let this = Arc::clone(&self);
            self.tracker.spawn(async move {
                this.run_job(job).await;
                drop(permit);
            });
        }

        tracing::info!("Job dispatcher stopped");
    }

    /// Run one job under its own budget, converting timeouts and panics
    /// into `failed` transitions.
    async fn run_job(&self, job: QueuedJob) {
        let job_id = job.job_id;
        tracing::debug!(job_id, preview_only = job.preview_only, "Starting job");

        let worker = Arc::clone(&self.worker);
        let execution = tokio::spawn(async move { worker.execute(job_id).await });
        let abort = execution.abort_handle();

        match tokio::time::timeout(self.config.job_timeout, execution).await {
            Ok(Ok(Outcome::Completed(_))) => {}
            Ok(Ok(Outcome::Failed(_))) => {}
            Ok(Ok(Outcome::Skipped)) => {
                tracing::debug!(job_id, "Job skipped");
            }
            Ok(Err(join_error)) if join_error.is_panic() => {
                let message = panic_message(join_error.into_panic());
                tracing::error!(job_id, panic = %message, "Job execution panicked");
                self.worker
                    .fail(job_id, &format!("Internal error: job execution panicked: {message}"))
                    .await;
            }
            Ok(Err(_)) => {
                self.worker.fail(job_id, "Job execution was cancelled").await;
            }
            Err(_elapsed) => {
                // Dropping the execution kills its optimizer child.
                abort.abort();
                let secs = self.config.job_timeout.as_secs();
                tracing::error!(job_id, budget_secs = secs, "Job exceeded its time budget");
                self.worker
                    .fail(job_id, &format!("Job exceeded its {secs}s time budget"))
                    .await;
            }
        }

        self.release(job_id);
    }

    async fn run_sweeps(self: Arc<Self>) {
        let period = self.config.poll_interval;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_pending().await {
                        tracing::error!(error = %e, "Pending sweep failed");
                    }
                    if let Err(e) = self.sweep_stale().await {
                        tracing::error!(error = %e, "Stale sweep failed");
                    }
                }
            }
        }
    }
}

#[async_trait]
impl JobQueue for Dispatcher {
    async fn enqueue(&self, job_id: DbId, preview_only: bool) -> Result<JobHandle, DispatchError> {
        if self.cancel.is_cancelled() {
            return Err(DispatchError::Closed);
        }

        let key = dedup_key(job_id);
        if !self.in_flight_set().insert(key.clone()) {
            tracing::debug!(job_id, "Job already in flight");
            return Ok(JobHandle {
                job_id,
                key,
                state: EnqueueState::AlreadyQueued,
            });
        }

        match self.sender.try_send(QueuedJob {
            job_id,
            preview_only,
        }) {
            Ok(()) => {
                tracing::info!(job_id, preview_only, "Job queued");
                Ok(JobHandle {
                    job_id,
                    key,
                    state: EnqueueState::Queued,
                })
            }
            Err(e) => {
                self.release(job_id);
                Err(match e {
                    TrySendError::Full(_) => DispatchError::QueueFull,
                    TrySendError::Closed(_) => DispatchError::Closed,
                })
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
