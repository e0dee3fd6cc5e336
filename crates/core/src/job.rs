//! The optimization job record and its state machine.
//!
//! [`JobRecord::apply`] is the only function that mutates a record. Stores
//! hand it a [`Transition`] inside their atomic read-modify-write, so every
//! invariant below is enforced in one place:
//!
//! - status moves forward only: pending -> processing -> {completed, failed}
//!   (pending -> failed is allowed for jobs that could not even be claimed);
//! - `output_ref` is set iff completed and not preview-only;
//! - `error_detail` is set iff failed;
//! - `updated_at` is bumped on every transition and never precedes `created_at`.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::storage_ref::{Owner, StorageRef};
use crate::types::{DbId, Timestamp};

/// How long uploaded and produced files stay resolvable.
pub const DEFAULT_RETENTION_HOURS: i64 = 24;

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// Job lifecycle status. Discriminants match the `job_statuses` seed data.
#[repr(i16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending = 1,
    Processing = 2,
    Completed = 3,
    Failed = 4,
}

impl JobStatus {
    /// Return the database status ID.
    pub fn id(self) -> i16 {
        self as i16
    }

    pub fn from_id(id: i16) -> Result<Self, CoreError> {
        match id {
            1 => Ok(Self::Pending),
            2 => Ok(Self::Processing),
            3 => Ok(Self::Completed),
            4 => Ok(Self::Failed),
            other => Err(CoreError::Internal(format!("Unknown job status id {other}"))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

// ---------------------------------------------------------------------------
// JobRecord
// ---------------------------------------------------------------------------

/// Durable state of one optimization request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRecord {
    pub id: DbId,
    pub owner: Owner,
    pub input_ref: StorageRef,
    pub output_ref: Option<StorageRef>,
    pub preview_ref: Option<StorageRef>,
    pub target_triangle_count: i64,
    pub preview_only: bool,
    pub status: JobStatus,
    pub error_detail: Option<String>,
    pub vertex_count_before: Option<i64>,
    pub vertex_count_after: Option<i64>,
    pub is_billable: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub expiry_at: Timestamp,
}

/// Values supplied by the submission path when creating a record.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub owner: Owner,
    pub input_ref: StorageRef,
    pub target_triangle_count: i64,
    pub preview_only: bool,
    pub is_billable: bool,
    pub expiry_at: Timestamp,
}

impl NewJob {
    /// Build a submission whose files expire after the default retention.
    pub fn new(
        owner: Owner,
        input_ref: StorageRef,
        target_triangle_count: i64,
        preview_only: bool,
        is_billable: bool,
        now: Timestamp,
    ) -> Self {
        Self {
            owner,
            input_ref,
            target_triangle_count,
            preview_only,
            is_billable,
            expiry_at: now + Duration::hours(DEFAULT_RETENTION_HOURS),
        }
    }
}

/// Result of a successful run, applied by [`Transition::Complete`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub output_ref: Option<StorageRef>,
    pub preview_ref: Option<StorageRef>,
    pub vertex_count_before: Option<i64>,
    pub vertex_count_after: Option<i64>,
}

/// A narrowly-scoped update request against a job record.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// pending -> processing, on claim.
    Claim,
    /// Informational vertex counts recorded while processing.
    RecordVertexCounts {
        before: Option<i64>,
        after: Option<i64>,
    },
    /// processing -> completed.
    Complete(Completion),
    /// pending | processing -> failed.
    Fail { detail: String },
}

impl JobRecord {
    /// Materialise a freshly created pending record.
    pub fn from_new(id: DbId, new: NewJob, now: Timestamp) -> Self {
        Self {
            id,
            owner: new.owner,
            input_ref: new.input_ref,
            output_ref: None,
            preview_ref: None,
            target_triangle_count: new.target_triangle_count,
            preview_only: new.preview_only,
            status: JobStatus::Pending,
            error_detail: None,
            vertex_count_before: None,
            vertex_count_after: None,
            is_billable: new.is_billable,
            created_at: now,
            updated_at: now,
            expiry_at: new.expiry_at,
        }
    }

    /// Whether files referenced by this record may already have been reaped.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expiry_at
    }

    /// Apply one transition, enforcing the state machine.
    ///
    /// On error the record is left untouched.
    pub fn apply(&mut self, transition: Transition, now: Timestamp) -> Result<(), CoreError> {
        match transition {
            Transition::Claim => {
                self.expect_status(&[JobStatus::Pending], "claim")?;
                self.status = JobStatus::Processing;
            }
            Transition::RecordVertexCounts { before, after } => {
                self.expect_status(&[JobStatus::Processing], "record vertex counts")?;
                if before.is_some() {
                    self.vertex_count_before = before;
                }
                if after.is_some() {
                    self.vertex_count_after = after;
                }
            }
            Transition::Complete(completion) => {
                self.expect_status(&[JobStatus::Processing], "complete")?;
                self.check_completion(&completion)?;
                self.output_ref = completion.output_ref;
                if completion.preview_ref.is_some() {
                    self.preview_ref = completion.preview_ref;
                }
                if completion.vertex_count_before.is_some() {
                    self.vertex_count_before = completion.vertex_count_before;
                }
                if completion.vertex_count_after.is_some() {
                    self.vertex_count_after = completion.vertex_count_after;
                }
                self.error_detail = None;
                self.status = JobStatus::Completed;
            }
            Transition::Fail { detail } => {
                self.expect_status(&[JobStatus::Pending, JobStatus::Processing], "fail")?;
                let detail = if detail.trim().is_empty() {
                    "Unknown error".to_string()
                } else {
                    detail
                };
                self.output_ref = None;
                self.error_detail = Some(detail);
                self.status = JobStatus::Failed;
            }
        }
        self.touch(now);
        Ok(())
    }

    fn expect_status(&self, allowed: &[JobStatus], action: &str) -> Result<(), CoreError> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(CoreError::Conflict(format!(
                "cannot {action} job {} in status {}",
                self.id,
                self.status.as_str()
            )))
        }
    }

    fn check_completion(&self, completion: &Completion) -> Result<(), CoreError> {
        match (self.preview_only, &completion.output_ref) {
            (true, Some(_)) => Err(CoreError::Conflict(format!(
                "preview job {} cannot carry an output reference",
                self.id
            ))),
            (false, None) => Err(CoreError::Conflict(format!(
                "job {} cannot complete without an output reference",
                self.id
            ))),
            _ => Ok(()),
        }
    }

    fn touch(&mut self, now: Timestamp) {
        self.updated_at = now.max(self.created_at).max(self.updated_at);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::Utc;

    use super::*;

    fn pending(preview_only: bool) -> JobRecord {
        let now = Utc::now();
        let new = NewJob::new(
            Owner::User("ada@example.com".into()),
            StorageRef::Remote("uploads/ada/in.glb".into()),
            5_000,
            preview_only,
            !preview_only,
            now,
        );
        JobRecord::from_new(1, new, now)
    }

    fn output() -> Completion {
        Completion {
            output_ref: Some(StorageRef::Remote("outputs/ada/1.glb".into())),
            vertex_count_after: Some(4_000),
            ..Default::default()
        }
    }

    #[test]
    fn status_ids_match_seed_data() {
        assert_eq!(JobStatus::Pending.id(), 1);
        assert_eq!(JobStatus::Processing.id(), 2);
        assert_eq!(JobStatus::Completed.id(), 3);
        assert_eq!(JobStatus::Failed.id(), 4);
        assert_eq!(JobStatus::from_id(3).unwrap(), JobStatus::Completed);
        assert!(JobStatus::from_id(9).is_err());
    }

    #[test]
    fn happy_path_moves_forward() {
        let mut job = pending(false);
        job.apply(Transition::Claim, Utc::now()).unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        job.apply(
            Transition::RecordVertexCounts {
                before: Some(50_000),
                after: None,
            },
            Utc::now(),
        )
        .unwrap();
        job.apply(Transition::Complete(output()), Utc::now()).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.vertex_count_before, Some(50_000));
        assert_eq!(job.vertex_count_after, Some(4_000));
        assert!(job.output_ref.is_some());
        assert!(job.error_detail.is_none());
    }

    #[test]
    fn terminal_jobs_never_revert() {
        let mut job = pending(false);
        job.apply(Transition::Claim, Utc::now()).unwrap();
        job.apply(Transition::Fail { detail: "boom".into() }, Utc::now())
            .unwrap();
        let snapshot = job.clone();

        assert_matches!(job.apply(Transition::Claim, Utc::now()), Err(CoreError::Conflict(_)));
        assert_matches!(
            job.apply(Transition::Complete(output()), Utc::now()),
            Err(CoreError::Conflict(_))
        );
        assert_matches!(
            job.apply(Transition::Fail { detail: "again".into() }, Utc::now()),
            Err(CoreError::Conflict(_))
        );
        assert_eq!(job, snapshot);
    }

    #[test]
    fn claim_happens_only_once() {
        let mut job = pending(false);
        job.apply(Transition::Claim, Utc::now()).unwrap();
        assert_matches!(job.apply(Transition::Claim, Utc::now()), Err(CoreError::Conflict(_)));
    }

    #[test]
    fn completion_requires_output_for_full_jobs() {
        let mut job = pending(false);
        job.apply(Transition::Claim, Utc::now()).unwrap();
        let err = job.apply(Transition::Complete(Completion::default()), Utc::now());
        assert_matches!(err, Err(CoreError::Conflict(_)));
        assert_eq!(job.status, JobStatus::Processing);
    }

    #[test]
    fn preview_jobs_never_carry_output() {
        let mut job = pending(true);
        job.apply(Transition::Claim, Utc::now()).unwrap();
        assert_matches!(
            job.apply(Transition::Complete(output()), Utc::now()),
            Err(CoreError::Conflict(_))
        );

        let preview = Completion {
            preview_ref: Some(job.input_ref.clone()),
            vertex_count_after: Some(5_000),
            ..Default::default()
        };
        job.apply(Transition::Complete(preview), Utc::now()).unwrap();
        assert!(job.output_ref.is_none());
        assert_eq!(job.preview_ref, Some(job.input_ref.clone()));
    }

    #[test]
    fn failure_always_has_detail() {
        let mut job = pending(false);
        job.apply(Transition::Fail { detail: "  ".into() }, Utc::now())
            .unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_detail.as_deref(), Some("Unknown error"));
    }

    #[test]
    fn updated_at_never_precedes_created_at() {
        let mut job = pending(false);
        let earlier = job.created_at - Duration::hours(1);
        job.apply(Transition::Claim, earlier).unwrap();
        assert!(job.updated_at >= job.created_at);
    }

    #[test]
    fn expiry_is_one_retention_window_out() {
        let job = pending(false);
        assert_eq!(
            job.expiry_at - job.created_at,
            Duration::hours(DEFAULT_RETENTION_HOURS)
        );
        assert!(!job.is_expired(job.created_at));
        assert!(job.is_expired(job.expiry_at));
    }
}
