//! Postgres-backed [`JobStore`] over the `optimization_jobs` table.
//!
//! `update` locks the row with `SELECT .. FOR UPDATE` inside a transaction,
//! runs the mutator in Rust, and writes the mutable columns back, so the
//! state machine in `JobRecord::apply` stays the only writer. `claim` is
//! the one exception: a single conditional `UPDATE` so two claimants race
//! on the row rather than on a lock queue.

use async_trait::async_trait;
use chrono::Utc;
use polyslim_core::error::CoreError;
use polyslim_core::job::{JobRecord, JobStatus, NewJob};
use polyslim_core::types::{DbId, Timestamp};
use sqlx::PgPool;

use crate::models::job::JobRow;
use crate::store::{JobStore, Mutator};

/// Column list for `optimization_jobs` queries.
const COLUMNS: &str = "\
    id, owner, input_ref, output_ref, preview_ref, target_triangle_count, \
    preview_only, status_id, error_detail, vertex_count_before, vertex_count_after, \
    is_billable, created_at, updated_at, expiry_at";

/// Maximum rows returned by a listing query.
const MAX_LIMIT: i64 = 500;

/// Job record store backed by PostgreSQL.
#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Map a sqlx failure into the domain taxonomy.
fn db_error(err: sqlx::Error) -> CoreError {
    match err {
        sqlx::Error::RowNotFound => CoreError::NotFound {
            entity: "job",
            id: "unknown".into(),
        },
        other => {
            tracing::error!(error = %other, "Job store query failed");
            CoreError::Internal(format!("Database error: {other}"))
        }
    }
}

fn to_records(rows: Vec<JobRow>) -> Result<Vec<JobRecord>, CoreError> {
    rows.into_iter().map(JobRecord::try_from).collect()
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, new: NewJob) -> Result<JobRecord, CoreError> {
        let query = format!(
            "INSERT INTO optimization_jobs \
                 (owner, input_ref, target_triangle_count, preview_only, status_id, \
                  is_billable, expiry_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, JobRow>(&query)
            .bind(new.owner.as_str())
            .bind(new.input_ref.to_db_string())
            .bind(new.target_triangle_count)
            .bind(new.preview_only)
            .bind(JobStatus::Pending.id())
            .bind(new.is_billable)
            .bind(new.expiry_at)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;
        JobRecord::try_from(row)
    }

    async fn get(&self, id: DbId) -> Result<Option<JobRecord>, CoreError> {
        let query = format!("SELECT {COLUMNS} FROM optimization_jobs WHERE id = $1");
        sqlx::query_as::<_, JobRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?
            .map(JobRecord::try_from)
            .transpose()
    }

    async fn update(&self, id: DbId, mutator: Mutator) -> Result<JobRecord, CoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let select = format!("SELECT {COLUMNS} FROM optimization_jobs WHERE id = $1 FOR UPDATE");
        let row = sqlx::query_as::<_, JobRow>(&select)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_error)?
            .ok_or_else(|| CoreError::job_not_found(id))?;

        let mut job = JobRecord::try_from(row)?;
        // Dropping `tx` on error rolls back and releases the row lock.
        mutator(&mut job)?;

        sqlx::query(
            "UPDATE optimization_jobs \
             SET output_ref = $2, preview_ref = $3, status_id = $4, error_detail = $5, \
                 vertex_count_before = $6, vertex_count_after = $7, updated_at = $8 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(job.output_ref.as_ref().map(|r| r.to_db_string()))
        .bind(job.preview_ref.as_ref().map(|r| r.to_db_string()))
        .bind(job.status.id())
        .bind(job.error_detail.as_deref())
        .bind(job.vertex_count_before)
        .bind(job.vertex_count_after)
        .bind(job.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        Ok(job)
    }

    async fn claim(&self, id: DbId) -> Result<Option<JobRecord>, CoreError> {
        let query = format!(
            "UPDATE optimization_jobs \
             SET status_id = $2, updated_at = GREATEST($3, created_at, updated_at) \
             WHERE id = $1 AND status_id = $4 \
             RETURNING {COLUMNS}"
        );
        let claimed = sqlx::query_as::<_, JobRow>(&query)
            .bind(id)
            .bind(JobStatus::Processing.id())
            .bind(Utc::now())
            .bind(JobStatus::Pending.id())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        match claimed {
            Some(row) => JobRecord::try_from(row).map(Some),
            None if self.get(id).await?.is_some() => Ok(None),
            None => Err(CoreError::job_not_found(id)),
        }
    }

    async fn list_by_status(
        &self,
        status: JobStatus,
        limit: i64,
    ) -> Result<Vec<JobRecord>, CoreError> {
        let query = format!(
            "SELECT {COLUMNS} FROM optimization_jobs \
             WHERE status_id = $1 \
             ORDER BY created_at ASC, id ASC \
             LIMIT $2"
        );
        let rows = sqlx::query_as::<_, JobRow>(&query)
            .bind(status.id())
            .bind(limit.clamp(0, MAX_LIMIT))
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        to_records(rows)
    }

    async fn list_stale(
        &self,
        cutoff: Timestamp,
        limit: i64,
    ) -> Result<Vec<JobRecord>, CoreError> {
        let query = format!(
            "SELECT {COLUMNS} FROM optimization_jobs \
             WHERE status_id = $1 AND updated_at < $2 \
             ORDER BY updated_at ASC \
             LIMIT $3"
        );
        let rows = sqlx::query_as::<_, JobRow>(&query)
            .bind(JobStatus::Processing.id())
            .bind(cutoff)
            .bind(limit.clamp(0, MAX_LIMIT))
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        to_records(rows)
    }
}
