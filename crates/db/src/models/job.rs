//! Row model for the `optimization_jobs` table.

use polyslim_core::error::CoreError;
use polyslim_core::job::{JobRecord, JobStatus};
use polyslim_core::storage_ref::{Owner, StorageRef};
use polyslim_core::types::{DbId, Timestamp};
use sqlx::FromRow;

/// A row from the `optimization_jobs` table.
#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    pub id: DbId,
    pub owner: String,
    pub input_ref: String,
    pub output_ref: Option<String>,
    pub preview_ref: Option<String>,
    pub target_triangle_count: i64,
    pub preview_only: bool,
    pub status_id: i16,
    pub error_detail: Option<String>,
    pub vertex_count_before: Option<i64>,
    pub vertex_count_after: Option<i64>,
    pub is_billable: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub expiry_at: Timestamp,
}

impl TryFrom<JobRow> for JobRecord {
    type Error = CoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            owner: Owner::from_db(&row.owner),
            input_ref: StorageRef::parse(&row.input_ref),
            output_ref: row.output_ref.as_deref().map(StorageRef::parse),
            preview_ref: row.preview_ref.as_deref().map(StorageRef::parse),
            target_triangle_count: row.target_triangle_count,
            preview_only: row.preview_only,
            status: JobStatus::from_id(row.status_id)?,
            error_detail: row.error_detail,
            vertex_count_before: row.vertex_count_before,
            vertex_count_after: row.vertex_count_after,
            is_billable: row.is_billable,
            created_at: row.created_at,
            updated_at: row.updated_at,
            expiry_at: row.expiry_at,
        })
    }
}
