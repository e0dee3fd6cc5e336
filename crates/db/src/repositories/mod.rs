//! Repository layer.
//!
//! Each repository wraps a `PgPool` and implements one of the store
//! contracts with runtime-checked sqlx queries.

pub mod job_repo;

pub use job_repo::PgJobStore;
