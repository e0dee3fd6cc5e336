//! The job pipeline's outward surface.
//!
//! [`JobService`] validates and stores submissions, creates their job
//! records and hands them to the queue. It also answers status and
//! download queries. Transport, authentication and billing sit in front
//! of it and pass in an already-resolved [`Owner`].
//!
//! [`Owner`]: polyslim_core::storage_ref::Owner

pub mod service;

pub use service::{JobService, JobStatusView, Submission};
