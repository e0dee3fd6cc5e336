//! Domain types shared by the polyslim job pipeline.
//!
//! No async and no file or network I/O. Storage, persistence and process
//! execution live in their own crates and speak these types.

pub mod config;
pub mod error;
pub mod job;
pub mod optimize;
pub mod storage_ref;
pub mod types;
