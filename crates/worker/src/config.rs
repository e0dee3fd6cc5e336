use std::path::PathBuf;
use std::time::Duration;

use polyslim_core::config::{env_lookup, lookup_string, parse_flag, parse_or};
use polyslim_core::error::CoreError;

/// Settings for a single job execution.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Path to the `gltfpack` binary.
    pub optimizer_path: PathBuf,
    pub optimizer_timeout: Duration,
    pub probe_timeout: Duration,
    /// Vertex count assumed when the input probe yields nothing.
    pub default_vertex_count: i64,
    /// Allow preview jobs to complete with synthetic counts when the input
    /// cannot be fetched.
    pub degraded_mode: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            optimizer_path: PathBuf::from("/usr/local/bin/gltfpack"),
            optimizer_timeout: Duration::from_secs(300),
            probe_timeout: Duration::from_secs(120),
            default_vertex_count: 100_000,
            degraded_mode: false,
        }
    }
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                  | Default                   |
    /// |--------------------------|---------------------------|
    /// | `OPTIMIZER_PATH`         | `/usr/local/bin/gltfpack` |
    /// | `OPTIMIZER_TIMEOUT_SECS` | `300`                     |
    /// | `PROBE_TIMEOUT_SECS`     | `120`                     |
    /// | `DEFAULT_VERTEX_COUNT`   | `100000`                  |
    /// | `DEGRADED_MODE`          | `false`                   |
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let default_vertex_count: i64 =
            parse_or(&lookup, "DEFAULT_VERTEX_COUNT", defaults.default_vertex_count)?;
        if default_vertex_count <= 0 {
            return Err(CoreError::Validation(
                "DEFAULT_VERTEX_COUNT must be positive".into(),
            ));
        }

        Ok(Self {
            optimizer_path: lookup_string(&lookup, "OPTIMIZER_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.optimizer_path),
            optimizer_timeout: secs(&lookup, "OPTIMIZER_TIMEOUT_SECS", defaults.optimizer_timeout)?,
            probe_timeout: secs(&lookup, "PROBE_TIMEOUT_SECS", defaults.probe_timeout)?,
            default_vertex_count,
            degraded_mode: parse_flag(&lookup, "DEGRADED_MODE", defaults.degraded_mode)?,
        })
    }
}

/// Settings for the queue, the worker pool and the background sweeps.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub max_concurrent_jobs: usize,
    pub queue_capacity: usize,
    /// Wall-clock budget for one job execution, end to end.
    pub job_timeout: Duration,
    pub poll_interval: Duration,
    /// A `processing` record untouched for this long is considered abandoned.
    pub stale_after: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 10,
            queue_capacity: 1000,
            job_timeout: Duration::from_secs(360),
            poll_interval: Duration::from_secs(5),
            stale_after: Duration::from_secs(900),
        }
    }
}

impl DispatcherConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var               | Default |
    /// |-----------------------|---------|
    /// | `MAX_CONCURRENT_JOBS` | `10`    |
    /// | `QUEUE_CAPACITY`      | `1000`  |
    /// | `JOB_TIMEOUT_SECS`    | `360`   |
    /// | `POLL_INTERVAL_SECS`  | `5`     |
    /// | `STALE_JOB_SECS`      | `900`   |
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let max_concurrent_jobs: usize =
            parse_or(&lookup, "MAX_CONCURRENT_JOBS", defaults.max_concurrent_jobs)?;
        let queue_capacity: usize = parse_or(&lookup, "QUEUE_CAPACITY", defaults.queue_capacity)?;
        if max_concurrent_jobs == 0 || queue_capacity == 0 {
            return Err(CoreError::Validation(
                "MAX_CONCURRENT_JOBS and QUEUE_CAPACITY must be at least 1".into(),
            ));
        }

        Ok(Self {
            max_concurrent_jobs,
            queue_capacity,
            job_timeout: secs(&lookup, "JOB_TIMEOUT_SECS", defaults.job_timeout)?,
            poll_interval: secs(&lookup, "POLL_INTERVAL_SECS", defaults.poll_interval)?,
            stale_after: secs(&lookup, "STALE_JOB_SECS", defaults.stale_after)?,
        })
    }
}

/// Parse a whole-second duration; zero is rejected.
/// The job store's connection string. The worker binary has no in-process
/// submitter, so running without a shared database is rejected.
pub fn database_url<F>(lookup: F) -> Result<String, CoreError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup_string(&lookup, "DATABASE_URL")
        .ok_or_else(|| CoreError::Validation("DATABASE_URL must be set".into()))
}

fn secs<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration, CoreError>
where
    F: Fn(&str) -> Option<String>,
{
    let value: u64 = parse_or(lookup, key, default.as_secs())?;
    if value == 0 {
        return Err(CoreError::Validation(format!("{key} must be at least 1")));
    }
    Ok(Duration::from_secs(value))
}
