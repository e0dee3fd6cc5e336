//! Shared fixtures: an in-memory job store, a local-only file store and a
//! fake `gltfpack` shell script.

#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use polyslim_core::job::{JobRecord, NewJob};
use polyslim_core::storage_ref::{upload_key, Owner, StorageRef};
use polyslim_core::types::DbId;
use polyslim_db::{InMemoryJobStore, JobStore};
use polyslim_storage::{FileStore, StorageConfig};
use polyslim_worker::{OptimizationWorker, WorkerConfig};
use tempfile::TempDir;

/// Fake optimizer behaviour for the `-o` (optimize) invocation.
pub enum Optimize {
    /// Copy input to output and exit 0.
    Succeed,
    /// Print to stderr and exit with this code.
    Exit(i32),
    /// Exit 0 without writing the output file.
    NoOutput,
    /// Sleep this many seconds, then copy.
    SlowSucceed(u32),
    /// Replace the process with a long sleep.
    Hang,
}

pub struct FakeOptimizer {
    /// Vertex count printed when probing the input; `None` prints nothing useful.
    pub input_vertices: Option<i64>,
    pub output_vertices: Option<i64>,
    pub optimize: Optimize,
}

impl Default for FakeOptimizer {
    fn default() -> Self {
        Self {
            input_vertices: Some(50_000),
            output_vertices: Some(4_000),
            optimize: Optimize::Succeed,
        }
    }
}

impl FakeOptimizer {
    /// Write the script into `dir`. Every invocation's arguments are
    /// appended to `args.log` next to it.
    pub fn install(&self, dir: &Path) -> PathBuf {
        let log = dir.join("args.log");
        let probe_line = |count: Option<i64>| match count {
            Some(n) => format!("echo \"mesh 0: triangles: 1 vertices: {n}\""),
            None => "echo \"no statistics\"".to_string(),
        };
        let optimize = match self.optimize {
            Optimize::Succeed => "cp \"$in\" \"$out\"".to_string(),
            Optimize::Exit(code) => format!("echo \"Error: bad mesh\" >&2\nexit {code}"),
            Optimize::NoOutput => "exit 0".to_string(),
            Optimize::SlowSucceed(secs) => format!("sleep {secs}\ncp \"$in\" \"$out\""),
            Optimize::Hang => "exec sleep 60".to_string(),
        };

        let script = format!(
            r#"#!/bin/sh
echo "$@" >> "{log}"
in=""
out=""
while [ $# -gt 0 ]; do
  case "$1" in
    -i) in="$2"; shift 2 ;;
    -o) out="$2"; shift 2 ;;
    *) shift ;;
  esac
done
if [ -z "$out" ]; then
  case "$(basename "$in")" in
    output*) {output_probe} ;;
    *) {input_probe} ;;
  esac
  exit 0
fi
{optimize}
"#,
            log = log.display(),
            input_probe = probe_line(self.input_vertices),
            output_probe = probe_line(self.output_vertices),
        );

        let path = dir.join("gltfpack");
        std::fs::write(&path, script).expect("write fake optimizer");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("chmod fake optimizer");
        path
    }
}

/// Every recorded optimizer invocation, one argument string per line.
pub fn invocations(dir: &Path) -> Vec<String> {
    std::fs::read_to_string(dir.join("args.log"))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

/// Invocations that wrote an output file (as opposed to probes).
pub fn optimize_invocations(dir: &Path) -> Vec<String> {
    invocations(dir)
        .into_iter()
        .filter(|line| line.contains(" -o "))
        .collect()
}

pub struct Harness {
    pub jobs: Arc<InMemoryJobStore>,
    pub files: Arc<FileStore>,
    pub worker: Arc<OptimizationWorker>,
    pub tool_dir: TempDir,
    pub storage_dir: TempDir,
}

impl Harness {
    pub fn new(fake: FakeOptimizer) -> Self {
        Self::with_config(fake, |_| {})
    }

    pub fn with_config(fake: FakeOptimizer, tweak: impl FnOnce(&mut WorkerConfig)) -> Self {
        let tool_dir = tempfile::tempdir().expect("tool dir");
        let storage_dir = tempfile::tempdir().expect("storage dir");
        let mut config = WorkerConfig {
            optimizer_path: fake.install(tool_dir.path()),
            optimizer_timeout: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(5),
            ..WorkerConfig::default()
        };
        tweak(&mut config);

        let jobs = Arc::new(InMemoryJobStore::new());
        let files = Arc::new(FileStore::from_config(&StorageConfig::local(
            storage_dir.path(),
        )));
        let worker = Arc::new(OptimizationWorker::new(
            jobs.clone() as Arc<dyn JobStore>,
            Arc::clone(&files),
            config,
        ));
        Self {
            jobs,
            files,
            worker,
            tool_dir,
            storage_dir,
        }
    }

    pub fn owner() -> Owner {
        Owner::User("ada@example.com".into())
    }

    /// Upload `bytes` and create a pending job for them.
    pub async fn submit(&self, target: i64, preview_only: bool) -> JobRecord {
        let owner = Self::owner();
        let input_ref = self
            .files
            .put(b"glTF fake model".to_vec(), &upload_key(&owner, ".glb"))
            .await
            .expect("upload input");
        self.create(input_ref, target, preview_only).await
    }

    /// Create a pending job pointing at `input_ref` without uploading.
    pub async fn create(
        &self,
        input_ref: StorageRef,
        target: i64,
        preview_only: bool,
    ) -> JobRecord {
        let new = NewJob::new(
            Self::owner(),
            input_ref,
            target,
            preview_only,
            !preview_only,
            Utc::now(),
        );
        self.jobs.create(new).await.expect("create job")
    }

    pub async fn job(&self, id: DbId) -> JobRecord {
        self.jobs.get(id).await.expect("get job").expect("job exists")
    }

    pub async fn wait_terminal(&self, id: DbId, within: Duration) -> JobRecord {
        wait_terminal(self.jobs.as_ref(), id, within).await
    }
}

/// Poll `jobs` until the job is terminal or `within` elapses.
pub async fn wait_terminal(jobs: &dyn JobStore, id: DbId, within: Duration) -> JobRecord {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        let job = jobs.get(id).await.expect("get job").expect("job exists");
        if job.status.is_terminal() {
            return job;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {id} still {} after {within:?}",
            job.status.as_str()
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
