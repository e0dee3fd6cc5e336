//! Vertex counting through the optimizer's verbose inspect mode.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use polyslim_core::optimize::parse_vertex_count;

use crate::process;

/// Runs the optimizer in inspect mode to count a model's vertices.
///
/// Counts are diagnostic only, so every failure here is soft: the caller
/// gets `None` (or its fallback) and a warning is logged.
#[derive(Debug, Clone)]
pub struct VertexProbe {
    optimizer: PathBuf,
    timeout: Duration,
}

impl VertexProbe {
    pub fn new(optimizer: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            optimizer: optimizer.into(),
            timeout,
        }
    }

    /// Vertex count of `file`, if the optimizer reports one.
    ///
    /// Stdout is scanned before stderr; the exit code is ignored since
    /// inspect mode may exit non-zero after printing its statistics.
    pub async fn count(&self, file: &Path) -> Option<i64> {
        let args = [OsStr::new("-i"), file.as_os_str(), OsStr::new("-v")];
        let output = match process::run(&self.optimizer, args, self.timeout).await {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(file = %file.display(), error = %e, "Vertex probe could not run");
                return None;
            }
        };
        let count =
            parse_vertex_count(&output.stdout).or_else(|| parse_vertex_count(&output.stderr));
        if count.is_none() {
            tracing::warn!(
                file = %file.display(),
                exit_code = output.exit_code,
                "Vertex probe output had no vertex count",
            );
        }
        count
    }

    /// Vertex count of `file`, or `fallback` when the probe fails.
    pub async fn count_or(&self, file: &Path, fallback: i64) -> i64 {
        self.count(file).await.unwrap_or(fallback)
    }
}
