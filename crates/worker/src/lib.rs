//! Job execution: the optimizer subprocess, the per-job worker, and the
//! dispatcher that feeds it.

pub mod config;
pub mod dispatcher;
pub mod optimizer;
pub mod probe;
pub mod process;

pub use config::{DispatcherConfig, WorkerConfig};
pub use dispatcher::{dedup_key, DispatchError, Dispatcher, EnqueueState, JobHandle, JobQueue};
pub use optimizer::{OptimizationWorker, Outcome};
pub use probe::VertexProbe;
pub use process::{ProcessError, ProcessOutput};
