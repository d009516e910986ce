//! Observer trait for pipeline events.
//!
//! Pass an [`Arc<dyn PipelineObserver>`] to
//! [`ProcessService::with_observer`](crate::pipeline::ProcessService::with_observer)
//! to be told about every stage checkpoint and about the terminal outcome of
//! each task. The task registry remains the source of truth; observers are
//! for side channels such as a terminal spinner or a test recording the
//! stage order.
//!
//! # Example
//!
//! ```rust
//! use docmill::{PipelineObserver, Stage};
//! use std::sync::Mutex;
//!
//! #[derive(Default)]
//! struct StageLog(Mutex<Vec<Stage>>);
//!
//! impl PipelineObserver for StageLog {
//!     fn on_stage(&self, _task_id: &str, stage: Stage, _progress: u8) {
//!         self.0.lock().unwrap().push(stage);
//!     }
//! }
//! ```

use crate::error::TaskError;
use crate::registry::{Stage, TaskResult};
use std::sync::Arc;

/// Called by the orchestrator as a task moves through its pipeline.
///
/// Pipelines for different tasks run concurrently, so implementations must
/// be `Send + Sync`. Every method defaults to a no-op.
pub trait PipelineObserver: Send + Sync {
    /// A stage checkpoint was written to the registry.
    fn on_stage(&self, task_id: &str, stage: Stage, progress: u8) {
        let _ = (task_id, stage, progress);
    }

    fn on_complete(&self, task_id: &str, result: &TaskResult) {
        let _ = (task_id, result);
    }

    fn on_failed(&self, task_id: &str, error: &TaskError) {
        let _ = (task_id, error);
    }

    /// The pipeline noticed a cancellation at a stage boundary and stopped.
    fn on_cancelled(&self, task_id: &str) {
        let _ = task_id;
    }
}

/// Default observer.
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {}

pub type SharedObserver = Arc<dyn PipelineObserver>;
