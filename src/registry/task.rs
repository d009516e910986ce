//! In-memory catalog of conversion tasks.
//!
//! A task moves `pending → running → {succeeded | failed | cancelled}`.
//! Terminal states absorb: once a task has finished, neither
//! [`TaskRegistry::update`] nor [`TaskRegistry::cancel`] will touch it
//! again, so `completed_at` is written exactly once.
//!
//! Cancellation is cooperative. [`TaskRegistry::cancel`] raises a per-task
//! flag and moves the record to `cancelled`; the pipeline that owns the task
//! polls [`TaskRegistry::is_cancelled`] at stage boundaries and stops there.

use crate::error::TaskError;
use crate::registry::file::FileRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    /// Full file → Markdown processing run.
    Process,
}

/// Named pipeline checkpoint, reported to clients as a message key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    #[serde(rename = "pipeline.stage.pending")]
    Pending,
    #[serde(rename = "pipeline.stage.office_to_pdf")]
    OfficeToPdf,
    #[serde(rename = "pipeline.stage.pdf_to_markdown")]
    PdfToMarkdown,
    #[serde(rename = "pipeline.stage.ocr_to_markdown")]
    OcrToMarkdown,
    #[serde(rename = "pipeline.stage.completed")]
    Completed,
    #[serde(rename = "pipeline.stage.cancelled")]
    Cancelled,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Pending => "pipeline.stage.pending",
            Stage::OfficeToPdf => "pipeline.stage.office_to_pdf",
            Stage::PdfToMarkdown => "pipeline.stage.pdf_to_markdown",
            Stage::OcrToMarkdown => "pipeline.stage.ocr_to_markdown",
            Stage::Completed => "pipeline.stage.completed",
            Stage::Cancelled => "pipeline.stage.cancelled",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Files produced by a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    /// Id of the Markdown file; the "answer" of the task.
    pub file_id: String,
    pub markdown_file: FileRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub converted_pdf_file: Option<FileRecord>,
    /// Source file as it stands after the run (metadata may be updated).
    pub source_file: FileRecord,
}

/// One asynchronous conversion job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub session_id: String,
    pub file_id: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub status: TaskStatus,
    /// 0–100.
    pub progress: u8,
    pub stage: Stage,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
}

impl Task {
    /// A fresh `pending` task with a random id.
    pub fn new(session_id: impl Into<String>, file_id: impl Into<String>, task_type: TaskType) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            file_id: file_id.into(),
            task_type,
            status: TaskStatus::Pending,
            progress: 0,
            stage: Stage::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            eta: None,
            result: None,
            error: None,
        }
    }
}

/// Partial update applied by [`TaskRegistry::update`].
///
/// `started_at` / `completed_at` only take effect together with a status
/// change that would stamp them anyway, and only if still unset.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub status: Option<TaskStatus>,
    pub progress: Option<u8>,
    pub stage: Option<Stage>,
    pub eta: Option<DateTime<Utc>>,
    pub result: Option<TaskResult>,
    pub error: Option<TaskError>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn stage(mut self, stage: Stage) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn eta(mut self, eta: DateTime<Utc>) -> Self {
        self.eta = Some(eta);
        self
    }

    pub fn result(mut self, result: TaskResult) -> Self {
        self.result = Some(result);
        self
    }

    pub fn error(mut self, error: TaskError) -> Self {
        self.error = Some(error);
        self
    }

    pub fn completed_at(mut self, at: DateTime<Utc>) -> Self {
        self.completed_at = Some(at);
        self
    }
}

struct Entry {
    task: Task,
    cancel_requested: bool,
}

/// Thread-safe task catalog. Every read-modify-write runs under one lock,
/// so updates to a given task are linearised.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: Mutex<HashMap<String, Entry>>,
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks", &self.len())
            .finish()
    }
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, task: Task) {
        debug!(task_id = %task.id, session_id = %task.session_id, status = %task.status, "task registered");
        self.lock().insert(
            task.id.clone(),
            Entry {
                task,
                cancel_requested: false,
            },
        );
    }

    pub fn get(&self, task_id: &str) -> Option<Task> {
        self.lock().get(task_id).map(|e| e.task.clone())
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.lock().contains_key(task_id)
    }

    /// Apply `patch` field by field.
    ///
    /// Returns `false` when the task is unknown (usually: already reclaimed).
    /// A terminal task is left untouched and still reports `true`.
    pub fn update(&self, task_id: &str, patch: TaskPatch) -> bool {
        let mut tasks = self.lock();
        let Some(entry) = tasks.get_mut(task_id) else {
            return false;
        };
        let task = &mut entry.task;

        if task.status.is_terminal() {
            debug!(task_id, status = %task.status, "update ignored on terminal task");
            return true;
        }

        if let Some(status) = patch.status {
            task.status = status;
            if status == TaskStatus::Running && task.started_at.is_none() {
                task.started_at = Some(patch.started_at.unwrap_or_else(Utc::now));
            }
            if status.is_terminal() && task.completed_at.is_none() {
                task.completed_at = Some(patch.completed_at.unwrap_or_else(Utc::now));
            }
        }
        if let Some(progress) = patch.progress {
            task.progress = progress.min(100);
        }
        if let Some(stage) = patch.stage {
            task.stage = stage;
        }
        if let Some(eta) = patch.eta {
            task.eta = Some(eta);
        }
        if let Some(result) = patch.result {
            task.result = Some(result);
        }
        if let Some(error) = patch.error {
            task.error = Some(error);
        }
        true
    }

    /// Request cancellation. Idempotent: a task that already finished
    /// reports `true` and keeps its status, stage and `completed_at`.
    pub fn cancel(&self, task_id: &str) -> bool {
        let mut tasks = self.lock();
        let Some(entry) = tasks.get_mut(task_id) else {
            return false;
        };
        if entry.task.status.is_terminal() {
            return true;
        }

        entry.cancel_requested = true;
        let task = &mut entry.task;
        task.status = TaskStatus::Cancelled;
        task.stage = Stage::Cancelled;
        if task.completed_at.is_none() {
            task.completed_at = Some(Utc::now());
        }
        info!(task_id, session_id = %task.session_id, "task cancelled");
        true
    }

    pub fn is_cancelled(&self, task_id: &str) -> bool {
        self.lock()
            .get(task_id)
            .map(|e| e.cancel_requested || e.task.status == TaskStatus::Cancelled)
            .unwrap_or(false)
    }

    /// Tasks of one session, oldest first.
    pub fn list_by_session(&self, session_id: &str) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .lock()
            .values()
            .filter(|e| e.task.session_id == session_id)
            .map(|e| e.task.clone())
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        tasks
    }

    pub fn delete(&self, task_id: &str) -> bool {
        self.lock().remove(task_id).is_some()
    }

    /// Drop every task of `session_id`; returns how many went.
    pub fn cleanup_session(&self, session_id: &str) -> usize {
        let mut tasks = self.lock();
        let before = tasks.len();
        tasks.retain(|_, e| e.task.session_id != session_id);
        before - tasks.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
