//! The process service: one task per submitted file.
//!
//! [`ProcessService::start_processing`] registers a `pending` task and
//! returns it at once; the pipeline runs on a spawned tokio task. Every
//! way a run can end (success, tool failure, cancellation, panic) lands in
//! the task registry, so a poller never sees a task stuck at `running`.

use super::{
    PipelineKind, PROGRESS_DONE, PROGRESS_OCR_TO_MARKDOWN, PROGRESS_OFFICE_TO_PDF,
    PROGRESS_PDF_TO_MARKDOWN, PROGRESS_RUNNING,
};
use crate::convert::{MarkdownExtractor, OfficeRenderer};
use crate::error::{DocmillError, ErrorCode, TaskError};
use crate::ocr::OcrEngine;
use crate::progress::{NoopObserver, SharedObserver};
use crate::registry::{
    Category, FileMetadata, FilePatch, FileRecord, FileRegistry, FileRole, FileType, Stage, Task,
    TaskPatch, TaskRegistry, TaskResult, TaskStatus, TaskType,
};
use crate::storage::{stored_name, Storage};
use chrono::Utc;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const MIME_PDF: &str = "application/pdf";
const MIME_MARKDOWN: &str = "text/markdown";

/// Per-submission options.
#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    /// `None` is the main document. Carried onto the Markdown result.
    pub role: Option<FileRole>,
    /// Correlates log lines across services.
    pub trace_id: Option<String>,
}

impl ProcessOptions {
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn attachment(mut self) -> Self {
        self.role = Some(FileRole::Attachment);
        self
    }

    fn role_name(&self) -> &'static str {
        match self.role {
            Some(FileRole::Attachment) => "attachment",
            None => "main",
        }
    }
}

/// Why a run stopped early.
#[derive(Debug)]
enum Halt {
    Cancelled,
    /// The task disappeared from the registry, usually reclaimed by a sweep.
    Vanished,
    Failed(DocmillError),
}

impl From<DocmillError> for Halt {
    fn from(err: DocmillError) -> Self {
        Halt::Failed(err)
    }
}

/// Pipeline orchestrator.
///
/// Cloning is cheap: every collaborator sits behind an `Arc`, and each
/// spawned run holds its own clone.
#[derive(Clone)]
pub struct ProcessService {
    files: Arc<FileRegistry>,
    tasks: Arc<TaskRegistry>,
    storage: Storage,
    renderer: Arc<dyn OfficeRenderer>,
    extractor: Arc<dyn MarkdownExtractor>,
    ocr: Arc<dyn OcrEngine>,
    observer: SharedObserver,
}

impl ProcessService {
    pub fn new(
        files: Arc<FileRegistry>,
        tasks: Arc<TaskRegistry>,
        storage: Storage,
        renderer: Arc<dyn OfficeRenderer>,
        extractor: Arc<dyn MarkdownExtractor>,
        ocr: Arc<dyn OcrEngine>,
    ) -> Self {
        Self {
            files,
            tasks,
            storage,
            renderer,
            extractor,
            ocr,
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_observer(mut self, observer: SharedObserver) -> Self {
        self.observer = observer;
        self
    }

    /// Register a task for `file` and launch its pipeline.
    ///
    /// Returns the task as registered. Unsupported files never run: the
    /// returned task is already `failed` with `UNSUPPORTED_FILE_TYPE`.
    /// Must be called from within a tokio runtime.
    pub fn start_processing(&self, file: FileRecord, options: ProcessOptions) -> Task {
        let task = Task::new(&file.session_id, &file.id, TaskType::Process);
        self.tasks.register(task.clone());

        let Some(kind) = PipelineKind::select(&file) else {
            let err = DocmillError::UnsupportedFileType {
                name: file.name.clone(),
            };
            warn!(event = "pipeline.unsupported", task_id = %task.id, session_id = %file.session_id, file_id = %file.id, name = %file.name, trace_id = options.trace_id.as_deref().unwrap_or("-"), "no pipeline for file");
            let patch = TaskPatch::new()
                .status(TaskStatus::Failed)
                .progress(PROGRESS_DONE)
                .error(TaskError::from(&err));
            return self.settle(&task.id, patch).unwrap_or(task);
        };

        let run = self.clone();
        let task_id = task.id.clone();
        tokio::spawn(async move { run.run(task_id, file, kind, options).await });
        task
    }

    async fn run(self, task_id: String, file: FileRecord, kind: PipelineKind, options: ProcessOptions) {
        let trace_id = options.trace_id.as_deref().unwrap_or("-");
        info!(event = "pipeline.start", task_id = %task_id, session_id = %file.session_id, file_id = %file.id, pipeline = %kind, role = options.role_name(), trace_id, "file processing pipeline started");

        let outcome = AssertUnwindSafe(self.execute(&task_id, &file, kind, &options))
            .catch_unwind()
            .await;

        let failure = match outcome {
            Ok(Ok(result)) => {
                let markdown_file_id = result.file_id.clone();
                let patch = TaskPatch::new()
                    .status(TaskStatus::Succeeded)
                    .progress(PROGRESS_DONE)
                    .stage(Stage::Completed)
                    .result(result);
                match self.settle(&task_id, patch).map(|t| t.status) {
                    Some(TaskStatus::Succeeded) => {
                        info!(event = "pipeline.complete", task_id = %task_id, session_id = %file.session_id, file_id = %file.id, markdown_file_id = %markdown_file_id, role = options.role_name(), trace_id, "file processing pipeline completed");
                    }
                    Some(status) => {
                        debug!(task_id = %task_id, %status, "result discarded; task already finished");
                    }
                    None => debug!(task_id = %task_id, "task vanished before completion"),
                }
                return;
            }
            Ok(Err(Halt::Cancelled)) => {
                let patch = TaskPatch::new()
                    .status(TaskStatus::Cancelled)
                    .stage(Stage::Cancelled);
                self.settle(&task_id, patch);
                info!(event = "pipeline.cancelled", task_id = %task_id, session_id = %file.session_id, file_id = %file.id, role = options.role_name(), trace_id, "file processing pipeline cancelled");
                return;
            }
            Ok(Err(Halt::Vanished)) => {
                debug!(event = "pipeline.vanished", task_id = %task_id, session_id = %file.session_id, "task no longer registered; stopping");
                return;
            }
            Ok(Err(Halt::Failed(err))) => TaskError::from(&err),
            Err(panic) => TaskError::new(ErrorCode::PipelinePanicked, panic_message(panic.as_ref())),
        };

        error!(event = "pipeline.failed", task_id = %task_id, session_id = %file.session_id, file_id = %file.id, code = %failure.code, trace_id, "file processing pipeline failed: {}", failure.message);
        let patch = TaskPatch::new()
            .status(TaskStatus::Failed)
            .progress(PROGRESS_DONE)
            .error(failure);
        self.settle(&task_id, patch);
    }

    async fn execute(
        &self,
        task_id: &str,
        file: &FileRecord,
        kind: PipelineKind,
        options: &ProcessOptions,
    ) -> Result<TaskResult, Halt> {
        let trace_id = options.trace_id.as_deref();

        self.ensure_not_cancelled(task_id)?;
        let started = TaskPatch::new()
            .status(TaskStatus::Running)
            .progress(PROGRESS_RUNNING)
            .stage(Stage::Pending);
        if !self.tasks.update(task_id, started) {
            return Err(Halt::Vanished);
        }
        self.observer.on_stage(task_id, Stage::Pending, PROGRESS_RUNNING);

        let rendered = if kind.renders_pdf() {
            self.checkpoint(task_id, Stage::OfficeToPdf, PROGRESS_OFFICE_TO_PDF)?;
            Some(self.convert_office_to_pdf(task_id, file, trace_id).await?)
        } else {
            None
        };

        let markdown_file = match (&rendered, kind) {
            (Some((pdf, _)), PipelineKind::OfficeMarkitdown) => {
                self.checkpoint(task_id, Stage::PdfToMarkdown, PROGRESS_PDF_TO_MARKDOWN)?;
                self.markdown_from_office(task_id, file, pdf, options).await?
            }
            (Some((pdf, _)), _) => {
                self.checkpoint(task_id, Stage::OcrToMarkdown, PROGRESS_OCR_TO_MARKDOWN)?;
                self.run_ocr(task_id, pdf, MIME_PDF, options).await?
            }
            (None, _) => {
                self.checkpoint(task_id, Stage::OcrToMarkdown, PROGRESS_OCR_TO_MARKDOWN)?;
                let mime = ocr_mime_type(file, kind);
                self.run_ocr(task_id, file, &mime, options).await?
            }
        };
        let (converted_pdf_file, source_file) = match rendered {
            Some((pdf, source)) => (Some(pdf), source),
            None => (None, file.clone()),
        };

        self.ensure_not_cancelled(task_id)?;
        Ok(TaskResult {
            file_id: markdown_file.id.clone(),
            markdown_file,
            converted_pdf_file,
            source_file,
        })
    }

    // ── Stage bookkeeping ────────────────────────────────────────────────

    fn ensure_not_cancelled(&self, task_id: &str) -> Result<(), Halt> {
        if self.tasks.is_cancelled(task_id) {
            Err(Halt::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Called when an external tool returns, before its output is
    /// registered: a task that was reclaimed or cancelled meanwhile must not
    /// leave new records behind.
    fn ensure_live(&self, task_id: &str) -> Result<(), Halt> {
        if !self.tasks.contains(task_id) {
            return Err(Halt::Vanished);
        }
        self.ensure_not_cancelled(task_id)
    }

    fn checkpoint(&self, task_id: &str, stage: Stage, progress: u8) -> Result<(), Halt> {
        self.ensure_not_cancelled(task_id)?;
        if !self
            .tasks
            .update(task_id, TaskPatch::new().stage(stage).progress(progress))
        {
            return Err(Halt::Vanished);
        }
        debug!(task_id, stage = %stage, progress, "stage checkpoint");
        self.observer.on_stage(task_id, stage, progress);
        Ok(())
    }

    /// Apply a terminal patch and tell the observer how the task actually
    /// ended, which may differ from the patch if a cancel got there first.
    fn settle(&self, task_id: &str, patch: TaskPatch) -> Option<Task> {
        if !self.tasks.update(task_id, patch) {
            return None;
        }
        let task = self.tasks.get(task_id)?;
        match task.status {
            TaskStatus::Succeeded => {
                if let Some(result) = &task.result {
                    self.observer.on_stage(task_id, Stage::Completed, task.progress);
                    self.observer.on_complete(task_id, result);
                }
            }
            TaskStatus::Failed => {
                if let Some(err) = &task.error {
                    self.observer.on_failed(task_id, err);
                }
            }
            TaskStatus::Cancelled => self.observer.on_cancelled(task_id),
            TaskStatus::Pending | TaskStatus::Running => {}
        }
        Some(task)
    }

    // ── Stages ───────────────────────────────────────────────────────────

    /// Render `file` to PDF, register the PDF, and point the source's
    /// metadata at it. Returns `(pdf, updated source)`.
    async fn convert_office_to_pdf(
        &self,
        task_id: &str,
        file: &FileRecord,
        trace_id: Option<&str>,
    ) -> Result<(FileRecord, FileRecord), Halt> {
        let session_id = file.session_id.as_str();
        let rendered = self
            .renderer
            .convert_to_pdf(session_id, &file.stored_name(), trace_id)
            .await?;
        self.ensure_live(task_id)?;

        let pdf_id = Uuid::new_v4().to_string();
        let pdf_name = file.name_with_extension("pdf");
        let pdf_stored = stored_name(&pdf_id, &pdf_name);
        let locator = self
            .storage
            .rename(session_id, Category::Converted, &rendered, &pdf_stored)
            .await?;
        let size = self
            .storage
            .file_size(session_id, Category::Converted, &pdf_stored)
            .await?;

        let pdf = FileRecord {
            id: pdf_id,
            session_id: session_id.to_string(),
            name: pdf_name,
            file_type: FileType::Pdf,
            mime_type: MIME_PDF.to_string(),
            size,
            storage_locator: locator,
            category: Category::Converted,
            created_at: Utc::now(),
            metadata: FileMetadata::default(),
        };
        self.files.register(session_id, pdf.clone());

        let mut metadata = file.metadata.clone();
        if let Some(ext) = file.extension() {
            metadata.format = Some(ext);
        }
        metadata.converted_pdf_id = Some(pdf.id.clone());
        let patch = FilePatch {
            metadata: Some(metadata.clone()),
            ..Default::default()
        };
        let source = self
            .files
            .update(&file.id, patch)
            .unwrap_or_else(|| FileRecord {
                metadata,
                ..file.clone()
            });

        Ok((pdf, source))
    }

    /// MarkItDown on the original office file; on any failure, MarkItDown on
    /// the rendered PDF. Only the fallback's failure fails the task.
    async fn markdown_from_office(
        &self,
        task_id: &str,
        source: &FileRecord,
        pdf: &FileRecord,
        options: &ProcessOptions,
    ) -> Result<FileRecord, Halt> {
        let trace_id = options.trace_id.as_deref();
        let session_id = source.session_id.as_str();
        let markdown_id = Uuid::new_v4().to_string();
        let markdown_name = source.name_with_extension("md");
        let markdown_stored = stored_name(&markdown_id, &markdown_name);

        let direct = self
            .extractor
            .convert_to_markdown(
                session_id,
                source.category,
                &source.stored_name(),
                &markdown_stored,
                trace_id,
            )
            .await;

        if let Err(reason) = direct {
            warn!(event = "pipeline.office.markitdown_fallback", task_id, session_id, file_id = %source.id, converted_pdf_id = %pdf.id, reason = %reason, trace_id = trace_id.unwrap_or("-"), "direct office to markdown conversion failed, falling back to PDF");
            self.ensure_live(task_id)?;
            self.extractor
                .convert_to_markdown(
                    session_id,
                    Category::Converted,
                    &pdf.stored_name(),
                    &markdown_stored,
                    trace_id,
                )
                .await
                .inspect_err(|e| {
                    error!(event = "pipeline.office.fallback_failed", task_id, session_id, file_id = %source.id, converted_pdf_id = %pdf.id, error = %e, "fallback PDF to markdown conversion failed");
                })?;
        }

        self.ensure_live(task_id)?;
        Ok(self
            .register_markdown(session_id, markdown_id, markdown_name, &markdown_stored, options)
            .await?)
    }

    async fn run_ocr(
        &self,
        task_id: &str,
        source: &FileRecord,
        mime_type: &str,
        options: &ProcessOptions,
    ) -> Result<FileRecord, Halt> {
        let session_id = source.session_id.as_str();
        let markdown_id = Uuid::new_v4().to_string();
        let markdown_name = source.name_with_extension("md");
        let markdown_stored = stored_name(&markdown_id, &markdown_name);

        let text = self
            .ocr
            .convert_to_markdown(
                session_id,
                source.category,
                &source.stored_name(),
                mime_type,
                options.trace_id.as_deref(),
            )
            .await?;
        self.ensure_live(task_id)?;
        self.storage
            .save_file(session_id, Category::Results, &markdown_stored, text.as_bytes())
            .await?;

        Ok(self
            .register_markdown(session_id, markdown_id, markdown_name, &markdown_stored, options)
            .await?)
    }

    async fn register_markdown(
        &self,
        session_id: &str,
        id: String,
        name: String,
        stored: &str,
        options: &ProcessOptions,
    ) -> Result<FileRecord, DocmillError> {
        let size = self
            .storage
            .file_size(session_id, Category::Results, stored)
            .await?;
        let markdown = FileRecord {
            id,
            session_id: session_id.to_string(),
            name,
            file_type: FileType::Text,
            mime_type: MIME_MARKDOWN.to_string(),
            size,
            storage_locator: self.storage.file_path(session_id, Category::Results, stored),
            category: Category::Results,
            created_at: Utc::now(),
            metadata: FileMetadata {
                role: options.role,
                ..Default::default()
            },
        };
        self.files.register(session_id, markdown.clone());
        Ok(markdown)
    }
}

/// PDFs always go out as `application/pdf`; images keep their recorded type
/// unless it is missing or generic, in which case it is guessed from the name.
fn ocr_mime_type(file: &FileRecord, kind: PipelineKind) -> String {
    if kind == PipelineKind::PdfOcr {
        return MIME_PDF.to_string();
    }
    if file.mime_type.starts_with("image/") {
        return file.mime_type.clone();
    }
    mime_guess::from_path(&file.name)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("pipeline panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("pipeline panicked: {s}")
    } else {
        "pipeline panicked".to_string()
    }
}
