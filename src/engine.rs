//! Explicit wiring of every component.
//!
//! [`Engine`] owns one instance of each registry, the model queue, the
//! orchestrator and the sweeper. Nothing is global: two engines over two
//! data directories are fully independent.

use crate::cleanup::{CleanupConfig, CleanupService};
use crate::config::{ModelsConfig, ServiceConfig};
use crate::convert::{LibreOfficeRenderer, MarkItDownExtractor, MarkdownExtractor, OfficeRenderer};
use crate::error::DocmillError;
use crate::model::{HttpTransport, ModelService};
use crate::ocr::{OcrEngine, OcrService};
use crate::pipeline::{ProcessOptions, ProcessService};
use crate::progress::SharedObserver;
use crate::registry::{Category, FileMetadata, FileRecord, FileRegistry, FileType, Task, TaskRegistry};
use crate::storage::{stored_name, Storage};
use chrono::Utc;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// The external tools the orchestrator drives.
#[derive(Clone)]
pub struct Collaborators {
    pub renderer: Arc<dyn OfficeRenderer>,
    pub extractor: Arc<dyn MarkdownExtractor>,
    pub ocr: Arc<dyn OcrEngine>,
}

impl Collaborators {
    /// LibreOffice, MarkItDown and OCR through `models`, as configured.
    pub fn external(config: &ServiceConfig, models: &Arc<ModelService>) -> Self {
        let storage = Storage::new(&config.data_dir);
        Self {
            renderer: Arc::new(LibreOfficeRenderer::new(
                storage.clone(),
                &config.libreoffice_path,
                config.libreoffice_timeout,
            )),
            extractor: Arc::new(MarkItDownExtractor::new(
                storage.clone(),
                &config.markitdown_path,
                config.markitdown_timeout,
            )),
            ocr: Arc::new(OcrService::new(
                storage,
                Arc::clone(models),
                config.ocr_max_input_bytes,
            )),
        }
    }
}

pub struct Engine {
    config: ServiceConfig,
    storage: Storage,
    files: Arc<FileRegistry>,
    tasks: Arc<TaskRegistry>,
    models: Arc<ModelService>,
    process: ProcessService,
    cleanup: Arc<CleanupService>,
}

impl Engine {
    /// Engine with the real external tools and an HTTP model transport.
    pub fn new(config: ServiceConfig, models: ModelsConfig) -> Self {
        let transport = Arc::new(HttpTransport::new(&models.settings));
        let models = Arc::new(ModelService::new(models, transport, &config.mock_dir));
        let collaborators = Collaborators::external(&config, &models);
        Self::with_collaborators(config, models, collaborators)
    }

    pub fn with_collaborators(
        config: ServiceConfig,
        models: Arc<ModelService>,
        collaborators: Collaborators,
    ) -> Self {
        let storage = Storage::new(&config.data_dir);
        let files = Arc::new(FileRegistry::new());
        let tasks = Arc::new(TaskRegistry::new());
        let process = ProcessService::new(
            Arc::clone(&files),
            Arc::clone(&tasks),
            storage.clone(),
            collaborators.renderer,
            collaborators.extractor,
            collaborators.ocr,
        );
        let cleanup = Arc::new(CleanupService::new(
            storage.clone(),
            Arc::clone(&files),
            Arc::clone(&tasks),
            CleanupConfig::from(&config),
        ));
        info!(event = "engine.init", data_dir = %config.data_dir.display(), "engine initialised");
        Self {
            config,
            storage,
            files,
            tasks,
            models,
            process,
            cleanup,
        }
    }

    pub fn with_observer(mut self, observer: SharedObserver) -> Self {
        self.process = self.process.with_observer(observer);
        self
    }

    // ── Accessors ────────────────────────────────────────────────────────

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn files(&self) -> &Arc<FileRegistry> {
        &self.files
    }

    pub fn tasks(&self) -> &Arc<TaskRegistry> {
        &self.tasks
    }

    pub fn models(&self) -> &Arc<ModelService> {
        &self.models
    }

    pub fn process(&self) -> &ProcessService {
        &self.process
    }

    pub fn cleanup(&self) -> &Arc<CleanupService> {
        &self.cleanup
    }

    // ── Operations ───────────────────────────────────────────────────────

    pub fn new_session_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Copy a local file into the session's `uploads/` and register it.
    ///
    /// Files whose extension maps to no known type are rejected here with
    /// `UNSUPPORTED_FILE_TYPE`, before any record or task exists.
    pub async fn ingest(&self, session_id: &str, source: &Path) -> Result<FileRecord, DocmillError> {
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                DocmillError::storage(source, io::Error::new(io::ErrorKind::InvalidInput, "not a file path"))
            })?;
        let file_type = FileType::from_name(&name)
            .ok_or_else(|| DocmillError::UnsupportedFileType { name: name.clone() })?;

        self.storage.create_session_dir(session_id).await?;
        let id = Uuid::new_v4().to_string();
        let (locator, size) = self
            .storage
            .import_file(session_id, Category::Uploads, &stored_name(&id, &name), source)
            .await?;

        let file = FileRecord {
            id,
            session_id: session_id.to_string(),
            mime_type: mime_guess::from_path(&name)
                .first_or_octet_stream()
                .essence_str()
                .to_string(),
            name,
            file_type,
            size,
            storage_locator: locator,
            category: Category::Uploads,
            created_at: Utc::now(),
            metadata: FileMetadata::default(),
        };
        self.files.register(session_id, file.clone());
        info!(event = "file.ingested", session_id, file_id = %file.id, name = %file.name, size, "file ingested");
        Ok(file)
    }

    pub fn start_processing(&self, file: FileRecord, options: ProcessOptions) -> Task {
        self.process.start_processing(file, options)
    }

    /// [`ingest`](Self::ingest) then [`start_processing`](Self::start_processing).
    pub async fn submit(
        &self,
        session_id: &str,
        source: &Path,
        options: ProcessOptions,
    ) -> Result<Task, DocmillError> {
        let file = self.ingest(session_id, source).await?;
        Ok(self.start_processing(file, options))
    }

    pub fn get_task(&self, task_id: &str) -> Option<Task> {
        self.tasks.get(task_id)
    }

    /// Request cancellation and return the task as it now stands, or `None`
    /// if the id is unknown.
    pub fn cancel_task(&self, task_id: &str) -> Option<Task> {
        if self.tasks.cancel(task_id) {
            self.tasks.get(task_id)
        } else {
            None
        }
    }

    /// Start the background sweeper.
    pub fn start_cleanup(&self) -> bool {
        self.cleanup.start()
    }

    pub fn shutdown(&self) {
        self.cleanup.stop();
    }
}
