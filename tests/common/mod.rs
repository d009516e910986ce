//! Fake collaborators shared by the integration tests.
//!
//! None of them need LibreOffice, MarkItDown or the network: they read and
//! write the same session directories the real tools would.

#![allow(dead_code)]

use async_trait::async_trait;
use docmill::config::{ModelSettings, ModelsConfig};
use docmill::model::HttpTransport;
use docmill::{
    Category, Collaborators, DocmillError, Engine, MarkdownExtractor, ModelService, OcrEngine,
    OfficeRenderer, PipelineObserver, ServiceConfig, Stage, Storage, Task, TaskError,
    TaskRegistry, TaskResult,
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Semaphore;

// ── Office renderer ──────────────────────────────────────────────────────────

/// Writes a stub PDF named after the input stem, like LibreOffice does.
pub struct FakeRenderer {
    storage: Storage,
    /// When set, each conversion waits for one permit before running.
    gate: Option<Arc<Semaphore>>,
    fail_with: Mutex<Option<DocmillError>>,
}

impl FakeRenderer {
    pub fn new(storage: Storage) -> Self {
        Self {
            storage,
            gate: None,
            fail_with: Mutex::new(None),
        }
    }

    pub fn gated(storage: Storage, gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new(storage)
        }
    }

    pub fn failing(storage: Storage, err: DocmillError) -> Self {
        Self {
            fail_with: Mutex::new(Some(err)),
            ..Self::new(storage)
        }
    }
}

#[async_trait]
impl OfficeRenderer for FakeRenderer {
    async fn convert_to_pdf(
        &self,
        session_id: &str,
        stored_name: &str,
        _trace_id: Option<&str>,
    ) -> Result<String, DocmillError> {
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate open").forget();
        }
        if let Some(err) = self.fail_with.lock().unwrap().take() {
            return Err(err);
        }
        let stem = Path::new(stored_name).file_stem().unwrap().to_string_lossy();
        let pdf = format!("{stem}.pdf");
        self.storage
            .save_file(session_id, Category::Converted, &pdf, b"%PDF-1.4 fake")
            .await?;
        Ok(pdf)
    }
}

// ── Markdown extractor ───────────────────────────────────────────────────────

/// Records every call; can be told to fail for sources in one category.
#[derive(Default)]
pub struct FakeExtractor {
    storage: Option<Storage>,
    fail_for: Vec<Category>,
    pub calls: Mutex<Vec<(Category, String)>>,
}

impl FakeExtractor {
    pub fn new(storage: Storage) -> Self {
        Self {
            storage: Some(storage),
            ..Default::default()
        }
    }

    pub fn failing_for(storage: Storage, categories: &[Category]) -> Self {
        Self {
            storage: Some(storage),
            fail_for: categories.to_vec(),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<(Category, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl MarkdownExtractor for FakeExtractor {
    async fn convert_to_markdown(
        &self,
        session_id: &str,
        source_category: Category,
        source_name: &str,
        output_name: &str,
        _trace_id: Option<&str>,
    ) -> Result<PathBuf, DocmillError> {
        self.calls
            .lock()
            .unwrap()
            .push((source_category, source_name.to_string()));
        if self.fail_for.contains(&source_category) {
            return Err(DocmillError::MarkItDownFailed {
                file: source_name.to_string(),
                detail: "unsupported input".into(),
            });
        }
        let storage = self.storage.as_ref().expect("extractor has storage");
        let body = format!("# Extracted\n\nfrom {source_name}\n");
        storage
            .save_file(session_id, Category::Results, output_name, body.as_bytes())
            .await
    }
}

// ── OCR ──────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeOcr {
    pub calls: Mutex<Vec<(Category, String, String)>>,
}

impl FakeOcr {
    pub fn calls(&self) -> Vec<(Category, String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl OcrEngine for FakeOcr {
    async fn convert_to_markdown(
        &self,
        _session_id: &str,
        category: Category,
        stored_name: &str,
        mime_type: &str,
        _trace_id: Option<&str>,
    ) -> Result<String, DocmillError> {
        self.calls
            .lock()
            .unwrap()
            .push((category, stored_name.to_string(), mime_type.to_string()));
        Ok(format!("# OCR\n\n{stored_name}\n"))
    }
}

// ── Observer ─────────────────────────────────────────────────────────────────

/// Records the stage sequence and the terminal callback.
#[derive(Default)]
pub struct StageLog {
    pub stages: Mutex<Vec<Stage>>,
    pub outcome: Mutex<Option<&'static str>>,
}

impl StageLog {
    pub fn stages(&self) -> Vec<Stage> {
        self.stages.lock().unwrap().clone()
    }

    pub fn outcome(&self) -> Option<&'static str> {
        *self.outcome.lock().unwrap()
    }
}

impl PipelineObserver for StageLog {
    fn on_stage(&self, _task_id: &str, stage: Stage, _progress: u8) {
        self.stages.lock().unwrap().push(stage);
    }

    fn on_complete(&self, _task_id: &str, _result: &TaskResult) {
        *self.outcome.lock().unwrap() = Some("complete");
    }

    fn on_failed(&self, _task_id: &str, _error: &TaskError) {
        *self.outcome.lock().unwrap() = Some("failed");
    }

    fn on_cancelled(&self, _task_id: &str) {
        *self.outcome.lock().unwrap() = Some("cancelled");
    }
}

// ── Harness ──────────────────────────────────────────────────────────────────

pub fn config(tmp: &TempDir) -> ServiceConfig {
    ServiceConfig::builder()
        .data_dir(tmp.path().join("data"))
        .mock_dir(tmp.path().join("mocks"))
        .build()
        .expect("valid config")
}

pub fn model_service(models: ModelsConfig, tmp: &TempDir) -> Arc<ModelService> {
    Arc::new(ModelService::new(
        models,
        Arc::new(HttpTransport::new(&ModelSettings::default())),
        tmp.path().join("mocks"),
    ))
}

/// Engine over `tmp` with the given collaborators and a [`StageLog`].
pub fn engine(tmp: &TempDir, collaborators: Collaborators) -> (Engine, Arc<StageLog>) {
    let log = Arc::new(StageLog::default());
    let engine = Engine::with_collaborators(
        config(tmp),
        model_service(ModelsConfig::default(), tmp),
        collaborators,
    )
    .with_observer(log.clone());
    (engine, log)
}

/// Write `bytes` to a scratch file called `name` and ingest it into `session`.
pub async fn upload(engine: &Engine, tmp: &TempDir, session: &str, name: &str, bytes: &[u8]) -> docmill::FileRecord {
    let src_dir = tmp.path().join("incoming");
    std::fs::create_dir_all(&src_dir).unwrap();
    let src = src_dir.join(name);
    std::fs::write(&src, bytes).unwrap();
    engine.ingest(session, &src).await.expect("ingest")
}

pub async fn wait_terminal(tasks: &TaskRegistry, task_id: &str) -> Task {
    wait_until(tasks, task_id, |t| t.status.is_terminal()).await
}

pub async fn wait_until(tasks: &TaskRegistry, task_id: &str, pred: impl Fn(&Task) -> bool) -> Task {
    for _ in 0..500 {
        if let Some(task) = tasks.get(task_id) {
            if pred(&task) {
                return task;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {task_id} never reached the expected state: {:?}", tasks.get(task_id));
}
