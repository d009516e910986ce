//! Model queue and OCR path, end to end through the public API.

mod common;

use async_trait::async_trait;
use common::{engine, upload, wait_terminal, FakeExtractor, FakeRenderer};
use docmill::config::ModelConfig;
use docmill::model::ChatMessage;
use docmill::{
    Collaborators, DocmillError, ErrorCode, ModelCategory, ModelRequest, ModelResponse,
    ModelService, ModelTransport, ModelsConfig, OcrService, ProcessOptions, Storage, TaskStatus,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

const MOCKED_OCR: &str = r#"
ocr:
  - id: ocr-mock
    name: Mock OCR
    provider: custom
    model: mock-vision
    endpoint: ""
    timeout: 5000
    max_concurrency: 1
    enabled: true
    mock:
      enabled: true
      response:
        message: "X"
"#;

/// Counts calls and holds each one for a fixed time.
#[derive(Default)]
struct CountingTransport {
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    hold: Duration,
}

#[async_trait]
impl ModelTransport for CountingTransport {
    async fn send(
        &self,
        model: &ModelConfig,
        _request: &ModelRequest,
    ) -> Result<ModelResponse, DocmillError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.hold).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        let body = serde_json::json!({
            "model": model.model,
            "choices": [{ "message": { "role": "assistant", "content": "ok" } }],
        });
        Ok(serde_json::from_value(body).expect("valid response"))
    }
}

fn qa_model(max_concurrency: usize) -> ModelsConfig {
    let yaml = format!(
        r#"
qa:
  - id: qa-1
    name: QA
    provider: custom
    model: qa-small
    endpoint: http://127.0.0.1:9/v1/chat/completions
    timeout: 5000
    max_concurrency: {max_concurrency}
    enabled: true
"#
    );
    ModelsConfig::from_yaml_str(&yaml).expect("valid models yaml")
}

fn request(text: &str) -> ModelRequest {
    ModelRequest::new("qa-small", vec![ChatMessage::user(text)])
}

// ── Queue ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_mocked_model_never_touches_transport() {
    let tmp = TempDir::new().unwrap();
    let transport = Arc::new(CountingTransport::default());
    let models = ModelsConfig::from_yaml_str(MOCKED_OCR).unwrap();
    let service = ModelService::new(models, transport.clone(), tmp.path());

    let response = assert_ok!(
        service
            .call_model(ModelCategory::Ocr, &request("page"), Some("trace-9"))
            .await
    );
    assert_eq!(response.first_content(), Some("X"));
    assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    assert_eq!(service.active_count("ocr-mock"), 0);
}

#[tokio::test]
async fn test_missing_category_is_not_available() {
    let tmp = TempDir::new().unwrap();
    let service = ModelService::new(
        ModelsConfig::default(),
        Arc::new(CountingTransport::default()),
        tmp.path(),
    );
    let err = assert_err!(service.call_model(ModelCategory::Translate, &request("hi"), None).await);
    assert_eq!(err.code(), ErrorCode::ModelNotAvailable);
    assert!(!service.check_availability()[&ModelCategory::Translate]);
}

#[tokio::test]
async fn test_concurrency_ceiling_holds_under_load() {
    let tmp = TempDir::new().unwrap();
    let transport = Arc::new(CountingTransport {
        hold: Duration::from_millis(20),
        ..Default::default()
    });
    let service = Arc::new(ModelService::new(qa_model(3), transport.clone(), tmp.path()));

    let handles: Vec<_> = (0..12)
        .map(|i| {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                service
                    .call_model(ModelCategory::Qa, &request(&format!("q{i}")), None)
                    .await
            })
        })
        .collect();
    for handle in handles {
        assert_ok!(handle.await.unwrap());
    }

    assert_eq!(transport.calls.load(Ordering::SeqCst), 12);
    assert!(transport.peak.load(Ordering::SeqCst) <= 3);
    assert_eq!(service.active_count("qa-1"), 0);
    assert_eq!(service.queue_status().get("qa-1"), Some(&0));
}

// ── OCR through the pipeline ─────────────────────────────────────────────────

#[tokio::test]
async fn test_scan_png_through_mocked_ocr_model() {
    let tmp = TempDir::new().unwrap();
    let storage = Storage::new(tmp.path().join("data"));
    let transport = Arc::new(CountingTransport::default());
    let models = Arc::new(ModelService::new(
        ModelsConfig::from_yaml_str(MOCKED_OCR).unwrap(),
        transport.clone(),
        tmp.path().join("mocks"),
    ));
    let collaborators = Collaborators {
        renderer: Arc::new(FakeRenderer::new(storage.clone())),
        extractor: Arc::new(FakeExtractor::new(storage.clone())),
        ocr: Arc::new(OcrService::new(storage, models, 1024 * 1024)),
    };
    let (engine, _log) = engine(&tmp, collaborators);

    let source = upload(&engine, &tmp, "s1", "scan.png", b"\x89PNG\r\n\x1a\n").await;
    let task = engine.start_processing(source, ProcessOptions::default().attachment());
    let done = wait_terminal(engine.tasks(), &task.id).await;

    assert_eq!(done.status, TaskStatus::Succeeded, "{:?}", done.error);
    let markdown = done.result.unwrap().markdown_file;
    assert_eq!(std::fs::read_to_string(&markdown.storage_locator).unwrap(), "X\n");
    assert_eq!(markdown.metadata.role, Some(docmill::registry::FileRole::Attachment));
    assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_ocr_without_model_fails_the_task() {
    let tmp = TempDir::new().unwrap();
    let storage = Storage::new(tmp.path().join("data"));
    let models = common::model_service(ModelsConfig::default(), &tmp);
    let collaborators = Collaborators {
        renderer: Arc::new(FakeRenderer::new(storage.clone())),
        extractor: Arc::new(FakeExtractor::new(storage.clone())),
        ocr: Arc::new(OcrService::new(storage, models, 1024 * 1024)),
    };
    let (engine, log) = engine(&tmp, collaborators);

    let source = upload(&engine, &tmp, "s1", "paper.pdf", b"%PDF-1.7").await;
    let task = engine.start_processing(source, ProcessOptions::default());
    let done = wait_terminal(engine.tasks(), &task.id).await;

    assert_eq!(done.status, TaskStatus::Failed);
    assert_eq!(done.error.unwrap().code, ErrorCode::OcrModelNotConfigured);
    assert_eq!(log.outcome(), Some("failed"));
}
