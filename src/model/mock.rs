//! Canned replies for mock-enabled models.
//!
//! Precedence inside a `mock` block: `response.payload`, then
//! `response.message`, then `responsePath`. The optional `delay` is slept
//! first in every case.

use super::{Choice, ModelRequest, ModelResponse, ResponseMessage, Usage};
use crate::config::{MockConfig, ModelConfig};
use crate::error::DocmillError;
use chrono::Utc;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

pub(crate) async fn respond(
    model: &ModelConfig,
    mock: &MockConfig,
    request: &ModelRequest,
    mock_dir: &Path,
) -> Result<ModelResponse, DocmillError> {
    if let Some(ms) = mock.delay.filter(|ms| *ms > 0) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    let failed = |detail: String| DocmillError::ModelRequestFailed {
        model_id: model.id.clone(),
        detail,
    };

    if let Some(response) = &mock.response {
        if let Some(payload) = &response.payload {
            debug!(model_id = %model.id, "mock payload");
            return serde_json::from_value(payload.clone())
                .map_err(|e| failed(format!("mock payload is not a chat response: {e}")));
        }
        if let Some(message) = &response.message {
            debug!(model_id = %model.id, "mock message");
            return Ok(wrap_message(&request.model, message));
        }
    }

    if let Some(relative) = &mock.response_path {
        let path = resolve_in(mock_dir, relative).map_err(failed)?;
        debug!(model_id = %model.id, path = %path.display(), "mock response file");
        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| failed(format!("cannot read mock file {}: {e}", path.display())))?;
        return serde_json::from_str(&raw)
            .map_err(|e| failed(format!("mock file {} is not a chat response: {e}", path.display())));
    }

    Err(failed("mock enabled but no response configured".into()))
}

/// One-choice completion carrying `message`, named after the requested model.
pub(crate) fn wrap_message(model: &str, message: &str) -> ModelResponse {
    ModelResponse {
        id: format!("mock-{}", Uuid::new_v4()),
        object: "chat.completion".into(),
        created: Utc::now().timestamp(),
        model: model.to_string(),
        choices: vec![Choice {
            index: 0,
            message: ResponseMessage {
                role: "assistant".into(),
                content: message.to_string(),
            },
            finish_reason: Some("stop".into()),
        }],
        usage: Some(Usage::default()),
    }
}

/// Join `relative` onto `root`, refusing anything that could leave `root`.
fn resolve_in(root: &Path, relative: &str) -> Result<PathBuf, String> {
    let rel = Path::new(relative);
    let contained = rel
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if relative.trim().is_empty() || !contained {
        return Err(format!("mock responsePath '{relative}' escapes the mock directory"));
    }
    Ok(root.join(rel))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MockResponse, ModelProvider};
    use crate::model::ChatMessage;
    use tempfile::TempDir;

    fn model(mock: MockConfig) -> ModelConfig {
        ModelConfig {
            id: "qa-mock".into(),
            name: "QA".into(),
            provider: ModelProvider::OpenAi,
            model: "gpt-4o".into(),
            endpoint: String::new(),
            timeout: 5_000,
            max_concurrency: 1,
            enabled: true,
            mock: Some(mock),
        }
    }

    fn request() -> ModelRequest {
        ModelRequest::new("gpt-4o", vec![ChatMessage::user("hello")])
    }

    #[tokio::test]
    async fn message_is_wrapped() {
        let mock = MockConfig {
            enabled: true,
            response: Some(MockResponse {
                message: Some("canned".into()),
                payload: None,
            }),
            ..Default::default()
        };
        let resp = respond(&model(mock.clone()), &mock, &request(), Path::new("."))
            .await
            .unwrap();
        assert_eq!(resp.first_content(), Some("canned"));
        assert_eq!(resp.model, "gpt-4o");
    }

    #[tokio::test]
    async fn payload_wins_over_message() {
        let mock = MockConfig {
            enabled: true,
            response: Some(MockResponse {
                message: Some("ignored".into()),
                payload: Some(serde_json::json!({
                    "id": "p1",
                    "model": "fixed",
                    "choices": [{"index": 0, "message": {"role": "assistant", "content": "from payload"}}]
                })),
            }),
            ..Default::default()
        };
        let resp = respond(&model(mock.clone()), &mock, &request(), Path::new("."))
            .await
            .unwrap();
        assert_eq!(resp.first_content(), Some("from payload"));
        assert_eq!(resp.model, "fixed");
    }

    #[tokio::test]
    async fn loads_response_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("sample-chat.json"),
            r#"{"choices":[{"message":{"role":"assistant","content":"from file"}}],
               "usage":{"prompt_tokens":40,"completion_tokens":6,"total_tokens":46}}"#,
        )
        .unwrap();
        let mock = MockConfig {
            enabled: true,
            response_path: Some("sample-chat.json".into()),
            ..Default::default()
        };
        let resp = respond(&model(mock.clone()), &mock, &request(), dir.path())
            .await
            .unwrap();
        assert_eq!(resp.first_content(), Some("from file"));
        assert_eq!(resp.total_tokens(), 46);
    }

    #[tokio::test]
    async fn response_path_is_sandboxed() {
        for bad in ["../secrets.json", "/etc/passwd", "a/../../b.json"] {
            let mock = MockConfig {
                enabled: true,
                response_path: Some(bad.into()),
                ..Default::default()
            };
            let err = respond(&model(mock.clone()), &mock, &request(), Path::new("/tmp"))
                .await
                .unwrap_err();
            assert!(err.to_string().contains("escapes"), "{bad}: {err}");
        }
    }

    #[tokio::test]
    async fn empty_mock_is_an_error() {
        let mock = MockConfig {
            enabled: true,
            ..Default::default()
        };
        assert!(respond(&model(mock.clone()), &mock, &request(), Path::new("."))
            .await
            .is_err());
    }
}
