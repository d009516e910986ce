//! Network side of a model call.

use super::{ModelRequest, ModelResponse};
use crate::config::{ModelConfig, ModelProvider, ModelSettings};
use crate::error::DocmillError;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Sends one request to one model. Admission control and the hard timeout
/// are applied by [`super::ModelService`] around this call.
#[async_trait]
pub trait ModelTransport: Send + Sync {
    async fn send(
        &self,
        model: &ModelConfig,
        request: &ModelRequest,
    ) -> Result<ModelResponse, DocmillError>;
}

/// OpenAI-compatible HTTP transport.
///
/// Transient failures (connect errors, 429, 5xx) are retried with
/// exponential backoff: `retry_delay * 2^(attempt-1)`. Retries count
/// against the caller's hard timeout, never extend it.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    retry_attempts: u32,
    retry_delay: Duration,
}

impl HttpTransport {
    pub fn new(settings: &ModelSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            retry_attempts: settings.retry_attempts,
            retry_delay: Duration::from_millis(settings.retry_delay),
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    async fn send_once(
        &self,
        model: &ModelConfig,
        request: &ModelRequest,
        api_key: Option<&str>,
    ) -> Result<ModelResponse, Attempt> {
        let mut builder = self.client.post(&model.endpoint).json(request);
        if let Some(key) = api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            let transient = e.is_connect() || e.is_timeout();
            Attempt::new(transient, format!("transport error: {e}"))
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Attempt::new(
                is_transient(status),
                format!("Model API error: {} - {}", status.as_u16(), body),
            ));
        }

        response
            .json::<ModelResponse>()
            .await
            .map_err(|e| Attempt::new(false, format!("invalid response body: {e}")))
    }
}

#[async_trait]
impl ModelTransport for HttpTransport {
    async fn send(
        &self,
        model: &ModelConfig,
        request: &ModelRequest,
    ) -> Result<ModelResponse, DocmillError> {
        let api_key = model.provider.api_key();
        if api_key.is_none() && model.provider == ModelProvider::OpenAi {
            return Err(DocmillError::ModelRequestFailed {
                model_id: model.id.clone(),
                detail: "Missing API key for OpenAI provider".into(),
            });
        }

        let mut last = String::new();
        for attempt in 0..=self.retry_attempts {
            if attempt > 0 {
                let backoff = self.retry_delay.saturating_mul(2u32.saturating_pow(attempt - 1));
                warn!(
                    model_id = %model.id,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    "retrying model request"
                );
                sleep(backoff).await;
            }

            match self.send_once(model, request, api_key.as_deref()).await {
                Ok(response) => {
                    debug!(model_id = %model.id, attempt, "model responded");
                    return Ok(response);
                }
                Err(failure) => {
                    last = failure.detail;
                    if !failure.transient {
                        break;
                    }
                }
            }
        }

        Err(DocmillError::ModelRequestFailed {
            model_id: model.id.clone(),
            detail: last,
        })
    }
}

struct Attempt {
    transient: bool,
    detail: String,
}

impl Attempt {
    fn new(transient: bool, detail: String) -> Self {
        Self { transient, detail }
    }
}

fn is_transient(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}
