//! OCR adapter: a stored file in, Markdown text out.
//!
//! The whole file is inlined as a base64 `data:` URL in a single chat
//! message to the category's OCR model, routed through the
//! [`ModelService`] queue like any other model call.

use crate::config::ModelCategory;
use crate::error::DocmillError;
use crate::model::{ChatMessage, ModelRequest, ModelService};
use crate::postprocess::clean_markdown;
use crate::prompts::{ocr_user_message, OCR_SYSTEM_PROMPT};
use crate::registry::Category;
use crate::storage::Storage;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::sync::Arc;
use tracing::{error, info, warn};

#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn convert_to_markdown(
        &self,
        session_id: &str,
        category: Category,
        stored_name: &str,
        mime_type: &str,
        trace_id: Option<&str>,
    ) -> Result<String, DocmillError>;
}

pub struct OcrService {
    storage: Storage,
    models: Arc<ModelService>,
    max_input_bytes: u64,
}

impl OcrService {
    pub fn new(storage: Storage, models: Arc<ModelService>, max_input_bytes: u64) -> Self {
        Self {
            storage,
            models,
            max_input_bytes,
        }
    }
}

#[async_trait]
impl OcrEngine for OcrService {
    async fn convert_to_markdown(
        &self,
        session_id: &str,
        category: Category,
        stored_name: &str,
        mime_type: &str,
        trace_id: Option<&str>,
    ) -> Result<String, DocmillError> {
        info!(event = "ocr.start", session_id, file = stored_name, mime_type, trace_id = trace_id.unwrap_or("-"), "OCR markdown conversion started");

        let bytes = self.storage.read_file(session_id, category, stored_name).await?;
        let size = bytes.len() as u64;
        if size > self.max_input_bytes {
            warn!(event = "ocr.input_too_large", session_id, file = stored_name, size, limit = self.max_input_bytes, "OCR input exceeds maximum supported size");
            return Err(DocmillError::OcrInputTooLarge {
                file: stored_name.to_string(),
                size,
                limit: self.max_input_bytes,
            });
        }

        let model = self
            .models
            .select_model(ModelCategory::Ocr)
            .ok_or(DocmillError::OcrModelNotConfigured)?;

        let request = ModelRequest::new(
            model.model,
            vec![
                ChatMessage::system(OCR_SYSTEM_PROMPT),
                ChatMessage::user(ocr_user_message(mime_type, &STANDARD.encode(&bytes))),
            ],
        );
        drop(bytes);

        let response = self
            .models
            .call_model(ModelCategory::Ocr, &request, trace_id)
            .await
            .map_err(|e| {
                error!(event = "ocr.failed", session_id, file = stored_name, error = %e, "OCR markdown conversion failed");
                DocmillError::OcrFailed {
                    file: stored_name.to_string(),
                    detail: e.to_string(),
                }
            })?;

        let markdown = clean_markdown(response.first_content().unwrap_or_default());
        info!(event = "ocr.complete", session_id, file = stored_name, mime_type, length = markdown.len(), "OCR markdown conversion completed");
        Ok(markdown)
    }
}
