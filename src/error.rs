//! Error types for the docmill library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`DocmillError`]: **Fatal** for the operation that raised it: a
//!   converter subprocess died, the model endpoint timed out, storage could
//!   not be read. Returned as `Err(DocmillError)` from library calls.
//!
//! * [`TaskError`]: **Recorded**: the serialisable `{code, message}` pair a
//!   failed task carries. Pipelines never rethrow; they translate the
//!   `DocmillError` that stopped them into a `TaskError` so that clients
//!   polling the task always observe the failure.
//!
//! Every fatal error maps onto exactly one stable [`ErrorCode`], which is
//! what clients match on.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Stable, client-facing error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    UnsupportedFileType,
    LibreofficeNotInstalled,
    ConversionTimeout,
    ConversionFailed,
    MarkitdownFailed,
    OcrInputTooLarge,
    OcrModelNotConfigured,
    OcrFailed,
    ModelNotAvailable,
    ModelTimeout,
    ModelRequestFailed,
    StorageError,
    InvalidConfig,
    PipelinePanicked,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::UnsupportedFileType => "UNSUPPORTED_FILE_TYPE",
            ErrorCode::LibreofficeNotInstalled => "LIBREOFFICE_NOT_INSTALLED",
            ErrorCode::ConversionTimeout => "CONVERSION_TIMEOUT",
            ErrorCode::ConversionFailed => "CONVERSION_FAILED",
            ErrorCode::MarkitdownFailed => "MARKITDOWN_FAILED",
            ErrorCode::OcrInputTooLarge => "OCR_INPUT_TOO_LARGE",
            ErrorCode::OcrModelNotConfigured => "OCR_MODEL_NOT_CONFIGURED",
            ErrorCode::OcrFailed => "OCR_FAILED",
            ErrorCode::ModelNotAvailable => "MODEL_NOT_AVAILABLE",
            ErrorCode::ModelTimeout => "MODEL_TIMEOUT",
            ErrorCode::ModelRequestFailed => "MODEL_REQUEST_FAILED",
            ErrorCode::StorageError => "STORAGE_ERROR",
            ErrorCode::InvalidConfig => "INVALID_CONFIG",
            ErrorCode::PipelinePanicked => "PIPELINE_PANICKED",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// All fatal errors returned by the docmill library.
#[derive(Debug, Error)]
pub enum DocmillError {
    // ── Validation ────────────────────────────────────────────────────────
    /// No pipeline handles this extension / file type.
    #[error("Unsupported file type for '{name}'")]
    UnsupportedFileType { name: String },

    // ── Office renderer ───────────────────────────────────────────────────
    /// The LibreOffice binary could not be spawned.
    #[error("LibreOffice not found at '{path}'\nInstall it or set LIBREOFFICE_PATH.")]
    LibreOfficeNotInstalled { path: PathBuf },

    /// A converter subprocess exceeded its kill timeout.
    #[error("Conversion of '{file}' timed out after {secs}s")]
    ConversionTimeout { file: String, secs: u64 },

    /// LibreOffice exited unsuccessfully or produced no PDF.
    #[error("Conversion of '{file}' failed: {detail}")]
    ConversionFailed { file: String, detail: String },

    // ── Markdown extractor ────────────────────────────────────────────────
    /// MarkItDown failed for any reason (spawn, exit status, timeout).
    #[error("MarkItDown failed on '{file}': {detail}")]
    MarkItDownFailed { file: String, detail: String },

    // ── OCR adapter ───────────────────────────────────────────────────────
    /// OCR input exceeds the pre-flight byte cap.
    #[error("OCR input '{file}' is {size} bytes (limit {limit})")]
    OcrInputTooLarge { file: String, size: u64, limit: u64 },

    /// No enabled model is registered for the `ocr` category.
    #[error("No OCR model is configured")]
    OcrModelNotConfigured,

    /// The OCR model call failed.
    #[error("OCR failed for '{file}': {detail}")]
    OcrFailed { file: String, detail: String },

    // ── Request queue ─────────────────────────────────────────────────────
    /// No enabled model exists for the requested category.
    #[error("No available model for category: {category}")]
    ModelNotAvailable { category: String },

    /// The hard per-call timeout fired.
    #[error("Model '{model_id}' call timed out after {timeout_ms}ms")]
    ModelTimeout { model_id: String, timeout_ms: u64 },

    /// Transport, HTTP status, decoding or mock-loading failure.
    #[error("Model '{model_id}' request failed: {detail}")]
    ModelRequestFailed { model_id: String, detail: String },

    // ── Storage ───────────────────────────────────────────────────────────
    /// Filesystem error from the storage collaborator.
    #[error("Storage error on '{path}': {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config ────────────────────────────────────────────────────────────
    /// Configuration could not be loaded or failed validation.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DocmillError {
    /// The stable code clients see for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            DocmillError::UnsupportedFileType { .. } => ErrorCode::UnsupportedFileType,
            DocmillError::LibreOfficeNotInstalled { .. } => ErrorCode::LibreofficeNotInstalled,
            DocmillError::ConversionTimeout { .. } => ErrorCode::ConversionTimeout,
            DocmillError::ConversionFailed { .. } => ErrorCode::ConversionFailed,
            DocmillError::MarkItDownFailed { .. } => ErrorCode::MarkitdownFailed,
            DocmillError::OcrInputTooLarge { .. } => ErrorCode::OcrInputTooLarge,
            DocmillError::OcrModelNotConfigured => ErrorCode::OcrModelNotConfigured,
            DocmillError::OcrFailed { .. } => ErrorCode::OcrFailed,
            DocmillError::ModelNotAvailable { .. } => ErrorCode::ModelNotAvailable,
            DocmillError::ModelTimeout { .. } => ErrorCode::ModelTimeout,
            DocmillError::ModelRequestFailed { .. } => ErrorCode::ModelRequestFailed,
            DocmillError::Storage { .. } => ErrorCode::StorageError,
            DocmillError::InvalidConfig(_) => ErrorCode::InvalidConfig,
            DocmillError::Internal(_) => ErrorCode::InternalError,
        }
    }

    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DocmillError::Storage {
            path: path.into(),
            source,
        }
    }
}

/// The failure record stored on a task whose status is `failed`.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct TaskError {
    pub code: ErrorCode,
    pub message: String,
}

impl TaskError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<&DocmillError> for TaskError {
    fn from(err: &DocmillError) -> Self {
        TaskError::new(err.code(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_serialise_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::UnsupportedFileType).unwrap();
        assert_eq!(json, "\"UNSUPPORTED_FILE_TYPE\"");
        let back: ErrorCode = serde_json::from_str("\"OCR_INPUT_TOO_LARGE\"").unwrap();
        assert_eq!(back, ErrorCode::OcrInputTooLarge);
    }

    #[test]
    fn display_matches_serde_name() {
        assert_eq!(
            ErrorCode::LibreofficeNotInstalled.to_string(),
            serde_json::to_value(ErrorCode::LibreofficeNotInstalled)
                .unwrap()
                .as_str()
                .unwrap()
        );
    }

    #[test]
    fn task_error_from_fatal() {
        let e = DocmillError::ConversionTimeout {
            file: "a.docx".into(),
            secs: 60,
        };
        let te = TaskError::from(&e);
        assert_eq!(te.code, ErrorCode::ConversionTimeout);
        assert!(te.message.contains("60s"), "got: {}", te.message);
    }

    #[test]
    fn model_timeout_display() {
        let e = DocmillError::ModelTimeout {
            model_id: "ocr-main".into(),
            timeout_ms: 5000,
        };
        assert!(e.to_string().contains("5000ms"));
        assert_eq!(e.code(), ErrorCode::ModelTimeout);
    }
}
