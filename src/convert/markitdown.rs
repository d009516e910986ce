use super::{run_with_timeout, tail, MarkdownExtractor, RunError};
use crate::error::DocmillError;
use crate::registry::Category;
use crate::storage::Storage;
use async_trait::async_trait;
use std::ffi::OsStr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};

/// `markitdown <input> -o <output>`.
///
/// Every failure (spawn, exit status, timeout, missing output) surfaces as
/// `MARKITDOWN_FAILED`; callers decide whether a fallback exists.
#[derive(Debug, Clone)]
pub struct MarkItDownExtractor {
    storage: Storage,
    binary: PathBuf,
    timeout: Duration,
}

impl MarkItDownExtractor {
    pub fn new(storage: Storage, binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            storage,
            binary: binary.into(),
            timeout,
        }
    }

    fn failed(&self, file: &str, detail: impl Into<String>) -> DocmillError {
        DocmillError::MarkItDownFailed {
            file: file.to_string(),
            detail: detail.into(),
        }
    }
}

#[async_trait]
impl MarkdownExtractor for MarkItDownExtractor {
    async fn convert_to_markdown(
        &self,
        session_id: &str,
        source_category: Category,
        source_name: &str,
        output_name: &str,
        trace_id: Option<&str>,
    ) -> Result<PathBuf, DocmillError> {
        let trace_id = trace_id.unwrap_or("-");
        let input = self.storage.file_path(session_id, source_category, source_name);
        let output = self.storage.file_path(session_id, Category::Results, output_name);
        let results = self.storage.category_dir(session_id, Category::Results);
        tokio::fs::create_dir_all(&results)
            .await
            .map_err(|e| self.failed(source_name, format!("cannot create {}: {e}", results.display())))?;

        info!(event = "markitdown.start", session_id, input = source_name, output = output_name, trace_id, "MarkItDown conversion started");

        let args: [&OsStr; 3] = [input.as_os_str(), "-o".as_ref(), output.as_os_str()];
        let run = run_with_timeout(&self.binary, args, self.timeout).await;
        let result = match run {
            Ok(out) if out.status.success() => match tokio::fs::metadata(&output).await {
                Ok(_) => Ok(()),
                Err(_) => Err(self.failed(source_name, "no output written")),
            },
            Ok(out) => Err(self.failed(
                source_name,
                format!("exit {}: {}", out.status, tail(&out.stderr, 5)),
            )),
            Err(RunError::Spawn(e)) => Err(self.failed(source_name, format!("cannot run {}: {e}", self.binary.display()))),
            Err(RunError::Timeout(limit)) => Err(self.failed(
                source_name,
                format!("timed out after {}ms", limit.as_millis()),
            )),
        };

        match result {
            Ok(()) => {
                info!(event = "markitdown.complete", session_id, input = source_name, output = output_name, trace_id, "MarkItDown conversion completed");
                Ok(output)
            }
            Err(e) => {
                error!(event = "markitdown.failed", session_id, input = source_name, binary = %self.binary.display(), trace_id, "{e}");
                Err(e)
            }
        }
    }

    async fn is_available(&self) -> bool {
        match run_with_timeout(&self.binary, ["--version"], Duration::from_secs(15)).await {
            Ok(_) => true,
            Err(e) => {
                warn!(event = "markitdown.unavailable", path = %self.binary.display(), error = ?e, "MarkItDown binary not accessible");
                false
            }
        }
    }
}
