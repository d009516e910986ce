use super::{run_with_timeout, tail, OfficeRenderer, RunError};
use crate::error::DocmillError;
use crate::registry::Category;
use crate::storage::Storage;
use async_trait::async_trait;
use std::ffi::OsStr;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// `libreoffice --headless --convert-to pdf`.
#[derive(Debug, Clone)]
pub struct LibreOfficeRenderer {
    storage: Storage,
    binary: PathBuf,
    timeout: Duration,
}

impl LibreOfficeRenderer {
    pub fn new(storage: Storage, binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            storage,
            binary: binary.into(),
            timeout,
        }
    }
}

#[async_trait]
impl OfficeRenderer for LibreOfficeRenderer {
    async fn convert_to_pdf(
        &self,
        session_id: &str,
        stored_name: &str,
        trace_id: Option<&str>,
    ) -> Result<String, DocmillError> {
        let trace_id = trace_id.unwrap_or("-");
        let input = self.storage.file_path(session_id, Category::Uploads, stored_name);
        let outdir = self.storage.category_dir(session_id, Category::Converted);
        tokio::fs::create_dir_all(&outdir)
            .await
            .map_err(|e| DocmillError::storage(&outdir, e))?;

        info!(event = "office.convert.start", session_id, file = stored_name, trace_id, "starting office to PDF conversion");

        let args: [&OsStr; 6] = [
            "--headless".as_ref(),
            "--convert-to".as_ref(),
            "pdf".as_ref(),
            "--outdir".as_ref(),
            outdir.as_os_str(),
            input.as_os_str(),
        ];
        let output = match run_with_timeout(&self.binary, args, self.timeout).await {
            Ok(output) => output,
            Err(RunError::Spawn(e)) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::PermissionDenied) => {
                error!(event = "office.unavailable", path = %self.binary.display(), error = %e, trace_id, "LibreOffice could not be started");
                return Err(DocmillError::LibreOfficeNotInstalled {
                    path: self.binary.clone(),
                });
            }
            Err(RunError::Spawn(e)) => {
                return Err(DocmillError::ConversionFailed {
                    file: stored_name.to_string(),
                    detail: e.to_string(),
                });
            }
            Err(RunError::Timeout(limit)) => {
                error!(event = "office.convert.timeout", session_id, file = stored_name, timeout_ms = limit.as_millis() as u64, trace_id, "office conversion timed out");
                return Err(DocmillError::ConversionTimeout {
                    file: stored_name.to_string(),
                    secs: limit.as_secs(),
                });
            }
        };

        if !output.status.success() {
            error!(event = "office.convert.failed", session_id, file = stored_name, status = %output.status, trace_id, "office conversion failed");
            return Err(DocmillError::ConversionFailed {
                file: stored_name.to_string(),
                detail: format!("exit {}: {}", output.status, tail(&output.stderr, 5)),
            });
        }
        if !output.stderr.is_empty() {
            warn!(event = "office.convert.warning", session_id, file = stored_name, stderr = %output.stderr, trace_id, "LibreOffice wrote to stderr");
        }

        let pdf_name = pdf_name_for(stored_name);
        let produced = outdir.join(&pdf_name);
        if tokio::fs::metadata(&produced).await.is_err() {
            return Err(DocmillError::ConversionFailed {
                file: stored_name.to_string(),
                detail: format!("no PDF at {}", produced.display()),
            });
        }

        info!(event = "office.convert.complete", session_id, input = stored_name, output = %pdf_name, trace_id, "office to PDF conversion completed");
        Ok(pdf_name)
    }

    async fn is_available(&self) -> bool {
        match run_with_timeout(&self.binary, ["--version"], Duration::from_secs(15)).await {
            Ok(out) if out.status.success() => {
                debug!(version = %out.stdout, "LibreOffice detected");
                true
            }
            Ok(out) => {
                warn!(event = "office.unavailable", path = %self.binary.display(), status = %out.status, "LibreOffice --version failed");
                false
            }
            Err(e) => {
                warn!(event = "office.unavailable", path = %self.binary.display(), error = ?e, "LibreOffice not available");
                false
            }
        }
    }
}

/// LibreOffice names its output after the input stem.
fn pdf_name_for(stored_name: &str) -> String {
    let stem = Path::new(stored_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| stored_name.to_string());
    format!("{stem}.pdf")
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::convert::testutil::script;
    use crate::error::ErrorCode;
    use tempfile::TempDir;

    const FAKE_SOFFICE: &str = r#"outdir="$5"; input="$6"; base=$(basename "$input"); printf '%%PDF-1.4' > "$outdir/${base%.*}.pdf""#;

    async fn setup() -> (TempDir, Storage) {
        let tmp = TempDir::new().unwrap();
        let storage = Storage::new(tmp.path().join("data"));
        storage.create_session_dir("s1").await.unwrap();
        storage
            .save_file("s1", Category::Uploads, "f1_report.docx", b"docx")
            .await
            .unwrap();
        (tmp, storage)
    }

    #[test]
    fn pdf_name_replaces_extension() {
        assert_eq!(pdf_name_for("f1_report.docx"), "f1_report.pdf");
        assert_eq!(pdf_name_for("a.b.PPT"), "a.b.pdf");
    }

    #[tokio::test]
    async fn converts_into_converted_dir() {
        let (tmp, storage) = setup().await;
        let bin = script(tmp.path(), "soffice", FAKE_SOFFICE);
        let renderer = LibreOfficeRenderer::new(storage.clone(), bin, Duration::from_secs(5));

        let name = renderer.convert_to_pdf("s1", "f1_report.docx", None).await.unwrap();
        assert_eq!(name, "f1_report.pdf");
        assert!(storage.file_path("s1", Category::Converted, &name).exists());
        assert!(renderer.is_available().await);
    }

    #[tokio::test]
    async fn missing_binary_is_not_installed() {
        let (_tmp, storage) = setup().await;
        let renderer = LibreOfficeRenderer::new(storage, "/nonexistent/soffice", Duration::from_secs(5));
        let err = renderer.convert_to_pdf("s1", "f1_report.docx", None).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::LibreofficeNotInstalled);
        assert!(!renderer.is_available().await);
    }

    #[tokio::test]
    async fn slow_conversion_times_out() {
        let (tmp, storage) = setup().await;
        let bin = script(tmp.path(), "soffice", "sleep 5");
        let renderer = LibreOfficeRenderer::new(storage, bin, Duration::from_millis(100));
        let err = renderer.convert_to_pdf("s1", "f1_report.docx", None).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConversionTimeout);
    }

    #[tokio::test]
    async fn nonzero_exit_or_no_output_fails() {
        let (tmp, storage) = setup().await;
        let failing = script(tmp.path(), "fail", "echo broken >&2; exit 3");
        let renderer = LibreOfficeRenderer::new(storage.clone(), failing, Duration::from_secs(5));
        let err = renderer.convert_to_pdf("s1", "f1_report.docx", None).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConversionFailed);
        assert!(err.to_string().contains("broken"));

        let silent = script(tmp.path(), "silent", "exit 0");
        let renderer = LibreOfficeRenderer::new(storage, silent, Duration::from_secs(5));
        let err = renderer.convert_to_pdf("s1", "f1_report.docx", None).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConversionFailed);
    }
}
