//! External document converters.
//!
//! Both converters are subprocesses driven through [`run_with_timeout`]:
//! stdin closed, stdout/stderr captured, and the child killed if the kill
//! timeout fires. The traits are the seams the orchestrator depends on, so
//! tests can swap in fakes that need neither LibreOffice nor MarkItDown.

mod markitdown;
mod office;

pub use markitdown::MarkItDownExtractor;
pub use office::LibreOfficeRenderer;

use crate::error::DocmillError;
use crate::registry::Category;
use async_trait::async_trait;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::Command;

/// Renders an office document from `uploads/` into a PDF in `converted/`.
#[async_trait]
pub trait OfficeRenderer: Send + Sync {
    /// Returns the PDF's file name inside the session's `converted/` directory.
    async fn convert_to_pdf(
        &self,
        session_id: &str,
        stored_name: &str,
        trace_id: Option<&str>,
    ) -> Result<String, DocmillError>;

    async fn is_available(&self) -> bool {
        true
    }
}

/// Writes a Markdown rendition of a stored file into `results/`.
#[async_trait]
pub trait MarkdownExtractor: Send + Sync {
    /// Returns the locator of the written Markdown file.
    async fn convert_to_markdown(
        &self,
        session_id: &str,
        source_category: Category,
        source_name: &str,
        output_name: &str,
        trace_id: Option<&str>,
    ) -> Result<PathBuf, DocmillError>;

    async fn is_available(&self) -> bool {
        true
    }
}

#[derive(Debug)]
pub(crate) struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug)]
pub(crate) enum RunError {
    Spawn(std::io::Error),
    Timeout(Duration),
}

/// Run `program args..` to completion or until `limit` elapses.
///
/// On timeout the pending child is dropped, and `kill_on_drop` takes it down.
pub(crate) async fn run_with_timeout<I, S>(
    program: &Path,
    args: I,
    limit: Duration,
) -> Result<ProcessOutput, RunError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd.spawn().map_err(RunError::Spawn)?;
    match tokio::time::timeout(limit, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(ProcessOutput {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }),
        Ok(Err(e)) => Err(RunError::Spawn(e)),
        Err(_) => Err(RunError::Timeout(limit)),
    }
}

/// Last few lines of a tool's stderr, for error messages.
pub(crate) fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}
