//! Pipeline orchestration: from an uploaded file to a Markdown result.
//!
//! ## Data Flow
//!
//! ```text
//!                      ┌──────────────────────────┐
//!  FileRecord ──▶ select ──▶ office-markitdown  office→pdf ──▶ pdf→markdown (markitdown, PDF fallback)
//!                      ├──▶ legacy-ocr        office→pdf ──▶ ocr→markdown
//!                      ├──▶ pdf-ocr                        ocr→markdown
//!                      └──▶ image-ocr                      ocr→markdown
//! ```
//!
//! 1. [`select`]: pure choice of a [`PipelineKind`] from the file's
//!    extension and type; `None` means the file is unsupported
//! 2. [`process`]: [`ProcessService`] registers the task, spawns the run and
//!    sequences the stages, checking for cancellation at every boundary
//!
//! Progress is reported in coarse checkpoints rather than continuously:
//! the external tools give no intermediate feedback.

pub mod process;
pub mod select;

pub use crate::registry::Stage;
pub use process::{ProcessOptions, ProcessService};
pub use select::PipelineKind;

// ── Progress checkpoints ─────────────────────────────────────────────────

pub const PROGRESS_RUNNING: u8 = 5;
pub const PROGRESS_OFFICE_TO_PDF: u8 = 20;
pub const PROGRESS_PDF_TO_MARKDOWN: u8 = 55;
pub const PROGRESS_OCR_TO_MARKDOWN: u8 = 60;
/// Written on success and on failure alike.
pub const PROGRESS_DONE: u8 = 100;
