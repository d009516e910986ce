//! # docmill
//!
//! Turn uploaded documents (office files, PDFs, images) into Markdown by
//! chaining external converters behind one asynchronous task abstraction.
//!
//! ## Why this crate?
//!
//! No single tool reads everything well. MarkItDown handles modern office
//! formats directly, LibreOffice renders anything office-shaped to PDF, and
//! scanned pages need a vision model. This crate picks the right chain per
//! file, runs it in the background, and reports progress through a task
//! record that clients poll; slow or failing tools end up as a `failed` task,
//! never as a hung one.
//!
//! ## Architecture
//!
//! ```text
//! Engine
//!  │
//!  ├─ FileRegistry      in-memory file records, keyed by id, tagged by session
//!  ├─ TaskRegistry      task state machine + cooperative cancellation flag
//!  ├─ ModelService      per-model concurrency ceiling with a FIFO wait-list
//!  ├─ ProcessService    pipeline selection and stage sequencing
//!  │    ├─ LibreOfficeRenderer   office → PDF   (subprocess, kill timeout)
//!  │    ├─ MarkItDownExtractor   office/PDF → Markdown
//!  │    └─ OcrService            PDF/image → Markdown via ModelService
//!  └─ CleanupService    TTL sweep of expired sessions, disk quota check
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docmill::{Engine, ModelsConfig, ProcessOptions, ServiceConfig, TaskStatus};
//! use std::path::Path;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServiceConfig::from_env()?;
//!     let models = ModelsConfig::load_or_default("config/models.yaml");
//!     let engine = Engine::new(config, models);
//!
//!     let session = Engine::new_session_id();
//!     let task = engine
//!         .submit(&session, Path::new("report.docx"), ProcessOptions::default())
//!         .await?;
//!
//!     loop {
//!         let task = engine.get_task(&task.id).expect("task registered");
//!         if task.status.is_terminal() {
//!             assert_eq!(task.status, TaskStatus::Succeeded);
//!             println!("{}", task.result.unwrap().markdown_file.storage_locator.display());
//!             break;
//!         }
//!         tokio::time::sleep(Duration::from_millis(250)).await;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docmill` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! docmill = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod cleanup;
pub mod config;
pub mod convert;
pub mod engine;
pub mod error;
pub mod model;
pub mod ocr;
pub mod pipeline;
pub mod postprocess;
pub mod progress;
pub mod prompts;
pub mod registry;
pub mod storage;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use cleanup::{CleanupConfig, CleanupService, SweepReport};
pub use config::{ModelCategory, ModelConfig, ModelsConfig, ServiceConfig, ServiceConfigBuilder};
pub use convert::{LibreOfficeRenderer, MarkItDownExtractor, MarkdownExtractor, OfficeRenderer};
pub use engine::{Collaborators, Engine};
pub use error::{DocmillError, ErrorCode, TaskError};
pub use model::{ModelRequest, ModelResponse, ModelService, ModelTransport};
pub use ocr::{OcrEngine, OcrService};
pub use pipeline::{PipelineKind, ProcessOptions, ProcessService};
pub use progress::PipelineObserver;
pub use registry::{
    Category, FileRecord, FileRegistry, FileType, SessionFile, Stage, Task, TaskRegistry,
    TaskResult, TaskStatus,
};
pub use storage::Storage;
