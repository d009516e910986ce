//! Session-scoped in-memory catalogs.
//!
//! Both registries are plain structs holding their own map behind a lock;
//! the [`crate::engine::Engine`] builds one of each and hands `Arc`s to the
//! components that need them. Nothing here is global, so every test can
//! stand up isolated instances.

pub mod file;
pub mod task;

pub use file::{
    Category, FileMetadata, FilePatch, FileRecord, FileRegistry, FileRole, FileType, SessionFile,
};
pub use task::{Stage, Task, TaskPatch, TaskRegistry, TaskResult, TaskStatus, TaskType};
