//! In-memory catalog of file records, partitioned by session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use tracing::debug;

/// Broad family a file belongs to; drives pipeline selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Image,
    Pdf,
    Office,
    Text,
}

impl FileType {
    /// Classify by extension. Returns `None` for anything unrecognised.
    pub fn from_name(name: &str) -> Option<Self> {
        let ext = extension_of(name)?;
        match ext.as_str() {
            "jpg" | "jpeg" | "png" | "gif" | "webp" | "bmp" | "tif" | "tiff" => Some(FileType::Image),
            "pdf" => Some(FileType::Pdf),
            "doc" | "docx" | "xls" | "xlsx" | "ppt" | "pptx" => Some(FileType::Office),
            "md" | "markdown" | "txt" => Some(FileType::Text),
            _ => None,
        }
    }
}

/// Storage area inside a session directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Uploads,
    Converted,
    Results,
    Attachments,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Uploads,
        Category::Converted,
        Category::Results,
        Category::Attachments,
    ];

    /// Directory name under the session directory.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Category::Uploads => "uploads",
            Category::Converted => "converted",
            Category::Results => "results",
            Category::Attachments => "attachments",
        }
    }
}

/// Marks an upload as an attachment rather than the main document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileRole {
    Attachment,
}

/// Derived facts attached to a file after creation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<FileRole>,
    /// Source extension, e.g. `docx`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// Id of the PDF this office file was rendered to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub converted_pdf_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pages: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

/// A file known to the system.
///
/// `id` and `session_id` never change once the record exists. On disk the
/// file lives at `storage_locator`, named `"{id}_{name}"` inside its
/// category directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: String,
    pub session_id: String,
    /// Display name, e.g. `report.docx`.
    pub name: String,
    #[serde(rename = "type")]
    pub file_type: FileType,
    pub mime_type: String,
    pub size: u64,
    #[serde(rename = "path")]
    pub storage_locator: PathBuf,
    pub category: Category,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: FileMetadata,
}

impl FileRecord {
    /// Name the file has inside its category directory.
    pub fn stored_name(&self) -> String {
        crate::storage::stored_name(&self.id, &self.name)
    }

    /// Lower-cased extension of the display name, without the dot.
    pub fn extension(&self) -> Option<String> {
        extension_of(&self.name)
    }

    /// Display name with its extension swapped, e.g. `report.docx` → `report.md`.
    pub fn name_with_extension(&self, ext: &str) -> String {
        let stem = Path::new(&self.name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.name.clone());
        format!("{stem}.{ext}")
    }
}

/// A file as listed under its session: the record minus the owning
/// session id, which the caller already knows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionFile {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub file_type: FileType,
    pub mime_type: String,
    pub size: u64,
    #[serde(rename = "path")]
    pub storage_locator: PathBuf,
    pub category: Category,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: FileMetadata,
}

impl From<FileRecord> for SessionFile {
    fn from(file: FileRecord) -> Self {
        Self {
            id: file.id,
            name: file.name,
            file_type: file.file_type,
            mime_type: file.mime_type,
            size: file.size,
            storage_locator: file.storage_locator,
            category: file.category,
            created_at: file.created_at,
            metadata: file.metadata,
        }
    }
}

fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
}

/// Fields [`FileRegistry::update`] may change.
#[derive(Debug, Clone, Default)]
pub struct FilePatch {
    pub metadata: Option<FileMetadata>,
    pub size: Option<u64>,
}

/// Thread-safe file catalog keyed by file id.
#[derive(Debug, Default)]
pub struct FileRegistry {
    files: RwLock<HashMap<String, FileRecord>>,
}

impl FileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the record with `file.id`, owned by `session_id`.
    pub fn register(&self, session_id: &str, mut file: FileRecord) {
        file.session_id = session_id.to_string();
        debug!(session_id, file_id = %file.id, name = %file.name, "file registered");
        self.write().insert(file.id.clone(), file);
    }

    pub fn get(&self, file_id: &str) -> Option<FileRecord> {
        self.read().get(file_id).cloned()
    }

    /// All files owned by `session_id`, oldest first, without the session tag.
    pub fn list_by_session(&self, session_id: &str) -> Vec<SessionFile> {
        let mut files: Vec<SessionFile> = self
            .read()
            .values()
            .filter(|f| f.session_id == session_id)
            .cloned()
            .map(SessionFile::from)
            .collect();
        files.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        files
    }

    /// Apply `patch` and return the updated record, or `None` if unknown.
    pub fn update(&self, file_id: &str, patch: FilePatch) -> Option<FileRecord> {
        let mut files = self.write();
        let file = files.get_mut(file_id)?;
        if let Some(metadata) = patch.metadata {
            file.metadata = metadata;
        }
        if let Some(size) = patch.size {
            file.size = size;
        }
        Some(file.clone())
    }

    pub fn delete(&self, file_id: &str) -> bool {
        self.write().remove(file_id).is_some()
    }

    /// Drop every record owned by `session_id`; returns how many went.
    pub fn cleanup_session(&self, session_id: &str) -> usize {
        let mut files = self.write();
        let before = files.len();
        files.retain(|_, f| f.session_id != session_id);
        before - files.len()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, FileRecord>> {
        self.files.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, FileRecord>> {
        self.files.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn record(id: &str, session: &str, name: &str) -> FileRecord {
        FileRecord {
            id: id.into(),
            session_id: session.into(),
            name: name.into(),
            file_type: FileType::from_name(name).unwrap_or(FileType::Text),
            mime_type: "application/octet-stream".into(),
            size: 10,
            storage_locator: PathBuf::from(format!("/tmp/{id}_{name}")),
            category: Category::Uploads,
            created_at: Utc::now(),
            metadata: FileMetadata::default(),
        }
    }

    #[test]
    fn classify_extensions() {
        assert_eq!(FileType::from_name("a.PNG"), Some(FileType::Image));
        assert_eq!(FileType::from_name("a.pdf"), Some(FileType::Pdf));
        assert_eq!(FileType::from_name("a.pptx"), Some(FileType::Office));
        assert_eq!(FileType::from_name("a.md"), Some(FileType::Text));
        assert_eq!(FileType::from_name("a.exe"), None);
        assert_eq!(FileType::from_name("noext"), None);
    }

    #[test]
    fn register_upserts_by_id() {
        let reg = FileRegistry::new();
        reg.register("s1", record("f1", "s1", "a.docx"));
        let mut patched = record("f1", "s1", "a.docx");
        patched.metadata.converted_pdf_id = Some("p1".into());
        reg.register("s1", patched);

        assert_eq!(reg.len(), 1);
        assert_eq!(
            reg.get("f1").unwrap().metadata.converted_pdf_id.as_deref(),
            Some("p1")
        );
    }

    #[test]
    fn register_stamps_owner() {
        let reg = FileRegistry::new();
        reg.register("owner", record("f1", "other", "a.pdf"));
        assert_eq!(reg.get("f1").unwrap().session_id, "owner");
    }

    #[test]
    fn list_and_cleanup_are_session_scoped() {
        let reg = FileRegistry::new();
        reg.register("s1", record("a", "s1", "a.pdf"));
        reg.register("s1", record("b", "s1", "b.pdf"));
        reg.register("s2", record("c", "s2", "c.pdf"));

        assert_eq!(reg.list_by_session("s1").len(), 2);
        assert_eq!(reg.cleanup_session("s1"), 2);
        assert!(reg.list_by_session("s1").is_empty());
        assert!(reg.get("c").is_some());
    }

    #[test]
    fn listed_files_drop_the_session_tag() {
        let reg = FileRegistry::new();
        let file = record("a", "s1", "a.pdf");
        reg.register("s1", file.clone());

        let listed = reg.list_by_session("s1");
        assert_eq!(listed, vec![SessionFile::from(file)]);
        let json = serde_json::to_value(&listed[0]).unwrap();
        assert!(json.get("sessionId").is_none());
        assert_eq!(json["id"], "a");
        assert_eq!(json["type"], "pdf");
    }

    #[test]
    fn update_unknown_is_none() {
        let reg = FileRegistry::new();
        assert!(reg.update("missing", FilePatch::default()).is_none());
        assert!(!reg.delete("missing"));
    }

    #[test]
    fn update_patches_metadata_only() {
        let reg = FileRegistry::new();
        reg.register("s1", record("f1", "s1", "a.docx"));
        let updated = reg
            .update(
                "f1",
                FilePatch {
                    metadata: Some(FileMetadata {
                        format: Some("docx".into()),
                        ..Default::default()
                    }),
                    size: None,
                },
            )
            .unwrap();
        assert_eq!(updated.metadata.format.as_deref(), Some("docx"));
        assert_eq!(updated.size, 10);
    }

    #[test]
    fn swaps_extension() {
        let f = record("f1", "s1", "report.final.docx");
        assert_eq!(f.name_with_extension("md"), "report.final.md");
        assert_eq!(f.extension().as_deref(), Some("docx"));
    }
}
