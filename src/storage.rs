//! Session-scoped filesystem layout.
//!
//! ```text
//! <data_dir>/
//!   <session_id>/
//!     uploads/       original files, stored as "{file_id}_{name}"
//!     converted/     intermediate PDFs
//!     results/       Markdown output
//!     attachments/
//! ```
//!
//! Every path handed out by [`Storage`] stays inside `data_dir`: session ids
//! and file names are single path components, anything else is rejected.

use crate::error::DocmillError;
use crate::registry::Category;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

/// On-disk name for file `id` with display name `name`.
pub fn stored_name(id: &str, name: &str) -> String {
    format!("{id}_{name}")
}

/// A session directory found under the data root.
#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub session_id: String,
    pub path: PathBuf,
    pub modified: SystemTime,
}

/// Result of scanning the data root.
///
/// A directory that vanishes mid-scan is left out silently; one that exists
/// but cannot be stat'ed lands in `unreadable` so the others still get listed.
#[derive(Debug, Default)]
pub struct SessionListing {
    pub sessions: Vec<SessionEntry>,
    pub unreadable: Vec<(String, DocmillError)>,
}

#[derive(Debug, Clone)]
pub struct Storage {
    data_dir: PathBuf,
}

impl Storage {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.data_dir.join(session_id)
    }

    pub fn category_dir(&self, session_id: &str, category: Category) -> PathBuf {
        self.session_dir(session_id).join(category.dir_name())
    }

    /// Create the session directory with all four category subdirectories.
    pub async fn create_session_dir(&self, session_id: &str) -> Result<PathBuf, DocmillError> {
        check_component(session_id)?;
        for category in Category::ALL {
            let dir = self.category_dir(session_id, category);
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| DocmillError::storage(&dir, e))?;
        }
        Ok(self.session_dir(session_id))
    }

    pub fn file_path(&self, session_id: &str, category: Category, name: &str) -> PathBuf {
        self.category_dir(session_id, category).join(name)
    }

    pub async fn read_file(
        &self,
        session_id: &str,
        category: Category,
        name: &str,
    ) -> Result<Vec<u8>, DocmillError> {
        let path = self.checked_path(session_id, category, name)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| DocmillError::storage(&path, e))
    }

    /// Write `bytes`, creating parent directories as needed. Returns the locator.
    pub async fn save_file(
        &self,
        session_id: &str,
        category: Category,
        name: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, DocmillError> {
        let path = self.checked_path(session_id, category, name)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DocmillError::storage(parent, e))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| DocmillError::storage(&path, e))?;
        debug!(session_id, category = category.dir_name(), name, bytes = bytes.len(), "file saved");
        Ok(path)
    }

    /// Copy a file from outside the data root into the session.
    pub async fn import_file(
        &self,
        session_id: &str,
        category: Category,
        name: &str,
        source: &Path,
    ) -> Result<(PathBuf, u64), DocmillError> {
        let path = self.checked_path(session_id, category, name)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DocmillError::storage(parent, e))?;
        }
        let copied = tokio::fs::copy(source, &path)
            .await
            .map_err(|e| DocmillError::storage(source, e))?;
        Ok((path, copied))
    }

    pub async fn file_size(
        &self,
        session_id: &str,
        category: Category,
        name: &str,
    ) -> Result<u64, DocmillError> {
        let path = self.checked_path(session_id, category, name)?;
        tokio::fs::metadata(&path)
            .await
            .map(|m| m.len())
            .map_err(|e| DocmillError::storage(&path, e))
    }

    /// Names of regular files in a category directory, sorted. A missing
    /// directory lists as empty.
    pub async fn list_files(
        &self,
        session_id: &str,
        category: Category,
    ) -> Result<Vec<String>, DocmillError> {
        check_component(session_id)?;
        let dir = self.category_dir(session_id, category);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(DocmillError::storage(&dir, e)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| DocmillError::storage(&dir, e))?
        {
            let is_file = entry
                .file_type()
                .await
                .map(|t| t.is_file())
                .unwrap_or(false);
            if is_file {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    pub async fn rename(
        &self,
        session_id: &str,
        category: Category,
        from: &str,
        to: &str,
    ) -> Result<PathBuf, DocmillError> {
        let src = self.checked_path(session_id, category, from)?;
        let dst = self.checked_path(session_id, category, to)?;
        tokio::fs::rename(&src, &dst)
            .await
            .map_err(|e| DocmillError::storage(&src, e))?;
        Ok(dst)
    }

    /// Every directory directly under the data root, with its mtime.
    /// A missing data root lists as empty.
    pub async fn list_sessions(&self) -> Result<SessionListing, DocmillError> {
        let mut entries = match tokio::fs::read_dir(&self.data_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(SessionListing::default()),
            Err(e) => return Err(DocmillError::storage(&self.data_dir, e)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| DocmillError::storage(&self.data_dir, e))?
        {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();

        let mut listing = SessionListing::default();
        for session_id in names {
            let path = self.data_dir.join(&session_id);
            let stat = match tokio::fs::metadata(&path).await {
                Ok(meta) if !meta.is_dir() => continue,
                Ok(meta) => meta.modified(),
                Err(e) => Err(e),
            };
            match stat {
                Ok(modified) => listing.sessions.push(SessionEntry {
                    session_id,
                    path,
                    modified,
                }),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!(session_id = %session_id, "session vanished while listing");
                }
                Err(e) => {
                    let err = DocmillError::storage(&path, e);
                    listing.unreadable.push((session_id, err));
                }
            }
        }
        Ok(listing)
    }

    /// Recursively remove a session directory. Missing is not an error.
    pub async fn remove_session(&self, session_id: &str) -> Result<(), DocmillError> {
        check_component(session_id)?;
        let dir = self.session_dir(session_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DocmillError::storage(&dir, e)),
        }
    }

    /// Recursive byte size of everything under the data root.
    pub async fn total_size(&self) -> Result<u64, DocmillError> {
        dir_size(&self.data_dir).await
    }

    fn checked_path(
        &self,
        session_id: &str,
        category: Category,
        name: &str,
    ) -> Result<PathBuf, DocmillError> {
        check_component(session_id)?;
        check_component(name)?;
        Ok(self.file_path(session_id, category, name))
    }
}

/// Recursive byte size of `path`. A missing path is zero bytes; symlinks
/// are counted as themselves and not followed.
pub async fn dir_size(path: &Path) -> Result<u64, DocmillError> {
    let mut total = 0u64;
    let mut stack = vec![path.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(DocmillError::storage(&dir, e)),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| DocmillError::storage(&dir, e))?
        {
            let meta = match tokio::fs::symlink_metadata(entry.path()).await {
                Ok(meta) => meta,
                // Raced with a concurrent delete.
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(DocmillError::storage(entry.path(), e)),
            };
            if meta.is_dir() {
                stack.push(entry.path());
            } else {
                total += meta.len();
            }
        }
    }
    Ok(total)
}

fn check_component(part: &str) -> Result<(), DocmillError> {
    let mut components = Path::new(part).components();
    let ok = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if ok {
        Ok(())
    } else {
        Err(DocmillError::storage(
            part,
            io::Error::new(io::ErrorKind::InvalidInput, "not a single path component"),
        ))
    }
}
