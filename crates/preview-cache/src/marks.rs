//! Favorite marks stored as plain copies under the marked directory
//!
//! The copy's existence is the flag. There is no separate metadata store.

use crate::error::PreviewError;
use crate::path::Library;
use crate::status::StatusSink;
use std::fs;
use std::path::Path;
use std::sync::Arc;

pub struct MarkStore {
    library: Library,
    status: Arc<dyn StatusSink>,
}

impl MarkStore {
    pub fn new(library: Library, status: Arc<dyn StatusSink>) -> Self {
        Self { library, status }
    }

    pub fn is_marked(&self, album: &str, filename: &str) -> Result<bool, PreviewError> {
        let original = self.library.original(album, filename)?;
        Ok(self.library.marked_path(&original)?.is_file())
    }

    /// Flip the mark on an original, returning whether it is now marked
    pub fn toggle(&self, album: &str, filename: &str) -> Result<bool, PreviewError> {
        let original = self.library.original(album, filename)?;
        if !original.is_file() {
            return Err(PreviewError::NotFound(original));
        }
        let marked = self.library.marked_path(&original)?;
        let name = display_name(&original);

        if marked.exists() {
            fs::remove_file(&marked).map_err(|e| PreviewError::io(&marked, e))?;
            self.status.report(&format!("unmarked {}", name));
            return Ok(false);
        }

        copy_atomically(&original, &marked)?;
        self.status.report(&format!("marked {}", name));
        Ok(true)
    }
}

fn copy_atomically(from: &Path, to: &Path) -> Result<(), PreviewError> {
    let parent = to.parent().ok_or_else(|| PreviewError::NotFound(to.to_path_buf()))?;
    fs::create_dir_all(parent).map_err(|e| PreviewError::io(parent, e))?;

    let partial = tempfile::Builder::new()
        .prefix(".partial-")
        .tempfile_in(parent)
        .map_err(|e| PreviewError::io(parent, e))?
        .into_temp_path();
    fs::copy(from, &partial).map_err(|e| PreviewError::io(from, e))?;
    partial.persist(to).map_err(|e| PreviewError::io(to, e.error))?;
    Ok(())
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}
