//! Reference photo directory, laid out as `<root>/<environment>/<subject_id>.<ext>`.

use crate::error::StoreError;
use std::path::{Path, PathBuf};

/// Allow only names that cannot escape the photo root.
pub(crate) fn check_identifier(value: &str) -> Result<(), StoreError> {
    let valid = !value.is_empty()
        && !value.starts_with('.')
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidIdentifier(value.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct PhotoStore {
    root: PathBuf,
}

impl PhotoStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Destination for a subject's photo, keeping the source extension (default `jpg`).
    pub fn path_for(&self, environment: &str, subject_id: &str, source: &Path) -> Result<PathBuf, StoreError> {
        check_identifier(environment)?;
        check_identifier(subject_id)?;
        let ext = source
            .extension()
            .and_then(|e| e.to_str())
            .filter(|e| e.chars().all(|c| c.is_ascii_alphanumeric()))
            .unwrap_or("jpg")
            .to_ascii_lowercase();
        Ok(self.root.join(environment).join(format!("{subject_id}.{ext}")))
    }

    /// Copy `source` into the photo directory and return the stored path.
    pub fn save(&self, environment: &str, subject_id: &str, source: &Path) -> Result<PathBuf, StoreError> {
        let dest = self.path_for(environment, subject_id, source)?;
        if let Some(dir) = dest.parent() {
            std::fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;
        }
        std::fs::copy(source, &dest).map_err(|e| StoreError::io(source, e))?;
        tracing::debug!(from = %source.display(), to = %dest.display(), "stored reference photo");
        Ok(dest)
    }
}

/// Delete a reference photo. Failure is reported, never fatal.
pub(crate) fn discard(path: &str) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!(path, "removed reference photo"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path, error = %e, "failed to remove reference photo"),
    }
}
