//! Append-only JSON-lines access log, used when the database is unavailable.

use crate::error::StoreError;
use doorward_core::{AccessLogEntry, AuditError, AuditLogger};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub struct JsonlAuditLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlAuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append_entry(&self, entry: &AccessLogEntry) -> Result<(), StoreError> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| StoreError::io(&self.path, e))?;
        file.write_all(line.as_bytes())
            .map_err(|e| StoreError::io(&self.path, e))?;
        Ok(())
    }

    /// Every readable entry in file order. A missing file reads as empty.
    pub fn read_all(&self) -> Result<Vec<AccessLogEntry>, StoreError> {
        let file = match std::fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };

        let mut entries = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| StoreError::io(&self.path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::warn!(line = index + 1, error = %e, "skipping malformed access log line"),
            }
        }
        Ok(entries)
    }

    /// Newest entries first, optionally for one environment.
    pub fn recent(&self, environment: Option<&str>, limit: usize) -> Result<Vec<AccessLogEntry>, StoreError> {
        Ok(self
            .read_all()?
            .into_iter()
            .rev()
            .filter(|e| environment.map_or(true, |env| e.environment == env))
            .take(limit)
            .collect())
    }
}

impl AuditLogger for JsonlAuditLog {
    fn append(&self, entry: &AccessLogEntry) -> Result<(), AuditError> {
        Ok(self.append_entry(entry)?)
    }
}
