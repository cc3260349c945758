use doorward_core::{AuditError, GalleryError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode log entry: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("{environment}/{subject_id} is already enrolled")]
    AlreadyEnrolled {
        environment: String,
        subject_id: String,
    },
    #[error("{environment}/{subject_id} is not enrolled")]
    NotFound {
        environment: String,
        subject_id: String,
    },
    #[error("embedding is empty or contains non-finite values")]
    InvalidEmbedding,
    #[error("stored embedding for {environment}/{subject_id} is corrupt ({len} bytes)")]
    CorruptEmbedding {
        environment: String,
        subject_id: String,
        len: usize,
    },
    #[error("invalid stored value in {column}: {value}")]
    InvalidValue { column: &'static str, value: String },
    #[error("invalid identifier {0:?}: use letters, digits, '-', '_' or '.'")]
    InvalidIdentifier(String),
    #[error("store lock poisoned")]
    Poisoned,
}

impl StoreError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }

    pub(crate) fn not_found(environment: &str, subject_id: &str) -> Self {
        Self::NotFound {
            environment: environment.to_string(),
            subject_id: subject_id.to_string(),
        }
    }
}

impl From<StoreError> for GalleryError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::AlreadyEnrolled {
                environment,
                subject_id,
            } => GalleryError::AlreadyEnrolled {
                environment,
                subject_id,
            },
            StoreError::NotFound {
                environment,
                subject_id,
            } => GalleryError::NotFound {
                environment,
                subject_id,
            },
            StoreError::InvalidEmbedding => GalleryError::InvalidEmbedding,
            other => GalleryError::Backend(other.to_string()),
        }
    }
}

impl From<StoreError> for AuditError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Io { source, .. } => AuditError::Io(source),
            StoreError::Encode(e) => AuditError::Encode(e),
            other => AuditError::Backend(other.to_string()),
        }
    }
}
