//! Enrollment gallery access.
//!
//! The engine reads one environment's active records per attempt through
//! [`GalleryProvider`]. [`InMemoryGallery`] keeps records in enrollment order
//! and enforces one record per (environment, subject id).

use crate::types::{EnrollmentRecord, EnrollmentStatus};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GalleryError {
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
    #[error("gallery backend error: {0}")]
    Backend(String),
}

impl GalleryError {
    pub(crate) fn not_found(environment: &str, subject_id: &str) -> Self {
        Self::NotFound {
            environment: environment.to_string(),
            subject_id: subject_id.to_string(),
        }
    }
}

/// Read-only view of the enrolled identities.
pub trait GalleryProvider: Send + Sync {
    /// Active records for `environment`, in enrollment order.
    fn list_active(&self, environment: &str) -> Result<Vec<EnrollmentRecord>, GalleryError>;
}

impl<T: GalleryProvider + ?Sized> GalleryProvider for Box<T> {
    fn list_active(&self, environment: &str) -> Result<Vec<EnrollmentRecord>, GalleryError> {
        (**self).list_active(environment)
    }
}

impl<T: GalleryProvider + ?Sized> GalleryProvider for std::sync::Arc<T> {
    fn list_active(&self, environment: &str) -> Result<Vec<EnrollmentRecord>, GalleryError> {
        (**self).list_active(environment)
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryGallery {
    records: Vec<EnrollmentRecord>,
}

impl InMemoryGallery {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, environment: &str, subject_id: &str) -> Option<usize> {
        self.records
            .iter()
            .position(|r| r.environment == environment && r.subject_id == subject_id)
    }

    pub fn enroll(&mut self, record: EnrollmentRecord) -> Result<(), GalleryError> {
        if !record.embedding.is_well_formed() {
            return Err(GalleryError::InvalidEmbedding);
        }
        if self.position(&record.environment, &record.subject_id).is_some() {
            return Err(GalleryError::AlreadyEnrolled {
                environment: record.environment,
                subject_id: record.subject_id,
            });
        }
        self.records.push(record);
        Ok(())
    }

    /// Replace embedding and reference image. Enrollment order is kept.
    pub fn reenroll(
        &mut self,
        environment: &str,
        subject_id: &str,
        embedding: crate::types::Embedding,
        reference_image: Option<String>,
    ) -> Result<(), GalleryError> {
        if !embedding.is_well_formed() {
            return Err(GalleryError::InvalidEmbedding);
        }
        let i = self
            .position(environment, subject_id)
            .ok_or_else(|| GalleryError::not_found(environment, subject_id))?;
        self.records[i].embedding = embedding;
        self.records[i].reference_image = reference_image;
        Ok(())
    }

    pub fn set_status(
        &mut self,
        environment: &str,
        subject_id: &str,
        status: EnrollmentStatus,
    ) -> Result<(), GalleryError> {
        let i = self
            .position(environment, subject_id)
            .ok_or_else(|| GalleryError::not_found(environment, subject_id))?;
        self.records[i].status = status;
        Ok(())
    }

    /// Remove and return the record.
    pub fn remove(&mut self, environment: &str, subject_id: &str) -> Result<EnrollmentRecord, GalleryError> {
        let i = self
            .position(environment, subject_id)
            .ok_or_else(|| GalleryError::not_found(environment, subject_id))?;
        Ok(self.records.remove(i))
    }

    pub fn get(&self, environment: &str, subject_id: &str) -> Option<&EnrollmentRecord> {
        self.position(environment, subject_id).map(|i| &self.records[i])
    }

    pub fn records(&self) -> &[EnrollmentRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl GalleryProvider for InMemoryGallery {
    fn list_active(&self, environment: &str) -> Result<Vec<EnrollmentRecord>, GalleryError> {
        Ok(self
            .records
            .iter()
            .filter(|r| r.environment == environment && r.is_active())
            .cloned()
            .collect())
    }
}
