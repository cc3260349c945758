//! Face embedding extraction.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::snapshot::{Snapshot, SnapshotError};
use crate::types::FaceObservation;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("unusable image: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Turns an image into zero or more face embeddings.
///
/// An image without faces yields an empty list, not an error.
pub trait EmbeddingExtractor: Send {
    fn extract(&mut self, snapshot: &Snapshot) -> Result<Vec<FaceObservation>, ExtractError>;
}

impl<T: EmbeddingExtractor + ?Sized> EmbeddingExtractor for Box<T> {
    fn extract(&mut self, snapshot: &Snapshot) -> Result<Vec<FaceObservation>, ExtractError> {
        (**self).extract(snapshot)
    }
}

/// SCRFD detection, five-point alignment and ArcFace embedding.
///
/// Observations come back most confident first.
pub struct OnnxExtractor {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxExtractor {
    pub fn new(detector: FaceDetector, recognizer: FaceRecognizer) -> Self {
        Self { detector, recognizer }
    }

    /// Load both models from `model_dir`.
    pub fn load(model_dir: &Path) -> Result<Self, ExtractError> {
        let detector = FaceDetector::load(&model_dir.join(DETECTOR_MODEL_FILE))?;
        let recognizer = FaceRecognizer::load(&model_dir.join(RECOGNIZER_MODEL_FILE))?;
        Ok(Self::new(detector, recognizer))
    }
}

impl EmbeddingExtractor for OnnxExtractor {
    fn extract(&mut self, snapshot: &Snapshot) -> Result<Vec<FaceObservation>, ExtractError> {
        snapshot.validate()?;
        let Some(image) = snapshot.to_rgb_image() else {
            return Ok(Vec::new());
        };

        let faces = self.detector.detect(&image)?;
        let mut observations = Vec::with_capacity(faces.len());
        for bbox in faces {
            match self.recognizer.embed(&image, &bbox) {
                Ok(embedding) => observations.push(FaceObservation { embedding, bbox }),
                Err(e @ (RecognizerError::NoLandmarks | RecognizerError::DegenerateLandmarks)) => {
                    tracing::debug!(error = %e, confidence = bbox.confidence, "skipping face that cannot be aligned");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(observations)
    }
}

/// Default model directory: `$XDG_DATA_HOME/doorward/models`, else
/// `~/.local/share/doorward/models`.
pub fn default_model_dir() -> PathBuf {
    data_dir().join("models")
}

/// Per-user data directory for doorward files.
pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("doorward")
}
