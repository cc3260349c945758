//! doorward-core: biometric access-decision engine.
//!
//! Matches a face embedding against a per-environment gallery, scores
//! visible attire against a site policy, and combines both into a
//! grant/deny decision with one audit record per attempt. Face embeddings
//! come from SCRFD detection and ArcFace recognition via ONNX Runtime.

pub mod alignment;
pub mod attire;
pub mod audit;
pub mod decision;
pub mod detector;
pub mod engine;
pub mod extractor;
pub mod gallery;
pub mod matcher;
pub mod policy;
pub mod recognizer;
pub mod snapshot;
pub mod types;

pub use attire::{AttireCheck, AttireError, AttireItem, AttirePolicy, AttireReport, Finding, FindingKind};
pub use audit::{AccessLogEntry, AccessSummary, AuditError, AuditLogger, FallbackAuditLog, MemoryAuditLog};
pub use decision::{combine, DenialReason, Verdict};
pub use engine::{AccessDecision, AccessEngine, AuditStatus};
pub use extractor::{data_dir, default_model_dir, EmbeddingExtractor, ExtractError, OnnxExtractor};
pub use gallery::{GalleryError, GalleryProvider, InMemoryGallery};
pub use matcher::{EuclideanMatcher, MatchOutcome, Matcher, ParallelMatcher, MATCH_DISTANCE_GATE};
pub use policy::{EnvironmentPolicy, PolicyBook, PolicyError, PolicyProvider};
pub use snapshot::{Snapshot, SnapshotError};
pub use types::{BoundingBox, Embedding, EnrollmentRecord, EnrollmentStatus, FaceObservation};
