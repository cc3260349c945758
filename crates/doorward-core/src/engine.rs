//! Access decision pipeline.
//!
//! One call to [`AccessEngine::evaluate`] runs a complete attempt: extract
//! faces, match the first one against the environment's gallery, score
//! attire when the site asks for it, combine, and write one log entry.
//! Collaborator faults never escape; each is downgraded and logged.

use crate::attire::{self, Finding};
use crate::audit::{AccessLogEntry, AuditLogger, DEFAULT_DEVICE_ID};
use crate::decision::{self, DenialReason, Verdict};
use crate::extractor::EmbeddingExtractor;
use crate::gallery::GalleryProvider;
use crate::matcher::{Matcher, ParallelMatcher};
use crate::policy::PolicyProvider;
use crate::snapshot::Snapshot;
use serde::Serialize;

/// What happened to the attempt's log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum AuditStatus {
    /// No entry is written for attempts without a face.
    NotLogged,
    Logged,
    /// The sink rejected the entry. The decision stands.
    Failed(String),
}

/// Outcome of one access attempt, ready for display.
#[derive(Debug, Clone, Serialize)]
pub struct AccessDecision {
    pub environment: String,
    pub faces_detected: usize,
    /// Recognized subject; `None` unless the face was recognized.
    pub subject_id: Option<String>,
    pub display_name: Option<String>,
    /// Distance to the closest eligible record, even when below the policy threshold.
    pub distance: Option<f32>,
    pub face_confidence: f32,
    pub face_recognized: bool,
    pub uniform_checked: bool,
    pub uniform_score: f32,
    pub uniform_compliant: bool,
    pub findings: Vec<Finding>,
    pub granted: bool,
    pub denial_reason: Option<DenialReason>,
    pub log_entry: Option<AccessLogEntry>,
    pub audit: AuditStatus,
}

impl AccessDecision {
    fn no_face(environment: &str) -> Self {
        let verdict = Verdict::no_face();
        Self {
            environment: environment.to_string(),
            faces_detected: 0,
            subject_id: None,
            display_name: None,
            distance: None,
            face_confidence: 0.0,
            face_recognized: verdict.face_recognized,
            uniform_checked: verdict.uniform_checked,
            uniform_score: verdict.uniform_score,
            uniform_compliant: verdict.uniform_compliant,
            findings: Vec::new(),
            granted: verdict.granted,
            denial_reason: verdict.denial_reason,
            log_entry: None,
            audit: AuditStatus::NotLogged,
        }
    }
}

pub struct AccessEngine {
    extractor: Box<dyn EmbeddingExtractor>,
    gallery: Box<dyn GalleryProvider>,
    policies: Box<dyn PolicyProvider>,
    audit: Box<dyn AuditLogger>,
    matcher: Box<dyn Matcher>,
    device_id: String,
}

impl AccessEngine {
    pub fn new(
        extractor: Box<dyn EmbeddingExtractor>,
        gallery: Box<dyn GalleryProvider>,
        policies: Box<dyn PolicyProvider>,
        audit: Box<dyn AuditLogger>,
    ) -> Self {
        Self {
            extractor,
            gallery,
            policies,
            audit,
            matcher: Box::new(ParallelMatcher::default()),
            device_id: DEFAULT_DEVICE_ID.to_string(),
        }
    }

    pub fn with_matcher(mut self, matcher: Box<dyn Matcher>) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = device_id.into();
        self
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Run one access attempt for `environment`.
    pub fn evaluate(&mut self, snapshot: &Snapshot, environment: &str) -> AccessDecision {
        let policy = self.policies.policy(environment);

        let faces = match self.extractor.extract(snapshot) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!(environment, error = %e, "face extraction failed; treating as no face");
                Vec::new()
            }
        };
        let Some(probe) = faces.first() else {
            tracing::info!(environment, "access denied: no face detected");
            return AccessDecision::no_face(environment);
        };
        if faces.len() > 1 {
            tracing::info!(environment, faces = faces.len(), "multiple faces detected; evaluating the most confident");
        }

        let gallery = match self.gallery.list_active(environment) {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(environment, error = %e, "gallery unavailable; matching against an empty gallery");
                Vec::new()
            }
        };
        let outcome = self.matcher.find(&probe.embedding, &gallery, environment);
        if outcome.skipped > 0 {
            tracing::warn!(environment, skipped = outcome.skipped, "skipped unreadable gallery records");
        }

        let report = policy
            .uniform_enabled
            .then(|| attire::score(snapshot, &policy.attire));
        let verdict = decision::combine(&outcome, report.as_ref(), &policy);

        let subject = outcome.record.filter(|_| verdict.face_recognized);
        let entry = AccessLogEntry::new(environment, subject, &verdict, outcome.confidence, &self.device_id);
        let audit = match self.audit.append(&entry) {
            Ok(()) => AuditStatus::Logged,
            Err(e) => {
                tracing::warn!(environment, entry_id = %entry.id, error = %e, "failed to write access log entry");
                AuditStatus::Failed(e.to_string())
            }
        };

        tracing::info!(
            environment,
            subject_id = %entry.subject_id,
            granted = verdict.granted,
            reason = verdict.denial_reason.map(|r| r.as_str()),
            face_confidence = outcome.confidence,
            uniform_score = verdict.uniform_score,
            "access decided"
        );

        AccessDecision {
            environment: environment.to_string(),
            faces_detected: faces.len(),
            subject_id: subject.map(|r| r.subject_id.clone()),
            display_name: subject.map(|r| r.display_name.clone()),
            distance: outcome.distance,
            face_confidence: outcome.confidence,
            face_recognized: verdict.face_recognized,
            uniform_checked: verdict.uniform_checked,
            uniform_score: verdict.uniform_score,
            uniform_compliant: verdict.uniform_compliant,
            findings: report.map(|r| r.findings).unwrap_or_default(),
            granted: verdict.granted,
            denial_reason: verdict.denial_reason,
            log_entry: Some(entry),
            audit,
        }
    }
}
