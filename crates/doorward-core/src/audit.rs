//! Access log contract.
//!
//! One [`AccessLogEntry`] is written per completed attempt. Sinks are
//! append-only; the engine never edits or removes entries.

use crate::decision::{DenialReason, Verdict};
use crate::types::EnrollmentRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use uuid::Uuid;

/// Subject id recorded when the face was not recognized.
pub const UNKNOWN_SUBJECT_ID: &str = "UNKNOWN";
pub const UNKNOWN_DISPLAY_NAME: &str = "Unknown Person";
pub const DEFAULT_DEVICE_ID: &str = "PC_CAMERA";

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("audit I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode log entry: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("audit backend error: {0}")]
    Backend(String),
    #[error("all audit sinks failed (primary: {primary}; fallback: {fallback})")]
    AllSinksFailed { primary: String, fallback: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessLogEntry {
    pub id: Uuid,
    /// UTC, serialized as RFC 3339.
    pub timestamp: DateTime<Utc>,
    pub environment: String,
    pub subject_id: String,
    pub display_name: String,
    pub access_granted: bool,
    pub face_confidence: f32,
    pub uniform_score: f32,
    pub device_id: String,
    /// Present exactly when access was denied.
    pub denial_reason: Option<String>,
}

impl AccessLogEntry {
    /// Build the entry for a decided attempt.
    ///
    /// `subject` is the recognized record; pass `None` when the face was not
    /// recognized and the sentinel identity is recorded instead.
    pub fn new(
        environment: &str,
        subject: Option<&EnrollmentRecord>,
        verdict: &Verdict,
        face_confidence: f32,
        device_id: &str,
    ) -> Self {
        let (subject_id, display_name) = match subject {
            Some(r) => (r.subject_id.clone(), r.display_name.clone()),
            None => (UNKNOWN_SUBJECT_ID.to_string(), UNKNOWN_DISPLAY_NAME.to_string()),
        };
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            environment: environment.to_string(),
            subject_id,
            display_name,
            access_granted: verdict.granted,
            face_confidence,
            uniform_score: verdict.uniform_score,
            device_id: device_id.to_string(),
            denial_reason: verdict.denial_reason.map(|r| r.as_str().to_string()),
        }
    }

    pub fn is_unknown_subject(&self) -> bool {
        self.subject_id == UNKNOWN_SUBJECT_ID
    }
}

/// Append-only sink for access log entries.
pub trait AuditLogger: Send + Sync {
    fn append(&self, entry: &AccessLogEntry) -> Result<(), AuditError>;
}

impl<T: AuditLogger + ?Sized> AuditLogger for Box<T> {
    fn append(&self, entry: &AccessLogEntry) -> Result<(), AuditError> {
        (**self).append(entry)
    }
}

impl<T: AuditLogger + ?Sized> AuditLogger for Arc<T> {
    fn append(&self, entry: &AccessLogEntry) -> Result<(), AuditError> {
        (**self).append(entry)
    }
}

/// Writes to a primary sink and, when that fails, to a fallback sink.
pub struct FallbackAuditLog {
    primary: Box<dyn AuditLogger>,
    fallback: Box<dyn AuditLogger>,
}

impl FallbackAuditLog {
    pub fn new(primary: Box<dyn AuditLogger>, fallback: Box<dyn AuditLogger>) -> Self {
        Self { primary, fallback }
    }
}

impl AuditLogger for FallbackAuditLog {
    fn append(&self, entry: &AccessLogEntry) -> Result<(), AuditError> {
        let primary = match self.primary.append(entry) {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        tracing::warn!(entry_id = %entry.id, error = %primary, "primary audit sink failed; using fallback");
        self.fallback
            .append(entry)
            .map_err(|fallback| AuditError::AllSinksFailed {
                primary: primary.to_string(),
                fallback: fallback.to_string(),
            })
    }
}

/// In-process sink. Keeps entries in append order.
#[derive(Default)]
pub struct MemoryAuditLog {
    entries: Mutex<Vec<AccessLogEntry>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AccessLogEntry> {
        match self.entries.lock() {
            Ok(entries) => entries.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditLogger for MemoryAuditLog {
    fn append(&self, entry: &AccessLogEntry) -> Result<(), AuditError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| AuditError::Backend("memory log lock poisoned".into()))?;
        entries.push(entry.clone());
        Ok(())
    }
}

/// Aggregate view over a set of log entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AccessSummary {
    pub total: usize,
    pub granted: usize,
    pub denied: usize,
    /// Granted / total, 0 for an empty set.
    pub grant_rate: f32,
    /// Denied entries by reason text.
    pub denials: BTreeMap<String, usize>,
    pub unknown_subjects: usize,
    pub mean_face_confidence: f32,
    pub mean_uniform_score: f32,
}

impl AccessSummary {
    pub fn from_entries(entries: &[AccessLogEntry]) -> Self {
        if entries.is_empty() {
            return Self::default();
        }

        let mut summary = Self {
            total: entries.len(),
            ..Self::default()
        };
        let mut confidence_sum = 0.0f64;
        let mut score_sum = 0.0f64;

        for entry in entries {
            if entry.access_granted {
                summary.granted += 1;
            } else {
                summary.denied += 1;
                let reason = entry.denial_reason.as_deref().unwrap_or("unspecified");
                *summary.denials.entry(reason.to_string()).or_default() += 1;
            }
            if entry.is_unknown_subject() {
                summary.unknown_subjects += 1;
            }
            confidence_sum += entry.face_confidence as f64;
            score_sum += entry.uniform_score as f64;
        }

        let n = entries.len() as f64;
        summary.grant_rate = (summary.granted as f64 / n) as f32;
        summary.mean_face_confidence = (confidence_sum / n) as f32;
        summary.mean_uniform_score = (score_sum / n) as f32;
        summary
    }

    pub fn denials_for(&self, reason: DenialReason) -> usize {
        self.denials.get(reason.as_str()).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Embedding;

    struct BrokenSink;

    impl AuditLogger for BrokenSink {
        fn append(&self, _entry: &AccessLogEntry) -> Result<(), AuditError> {
            Err(AuditError::Backend("offline".into()))
        }
    }

    fn granted() -> Verdict {
        Verdict {
            face_recognized: true,
            uniform_checked: false,
            uniform_score: 1.0,
            uniform_compliant: true,
            granted: true,
            denial_reason: None,
        }
    }

    fn denied(reason: DenialReason) -> Verdict {
        Verdict {
            granted: false,
            face_recognized: reason != DenialReason::FaceNotRecognized,
            denial_reason: Some(reason),
            ..granted()
        }
    }

    #[test]
    fn test_entry_for_recognized_subject() {
        let r = EnrollmentRecord::new("hotel", "G7", "Guest Seven", Embedding::new(vec![0.0]));
        let e = AccessLogEntry::new("hotel", Some(&r), &granted(), 0.8, "LOBBY_1");
        assert_eq!(e.subject_id, "G7");
        assert_eq!(e.display_name, "Guest Seven");
        assert!(e.access_granted);
        assert_eq!(e.denial_reason, None);
        assert_eq!(e.device_id, "LOBBY_1");
    }

    #[test]
    fn test_entry_for_unknown_subject() {
        let e = AccessLogEntry::new("hotel", None, &denied(DenialReason::FaceNotRecognized), 0.0, DEFAULT_DEVICE_ID);
        assert!(e.is_unknown_subject());
        assert_eq!(e.display_name, "Unknown Person");
        assert_eq!(e.denial_reason.as_deref(), Some("Face not recognized"));
    }

    #[test]
    fn test_entry_json_shape() {
        let e = AccessLogEntry::new("hotel", None, &denied(DenialReason::FaceNotRecognized), 0.0, DEFAULT_DEVICE_ID);
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v["subject_id"], "UNKNOWN");
        assert_eq!(v["access_granted"], false);
        let ts = v["timestamp"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(ts).is_ok());
        let back: AccessLogEntry = serde_json::from_value(v).unwrap();
        assert_eq!(back, e);
    }

    #[test]
    fn test_fallback_used_when_primary_fails() {
        let backup = Arc::new(MemoryAuditLog::new());
        let log = FallbackAuditLog::new(Box::new(BrokenSink), Box::new(backup.clone()));
        let e = AccessLogEntry::new("x", None, &granted(), 0.9, DEFAULT_DEVICE_ID);
        assert!(log.append(&e).is_ok());
        assert_eq!(backup.entries(), vec![e]);
    }

    #[test]
    fn test_fallback_reports_both_failures() {
        let log = FallbackAuditLog::new(Box::new(BrokenSink), Box::new(BrokenSink));
        let e = AccessLogEntry::new("x", None, &granted(), 0.9, DEFAULT_DEVICE_ID);
        assert!(matches!(log.append(&e), Err(AuditError::AllSinksFailed { .. })));
    }

    #[test]
    fn test_summary() {
        let entries = vec![
            AccessLogEntry::new("x", None, &granted(), 0.8, DEFAULT_DEVICE_ID),
            AccessLogEntry::new("x", None, &denied(DenialReason::FaceNotRecognized), 0.0, DEFAULT_DEVICE_ID),
            AccessLogEntry::new("x", None, &denied(DenialReason::UniformNotCompliant), 0.7, DEFAULT_DEVICE_ID),
            AccessLogEntry::new("x", None, &denied(DenialReason::UniformNotCompliant), 0.9, DEFAULT_DEVICE_ID),
        ];
        let s = AccessSummary::from_entries(&entries);
        assert_eq!(s.total, 4);
        assert_eq!(s.granted, 1);
        assert_eq!(s.denied, 3);
        assert!((s.grant_rate - 0.25).abs() < 1e-6);
        assert_eq!(s.denials_for(DenialReason::UniformNotCompliant), 2);
        assert_eq!(s.denials_for(DenialReason::NoFaceDetected), 0);
        assert!((s.mean_face_confidence - 0.6).abs() < 1e-6);
        assert_eq!(s.unknown_subjects, 4);
    }

    #[test]
    fn test_summary_empty() {
        assert_eq!(AccessSummary::from_entries(&[]), AccessSummary::default());
    }
}
