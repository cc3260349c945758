//! End-to-end access attempts with in-process collaborators.

use doorward_core::audit::AuditError;
use doorward_core::{
    AccessEngine, AccessLogEntry, AuditLogger, AuditStatus, BoundingBox, DenialReason, Embedding, EmbeddingExtractor,
    EnrollmentRecord, EnrollmentStatus, EnvironmentPolicy, EuclideanMatcher, ExtractError, FaceObservation, FindingKind,
    InMemoryGallery, MemoryAuditLog, PolicyBook, Snapshot, SnapshotError,
};
use std::sync::Arc;

const SITE: &str = "campus";
const GRAY: [u8; 3] = [128, 128, 128];
const WHITE: [u8; 3] = [255, 255, 255];

/// Returns the same probes for every image.
struct FixedFaces(Vec<Embedding>);

impl EmbeddingExtractor for FixedFaces {
    fn extract(&mut self, _snapshot: &Snapshot) -> Result<Vec<FaceObservation>, ExtractError> {
        Ok(self
            .0
            .iter()
            .enumerate()
            .map(|(i, embedding)| FaceObservation {
                embedding: embedding.clone(),
                bbox: BoundingBox {
                    x: 10.0 * i as f32,
                    y: 0.0,
                    width: 50.0,
                    height: 50.0,
                    confidence: 0.9 - 0.1 * i as f32,
                    landmarks: None,
                },
            })
            .collect())
    }
}

struct BrokenExtractor;

impl EmbeddingExtractor for BrokenExtractor {
    fn extract(&mut self, _snapshot: &Snapshot) -> Result<Vec<FaceObservation>, ExtractError> {
        Err(ExtractError::Snapshot(SnapshotError::ChannelCount(1)))
    }
}

struct OfflineLog;

impl AuditLogger for OfflineLog {
    fn append(&self, _entry: &AccessLogEntry) -> Result<(), AuditError> {
        Err(AuditError::Backend("connection refused".into()))
    }
}

fn emb(values: &[f32]) -> Embedding {
    Embedding::new(values.to_vec())
}

fn gallery(records: &[(&str, &str, [f32; 2])]) -> InMemoryGallery {
    let mut g = InMemoryGallery::new();
    for (env, id, values) in records {
        g.enroll(EnrollmentRecord::new(*env, *id, format!("Subject {id}"), emb(values)))
            .unwrap();
    }
    g
}

fn policy(uniform_enabled: bool, face_threshold: f32) -> PolicyBook {
    PolicyBook::empty().with_policy(EnvironmentPolicy {
        uniform_enabled,
        face_threshold,
        uniform_threshold: 0.4,
        ..EnvironmentPolicy::fallback(SITE)
    })
}

fn engine(
    extractor: impl EmbeddingExtractor + 'static,
    gallery: InMemoryGallery,
    policies: PolicyBook,
    log: Arc<MemoryAuditLog>,
) -> AccessEngine {
    AccessEngine::new(Box::new(extractor), Box::new(gallery), Box::new(policies), Box::new(log))
}

/// Upper half 10% light, everything else mid-gray.
fn sparse_shirt_image() -> Snapshot {
    let (width, height) = (40u32, 100u32);
    let mut pixels = Vec::with_capacity((width * height * 3) as usize);
    for y in 0..height {
        let rgb = if y < 5 { WHITE } else { GRAY };
        for _ in 0..width {
            pixels.extend_from_slice(&rgb);
        }
    }
    Snapshot::from_raw(width, height, 3, pixels)
}

#[test]
fn scenario_a_no_face_denies_without_logging() {
    let log = Arc::new(MemoryAuditLog::new());
    let mut engine = engine(FixedFaces(vec![]), gallery(&[(SITE, "S1", [0.0, 0.0])]), policy(true, 0.6), log.clone());

    let d = engine.evaluate(&Snapshot::filled(40, 80, GRAY), SITE);

    assert!(!d.granted);
    assert_eq!(d.denial_reason, Some(DenialReason::NoFaceDetected));
    assert_eq!(d.faces_detected, 0);
    assert!(!d.uniform_checked);
    assert!(d.findings.is_empty());
    assert_eq!(d.audit, AuditStatus::NotLogged);
    assert!(d.log_entry.is_none());
    assert!(log.is_empty());
}

#[test]
fn scenario_b_recognized_with_uniform_disabled_is_granted() {
    let log = Arc::new(MemoryAuditLog::new());
    let mut engine = engine(
        FixedFaces(vec![emb(&[0.0, 0.0])]),
        gallery(&[(SITE, "S1", [0.3, 0.0])]),
        policy(false, 0.6),
        log.clone(),
    );

    let d = engine.evaluate(&Snapshot::filled(40, 80, GRAY), SITE);

    assert!(d.granted);
    assert_eq!(d.denial_reason, None);
    assert_eq!(d.subject_id.as_deref(), Some("S1"));
    assert!((d.face_confidence - 0.7).abs() < 1e-5);
    assert_eq!(d.uniform_score, 1.0);
    assert!(d.findings.is_empty());
    assert_eq!(d.audit, AuditStatus::Logged);

    let entries = log.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].subject_id, "S1");
    assert!(entries[0].access_granted);
    assert_eq!(entries[0].denial_reason, None);
    assert_eq!(entries[0].device_id, "PC_CAMERA");
}

#[test]
fn scenario_c_confidence_below_policy_threshold() {
    let log = Arc::new(MemoryAuditLog::new());
    let mut engine = engine(
        FixedFaces(vec![emb(&[0.0, 0.0])]),
        gallery(&[(SITE, "S1", [0.3, 0.0])]),
        policy(false, 0.8),
        log.clone(),
    );

    let d = engine.evaluate(&Snapshot::filled(40, 80, GRAY), SITE);

    assert!(!d.granted);
    assert_eq!(d.denial_reason, Some(DenialReason::FaceNotRecognized));
    assert!(d.subject_id.is_none());
    assert!(d.distance.is_some());

    let entries = log.entries();
    assert_eq!(entries[0].subject_id, "UNKNOWN");
    assert_eq!(entries[0].display_name, "Unknown Person");
    assert_eq!(entries[0].denial_reason.as_deref(), Some("Face not recognized"));
}

#[test]
fn scenario_d_sparse_shirt_is_not_compliant() {
    let log = Arc::new(MemoryAuditLog::new());
    let mut engine = engine(
        FixedFaces(vec![emb(&[0.0, 0.0])]),
        gallery(&[(SITE, "S1", [0.3, 0.0])]),
        policy(true, 0.6),
        log.clone(),
    );

    let d = engine.evaluate(&sparse_shirt_image(), SITE);

    assert!(d.face_recognized);
    assert!(d.uniform_checked);
    assert!((d.uniform_score - 0.2).abs() < 1e-6);
    assert!(!d.granted);
    assert_eq!(d.denial_reason, Some(DenialReason::UniformNotCompliant));

    let passed: Vec<&str> = d.findings.iter().filter(|f| f.passed).map(|f| f.label.as_str()).collect();
    assert_eq!(passed, vec!["ID card"]);

    // Recognized subject is still recorded on a uniform denial.
    let entries = log.entries();
    assert_eq!(entries[0].subject_id, "S1");
    assert_eq!(entries[0].denial_reason.as_deref(), Some("Uniform not compliant"));
    assert!((entries[0].uniform_score - 0.2).abs() < 1e-6);
}

#[test]
fn test_scoring_fault_scores_zero_and_decision_proceeds() {
    let log = Arc::new(MemoryAuditLog::new());
    let mut engine = engine(
        FixedFaces(vec![emb(&[0.0, 0.0])]),
        gallery(&[(SITE, "S1", [0.3, 0.0])]),
        policy(true, 0.6),
        log.clone(),
    );

    // Height 6 leaves the top band empty, which the cap check cannot read.
    let d = engine.evaluate(&Snapshot::filled(8, 6, GRAY), SITE);

    assert!(d.face_recognized);
    assert!(d.uniform_checked);
    assert_eq!(d.uniform_score, 0.0);
    assert_eq!(d.findings.len(), 1);
    assert_eq!(d.findings[0].kind, FindingKind::Error);
    assert!(!d.findings[0].passed);
    assert!(!d.granted);
    assert_eq!(d.denial_reason, Some(DenialReason::UniformNotCompliant));
    assert_eq!(d.audit, AuditStatus::Logged);
    assert_eq!(log.entries()[0].uniform_score, 0.0);
}

#[test]
fn scenario_e_exact_tie_goes_to_earlier_enrollment() {
    let log = Arc::new(MemoryAuditLog::new());
    let mut engine = engine(
        FixedFaces(vec![emb(&[0.0, 0.0])]),
        gallery(&[(SITE, "S1", [0.4, 0.0]), (SITE, "S2", [0.0, 0.4])]),
        policy(false, 0.5),
        log,
    );

    let d = engine.evaluate(&Snapshot::filled(40, 80, GRAY), SITE);

    assert!(d.granted);
    assert_eq!(d.subject_id.as_deref(), Some("S1"));
    assert!((d.distance.unwrap() - 0.4).abs() < 1e-6);
}

#[test]
fn test_pipeline_is_idempotent() {
    let log = Arc::new(MemoryAuditLog::new());
    let mut engine = engine(
        FixedFaces(vec![emb(&[0.1, 0.2])]),
        gallery(&[(SITE, "S1", [0.3, 0.1]), (SITE, "S2", [0.0, 0.0])]),
        policy(true, 0.6),
        log.clone(),
    )
    .with_matcher(Box::new(EuclideanMatcher));
    let image = sparse_shirt_image();

    let a = engine.evaluate(&image, SITE);
    let b = engine.evaluate(&image, SITE);

    assert_eq!(a.granted, b.granted);
    assert_eq!(a.denial_reason, b.denial_reason);
    assert_eq!(a.subject_id, b.subject_id);
    assert_eq!(a.face_confidence, b.face_confidence);
    assert_eq!(a.uniform_score, b.uniform_score);
    assert_eq!(a.findings, b.findings);
    assert_eq!(log.len(), 2);
}

#[test]
fn test_extraction_fault_is_no_face() {
    let log = Arc::new(MemoryAuditLog::new());
    let mut engine = engine(BrokenExtractor, InMemoryGallery::new(), policy(true, 0.6), log.clone());

    let d = engine.evaluate(&Snapshot::filled(40, 80, GRAY), SITE);

    assert_eq!(d.denial_reason, Some(DenialReason::NoFaceDetected));
    assert!(log.is_empty());
}

#[test]
fn test_audit_failure_does_not_change_decision() {
    let mut engine = AccessEngine::new(
        Box::new(FixedFaces(vec![emb(&[0.0, 0.0])])),
        Box::new(gallery(&[(SITE, "S1", [0.3, 0.0])])),
        Box::new(policy(false, 0.6)),
        Box::new(OfflineLog),
    );

    let d = engine.evaluate(&Snapshot::filled(40, 80, GRAY), SITE);

    assert!(d.granted);
    assert!(matches!(d.audit, AuditStatus::Failed(ref reason) if reason.contains("connection refused")));
    assert!(d.log_entry.is_some());
}

#[test]
fn test_only_first_face_is_evaluated() {
    let log = Arc::new(MemoryAuditLog::new());
    // Second face would match; the first does not.
    let mut engine = engine(
        FixedFaces(vec![emb(&[5.0, 5.0]), emb(&[0.3, 0.0])]),
        gallery(&[(SITE, "S1", [0.3, 0.0])]),
        policy(false, 0.6),
        log,
    );

    let d = engine.evaluate(&Snapshot::filled(40, 80, GRAY), SITE);

    assert_eq!(d.faces_detected, 2);
    assert!(!d.face_recognized);
    assert_eq!(d.denial_reason, Some(DenialReason::FaceNotRecognized));
}

#[test]
fn test_other_environment_never_matches() {
    let log = Arc::new(MemoryAuditLog::new());
    let mut engine = engine(
        FixedFaces(vec![emb(&[0.0, 0.0])]),
        gallery(&[("hotel", "H1", [0.0, 0.0])]),
        policy(false, 0.6),
        log,
    );

    let d = engine.evaluate(&Snapshot::filled(40, 80, GRAY), SITE);

    assert!(!d.face_recognized);
    assert_eq!(d.distance, None);
}

#[test]
fn test_inactive_subject_is_denied() {
    let log = Arc::new(MemoryAuditLog::new());
    let mut g = gallery(&[(SITE, "S1", [0.0, 0.0])]);
    g.set_status(SITE, "S1", EnrollmentStatus::Inactive).unwrap();
    let mut engine = engine(FixedFaces(vec![emb(&[0.0, 0.0])]), g, policy(false, 0.6), log);

    let d = engine.evaluate(&Snapshot::filled(40, 80, GRAY), SITE);

    assert_eq!(d.denial_reason, Some(DenialReason::FaceNotRecognized));
}

#[test]
fn test_unknown_environment_uses_fallback_policy() {
    let log = Arc::new(MemoryAuditLog::new());
    let mut engine = engine(
        FixedFaces(vec![emb(&[0.0, 0.0])]),
        gallery(&[("annex", "A1", [0.1, 0.0])]),
        PolicyBook::empty(),
        log,
    )
    .with_device_id("GATE_2");

    // Fallback enables uniform checking; a gray image scores 0.2.
    let d = engine.evaluate(&Snapshot::filled(40, 80, GRAY), "annex");

    assert!(d.face_recognized);
    assert!(d.uniform_checked);
    assert_eq!(d.denial_reason, Some(DenialReason::UniformNotCompliant));
    assert_eq!(d.log_entry.unwrap().device_id, "GATE_2");
}
