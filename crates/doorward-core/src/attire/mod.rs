//! Attire compliance scoring from regional color heuristics.
//!
//! The image is split into fixed bands by relative height. Each check
//! measures how much of its band falls inside a named color range and
//! passes when that coverage clears a fixed gate. Required checks add their
//! weight directly; optional checks add theirs into a bonus that is capped
//! before being added. The final score is clamped to [0, 1].
//!
//! Scoring is pure: the same pixels and policy always give the same report.

mod checks;
mod color;

pub use checks::{AttireCheck, Band, Region};
pub use color::{ColorRule, Hsv};

use crate::snapshot::{Snapshot, SnapshotError};
use checks::Coverage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Slack used when comparing accumulated weights against a floor.
const SCORE_EPSILON: f32 = 1e-6;

#[derive(Error, Debug)]
pub enum AttireError {
    #[error("malformed image: {0}")]
    Malformed(#[from] SnapshotError),
    #[error("{band} band is empty for a {width}x{height} image")]
    EmptyBand {
        band: &'static str,
        width: u32,
        height: u32,
    },
}

/// A check selected by a policy, with the weight it contributes when it passes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AttireItem {
    pub check: AttireCheck,
    pub weight: f32,
}

impl AttireItem {
    pub fn new(check: AttireCheck) -> Self {
        Self {
            check,
            weight: check.default_weight(),
        }
    }
}

/// Which checks a site requires or rewards, and how they add up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttirePolicy {
    pub required: Vec<AttireItem>,
    pub optional: Vec<AttireItem>,
    /// Floor the summary finding is judged against.
    pub passing_score: f32,
    /// Ceiling on the summed optional contribution.
    pub bonus_cap: f32,
}

impl AttirePolicy {
    /// Reference school policy: ID card and shirt required, everything else a bonus.
    pub fn reference() -> Self {
        let required = vec![AttireItem::new(AttireCheck::IdCard), AttireItem::new(AttireCheck::Shirt)];
        let optional = AttireCheck::ALL[2..].iter().copied().map(AttireItem::new).collect();
        Self::with_items(required, optional, 0.6)
    }

    /// Policy with no checks at all. Scores 0.
    pub fn empty() -> Self {
        Self::with_items(Vec::new(), Vec::new(), 0.0)
    }

    /// Build a policy whose passing score is the sum of the required weights.
    pub fn with_items(required: Vec<AttireItem>, optional: Vec<AttireItem>, bonus_cap: f32) -> Self {
        let passing_score = required.iter().map(|i| i.weight).sum();
        Self {
            required,
            optional,
            passing_score,
            bonus_cap,
        }
    }

    pub fn required_total(&self) -> f32 {
        self.required.iter().map(|i| i.weight).sum()
    }

    fn checks(&self) -> impl Iterator<Item = AttireCheck> + '_ {
        self.required.iter().chain(self.optional.iter()).map(|i| i.check)
    }
}

impl Default for AttirePolicy {
    fn default() -> Self {
        Self::reference()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    Required,
    Optional,
    Summary,
    Error,
}

/// One line of the itemized report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub label: String,
    pub passed: bool,
    pub kind: FindingKind,
}

impl Finding {
    fn new(label: impl Into<String>, passed: bool, kind: FindingKind) -> Self {
        Self {
            label: label.into(),
            passed,
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttireReport {
    /// Required contribution plus capped optional contribution, in [0, 1].
    pub score: f32,
    pub required_score: f32,
    /// Optional contribution after the bonus cap.
    pub optional_score: f32,
    /// Per-check findings in policy order, then one summary (or a single error).
    pub findings: Vec<Finding>,
}

impl AttireReport {
    /// Zero score with a single error finding.
    pub fn failed(reason: impl std::fmt::Display) -> Self {
        Self {
            score: 0.0,
            required_score: 0.0,
            optional_score: 0.0,
            findings: vec![Finding::new(
                format!("Attire analysis failed: {reason}"),
                false,
                FindingKind::Error,
            )],
        }
    }

    pub fn is_error(&self) -> bool {
        self.findings.iter().any(|f| f.kind == FindingKind::Error)
    }

    /// Outcome of the summary finding, if there is one.
    pub fn summary_passed(&self) -> Option<bool> {
        self.findings
            .iter()
            .find(|f| f.kind == FindingKind::Summary)
            .map(|f| f.passed)
    }
}

/// Check the image and every band the policy reads are non-empty.
fn check_geometry(snapshot: &Snapshot, policy: &AttirePolicy) -> Result<(), AttireError> {
    snapshot.validate()?;
    let (width, height) = (snapshot.width(), snapshot.height());
    for check in policy.checks() {
        for band in check.bands() {
            if band.region(width, height).area() == 0 {
                return Err(AttireError::EmptyBand {
                    band: band.name(),
                    width,
                    height,
                });
            }
        }
    }
    Ok(())
}

/// Score a snapshot against an attire policy.
///
/// Never fails: malformed input yields [`AttireReport::failed`].
pub fn score(snapshot: &Snapshot, policy: &AttirePolicy) -> AttireReport {
    if let Err(e) = check_geometry(snapshot, policy) {
        tracing::warn!(error = %e, "attire scoring skipped; reporting zero score");
        return AttireReport::failed(e);
    }

    let mut coverage = Coverage::new(snapshot);
    let mut findings = Vec::with_capacity(policy.required.len() + policy.optional.len() + 1);

    let mut required_score = 0.0f32;
    for item in &policy.required {
        let passed = item.check.evaluate(&mut coverage);
        if passed {
            required_score += item.weight;
        }
        findings.push(Finding::new(item.check.label(), passed, FindingKind::Required));
    }

    let mut bonus = 0.0f32;
    for item in &policy.optional {
        let passed = item.check.evaluate(&mut coverage);
        if passed {
            bonus += item.weight;
        }
        findings.push(Finding::new(item.check.label(), passed, FindingKind::Optional));
    }
    let optional_score = bonus.min(policy.bonus_cap);

    let score = (required_score + optional_score).clamp(0.0, 1.0);
    let passed = score + SCORE_EPSILON >= policy.passing_score;
    findings.push(Finding::new("Uniform compliance", passed, FindingKind::Summary));

    tracing::debug!(
        score,
        required_score,
        optional_score,
        passed,
        "attire scored"
    );

    AttireReport {
        score,
        required_score,
        optional_score,
        findings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const GRAY: [u8; 3] = [128, 128, 128];
    const WHITE: [u8; 3] = [255, 255, 255];
    const BLACK: [u8; 3] = [0, 0, 0];

    fn labels(report: &AttireReport) -> Vec<(&str, bool)> {
        report.findings.iter().map(|f| (f.label.as_str(), f.passed)).collect()
    }

    #[test]
    fn test_plain_gray_scores_id_card_only() {
        let s = Snapshot::filled(40, 80, GRAY);
        let report = score(&s, &AttirePolicy::reference());
        assert!((report.score - 0.2).abs() < 1e-6);
        assert!((report.required_score - 0.2).abs() < 1e-6);
        assert_eq!(report.optional_score, 0.0);
        assert_eq!(report.summary_passed(), Some(false));
        assert_eq!(report.findings.len(), 2 + 7 + 1);
        assert_eq!(labels(&report)[0], ("ID card", true));
        assert_eq!(labels(&report)[1], ("Shirt", false));
        assert_eq!(report.findings.last().unwrap().kind, FindingKind::Summary);
    }

    #[test]
    fn test_white_shirt_dark_trousers() {
        // Rows 0..40 white (upper half), 40..80 black (lower half).
        let mut s = Snapshot::filled(40, 80, WHITE);
        s.paint_rows(40..80, BLACK);
        let report = score(&s, &AttirePolicy::reference());

        let passed: Vec<&str> = report
            .findings
            .iter()
            .filter(|f| f.passed && f.kind != FindingKind::Summary)
            .map(|f| f.label.as_str())
            .collect();
        // Light upper half → shirt, blazer, badge. Dark lower half → trousers,
        // shoes. Middle third is half black → belt. Top band and tie region are white.
        assert_eq!(
            passed,
            vec!["ID card", "Shirt", "Trousers", "Blazer or sweater", "Badge", "Shoes", "Belt"]
        );
        assert!((report.required_score - 0.4).abs() < 1e-6);
        assert!((report.optional_score - (0.15 + 0.10 + 0.05 + 0.05 + 0.05)).abs() < 1e-6);
        assert_eq!(report.summary_passed(), Some(true));
    }

    #[test]
    fn test_bonus_cap_applies() {
        let mut s = Snapshot::filled(40, 80, WHITE);
        s.paint_rows(40..80, BLACK);
        let mut policy = AttirePolicy::reference();
        policy.bonus_cap = 0.1;
        let report = score(&s, &policy);
        assert!((report.optional_score - 0.1).abs() < 1e-6);
        assert!((report.score - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_wrong_channel_count_is_error_finding() {
        let s = Snapshot::from_raw(4, 16, 1, vec![0; 64]);
        let report = score(&s, &AttirePolicy::reference());
        assert_eq!(report.score, 0.0);
        assert_eq!(report.findings.len(), 1);
        assert!(report.is_error());
        assert!(!report.findings[0].passed);
    }

    #[test]
    fn test_empty_band_is_error_finding() {
        // Height 6 → top band (height / 8) is empty; cap reads it.
        let s = Snapshot::filled(8, 6, GRAY);
        let report = score(&s, &AttirePolicy::reference());
        assert!(report.is_error());
        assert!(report.findings[0].label.contains("top band"));
    }

    #[test]
    fn test_empty_band_ignored_when_unused() {
        let s = Snapshot::filled(8, 6, WHITE);
        let policy = AttirePolicy::with_items(
            vec![AttireItem::new(AttireCheck::IdCard), AttireItem::new(AttireCheck::Shirt)],
            vec![],
            0.6,
        );
        let report = score(&s, &policy);
        assert!(!report.is_error());
        assert!((report.score - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_empty_policy_scores_zero_and_passes_zero_floor() {
        let s = Snapshot::filled(8, 8, GRAY);
        let report = score(&s, &AttirePolicy::empty());
        assert_eq!(report.score, 0.0);
        assert_eq!(report.summary_passed(), Some(true));
    }

    #[test]
    fn test_deterministic() {
        let mut s = Snapshot::filled(30, 64, [200, 190, 180]);
        s.paint_rows(20..50, [10, 20, 90]);
        let a = score(&s, &AttirePolicy::reference());
        let b = score(&s, &AttirePolicy::reference());
        assert_eq!(a, b);
    }

    proptest! {
        #[test]
        fn prop_score_bounds(
            rows in prop::collection::vec(prop::array::uniform3(any::<u8>()), 16..48),
            width in 1u32..6,
        ) {
            let height = rows.len() as u32;
            let mut s = Snapshot::filled(width.max(2), height, GRAY);
            for (y, rgb) in rows.iter().enumerate() {
                s.paint_rows(y as u32..y as u32 + 1, *rgb);
            }
            let policy = AttirePolicy::reference();
            let report = score(&s, &policy);
            prop_assert!((0.0..=1.0).contains(&report.score));
            prop_assert!(report.required_score <= policy.passing_score + 1e-6);
            prop_assert!(report.optional_score <= policy.bonus_cap + 1e-6);
        }
    }
}
