//! Grant/deny combinator.
//!
//! Pure over its inputs: a match outcome, an optional attire report and the
//! site policy. The face check is evaluated first, so when both signals fail
//! the denial reason is "Face not recognized".

use crate::attire::AttireReport;
use crate::matcher::MatchOutcome;
use crate::policy::EnvironmentPolicy;
use serde::{Deserialize, Serialize};

/// Score assigned when the site does not check attire.
pub const UNIFORM_SKIPPED_SCORE: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    NoFaceDetected,
    FaceNotRecognized,
    UniformNotCompliant,
}

impl DenialReason {
    pub const ALL: [DenialReason; 3] = [
        Self::NoFaceDetected,
        Self::FaceNotRecognized,
        Self::UniformNotCompliant,
    ];

    /// Operator-facing text, also the value stored in the access log.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoFaceDetected => "No face detected",
            Self::FaceNotRecognized => "Face not recognized",
            Self::UniformNotCompliant => "Uniform not compliant",
        }
    }

    /// Inverse of [`as_str`](Self::as_str).
    pub fn from_message(message: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.as_str() == message)
    }
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub face_recognized: bool,
    /// Whether the attire scorer's result took part in the decision.
    pub uniform_checked: bool,
    pub uniform_score: f32,
    pub uniform_compliant: bool,
    pub granted: bool,
    /// Set exactly when `granted` is false.
    pub denial_reason: Option<DenialReason>,
}

impl Verdict {
    /// Terminal deny for an image with no usable face.
    pub fn no_face() -> Self {
        Self {
            face_recognized: false,
            uniform_checked: false,
            uniform_score: 0.0,
            uniform_compliant: false,
            granted: false,
            denial_reason: Some(DenialReason::NoFaceDetected),
        }
    }
}

/// Combine the identity and attire signals under `policy`.
///
/// `attire` is only consulted when the policy enables uniform checking; a
/// missing report in that case counts as a zero score.
pub fn combine(outcome: &MatchOutcome<'_>, attire: Option<&AttireReport>, policy: &EnvironmentPolicy) -> Verdict {
    let face_recognized = outcome.is_match() && outcome.confidence >= policy.face_threshold;

    let (uniform_score, uniform_compliant) = if policy.uniform_enabled {
        let score = match attire {
            Some(report) => report.score,
            None => {
                tracing::warn!(
                    environment = %policy.environment,
                    "uniform checking enabled but no attire report; scoring zero"
                );
                0.0
            }
        };
        (score, score >= policy.uniform_threshold)
    } else {
        (UNIFORM_SKIPPED_SCORE, true)
    };

    let denial_reason = if !face_recognized {
        Some(DenialReason::FaceNotRecognized)
    } else if !uniform_compliant {
        Some(DenialReason::UniformNotCompliant)
    } else {
        None
    };

    Verdict {
        face_recognized,
        uniform_checked: policy.uniform_enabled,
        uniform_score,
        uniform_compliant,
        granted: denial_reason.is_none(),
        denial_reason,
    }
}
