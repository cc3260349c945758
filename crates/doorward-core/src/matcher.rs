//! Nearest-neighbour identity matching over an enrollment gallery.
//!
//! A probe is compared by Euclidean distance against every active record of
//! the requested environment. Only candidates closer than
//! [`MATCH_DISTANCE_GATE`] are eligible; the closest eligible record wins and
//! exact ties go to the record enrolled first (lowest gallery index).
//!
//! The gate is fixed and independent of a policy's `face_threshold`, which
//! the decision combinator applies afterwards to the derived confidence.

use crate::types::{Embedding, EnrollmentRecord};
use rayon::prelude::*;

/// Hard distance bound: candidates at or beyond it never match.
pub const MATCH_DISTANCE_GATE: f32 = 0.6;

/// Result of matching one probe against a gallery snapshot.
///
/// Borrows the winning record from the gallery it was matched against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchOutcome<'g> {
    pub record: Option<&'g EnrollmentRecord>,
    /// Distance to the winning record, if any.
    pub distance: Option<f32>,
    /// `1 - distance` for a match, `0.0` otherwise. Ordering only, not a probability.
    pub confidence: f32,
    /// Records of the environment that were compared.
    pub compared: usize,
    /// Records of the environment skipped because their embedding was unusable.
    pub skipped: usize,
}

impl<'g> MatchOutcome<'g> {
    pub fn none() -> Self {
        Self {
            record: None,
            distance: None,
            confidence: 0.0,
            compared: 0,
            skipped: 0,
        }
    }

    pub fn is_match(&self) -> bool {
        self.record.is_some()
    }
}

/// Map a winning distance to a confidence in [0, 1].
pub fn confidence_from_distance(distance: f32) -> f32 {
    (1.0 - distance).clamp(0.0, 1.0)
}

/// Strategy for comparing a probe embedding against a gallery of enrolled faces.
pub trait Matcher: Send + Sync {
    fn find<'g>(
        &self,
        probe: &Embedding,
        gallery: &'g [EnrollmentRecord],
        environment: &str,
    ) -> MatchOutcome<'g>;
}

enum Candidate {
    OutOfScope,
    Unusable,
    Distance(f32),
}

fn assess(probe: &Embedding, record: &EnrollmentRecord, environment: &str) -> Candidate {
    if record.environment != environment || !record.is_active() {
        return Candidate::OutOfScope;
    }
    if !record.embedding.is_well_formed() || record.embedding.dim() != probe.dim() {
        tracing::debug!(
            subject_id = %record.subject_id,
            dim = record.embedding.dim(),
            probe_dim = probe.dim(),
            "skipping gallery record with unusable embedding"
        );
        return Candidate::Unusable;
    }
    let distance = probe.euclidean_distance(&record.embedding);
    if distance.is_finite() {
        Candidate::Distance(distance)
    } else {
        Candidate::Unusable
    }
}

/// Partial reduction over a slice of the gallery, keyed by enrollment index.
#[derive(Debug, Default, Clone, Copy)]
struct Reduction {
    best: Option<(usize, f32)>,
    compared: usize,
    skipped: usize,
}

impl Reduction {
    fn push(mut self, index: usize, candidate: Candidate) -> Self {
        match candidate {
            Candidate::OutOfScope => {}
            Candidate::Unusable => self.skipped += 1,
            Candidate::Distance(d) => {
                self.compared += 1;
                self.offer(index, d);
            }
        }
        self
    }

    fn offer(&mut self, index: usize, distance: f32) {
        if distance >= MATCH_DISTANCE_GATE {
            return;
        }
        let better = match self.best {
            None => true,
            Some((best_idx, best_d)) => {
                distance < best_d || (distance == best_d && index < best_idx)
            }
        };
        if better {
            self.best = Some((index, distance));
        }
    }

    fn merge(mut self, other: Self) -> Self {
        self.compared += other.compared;
        self.skipped += other.skipped;
        if let Some((idx, d)) = other.best {
            self.offer(idx, d);
        }
        self
    }

    fn finish<'g>(self, gallery: &'g [EnrollmentRecord]) -> MatchOutcome<'g> {
        match self.best {
            Some((idx, distance)) => MatchOutcome {
                record: Some(&gallery[idx]),
                distance: Some(distance),
                confidence: confidence_from_distance(distance),
                compared: self.compared,
                skipped: self.skipped,
            },
            None => MatchOutcome {
                compared: self.compared,
                skipped: self.skipped,
                ..MatchOutcome::none()
            },
        }
    }
}

fn probe_is_usable(probe: &Embedding) -> bool {
    if probe.is_well_formed() {
        true
    } else {
        tracing::warn!(dim = probe.dim(), "probe embedding is empty or non-finite; no match");
        false
    }
}

/// Sequential Euclidean matcher. Evaluates the gallery in enrollment order.
#[derive(Debug, Default, Clone, Copy)]
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn find<'g>(
        &self,
        probe: &Embedding,
        gallery: &'g [EnrollmentRecord],
        environment: &str,
    ) -> MatchOutcome<'g> {
        if !probe_is_usable(probe) {
            return MatchOutcome::none();
        }
        gallery
            .iter()
            .enumerate()
            .fold(Reduction::default(), |acc, (idx, record)| {
                acc.push(idx, assess(probe, record, environment))
            })
            .finish(gallery)
    }
}

/// Euclidean matcher that fans distance computation out over the rayon pool
/// once the gallery reaches `min_parallel` records.
///
/// Reduces on (distance, enrollment index), so the winner is identical to
/// [`EuclideanMatcher`] regardless of evaluation order.
#[derive(Debug, Clone, Copy)]
pub struct ParallelMatcher {
    pub min_parallel: usize,
}

impl ParallelMatcher {
    pub fn new(min_parallel: usize) -> Self {
        Self { min_parallel }
    }
}

impl Default for ParallelMatcher {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Matcher for ParallelMatcher {
    fn find<'g>(
        &self,
        probe: &Embedding,
        gallery: &'g [EnrollmentRecord],
        environment: &str,
    ) -> MatchOutcome<'g> {
        if gallery.len() < self.min_parallel {
            return EuclideanMatcher.find(probe, gallery, environment);
        }
        if !probe_is_usable(probe) {
            return MatchOutcome::none();
        }
        gallery
            .par_iter()
            .enumerate()
            .fold(Reduction::default, |acc, (idx, record)| {
                acc.push(idx, assess(probe, record, environment))
            })
            .reduce(Reduction::default, Reduction::merge)
            .finish(gallery)
    }
}
