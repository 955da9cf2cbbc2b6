//! Euclidean face descriptor matching.
//!
//! Distances are mapped onto a [0, 1] similarity so that a distance equal to
//! the reference distance scores 0.5 and identical descriptors score 1.0.

use serde::{Deserialize, Serialize};

/// Distance below which two descriptors are considered the same face.
pub const REFERENCE_DISTANCE: f32 = 0.6;

/// Default operating point for `find_best_match`.
pub const DEFAULT_MIN_SIMILARITY: f32 = 0.65;

/// Face descriptor vector (128-dimensional for the usual landmark models).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Descriptor {
    pub values: Vec<f32>,
}

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Non-empty and every component finite.
    pub fn is_well_formed(&self) -> bool {
        !self.values.is_empty() && self.values.iter().all(|v| v.is_finite())
    }

    /// Euclidean distance, or `None` when the pair cannot be compared.
    pub fn euclidean_distance(&self, other: &Descriptor) -> Option<f32> {
        if self.len() != other.len() || !self.is_well_formed() || !other.is_well_formed() {
            return None;
        }
        let sum: f32 = self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum();
        Some(sum.sqrt())
    }

    /// Similarity in [0, 1]. Malformed or mismatched pairs score 0.
    pub fn similarity(&self, other: &Descriptor) -> f32 {
        match self.euclidean_distance(other) {
            Some(distance) => (1.0 - distance / (2.0 * REFERENCE_DISTANCE)).max(0.0),
            None => 0.0,
        }
    }
}

impl From<Vec<f32>> for Descriptor {
    fn from(values: Vec<f32>) -> Self {
        Self { values }
    }
}

/// Convenience wrapper over [`Descriptor::similarity`].
pub fn similarity(a: &Descriptor, b: &Descriptor) -> f32 {
    a.similarity(b)
}

/// A student's descriptor as seen by the matcher.
#[derive(Debug, Clone)]
pub struct EnrolledDescriptor {
    pub student_id: String,
    pub descriptor: Descriptor,
}

/// Result of matching an observed descriptor against the enrolled set.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Best similarity seen, reported even when below threshold.
    pub similarity: f32,
    /// Student of the best candidate, set only when `matched`.
    pub student_id: Option<String>,
}

impl MatchResult {
    fn miss(similarity: f32) -> Self {
        Self {
            matched: false,
            similarity,
            student_id: None,
        }
    }
}

/// Strategy for comparing an observed descriptor against enrolled students.
pub trait Matcher {
    fn compare(
        &self,
        observed: &Descriptor,
        enrolled: &[EnrolledDescriptor],
        min_similarity: f32,
    ) -> MatchResult;
}

/// Euclidean matcher. Keeps the strict maximum, so the first of equal
/// candidates wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(
        &self,
        observed: &Descriptor,
        enrolled: &[EnrolledDescriptor],
        min_similarity: f32,
    ) -> MatchResult {
        if !observed.is_well_formed() {
            return MatchResult::miss(0.0);
        }

        let mut best_sim = f32::NEG_INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, candidate) in enrolled.iter().enumerate() {
            let sim = observed.similarity(&candidate.descriptor);
            if sim > best_sim {
                best_sim = sim;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_sim > min_similarity => MatchResult {
                matched: true,
                similarity: best_sim,
                student_id: Some(enrolled[idx].student_id.clone()),
            },
            Some(_) => MatchResult::miss(best_sim),
            None => MatchResult::miss(0.0),
        }
    }
}

/// Best enrolled student whose similarity exceeds `min_similarity`.
pub fn find_best_match(
    observed: &Descriptor,
    enrolled: &[EnrolledDescriptor],
    min_similarity: f32,
) -> Option<(String, f32)> {
    let result = EuclideanMatcher.compare(observed, enrolled, min_similarity);
    result.student_id.map(|id| (id, result.similarity))
}
