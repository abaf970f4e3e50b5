//! Hybrid similarity
//!
//! - `engine` - Combined structural + embedding scoring, top-k, pair sweeps
//! - `partition` - Random-hyperplane LSH used to bucket large pools

pub mod engine;
pub mod partition;

use serde::{Deserialize, Serialize};

use crate::embeddings::Embedding;
use crate::index::fingerprint::StructuralFingerprint;
use crate::index::{CodeElement, ElementId};

pub use engine::{PairScore, PairSweep, SimilarityEngine};
pub use partition::{miss_probability, LshIndex};

/// How `all_pairs_above_threshold` chooses candidate pairs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SweepStrategy {
    /// Every pair, exact
    Exhaustive,
    /// LSH buckets plus exact sweeps where buckets cannot help
    Bucketed,
    /// Exhaustive for small pools, bucketed above the limit
    #[default]
    Auto,
}

impl std::fmt::Display for SweepStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Exhaustive => "exhaustive",
            Self::Bucketed => "bucketed",
            Self::Auto => "auto",
        })
    }
}

/// The parts of an element that scoring reads
#[derive(Debug, Clone)]
pub struct ElementProfile {
    pub id: ElementId,
    pub fingerprint: StructuralFingerprint,
    pub content_hash: String,
    pub embedding: Option<Embedding>,
}

impl ElementProfile {
    pub fn from_element(element: &CodeElement) -> Self {
        Self {
            id: element.id.clone(),
            fingerprint: element.fingerprint.clone(),
            content_hash: element.content_hash.clone(),
            embedding: element.embedding.clone(),
        }
    }
}

/// Materialized similarity between two elements, `a < b`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityEdge {
    pub a: ElementId,
    pub b: ElementId,
    pub structural_score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_score: Option<f32>,
    pub combined_score: f32,
}

impl SimilarityEdge {
    /// Orders the endpoints so that `a < b`
    pub fn new(x: &ElementId, y: &ElementId, score: PairScore) -> Self {
        let (a, b) = if x <= y { (x, y) } else { (y, x) };
        Self {
            a: a.clone(),
            b: b.clone(),
            structural_score: score.structural,
            embedding_score: score.embedding,
            combined_score: score.combined,
        }
    }

    /// The endpoint that is not `id`
    pub fn other(&self, id: &ElementId) -> &ElementId {
        if &self.a == id {
            &self.b
        } else {
            &self.a
        }
    }
}
