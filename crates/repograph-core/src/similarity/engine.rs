//! Combined structural + embedding scoring

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::partition::{miss_probability, LshIndex};
use super::{ElementProfile, SimilarityEdge, SweepStrategy};
use crate::config::SimilarityConfig;
use crate::embeddings::Embedding;
use crate::index::fingerprint::structural_distance;
use crate::index::ElementId;

/// Components of a pair's score, all in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PairScore {
    pub structural: f32,
    /// `None` when either side has no usable embedding
    pub embedding: Option<f32>,
    pub combined: f32,
}

/// Result of a thresholded sweep over a pool
#[derive(Debug, Clone, Default)]
pub struct PairSweep {
    /// Sorted by `(a, b)`
    pub edges: Vec<SimilarityEdge>,
    pub candidates_considered: usize,
    /// Resolved strategy, never `Auto`
    pub strategy: SweepStrategy,
    /// Upper bound on the probability that a qualifying pair was skipped
    pub miss_bound: f64,
    pub cancelled: bool,
}

#[derive(Debug, Clone)]
pub struct SimilarityEngine {
    structural_weight: f32,
    embedding_weight: f32,
    low_confidence_factor: f32,
    min_structural_nodes: usize,
    strategy: SweepStrategy,
    exhaustive_limit: usize,
    lsh_tables: usize,
    lsh_bits: usize,
    lsh_seed: u64,
}

impl SimilarityEngine {
    pub fn new(config: &SimilarityConfig) -> Self {
        Self {
            structural_weight: config.structural_weight,
            embedding_weight: config.embedding_weight,
            low_confidence_factor: config.low_confidence_factor,
            min_structural_nodes: config.min_structural_nodes,
            strategy: config.strategy,
            exhaustive_limit: config.exhaustive_limit,
            lsh_tables: config.lsh_tables,
            lsh_bits: config.lsh_bits,
            lsh_seed: config.lsh_seed,
        }
    }

    pub fn with_strategy(mut self, strategy: SweepStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    fn is_low_confidence(&self, profile: &ElementProfile) -> bool {
        profile.fingerprint.low_confidence
            || profile.fingerprint.node_count() < self.min_structural_nodes
    }

    pub fn combined_score(&self, a: &ElementProfile, b: &ElementProfile) -> PairScore {
        let similarity = 1.0 - structural_distance(&a.fingerprint, &b.fingerprint);
        let structural = if self.is_low_confidence(a) || self.is_low_confidence(b) {
            let same_content = if a.content_hash == b.content_hash {
                1.0
            } else {
                0.0
            };
            self.low_confidence_factor * similarity
                + (1.0 - self.low_confidence_factor) * same_content
        } else {
            similarity
        };
        let structural = structural.clamp(0.0, 1.0);

        let embedding = embedding_similarity(a.embedding.as_ref(), b.embedding.as_ref());
        let combined = match embedding {
            Some(e) => self.structural_weight * structural + self.embedding_weight * e,
            None => structural,
        };
        let combined = combined.clamp(0.0, 1.0);

        PairScore {
            structural,
            embedding,
            combined,
        }
    }

    /// The `k` best matches for `target` in `pool`, excluding `target` itself
    pub fn top_k_similar_to(
        &self,
        target: &ElementProfile,
        pool: &[ElementProfile],
        k: usize,
    ) -> Vec<(ElementId, PairScore)> {
        let mut scored: Vec<(ElementId, PairScore)> = pool
            .par_iter()
            .filter(|p| p.id != target.id)
            .map(|p| (p.id.clone(), self.combined_score(target, p)))
            .collect();

        scored.sort_by(|(ia, sa), (ib, sb)| {
            sb.combined
                .total_cmp(&sa.combined)
                .then_with(|| ia.cmp(ib))
        });
        scored.truncate(k);
        scored
    }

    /// Every unordered pair scoring `>= threshold`.
    ///
    /// On cancellation the edges found so far are returned with
    /// `cancelled` set.
    pub fn all_pairs_above_threshold(
        &self,
        pool: &[ElementProfile],
        threshold: f32,
        cancel: &CancellationToken,
    ) -> PairSweep {
        let strategy = match self.strategy {
            SweepStrategy::Auto if pool.len() <= self.exhaustive_limit => SweepStrategy::Exhaustive,
            SweepStrategy::Auto => SweepStrategy::Bucketed,
            other => other,
        };

        let mut sweep = match strategy {
            SweepStrategy::Bucketed => self.bucketed(pool, threshold, cancel),
            _ => self.exhaustive(pool, threshold, cancel),
        };

        sweep
            .edges
            .sort_by(|x, y| x.a.cmp(&y.a).then_with(|| x.b.cmp(&y.b)));
        info!(
            profiles = pool.len(),
            strategy = %sweep.strategy,
            candidates = sweep.candidates_considered,
            edges = sweep.edges.len(),
            miss_bound = sweep.miss_bound,
            cancelled = sweep.cancelled,
            "Similarity sweep complete"
        );
        sweep
    }

    fn exhaustive(
        &self,
        pool: &[ElementProfile],
        threshold: f32,
        cancel: &CancellationToken,
    ) -> PairSweep {
        let cancelled = AtomicBool::new(false);

        let rows: Vec<(usize, Vec<SimilarityEdge>)> = (0..pool.len())
            .into_par_iter()
            .map(|i| {
                if cancel.is_cancelled() {
                    cancelled.store(true, Ordering::Relaxed);
                    return (0, Vec::new());
                }
                let a = &pool[i];
                let edges: Vec<SimilarityEdge> = pool[i + 1..]
                    .iter()
                    .filter_map(|b| self.edge_if_above(a, b, threshold))
                    .collect();
                (pool.len() - i - 1, edges)
            })
            .collect();

        let candidates_considered: usize = rows.iter().map(|(n, _)| n).sum();
        PairSweep {
            edges: rows.into_iter().flat_map(|(_, e)| e).collect(),
            candidates_considered,
            strategy: SweepStrategy::Exhaustive,
            miss_bound: 0.0,
            cancelled: cancelled.into_inner(),
        }
    }

    fn bucketed(
        &self,
        pool: &[ElementProfile],
        threshold: f32,
        cancel: &CancellationToken,
    ) -> PairSweep {
        let mut candidates: HashSet<(usize, usize)> = HashSet::new();

        // Identical content always pairs
        let mut by_hash: HashMap<&str, Vec<usize>> = HashMap::new();
        for (i, p) in pool.iter().enumerate() {
            by_hash.entry(p.content_hash.as_str()).or_default().push(i);
        }
        for members in by_hash.values() {
            for (n, &i) in members.iter().enumerate() {
                for &j in &members[n + 1..] {
                    candidates.insert((i.min(j), i.max(j)));
                }
            }
        }

        let dimension = dominant_dimension(pool);
        let mut embedded: Vec<(usize, &Embedding)> = Vec::new();
        let mut unembedded: Vec<usize> = Vec::new();
        for (i, p) in pool.iter().enumerate() {
            match &p.embedding {
                Some(e) if Some(e.dimension()) == dimension => embedded.push((i, e)),
                _ => unembedded.push(i),
            }
        }

        let miss_bound = match dimension {
            Some(dimension) if !embedded.is_empty() => {
                let lsh = LshIndex::new(dimension, self.lsh_tables, self.lsh_bits, self.lsh_seed);
                candidates.extend(lsh.candidate_pairs(&embedded));
                self.miss_bound(threshold)
            }
            _ => 0.0,
        };

        // Structural-only pairs: 1 - d <= min/max length, so only
        // comparable lengths can reach the threshold
        let mut by_length: Vec<(usize, usize)> = pool
            .iter()
            .enumerate()
            .map(|(i, p)| (p.fingerprint.node_count(), i))
            .collect();
        by_length.sort_unstable();
        let t = threshold.max(0.0);
        for &i in &unembedded {
            let len = pool[i].fingerprint.node_count() as f32;
            let lo = by_length.partition_point(|(l, _)| (*l as f32) < t * len);
            let hi = by_length.partition_point(|(l, _)| t * (*l as f32) <= len);
            for &(_, j) in &by_length[lo..hi.max(lo)] {
                if j != i {
                    candidates.insert((i.min(j), i.max(j)));
                }
            }
        }

        let mut pairs: Vec<(usize, usize)> = candidates.into_iter().collect();
        pairs.sort_unstable();
        debug!(
            pairs = pairs.len(),
            embedded = embedded.len(),
            unembedded = unembedded.len(),
            "Bucketed candidates"
        );

        let cancelled = AtomicBool::new(false);
        let edges = pairs
            .par_iter()
            .filter_map(|&(i, j)| {
                if cancel.is_cancelled() {
                    cancelled.store(true, Ordering::Relaxed);
                    return None;
                }
                self.edge_if_above(&pool[i], &pool[j], threshold)
            })
            .collect();

        PairSweep {
            edges,
            candidates_considered: pairs.len(),
            strategy: SweepStrategy::Bucketed,
            miss_bound,
            cancelled: cancelled.into_inner(),
        }
    }

    /// A pair with both embeddings qualifies only if `ws + we·c >= t`
    fn miss_bound(&self, threshold: f32) -> f64 {
        if self.embedding_weight <= 0.0 {
            return 0.0;
        }
        let c_min = f64::from((threshold - self.structural_weight) / self.embedding_weight);
        if c_min > 1.0 {
            return 0.0;
        }
        miss_probability(c_min, self.lsh_bits, self.lsh_tables)
    }

    fn edge_if_above(
        &self,
        a: &ElementProfile,
        b: &ElementProfile,
        threshold: f32,
    ) -> Option<SimilarityEdge> {
        let score = self.combined_score(a, b);
        (score.combined >= threshold).then(|| SimilarityEdge::new(&a.id, &b.id, score))
    }
}

fn embedding_similarity(a: Option<&Embedding>, b: Option<&Embedding>) -> Option<f32> {
    let cosine = a?.cosine(b?)?;
    Some(cosine.clamp(0.0, 1.0))
}

/// Most common embedding dimension in the pool
fn dominant_dimension(pool: &[ElementProfile]) -> Option<usize> {
    let mut counts: HashMap<usize, usize> = HashMap::new();
    for e in pool.iter().filter_map(|p| p.embedding.as_ref()) {
        *counts.entry(e.dimension()).or_default() += 1;
    }
    counts
        .into_iter()
        .max_by(|(da, ca), (db, cb)| ca.cmp(cb).then_with(|| db.cmp(da)))
        .map(|(d, _)| d)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::fingerprint::{NodeCategory as C, StructuralFingerprint};

    fn fingerprint(categories: Vec<C>) -> StructuralFingerprint {
        StructuralFingerprint {
            categories,
            low_confidence: false,
        }
    }

    fn profile(id: &str, categories: Vec<C>, hash: &str, embedding: Option<Vec<f32>>) -> ElementProfile {
        ElementProfile {
            id: ElementId::from(id),
            fingerprint: fingerprint(categories),
            content_hash: hash.to_string(),
            embedding: embedding.map(|v| {
                let dim = v.len();
                Embedding::new(v, dim).unwrap()
            }),
        }
    }

    fn long_body() -> Vec<C> {
        vec![
            C::Function,
            C::Parameter,
            C::Parameter,
            C::Loop,
            C::Name,
            C::Name,
            C::AugAssign,
            C::Name,
            C::Name,
            C::Return,
            C::Name,
        ]
    }

    fn engine() -> SimilarityEngine {
        SimilarityEngine::new(&SimilarityConfig::default())
    }

    #[test]
    fn test_self_score_is_one() {
        let p = profile("a", long_body(), "h", Some(vec![0.2, 0.4, 0.1]));
        let score = engine().combined_score(&p, &p);
        assert!((score.combined - 1.0).abs() < 1e-5);
        assert_eq!(score.structural, 1.0);
    }

    #[test]
    fn test_missing_embedding_redistributes_weight() {
        let a = profile("a", long_body(), "h1", Some(vec![1.0, 0.0]));
        let b = profile("b", long_body(), "h2", None);
        let score = engine().combined_score(&a, &b);
        assert_eq!(score.embedding, None);
        assert_eq!(score.combined, score.structural);
        assert_eq!(score.combined, 1.0);
    }

    #[test]
    fn test_negative_cosine_clamped() {
        let a = profile("a", long_body(), "h1", Some(vec![1.0, 0.0]));
        let b = profile("b", long_body(), "h2", Some(vec![-1.0, 0.0]));
        let score = engine().combined_score(&a, &b);
        assert_eq!(score.embedding, Some(0.0));
        assert!((score.combined - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_low_confidence_uses_content_hash() {
        let short = vec![C::Function, C::Parameter, C::Return, C::Name];
        let a = profile("a", short.clone(), "same", None);
        let b = profile("b", short.clone(), "same", None);
        let c = profile("c", short, "other", None);
        let e = engine();
        assert_eq!(e.combined_score(&a, &b).combined, 1.0);
        assert!((e.combined_score(&a, &c).combined - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_top_k_excludes_self_and_breaks_ties_by_id() {
        let target = profile("t", long_body(), "h0", None);
        let pool = vec![
            target.clone(),
            profile("z", long_body(), "h1", None),
            profile("b", long_body(), "h2", None),
            profile("m", vec![C::Function], "h3", None),
        ];
        let top = engine().top_k_similar_to(&target, &pool, 2);
        let ids: Vec<&str> = top.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["b", "z"]);
    }

    #[test]
    fn test_exhaustive_threshold_inclusive() {
        let pool = vec![
            profile("a", long_body(), "h1", Some(vec![1.0, 0.0])),
            profile("b", long_body(), "h2", Some(vec![-1.0, 0.0])),
        ];
        let sweep = engine().all_pairs_above_threshold(&pool, 0.4, &CancellationToken::new());
        assert_eq!(sweep.strategy, SweepStrategy::Exhaustive);
        assert_eq!(sweep.edges.len(), 1);
        assert_eq!(sweep.candidates_considered, 1);
        assert_eq!(sweep.edges[0].a.as_str(), "a");
    }

    #[test]
    fn test_cancelled_sweep_reports_cancellation() {
        let pool: Vec<_> = (0..10)
            .map(|i| profile(&format!("p{i}"), long_body(), &format!("h{i}"), None))
            .collect();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let sweep = engine().all_pairs_above_threshold(&pool, 0.5, &cancel);
        assert!(sweep.cancelled);
        assert!(sweep.edges.is_empty());
    }

    #[test]
    fn test_bucketed_pairs_identical_content_without_embeddings() {
        let pool = vec![
            profile("a", vec![C::Function, C::Return], "same", None),
            profile("b", vec![C::Function, C::Return], "same", None),
            profile("c", long_body(), "other", None),
        ];
        let sweep = engine()
            .with_strategy(SweepStrategy::Bucketed)
            .all_pairs_above_threshold(&pool, 0.9, &CancellationToken::new());
        assert_eq!(sweep.strategy, SweepStrategy::Bucketed);
        assert_eq!(sweep.edges.len(), 1);
        assert_eq!(sweep.miss_bound, 0.0);
    }
}
