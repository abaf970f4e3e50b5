//! Random-hyperplane LSH
//!
//! Each table hashes a vector to `bits` sign bits against seeded Gaussian
//! hyperplanes. Probing a bucket and its Hamming-distance-1 neighbours, a
//! pair with cosine `c` is missed by every table with probability
//! `(1 - p^k - k·p^(k-1)·(1-p))^L`, where `p = 1 - acos(c)/π`.

use std::collections::{HashMap, HashSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::embeddings::Embedding;

pub struct LshIndex {
    tables: usize,
    bits: usize,
    /// `tables * bits` hyperplanes of length `dimension`
    planes: Vec<Vec<f32>>,
}

impl LshIndex {
    pub fn new(dimension: usize, tables: usize, bits: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let planes = (0..tables * bits)
            .map(|_| (0..dimension).map(|_| gaussian(&mut rng)).collect())
            .collect();
        Self {
            tables,
            bits,
            planes,
        }
    }

    /// Bucket of `vector` in `table`
    pub fn signature(&self, table: usize, vector: &[f32]) -> u32 {
        let start = table * self.bits;
        self.planes[start..start + self.bits]
            .iter()
            .enumerate()
            .fold(0u32, |sig, (bit, plane)| {
                let dot: f32 = plane.iter().zip(vector).map(|(p, v)| p * v).sum();
                if dot >= 0.0 {
                    sig | (1 << bit)
                } else {
                    sig
                }
            })
    }

    /// Index pairs `(i, j)`, `i < j`, that share a bucket or sit one bit
    /// apart in at least one table
    pub fn candidate_pairs(&self, items: &[(usize, &Embedding)]) -> HashSet<(usize, usize)> {
        let mut pairs = HashSet::new();

        for table in 0..self.tables {
            let signatures: Vec<(usize, u32)> = items
                .iter()
                .map(|(idx, e)| (*idx, self.signature(table, e.as_slice())))
                .collect();

            let mut buckets: HashMap<u32, Vec<usize>> = HashMap::new();
            for (idx, sig) in &signatures {
                buckets.entry(*sig).or_default().push(*idx);
            }

            for (idx, sig) in &signatures {
                let probes = std::iter::once(*sig).chain((0..self.bits).map(|b| sig ^ (1 << b)));
                for probe in probes {
                    if let Some(members) = buckets.get(&probe) {
                        for &other in members {
                            if other > *idx {
                                pairs.insert((*idx, other));
                            }
                        }
                    }
                }
            }
        }

        pairs
    }
}

/// Probability that a pair with cosine `c` is never probed
pub fn miss_probability(cosine: f64, bits: usize, tables: usize) -> f64 {
    let c = cosine.clamp(-1.0, 1.0);
    let p = 1.0 - c.acos() / std::f64::consts::PI;
    let k = bits as i32;
    let hit_one_table = p.powi(k) + f64::from(k) * p.powi(k - 1) * (1.0 - p);
    (1.0 - hit_one_table).clamp(0.0, 1.0).powi(tables as i32)
}

/// Standard normal sample (Box-Muller)
fn gaussian(rng: &mut StdRng) -> f32 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen();
    ((-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn embedding(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec(), values.len()).unwrap()
    }

    #[test]
    fn test_seeded_planes_are_reproducible() {
        let a = LshIndex::new(8, 4, 6, 42);
        let b = LshIndex::new(8, 4, 6, 42);
        let v = [0.3, -0.1, 0.5, 0.2, -0.7, 0.1, 0.0, 0.4];
        for t in 0..4 {
            assert_eq!(a.signature(t, &v), b.signature(t, &v));
        }
    }

    #[test]
    fn test_identical_vectors_always_pair() {
        let index = LshIndex::new(4, 2, 8, 7);
        let e = embedding(&[1.0, 2.0, 3.0, 4.0]);
        let pairs = index.candidate_pairs(&[(0, &e), (1, &e)]);
        assert!(pairs.contains(&(0, 1)));
    }

    #[test]
    fn test_opposite_vectors_never_share_bucket() {
        let index = LshIndex::new(3, 4, 6, 1);
        let a = embedding(&[1.0, 0.5, 0.2]);
        let b = embedding(&[-1.0, -0.5, -0.2]);
        for t in 0..4 {
            let sa = index.signature(t, a.as_slice());
            let sb = index.signature(t, b.as_slice());
            assert!((sa ^ sb).count_ones() >= 5);
        }
        assert!(index.candidate_pairs(&[(0, &a), (1, &b)]).is_empty());
    }

    #[test]
    fn test_miss_probability_bounds() {
        assert!(miss_probability(1.0, 6, 16) < 1e-12);
        assert!((miss_probability(-1.0, 6, 16) - 1.0).abs() < 1e-12);
        let high = miss_probability(0.9, 6, 16);
        let low = miss_probability(0.5, 6, 16);
        assert!(high < low);
        assert!(high < 1e-3);
    }
}
