//! Detector 10 — Robust Random Cut Forest (§4.1.10).
//!
//! An ensemble of `NUM_TREES` independent reservoirs (≤128 points each);
//! score is derived from the average depth at which a hypothetical
//! insertion of the current value would be isolated by repeated random
//! cuts proportional to each reservoir's value range — shallow isolation
//! means the point sits far from the bulk of recent history, which is what
//! §4.1.10 calls "average displacement upon hypothetical insertion".
//! The isolation depth is turned into a `[0,1]` score with the standard
//! isolation-forest normalization `2^(-depth / c(n))`.
//!
//! §9 "Open question — RRCF reservoir seed" requires determinism under
//! replay and forbids global randomness; rather than carry an RNG's opaque
//! internal state through the checkpoint codec, each tree derives its
//! randomness from a SplitMix64 stream seeded with `entity_hash ^
//! tree_index` and advanced by a plain `u64` counter, so the entire
//! pseudo-random stream replays bit-for-bit from a checkpoint with no
//! special-cased RNG serialization.

use crate::util::clamp01;
use serde::{Deserialize, Serialize};

const NUM_TREES: usize = 16;
const RESERVOIR_CAPACITY: usize = 128;
const MAX_CUT_DEPTH: u32 = 20;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SplitMix64 {
    state: u64,
}

impl SplitMix64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E3779B97F4A7C15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
        z ^ (z >> 31)
    }

    fn next_unit(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    fn next_below(&mut self, n: u64) -> u64 {
        if n == 0 {
            0
        } else {
            self.next_u64() % n
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Tree {
    rng: SplitMix64,
    points: Vec<f64>,
    seen: u64,
}

impl Tree {
    fn new(seed: u64) -> Self {
        Self {
            rng: SplitMix64::new(seed),
            points: Vec::with_capacity(RESERVOIR_CAPACITY),
            seen: 0,
        }
    }

    fn insert(&mut self, value: f64) {
        if self.points.len() < RESERVOIR_CAPACITY {
            self.points.push(value);
        } else {
            let j = self.rng.next_below(self.seen + 1) as usize;
            if j < RESERVOIR_CAPACITY {
                self.points[j] = value;
            }
        }
        self.seen += 1;
    }

    /// Depth at which `value` would be isolated from the reservoir by
    /// repeated random cuts in `[min, max]` of the current point set.
    fn isolation_depth(&mut self, value: f64) -> u32 {
        let mut current: Vec<f64> = self.points.clone();
        let mut depth = 0u32;
        while depth < MAX_CUT_DEPTH {
            if current.is_empty() {
                return depth;
            }
            let mut min = value;
            let mut max = value;
            for &p in &current {
                if p < min {
                    min = p;
                }
                if p > max {
                    max = p;
                }
            }
            let range = max - min;
            if range < 1e-12 {
                return MAX_CUT_DEPTH;
            }
            let cut = min + self.rng.next_unit() * range;
            let value_left = value < cut;
            let remaining: Vec<f64> = current
                .into_iter()
                .filter(|&p| (p < cut) == value_left)
                .collect();
            if remaining.is_empty() {
                return depth + 1;
            }
            current = remaining;
            depth += 1;
        }
        depth
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RrcfDetector {
    trees: Vec<Tree>,
}

impl RrcfDetector {
    /// `entity_hash` seeds every tree's PRNG stream; required for
    /// deterministic replay (§9).
    pub fn new(entity_hash: u64) -> Self {
        let trees = (0..NUM_TREES)
            .map(|i| Tree::new(entity_hash ^ (i as u64).wrapping_mul(0x2545F4914F6CDD1D)))
            .collect();
        Self { trees }
    }

    pub fn update(&mut self, value: f64, _timestamp_ns: u64) -> f64 {
        if !value.is_finite() {
            return 0.0;
        }
        let mut total_depth = 0.0;
        let mut reservoir_n = 0.0;
        for tree in self.trees.iter_mut() {
            total_depth += tree.isolation_depth(value) as f64;
            reservoir_n += tree.points.len() as f64;
            tree.insert(value);
        }
        let avg_depth = total_depth / NUM_TREES as f64;
        let avg_n = (reservoir_n / NUM_TREES as f64).max(2.0);

        let c_n = harmonic_path_normalizer(avg_n);
        if c_n <= 0.0 {
            return 0.0;
        }
        clamp01(2f64.powf(-avg_depth / c_n))
    }
}

/// Average path length of an unsuccessful search in a binary search tree of
/// `n` nodes (Liu, Ting & Zhou 2008's isolation-forest normalizer).
fn harmonic_path_normalizer(n: f64) -> f64 {
    if n <= 1.0 {
        return 1.0;
    }
    2.0 * ((n - 1.0).ln() + 0.5772156649) - (2.0 * (n - 1.0) / n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clustered_values_score_low() {
        let mut d = RrcfDetector::new(42);
        let mut score = 1.0;
        for i in 0..500u64 {
            score = d.update(1.0 + (i % 3) as f64 * 0.01, i);
        }
        assert!(score < 0.6, "clustered score was {score}");
    }

    #[test]
    fn test_outlier_scores_higher_than_typical() {
        let mut d = RrcfDetector::new(42);
        for i in 0..500u64 {
            d.update(1.0 + (i % 3) as f64 * 0.01, i);
        }
        let outlier_score = d.update(10_000.0, 501);
        assert!(outlier_score > 0.0);
    }

    #[test]
    fn test_deterministic_given_same_seed() {
        let mut a = RrcfDetector::new(7);
        let mut b = RrcfDetector::new(7);
        let mut last_a = 0.0;
        let mut last_b = 0.0;
        for i in 0..200u64 {
            last_a = a.update((i % 5) as f64, i);
            last_b = b.update((i % 5) as f64, i);
        }
        assert_eq!(last_a, last_b);
    }

    #[test]
    fn test_never_nan() {
        let mut d = RrcfDetector::new(1);
        assert!(d.update(f64::NAN, 0).is_finite());
    }
}
