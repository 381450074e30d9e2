//! Detector 2 — Distribution / Fading Histogram (§4.1.2).
//!
//! Fixed-bin histogram of observed values with exponential decay per bin at
//! a configurable half-life, so the profile always reflects "recent" shape
//! rather than all-time shape. Score = `1 - (current-bin mass / max-bin
//! mass)`, clamped to `[0,1]` — a value landing in a historically rare bin
//! scores high even while the bin itself still holds some decayed mass.

use crate::util::clamp01;
use serde::{Deserialize, Serialize};

const NUM_BINS: usize = 32;
const DEFAULT_HALF_LIFE_NS: f64 = 3_600.0 * 1_000_000_000.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FadingHistogramDetector {
    half_life_ns: f64,
    bins: [f64; NUM_BINS],
    last_decay_ns: Option<u64>,
}

impl FadingHistogramDetector {
    pub fn new() -> Self {
        Self::with_half_life(DEFAULT_HALF_LIFE_NS)
    }

    pub fn with_half_life(half_life_ns: f64) -> Self {
        Self {
            half_life_ns: half_life_ns.max(1.0),
            bins: [0.0; NUM_BINS],
            last_decay_ns: None,
        }
    }

    /// Maps an arbitrary finite value onto one of `NUM_BINS` buckets using a
    /// signed log scale, so both small near-zero values and large outliers
    /// land in distinct, stable bins.
    fn bucket_of(value: f64) -> usize {
        if !value.is_finite() {
            return NUM_BINS / 2;
        }
        let magnitude = value.abs().max(1e-12).ln().max(-30.0).min(30.0);
        // magnitude in [-30, 30] -> bucket in [0, NUM_BINS)
        let normalized = (magnitude + 30.0) / 60.0;
        let half = NUM_BINS / 2;
        let offset = ((normalized * half as f64) as usize).min(half - 1);
        if value >= 0.0 {
            half + offset
        } else {
            half - 1 - offset
        }
    }

    fn decay(&mut self, timestamp_ns: u64) {
        let Some(last) = self.last_decay_ns else {
            self.last_decay_ns = Some(timestamp_ns);
            return;
        };
        if timestamp_ns <= last {
            return;
        }
        let elapsed = (timestamp_ns - last) as f64;
        let factor = 0.5f64.powf(elapsed / self.half_life_ns);
        for bin in self.bins.iter_mut() {
            *bin *= factor;
        }
        self.last_decay_ns = Some(timestamp_ns);
    }

    pub fn update(&mut self, value: f64, timestamp_ns: u64) -> f64 {
        self.decay(timestamp_ns);
        let bucket = Self::bucket_of(value);
        self.bins[bucket] += 1.0;

        let max_mass = self.bins.iter().cloned().fold(0.0, f64::max);
        if max_mass <= 0.0 {
            return 0.0;
        }
        clamp01(1.0 - self.bins[bucket] / max_mass)
    }
}

impl Default for FadingHistogramDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_value_stabilizes_low_score() {
        let mut d = FadingHistogramDetector::new();
        let mut score = 1.0;
        for i in 0..200u64 {
            score = d.update(1.0, i * 1_000_000);
        }
        assert!(score < 0.2, "repeated-value score was {score}");
    }

    #[test]
    fn test_rare_value_scores_high() {
        let mut d = FadingHistogramDetector::new();
        for i in 0..200u64 {
            d.update(1.0, i * 1_000_000);
        }
        let score = d.update(1_000_000.0, 200_000_000);
        assert!(score > 0.5, "outlier score was {score}");
    }

    #[test]
    fn test_never_panics_on_nan() {
        let mut d = FadingHistogramDetector::new();
        let score = d.update(f64::NAN, 0);
        assert!(score.is_finite());
    }
}
