//! Detector 3 — Cardinality / HyperLogLog + EWMA (§4.1.3).
//!
//! Tracks the number of distinct values observed for an entity via HLL, then
//! scores on an EWMA of "uniqueness velocity" — how fast new distinct values
//! are appearing — rather than on the raw cardinality, so a chatty-but-
//! stable entity doesn't score high forever.

use crate::p2::P2StdDev;
use crate::util::{clamp01, sanitize};
use gatekeeper_storage::HyperLogLog;
use serde::{Deserialize, Serialize};

const DEFAULT_PRECISION: u8 = 12;
const VELOCITY_EWMA_ALPHA: f64 = 0.2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardinalityDetector {
    hll: HyperLogLog,
    last_estimate: f64,
    velocity_ewma: f64,
    velocity_stddev: P2StdDev,
    initialized: bool,
}

impl CardinalityDetector {
    pub fn new() -> Self {
        Self::with_precision(DEFAULT_PRECISION)
    }

    pub fn with_precision(precision: u8) -> Self {
        Self {
            hll: HyperLogLog::new(precision),
            last_estimate: 0.0,
            velocity_ewma: 0.0,
            velocity_stddev: P2StdDev::new(),
            initialized: false,
        }
    }

    pub fn update(&mut self, value: f64, _timestamp_ns: u64) -> f64 {
        self.hll.add(&value.to_bits());
        let estimate = self.hll.cardinality() as f64;
        let delta = (estimate - self.last_estimate).max(0.0);
        self.last_estimate = estimate;

        if !self.initialized {
            self.velocity_ewma = delta;
            self.initialized = true;
            self.velocity_stddev.update(delta);
            return 0.0;
        }

        self.velocity_ewma =
            VELOCITY_EWMA_ALPHA * delta + (1.0 - VELOCITY_EWMA_ALPHA) * self.velocity_ewma;
        self.velocity_stddev.update(delta);
        let sigma = self.velocity_stddev.stddev().max(1e-9);

        clamp01(sanitize(self.velocity_ewma / sigma) / 3.0)
    }

    pub fn cardinality(&self) -> f64 {
        self.last_estimate
    }
}

impl Default for CardinalityDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_values_low_score() {
        let mut d = CardinalityDetector::new();
        let mut score = 1.0;
        for i in 0..300u64 {
            score = d.update((i % 3) as f64, i);
        }
        assert!(score < 0.3, "repeated-value score was {score}");
    }

    #[test]
    fn test_cardinality_explosion_raises_score() {
        let mut d = CardinalityDetector::new();
        for i in 0..300u64 {
            d.update((i % 3) as f64, i);
        }
        let mut score = 0.0;
        for i in 0..500u64 {
            score = d.update(1_000.0 + i as f64, 300 + i);
        }
        assert!(score > 0.0);
    }

    #[test]
    fn test_never_nan() {
        let mut d = CardinalityDetector::new();
        assert!(d.update(f64::NAN, 0).is_finite());
    }
}
