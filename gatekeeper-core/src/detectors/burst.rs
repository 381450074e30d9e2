//! Detector 4 — Burst / EWMA over IAT + CUSUM (§4.1.4).
//!
//! Maintains an EWMA baseline of inter-arrival time (IAT) and its P²
//! standard deviation; score spikes when the instantaneous IAT collapses
//! below the baseline by at least `k * sigma` (a burst of near-simultaneous
//! events for the same entity).

use crate::util::{clamp01, sanitize};
use serde::{Deserialize, Serialize};

const DEFAULT_EWMA_ALPHA: f64 = 0.2;
const DEFAULT_K: f64 = 2.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BurstDetector {
    alpha: f64,
    k: f64,
    baseline_iat_ns: f64,
    variance_ewma: f64,
    last_ts_ns: Option<u64>,
    initialized: bool,
}

impl BurstDetector {
    pub fn new() -> Self {
        Self::with_params(DEFAULT_EWMA_ALPHA, DEFAULT_K)
    }

    pub fn with_params(alpha: f64, k: f64) -> Self {
        Self {
            alpha,
            k,
            baseline_iat_ns: 0.0,
            variance_ewma: 0.0,
            last_ts_ns: None,
            initialized: false,
        }
    }

    pub fn update(&mut self, _value: f64, timestamp_ns: u64) -> f64 {
        let Some(prev) = self.last_ts_ns else {
            self.last_ts_ns = Some(timestamp_ns);
            return 0.0;
        };
        self.last_ts_ns = Some(timestamp_ns);

        let iat_ns = if timestamp_ns > prev {
            (timestamp_ns - prev) as f64
        } else {
            0.0
        };

        if !self.initialized {
            self.baseline_iat_ns = iat_ns;
            self.initialized = true;
            return 0.0;
        }

        let deviation = iat_ns - self.baseline_iat_ns;
        self.variance_ewma =
            self.alpha * deviation * deviation + (1.0 - self.alpha) * self.variance_ewma;
        let sigma = self.variance_ewma.sqrt().max(1.0);

        // Baseline adapts slowly so a sustained burst eventually becomes
        // "normal" rather than scoring forever; this update happens after
        // computing the deviation against the pre-update baseline.
        self.baseline_iat_ns = self.alpha * iat_ns + (1.0 - self.alpha) * self.baseline_iat_ns;

        // Only IAT *collapse* (events arriving faster than baseline) is a
        // burst; a longer-than-usual gap is not scored by this detector.
        let collapse = self.baseline_iat_ns - iat_ns;
        if collapse <= 0.0 {
            return 0.0;
        }

        clamp01(sanitize((collapse / sigma) / self.k))
    }
}

impl Default for BurstDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steady_cadence_scores_zero() {
        let mut d = BurstDetector::new();
        let mut score = 1.0;
        for i in 0..100u64 {
            score = d.update(0.0, i * 20_000_000);
        }
        assert_eq!(score, 0.0);
    }

    #[test]
    fn test_burst_raises_score() {
        let mut d = BurstDetector::new();
        let mut ts = 0u64;
        for _ in 0..50 {
            ts += 20_000_000;
            d.update(0.0, ts);
        }
        let mut score = 0.0;
        for _ in 0..10 {
            ts += 1_000; // ~20,000x faster than baseline
            score = d.update(0.0, ts);
        }
        assert!(score > 0.5, "burst score was {score}");
    }

    #[test]
    fn test_slower_cadence_does_not_fire() {
        let mut d = BurstDetector::new();
        let mut ts = 0u64;
        for _ in 0..50 {
            ts += 20_000_000;
            d.update(0.0, ts);
        }
        ts += 1_000_000_000;
        let score = d.update(0.0, ts);
        assert_eq!(score, 0.0);
    }
}
