//! Detector 8 — Multi-Scale Temporal (§4.1.8).
//!
//! Three independent continuous-time EWMAs of `value` at 1s/60s/3600s time
//! constants. Each scale tracks its own mean and variance; the detector
//! score is the max over scales of the per-scale z-score squashed through
//! `σ(z/k)`, so a short sharp spike and a slow-burning hour-scale drift are
//! both caught by whichever scale actually resolves them.

use crate::util::squash_z;
use serde::{Deserialize, Serialize};

const SCALE_TAUS_NS: [f64; 3] = [
    1.0 * 1_000_000_000.0,
    60.0 * 1_000_000_000.0,
    3_600.0 * 1_000_000_000.0,
];
const SQUASH_K: f64 = 3.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ScaleTracker {
    tau_ns: f64,
    mean: f64,
    variance: f64,
    last_ts_ns: Option<u64>,
    initialized: bool,
}

impl ScaleTracker {
    fn new(tau_ns: f64) -> Self {
        Self {
            tau_ns,
            mean: 0.0,
            variance: 0.0,
            last_ts_ns: None,
            initialized: false,
        }
    }

    fn update(&mut self, value: f64, timestamp_ns: u64) -> f64 {
        let alpha = match self.last_ts_ns {
            Some(prev) if timestamp_ns > prev => {
                let dt = (timestamp_ns - prev) as f64;
                1.0 - (-dt / self.tau_ns).exp()
            }
            Some(_) => 0.0,
            None => 1.0,
        };
        self.last_ts_ns = Some(timestamp_ns);

        if !self.initialized {
            self.mean = value;
            self.variance = 0.0;
            self.initialized = true;
            return 0.0;
        }

        let deviation = value - self.mean;
        self.mean += alpha * deviation;
        self.variance = (1.0 - alpha) * (self.variance + alpha * deviation * deviation);

        let sigma = self.variance.sqrt().max(1e-9);
        squash_z(deviation / sigma, SQUASH_K)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiScaleDetector {
    scales: [ScaleTracker; 3],
}

impl MultiScaleDetector {
    pub fn new() -> Self {
        Self {
            scales: SCALE_TAUS_NS.map(ScaleTracker::new),
        }
    }

    pub fn update(&mut self, value: f64, timestamp_ns: u64) -> f64 {
        if !value.is_finite() {
            return 0.0;
        }
        self.scales
            .iter_mut()
            .map(|s| s.update(value, timestamp_ns))
            .fold(0.0, f64::max)
    }
}

impl Default for MultiScaleDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steady_value_scores_low() {
        let mut d = MultiScaleDetector::new();
        let mut score = 1.0;
        for i in 0..500u64 {
            score = d.update(1.0, i * 500_000_000);
        }
        assert!(score < 0.3, "steady score was {score}");
    }

    #[test]
    fn test_spike_raises_score() {
        let mut d = MultiScaleDetector::new();
        for i in 0..500u64 {
            d.update(1.0, i * 500_000_000);
        }
        let score = d.update(1_000.0, 500 * 500_000_000 + 500_000_000);
        assert!(score > 0.3, "spike score was {score}");
    }

    #[test]
    fn test_never_nan() {
        let mut d = MultiScaleDetector::new();
        assert!(d.update(f64::NAN, 0).is_finite());
    }
}
