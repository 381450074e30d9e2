//! Detector 6 — Change-Point / Enhanced CUSUM (§4.1.6).
//!
//! Two-sided tabular CUSUM with slack `k` and decision threshold `H`, Fast
//! Initial Response enabled (each statistic restarts at `H/2` rather than 0
//! after an alarm, so a second shift right after the first is caught
//! quickly instead of waiting through a full ramp-up). Score is the
//! alarm magnitude normalized by `H`.

use crate::p2::P2StdDev;
use crate::util::{clamp01, sanitize};
use serde::{Deserialize, Serialize};

const DEFAULT_MEAN_ALPHA: f64 = 0.05;
const DEFAULT_SLACK_SIGMAS: f64 = 0.5;
const DEFAULT_THRESHOLD_SIGMAS: f64 = 5.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangePointDetector {
    mean_alpha: f64,
    slack_sigmas: f64,
    threshold_sigmas: f64,
    mean: f64,
    stddev: P2StdDev,
    sh: f64,
    sl: f64,
    initialized: bool,
}

impl ChangePointDetector {
    pub fn new() -> Self {
        Self::with_params(DEFAULT_MEAN_ALPHA, DEFAULT_SLACK_SIGMAS, DEFAULT_THRESHOLD_SIGMAS)
    }

    pub fn with_params(mean_alpha: f64, slack_sigmas: f64, threshold_sigmas: f64) -> Self {
        Self {
            mean_alpha,
            slack_sigmas,
            threshold_sigmas,
            mean: 0.0,
            stddev: P2StdDev::new(),
            sh: 0.0,
            sl: 0.0,
            initialized: false,
        }
    }

    pub fn update(&mut self, value: f64, _timestamp_ns: u64) -> f64 {
        if !value.is_finite() {
            return 0.0;
        }
        self.stddev.update(value);
        if !self.initialized {
            self.mean = value;
            self.initialized = true;
            return 0.0;
        }

        let sigma = self.stddev.stddev().max(1e-9);
        let k = self.slack_sigmas * sigma;
        let h = (self.threshold_sigmas * sigma).max(1e-9);

        let deviation = value - self.mean;
        self.sh = (self.sh + deviation - k).max(0.0);
        self.sl = (self.sl - deviation - k).max(0.0);
        self.mean = self.mean_alpha * value + (1.0 - self.mean_alpha) * self.mean;

        // Fast Initial Response: once either statistic alarms, the next
        // cycle starts from H/2 instead of 0.
        let alarm = self.sh.max(self.sl);
        let score = clamp01(sanitize(alarm / h));
        if alarm >= h {
            self.sh = if self.sh >= h { h / 2.0 } else { self.sh };
            self.sl = if self.sl >= h { h / 2.0 } else { self.sl };
        }
        score
    }
}

impl Default for ChangePointDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stable_signal_scores_zero() {
        let mut d = ChangePointDetector::new();
        let mut score = 1.0;
        for i in 0..100u64 {
            score = d.update(10.0 + (i % 2) as f64 * 0.01, i);
        }
        assert_eq!(score, 0.0);
    }

    #[test]
    fn test_step_change_fires() {
        let mut d = ChangePointDetector::new();
        for i in 0..100u64 {
            d.update(10.0 + (i % 2) as f64 * 0.01, i);
        }
        let mut score = 0.0;
        for i in 0..50u64 {
            score = d.update(50.0, 100 + i);
        }
        assert!(score > 0.0, "step-change score was {score}");
    }

    #[test]
    fn test_never_nan() {
        let mut d = ChangePointDetector::new();
        assert!(d.update(f64::NAN, 0).is_finite());
    }
}
