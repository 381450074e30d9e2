//! Detector 7 — Drift: ADWIN + Page-Hinkley (§4.1.7).
//!
//! Two independent concept-drift tests over the same value series, combined
//! by taking the stronger alarm:
//!
//! - **ADWIN** (Bifet & Gavaldà, 2007), implemented as a bounded exponential
//!   histogram of buckets (at most `MAX_BUCKETS_PER_LEVEL + 1` buckets per
//!   capacity level before the two oldest merge), so the window never grows
//!   unbounded and a cut-point scan only ever touches `O(log n)` buckets.
//!   A Hoeffding-bound test at each bucket boundary decides whether the
//!   window has a genuine mean shift; on a positive test the older buckets
//!   are dropped.
//! - **Page-Hinkley**, a cumulative-sum test against a slowly-adapting mean,
//!   catching small sustained shifts ADWIN's bucket granularity might miss.

use crate::util::{clamp01, sanitize};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

const MAX_BUCKETS_PER_LEVEL: usize = 2;
const MAX_TOTAL_BUCKETS: usize = 32;
const ADWIN_DELTA: f64 = 0.002;
const PH_MEAN_ALPHA: f64 = 0.01;
const PH_DELTA: f64 = 0.005;
const PH_LAMBDA: f64 = 10.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Bucket {
    level: u32,
    sum: f64,
    count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftDetector {
    buckets: VecDeque<Bucket>,
    total_sum: f64,
    total_count: u64,
    ph_mean: f64,
    ph_cumulative: f64,
    ph_min: f64,
    ph_initialized: bool,
}

impl DriftDetector {
    pub fn new() -> Self {
        Self {
            buckets: VecDeque::new(),
            total_sum: 0.0,
            total_count: 0,
            ph_mean: 0.0,
            ph_cumulative: 0.0,
            ph_min: 0.0,
            ph_initialized: false,
        }
    }

    pub fn update(&mut self, value: f64, _timestamp_ns: u64) -> f64 {
        if !value.is_finite() {
            return 0.0;
        }
        let adwin_score = self.adwin_update(value);
        let ph_score = self.page_hinkley_update(value);
        adwin_score.max(ph_score)
    }

    fn adwin_update(&mut self, value: f64) -> f64 {
        self.buckets.push_back(Bucket {
            level: 0,
            sum: value,
            count: 1,
        });
        self.total_sum += value;
        self.total_count += 1;
        self.compress();

        let eps = self.check_cut();
        if eps > 0.0 {
            clamp01(sanitize(eps))
        } else {
            0.0
        }
    }

    /// Merge buckets bottom-up whenever a capacity level holds more than
    /// `MAX_BUCKETS_PER_LEVEL` entries, keeping the total bucket count
    /// (and therefore per-update cost) logarithmic in the window size.
    fn compress(&mut self) {
        let mut level = 0u32;
        loop {
            let count_at_level = self.buckets.iter().filter(|b| b.level == level).count();
            if count_at_level <= MAX_BUCKETS_PER_LEVEL {
                if self.buckets.len() > MAX_TOTAL_BUCKETS {
                    level += 1;
                    continue;
                }
                break;
            }
            // Find the two oldest buckets at this level and merge them.
            let idx0 = self.buckets.iter().position(|b| b.level == level);
            let Some(idx0) = idx0 else { break };
            let idx1 = self.buckets
                .iter()
                .enumerate()
                .skip(idx0 + 1)
                .find(|(_, b)| b.level == level)
                .map(|(i, _)| i);
            let Some(idx1) = idx1 else { break };

            let b1 = self.buckets.remove(idx1).unwrap();
            let b0 = self.buckets.remove(idx0).unwrap();
            let merged = Bucket {
                level: level + 1,
                sum: b0.sum + b1.sum,
                count: b0.count + b1.count,
            };
            self.buckets.insert(idx0, merged);
            level += 1;
        }
    }

    /// Scan bucket boundaries (oldest-first cumulative split) for a
    /// statistically significant mean difference; returns the normalized
    /// alarm magnitude of the strongest cut found, or `0.0` if none.
    fn check_cut(&mut self) -> f64 {
        if self.buckets.len() < 2 {
            return 0.0;
        }
        let n_total = self.total_count as f64;
        let mut cut_sum = 0.0;
        let mut cut_count = 0u64;
        let mut best = 0.0;
        let mut cut_at: Option<usize> = None;

        for (i, bucket) in self.buckets.iter().enumerate() {
            cut_sum += bucket.sum;
            cut_count += bucket.count;
            if cut_count == 0 || self.total_count - cut_count == 0 {
                continue;
            }
            let n0 = cut_count as f64;
            let n1 = n_total - n0;
            let mean0 = cut_sum / n0;
            let mean1 = (self.total_sum - cut_sum) / n1;
            let m = 1.0 / (1.0 / n0 + 1.0 / n1);
            let eps_cut = ((1.0 / (2.0 * m)) * (4.0 * n_total / ADWIN_DELTA).ln()).sqrt();
            let diff = (mean0 - mean1).abs();
            if diff > eps_cut && eps_cut > 0.0 {
                let magnitude = diff / eps_cut - 1.0;
                if magnitude > best {
                    best = magnitude;
                    cut_at = Some(i);
                }
            }
        }

        if let Some(cut_idx) = cut_at {
            for _ in 0..=cut_idx {
                if let Some(b) = self.buckets.pop_front() {
                    self.total_sum -= b.sum;
                    self.total_count -= b.count;
                }
            }
        }
        best
    }

    fn page_hinkley_update(&mut self, value: f64) -> f64 {
        if !self.ph_initialized {
            self.ph_mean = value;
            self.ph_initialized = true;
            return 0.0;
        }
        self.ph_cumulative += value - self.ph_mean - PH_DELTA;
        self.ph_mean = PH_MEAN_ALPHA * value + (1.0 - PH_MEAN_ALPHA) * self.ph_mean;
        self.ph_min = self.ph_min.min(self.ph_cumulative);
        let ph_stat = self.ph_cumulative - self.ph_min;

        if ph_stat > PH_LAMBDA {
            // Reset after a confirmed alarm so the statistic can detect the
            // next shift rather than saturating.
            self.ph_cumulative = 0.0;
            self.ph_min = 0.0;
        }
        clamp01(sanitize(ph_stat / PH_LAMBDA))
    }
}

impl Default for DriftDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stable_series_scores_low() {
        let mut d = DriftDetector::new();
        let mut score = 1.0;
        for i in 0..300u64 {
            score = d.update(1.0 + ((i % 2) as f64) * 0.01, i);
        }
        assert!(score < 0.3, "stable score was {score}");
    }

    #[test]
    fn test_sustained_shift_fires() {
        let mut d = DriftDetector::new();
        for i in 0..300u64 {
            d.update(1.0, i);
        }
        let mut score = 0.0;
        for i in 0..300u64 {
            score = d.update(20.0, 300 + i);
        }
        assert!(score > 0.0, "shift score was {score}");
    }

    #[test]
    fn test_never_nan() {
        let mut d = DriftDetector::new();
        assert!(d.update(f64::NAN, 0).is_finite());
    }
}
