//! P² quantile estimator (Jain & Chlamtac, 1985).
//!
//! Five markers track an online estimate of a single quantile in O(1) time
//! and O(1) space (5 `f64` heights + 5 `f64`/positions), so no detector
//! needs to retain a sorted history. Used across the ensemble's adaptive
//! threshold and several detectors' variance/percentile needs (§4.1,
//! §4.3).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct P2Quantile {
    p: f64,
    /// Marker heights.
    q: [f64; 5],
    /// Actual marker positions.
    n: [f64; 5],
    /// Desired marker positions.
    np: [f64; 5],
    /// Desired position increments.
    dn: [f64; 5],
    count: u64,
    /// Buffer of the first 5 observations, sorted once filled.
    init_buf: Vec<f64>,
}

impl P2Quantile {
    /// `p` is the target quantile in (0, 1), e.g. 0.95 for P95.
    pub fn new(p: f64) -> Self {
        assert!(p > 0.0 && p < 1.0);
        Self {
            p,
            q: [0.0; 5],
            n: [1.0, 2.0, 3.0, 4.0, 5.0],
            np: [1.0, 1.0 + 2.0 * p, 1.0 + 4.0 * p, 3.0 + 2.0 * p, 5.0],
            dn: [0.0, p / 2.0, p, (1.0 + p) / 2.0, 1.0],
            count: 0,
            init_buf: Vec::with_capacity(5),
        }
    }

    pub fn update(&mut self, x: f64) {
        if !x.is_finite() {
            return;
        }
        self.count += 1;

        if self.init_buf.len() < 5 {
            self.init_buf.push(x);
            if self.init_buf.len() == 5 {
                self.init_buf
                    .sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                for i in 0..5 {
                    self.q[i] = self.init_buf[i];
                }
            }
            return;
        }

        // Find cell k such that q[k] <= x < q[k+1], clamp at the ends.
        let k = if x < self.q[0] {
            self.q[0] = x;
            0
        } else if x >= self.q[4] {
            self.q[4] = x;
            3
        } else {
            let mut k = 0;
            for i in 0..4 {
                if self.q[i] <= x && x < self.q[i + 1] {
                    k = i;
                    break;
                }
            }
            k
        };

        for i in (k + 1)..5 {
            self.n[i] += 1.0;
        }
        for i in 0..5 {
            self.np[i] += self.dn[i];
        }

        for i in 1..4 {
            let d = self.np[i] - self.n[i];
            if (d >= 1.0 && self.n[i + 1] - self.n[i] > 1.0)
                || (d <= -1.0 && self.n[i - 1] - self.n[i] < -1.0)
            {
                let d = if d >= 0.0 { 1.0 } else { -1.0 };
                let qp = self.parabolic(i, d);
                if self.q[i - 1] < qp && qp < self.q[i + 1] {
                    self.q[i] = qp;
                } else {
                    self.q[i] = self.linear(i, d);
                }
                self.n[i] += d;
            }
        }
    }

    fn parabolic(&self, i: usize, d: f64) -> f64 {
        let (qi, qim1, qip1) = (self.q[i], self.q[i - 1], self.q[i + 1]);
        let (ni, nim1, nip1) = (self.n[i], self.n[i - 1], self.n[i + 1]);
        qi + d / (nip1 - nim1)
            * ((ni - nim1 + d) * (qip1 - qi) / (nip1 - ni)
                + (nip1 - ni - d) * (qi - qim1) / (ni - nim1))
    }

    fn linear(&self, i: usize, d: f64) -> f64 {
        let idx = (i as isize + d as isize) as usize;
        self.q[i] + d * (self.q[idx] - self.q[i]) / (self.n[idx] - self.n[i])
    }

    /// Current quantile estimate. Before 5 samples, falls back to the
    /// running maximum observed so far (a conservative, safe default — see
    /// §9 "Open question — P² on adversarial streams").
    pub fn value(&self) -> f64 {
        if self.init_buf.len() < 5 {
            return self.init_buf.iter().cloned().fold(0.0, f64::max);
        }
        self.q[2]
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn target_quantile(&self) -> f64 {
        self.p
    }
}

/// Online standard-deviation estimate built from two P² quantile trackers
/// at the ±1σ points of a normal distribution (0.8413 and 0.1587): for a
/// normal distribution, `(q84 - q16) / 2 ≈ σ`. This keeps the "P² for
/// percentile and variance" requirement of §4.1 satisfied with a
/// single shared primitive rather than a separate Welford accumulator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct P2StdDev {
    upper: P2Quantile,
    lower: P2Quantile,
}

impl P2StdDev {
    pub fn new() -> Self {
        Self {
            upper: P2Quantile::new(0.8413),
            lower: P2Quantile::new(0.1587),
        }
    }

    pub fn update(&mut self, x: f64) {
        if !x.is_finite() {
            return;
        }
        self.upper.update(x);
        self.lower.update(x);
    }

    pub fn stddev(&self) -> f64 {
        ((self.upper.value() - self.lower.value()) / 2.0).max(0.0)
    }
}

impl Default for P2StdDev {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median_converges() {
        let mut p2 = P2Quantile::new(0.5);
        for i in 1..=1001u64 {
            p2.update(i as f64);
        }
        let median = p2.value();
        assert!((median - 500.0).abs() < 50.0, "median was {}", median);
    }

    #[test]
    fn test_p95_converges_uniform() {
        let mut p2 = P2Quantile::new(0.95);
        for i in 0..10_000u64 {
            p2.update((i % 1000) as f64);
        }
        let p95 = p2.value();
        assert!((p95 - 950.0).abs() < 100.0, "p95 was {}", p95);
    }

    #[test]
    fn test_stddev_converges_on_constant_stream() {
        let mut sd = P2StdDev::new();
        for _ in 0..100 {
            sd.update(1.0);
        }
        assert!(sd.stddev() < 0.5, "stddev was {}", sd.stddev());
    }

    #[test]
    fn test_update_ignores_non_finite() {
        let mut p2 = P2Quantile::new(0.5);
        p2.update(f64::NAN);
        p2.update(f64::INFINITY);
        assert_eq!(p2.count(), 0);
    }
}
