//! Detector 1 — Volume / Holt-Winters (§4.1.1).
//!
//! Triple exponential smoothing over the instantaneous event rate
//! (`1 / inter-arrival-time`). Score is the normalized absolute deviation of
//! the observed rate from the one-step-ahead seasonal forecast, divided by a
//! P²-estimated standard deviation of that deviation.

use crate::p2::P2StdDev;
use crate::util::{clamp01, sanitize};
use serde::{Deserialize, Serialize};

const DEFAULT_SEASONAL_PERIOD: usize = 8;
const DEFAULT_ALPHA: f64 = 0.3;
const DEFAULT_BETA: f64 = 0.1;
const DEFAULT_GAMMA: f64 = 0.1;
const MIN_IAT_NS: f64 = 1.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeDetector {
    alpha: f64,
    beta: f64,
    gamma: f64,
    period: usize,
    level: f64,
    trend: f64,
    season: Vec<f64>,
    season_idx: usize,
    initialized: bool,
    last_ts_ns: Option<u64>,
    error_stddev: P2StdDev,
}

impl VolumeDetector {
    pub fn new() -> Self {
        Self::with_params(DEFAULT_ALPHA, DEFAULT_BETA, DEFAULT_GAMMA, DEFAULT_SEASONAL_PERIOD)
    }

    pub fn with_params(alpha: f64, beta: f64, gamma: f64, period: usize) -> Self {
        let period = period.max(2);
        Self {
            alpha,
            beta,
            gamma,
            period,
            level: 0.0,
            trend: 0.0,
            season: vec![0.0; period],
            season_idx: 0,
            initialized: false,
            last_ts_ns: None,
            error_stddev: P2StdDev::new(),
        }
    }

    /// `update(value, timestamp)` per the `Detector` shape; `value` is
    /// unused by this detector (the rate is derived from arrival cadence,
    /// not from the event payload), but is kept for a uniform call site on
    /// `Profile::update`.
    pub fn update(&mut self, _value: f64, timestamp_ns: u64) -> f64 {
        let rate = match self.last_ts_ns {
            Some(prev) if timestamp_ns > prev => {
                let iat_ns = (timestamp_ns - prev) as f64;
                1.0 / iat_ns.max(MIN_IAT_NS)
            }
            _ => 0.0,
        };
        self.last_ts_ns = Some(timestamp_ns);

        if !rate.is_finite() {
            return 0.0;
        }

        if !self.initialized {
            self.level = rate;
            self.season[self.season_idx] = 0.0;
            self.season_idx = (self.season_idx + 1) % self.period;
            self.initialized = true;
            return 0.0;
        }

        let season_component = self.season[self.season_idx];
        let forecast = self.level + self.trend + season_component;

        let prev_level = self.level;
        self.level = self.alpha * (rate - season_component) + (1.0 - self.alpha) * (prev_level + self.trend);
        self.trend = self.beta * (self.level - prev_level) + (1.0 - self.beta) * self.trend;
        self.season[self.season_idx] = self.gamma * (rate - self.level) + (1.0 - self.gamma) * season_component;
        self.season_idx = (self.season_idx + 1) % self.period;

        let deviation = rate - forecast;
        self.error_stddev.update(deviation);
        let sigma = self.error_stddev.stddev().max(1e-9);

        clamp01(sanitize((deviation.abs() / sigma) / 3.0))
    }
}

impl Default for VolumeDetector {
    fn default() -> Self {
        Self::new()
    }
}
