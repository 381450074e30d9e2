//! Detector 9 — Behavioral Fingerprint (§4.1.9).
//!
//! Builds a per-entity profile of "normal" hour-of-day and
//! service-of-origin behavior, then scores each new observation by how
//! surprising it is under that profile (`-ln p(observed)`, the single-event
//! form of KL divergence against a one-hot observation), clipped to
//! `[0,1]`.
//!
//! The event data model (§3) carries only `{entity_id, value,
//! timestamp_ns}` — no explicit service-of-origin field — so this
//! implementation derives the "service" bucket from a coarse quantization
//! of `value` (a stand-in for whatever categorical origin a richer upstream
//! event would carry).

use crate::util::clamp01;
use gatekeeper_storage::CountMinSketch;
use serde::{Deserialize, Serialize};

const HOUR_BINS: usize = 24;
const NS_PER_HOUR: u64 = 3_600 * 1_000_000_000;
const SURPRISE_NORMALIZER: f64 = 5.0;
const CMS_DECAY_EVERY: u64 = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FingerprintDetector {
    hour_counts: [u64; HOUR_BINS],
    hour_total: u64,
    service_cms: CountMinSketch,
    service_total: u64,
    events_since_decay: u64,
}

impl FingerprintDetector {
    pub fn new() -> Self {
        Self {
            hour_counts: [0; HOUR_BINS],
            hour_total: 0,
            service_cms: CountMinSketch::small(),
            service_total: 0,
            events_since_decay: 0,
        }
    }

    fn hour_of(timestamp_ns: u64) -> usize {
        ((timestamp_ns / NS_PER_HOUR) % HOUR_BINS as u64) as usize
    }

    /// Coarse quantization standing in for "service of origin" (see module
    /// docs); stable and cheap, bucketed into 256 values via the value's
    /// bit pattern so both exact repeats and nearby values separate sanely.
    fn service_bucket_of(value: f64) -> u64 {
        if !value.is_finite() {
            return 0;
        }
        (value.to_bits() >> 44) & 0xFF
    }

    pub fn update(&mut self, value: f64, timestamp_ns: u64) -> f64 {
        let hour = Self::hour_of(timestamp_ns);
        let service_bucket = Self::service_bucket_of(value);

        let hour_score = self.surprise_score(
            self.hour_counts[hour] as f64,
            self.hour_total as f64,
            HOUR_BINS as f64,
        );
        let service_freq = self.service_cms.estimate(service_bucket) as f64;
        let service_score =
            self.surprise_score(service_freq, self.service_total as f64, 256.0);

        self.hour_counts[hour] += 1;
        self.hour_total += 1;
        self.service_cms.increment(service_bucket);
        self.service_total += 1;

        self.events_since_decay += 1;
        if self.events_since_decay >= CMS_DECAY_EVERY {
            self.service_cms.decay();
            self.service_total /= 2;
            self.events_since_decay = 0;
        }

        hour_score.max(service_score)
    }

    /// `-ln(p)` of the observed bucket under a Laplace-smoothed profile,
    /// normalized to `[0,1]`. `alphabet_size` sets the smoothing prior so a
    /// cold profile (no observations yet) scores 0 rather than spuriously
    /// high.
    fn surprise_score(&self, bucket_count: f64, total: f64, alphabet_size: f64) -> f64 {
        if total < alphabet_size {
            // Not enough history to judge what's "normal" yet.
            return 0.0;
        }
        let p = (bucket_count + 1.0) / (total + alphabet_size);
        let surprise = -(p.max(1e-12).ln());
        clamp01(surprise / SURPRISE_NORMALIZER)
    }

    /// Resets the learned profile; called when feedback classifies an
    /// event as `attack_known` (§4.2: "resetting behavioral
    /// fingerprint if label_class=attack_known").
    pub fn reset_profile(&mut self) {
        self.hour_counts = [0; HOUR_BINS];
        self.hour_total = 0;
        self.service_cms.reset();
        self.service_total = 0;
        self.events_since_decay = 0;
    }
}

impl Default for FingerprintDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cold_start_scores_zero() {
        let mut d = FingerprintDetector::new();
        let score = d.update(1.0, 0);
        assert_eq!(score, 0.0);
    }

    #[test]
    fn test_consistent_pattern_scores_low() {
        let mut d = FingerprintDetector::new();
        let mut score = 0.0;
        for i in 0..2000u64 {
            // Always hour 9, always the same value.
            let ts = (i / 10) * 24 * NS_PER_HOUR + 9 * NS_PER_HOUR;
            score = d.update(1.0, ts);
        }
        assert!(score < 0.5, "consistent-pattern score was {score}");
    }

    #[test]
    fn test_reset_clears_profile() {
        let mut d = FingerprintDetector::new();
        for i in 0..2000u64 {
            d.update(1.0, i * NS_PER_HOUR);
        }
        d.reset_profile();
        assert_eq!(d.hour_total, 0);
    }

    #[test]
    fn test_never_nan() {
        let mut d = FingerprintDetector::new();
        assert!(d.update(f64::NAN, 0).is_finite());
    }
}
