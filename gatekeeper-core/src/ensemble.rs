//! Ensemble & Decision (§4.3).
//!
//! Combines per-detector scores into `(ensemble_score, confidence)`, tracks
//! an adaptive P² threshold on the ensemble score's 95th percentile, and
//! learns detector weights from feedback via Thompson-sampling over a
//! per-detector Beta(α,β) bandit arm.

use crate::config::{EnsembleConfig, WEIGHT_FLOOR};
use crate::detectors::{DetectorId, DetectorScores, D};
use crate::feedback::FeedbackEvent;
use crate::p2::P2Quantile;
use crate::util::{clamp01, sanitize};
use serde::{Deserialize, Serialize};

/// Result of combining one event's detector scores.
#[derive(Debug, Clone, Copy)]
pub struct CombineResult {
    pub ensemble_score: f64,
    pub confidence: f64,
    pub primary: DetectorId,
    pub secondary: Option<DetectorId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleState {
    weights: [f64; D],
    alpha: [f64; D],
    beta: [f64; D],
    sample_count: u64,
    adaptive_threshold: P2Quantile,
    /// Consecutive `combine()` calls whose adaptive threshold value moved
    /// by less than `PLATEAU_EPS`; §9 "Open question — P² on
    /// adversarial streams" calls for falling back to a fixed floor once
    /// this plateaus.
    plateau_count: u32,
    last_threshold_value: f64,
}

const PLATEAU_EPS: f64 = 1e-6;

impl EnsembleState {
    pub fn new() -> Self {
        Self {
            weights: [1.0; D],
            alpha: [1.0; D],
            beta: [1.0; D],
            sample_count: 0,
            adaptive_threshold: P2Quantile::new(0.95),
            plateau_count: 0,
            last_threshold_value: 0.0,
        }
    }

    pub fn weights(&self) -> &[f64; D] {
        &self.weights
    }

    /// Current adaptive threshold, or `None` if too few samples or the
    /// estimator has plateaued (§9 safety net).
    fn adaptive_threshold_value(&self, config: &EnsembleConfig) -> Option<f64> {
        if self.adaptive_threshold.count() < 30 {
            return None;
        }
        if self.plateau_count >= config.plateau_limit {
            return None;
        }
        let v = self.adaptive_threshold.value();
        if v.is_finite() {
            Some(v)
        } else {
            None
        }
    }

    /// Combines detector scores into an ensemble score and confidence, and
    /// records the result into the adaptive threshold estimator. Pure
    /// function of `scores` and current state — no hidden global state, as
    /// required for deterministic replay (§4.4).
    pub fn combine(&mut self, scores: &DetectorScores) -> CombineResult {
        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;
        let mut contributions = [0.0f64; D];
        for i in 0..D {
            let contribution = self.weights[i] * sanitize(scores[i]);
            contributions[i] = contribution;
            weighted_sum += contribution;
            weight_total += self.weights[i];
        }
        weight_total = weight_total.max(WEIGHT_FLOOR);
        let ensemble_score = clamp01(weighted_sum / weight_total);

        let confidence = if ensemble_score > 1e-9 {
            let entropy = shannon_entropy(&contributions, ensemble_score * weight_total);
            let max_entropy = (D as f64).ln().max(1e-9);
            clamp01(1.0 - entropy / max_entropy)
        } else {
            0.0
        };

        let (primary_idx, secondary_idx) = top_two(&contributions);
        let primary = DetectorId::from_index(primary_idx).unwrap_or(DetectorId::Volume);
        let secondary = secondary_idx.and_then(DetectorId::from_index);

        self.adaptive_threshold.update(ensemble_score);
        let new_threshold_value = self.adaptive_threshold.value();
        if (new_threshold_value - self.last_threshold_value).abs() < PLATEAU_EPS {
            self.plateau_count = self.plateau_count.saturating_add(1);
        } else {
            self.plateau_count = 0;
        }
        self.last_threshold_value = new_threshold_value;
        self.sample_count += 1;

        CombineResult {
            ensemble_score,
            confidence,
            primary,
            secondary,
        }
    }

    /// True iff the event should be treated as anomalous per §4.3's
    /// conjunction of thresholds. `warmup` must already reflect
    /// `event_count >= warmup_n`.
    pub fn is_anomalous(
        &self,
        scores: &DetectorScores,
        combined: &CombineResult,
        warmup_complete: bool,
        config: &EnsembleConfig,
    ) -> bool {
        if !warmup_complete {
            return false;
        }
        let any_detector_fired = scores
            .iter()
            .any(|&s| s >= config.min_detector_score_for_anomaly);
        if !any_detector_fired {
            return false;
        }
        if combined.ensemble_score < config.min_ensemble_score_for_anomaly {
            return false;
        }
        if config.use_adaptive_ensemble_threshold {
            let threshold = self
                .adaptive_threshold_value(config)
                .unwrap_or(config.fixed_sensitivity_floor);
            if combined.ensemble_score < threshold {
                return false;
            }
        }
        combined.confidence >= config.confidence_threshold
    }

    /// Applies a policy-driven `adjust_prior` delta to one detector's
    /// bandit arm (§4.4 "adjust_prior: apply detector_priors deltas to
    /// local α/β (clipped) before next event"). Clipped to stay positive so
    /// the Beta posterior remains well-defined.
    pub fn apply_prior_delta(&mut self, detector: DetectorId, alpha_delta: f64, beta_delta: f64) {
        let i = detector.index();
        self.alpha[i] = (self.alpha[i] + sanitize(alpha_delta)).max(1e-6);
        self.beta[i] = (self.beta[i] + sanitize(beta_delta)).max(1e-6);
        let w = self.alpha[i] / (self.alpha[i] + self.beta[i]).max(1e-12);
        self.weights[i] = w.clamp(WEIGHT_FLOOR, 1.0);
    }

    /// Thompson-sampling bandit update (§4.3 "Weight learning"). Only
    /// detectors that actually fired at the scored event (per the same
    /// `detector_fire_threshold` used to build `AnomalySignal.fired_mask`)
    /// receive credit or blame; a detector that stayed quiet had no say in
    /// the original decision.
    pub fn apply_feedback(&mut self, event: &FeedbackEvent, fire_threshold: f64) {
        for i in 0..D {
            let score = sanitize(event.detector_scores_at_event[i]);
            if score < fire_threshold {
                continue;
            }
            let delta = clamp01(event.confidence) * score;
            if event.was_true_positive {
                self.alpha[i] += delta;
            } else {
                self.beta[i] += delta;
            }
            let w = self.alpha[i] / (self.alpha[i] + self.beta[i]).max(1e-12);
            self.weights[i] = w.clamp(WEIGHT_FLOOR, 1.0);
        }
    }
}

impl Default for EnsembleState {
    fn default() -> Self {
        Self::new()
    }
}

/// Shannon entropy (nats) of `contributions / total`, treating zero-mass
/// entries as contributing zero (standard `0 log 0 := 0` convention).
fn shannon_entropy(contributions: &[f64; D], total: f64) -> f64 {
    if total <= 1e-12 {
        return 0.0;
    }
    let mut h = 0.0;
    for &c in contributions {
        if c <= 0.0 {
            continue;
        }
        let p = c / total;
        if p > 0.0 {
            h -= p * p.ln();
        }
    }
    h.max(0.0)
}

/// Indices of the largest and second-largest contributions.
fn top_two(contributions: &[f64; D]) -> (usize, Option<usize>) {
    let mut best = 0usize;
    let mut second: Option<usize> = None;
    for i in 1..D {
        if contributions[i] > contributions[best] {
            second = Some(best);
            best = i;
        } else if second.is_none() || contributions[i] > contributions[second.unwrap()] {
            second = Some(i);
        }
    }
    (best, second.filter(|&s| s != best))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::{LabelClass, ReviewSource};

    fn scores_with(idx: usize, value: f64) -> DetectorScores {
        let mut s = [0.0; D];
        s[idx] = value;
        s
    }

    #[test]
    fn test_combine_bounds() {
        let mut e = EnsembleState::new();
        for _ in 0..100 {
            let r = e.combine(&scores_with(DetectorId::Burst.index(), 0.7));
            assert!((0.0..=1.0).contains(&r.ensemble_score));
            assert!((0.0..=1.0).contains(&r.confidence));
        }
    }

    #[test]
    fn test_single_dominant_detector_high_confidence() {
        let mut e = EnsembleState::new();
        let r = e.combine(&scores_with(DetectorId::Burst.index(), 0.9));
        assert!(r.confidence > 0.8, "confidence was {}", r.confidence);
        assert_eq!(r.primary, DetectorId::Burst);
    }

    #[test]
    fn test_feedback_raises_true_positive_weight() {
        let mut e = EnsembleState::new();
        let w0 = e.weights()[DetectorId::Burst.index()];
        let fb = FeedbackEvent {
            entity_hash: 1,
            was_true_positive: true,
            confidence: 1.0,
            label_class: LabelClass::AttackKnown,
            detector_scores_at_event: scores_with(DetectorId::Burst.index(), 0.9),
            pattern_id: None,
            review_source: ReviewSource::Human,
            feedback_latency_ms: 0,
        };
        for _ in 0..20 {
            e.apply_feedback(&fb, 0.30);
        }
        assert!(e.weights()[DetectorId::Burst.index()] > w0);
    }

    #[test]
    fn test_weight_never_below_floor() {
        let mut e = EnsembleState::new();
        let fb = FeedbackEvent {
            entity_hash: 1,
            was_true_positive: false,
            confidence: 1.0,
            label_class: LabelClass::BenignKnown,
            detector_scores_at_event: scores_with(DetectorId::Spectral.index(), 0.95),
            pattern_id: None,
            review_source: ReviewSource::Auto,
            feedback_latency_ms: 0,
        };
        for _ in 0..100_000 {
            e.apply_feedback(&fb, 0.30);
        }
        for &w in e.weights() {
            assert!(w >= WEIGHT_FLOOR);
        }
    }

    #[test]
    fn test_apply_prior_delta_raises_weight() {
        let mut e = EnsembleState::new();
        let w0 = e.weights()[DetectorId::Spectral.index()];
        e.apply_prior_delta(DetectorId::Spectral, 5.0, 0.0);
        assert!(e.weights()[DetectorId::Spectral.index()] > w0);
    }

    #[test]
    fn test_apply_prior_delta_clips_at_floor() {
        let mut e = EnsembleState::new();
        e.apply_prior_delta(DetectorId::Volume, -1e9, 1e9);
        assert!(e.weights()[DetectorId::Volume.index()] >= WEIGHT_FLOOR);
    }

    #[test]
    fn test_warmup_suppresses_anomaly() {
        let mut e = EnsembleState::new();
        let config = EnsembleConfig::default();
        let scores = scores_with(DetectorId::Burst.index(), 1.0);
        let combined = e.combine(&scores);
        assert!(!e.is_anomalous(&scores, &combined, false, &config));
    }
}
