//! Profile — one entity's detector states plus ensemble state (§4.2).

use crate::config::ProfileConfig;
use crate::detectors::{
    BurstDetector, CardinalityDetector, ChangePointDetector, DetectorId, DetectorScores,
    DriftDetector, FadingHistogramDetector, FingerprintDetector, MultiScaleDetector,
    RrcfDetector, SpectralDetector, VolumeDetector, D,
};
use crate::ensemble::{CombineResult, EnsembleState};
use crate::error::{CoreError, Result};
use crate::feedback::{FeedbackEvent, LabelClass};
use crate::util::sanitize;
use gatekeeper_storage::Evictable;
use serde::{Deserialize, Serialize};

/// Holds one entity's fixed set of detector states and ensemble state.
/// Mutated only by the shard worker that owns the entity's registry entry
/// (§3 "Invariants: a profile is mutated only by its owning shard
/// worker").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    entity_hash: u64,
    last_seen_ns: u64,
    event_count: u64,
    warmup_n: u64,
    priority: u8,
    /// Count of detector panics caught across this profile's lifetime
    /// (§4.6 "repeated panics flip a per-shard health flag"). Not
    /// security-critical, so it rides along in the checkpoint but old
    /// blobs without the field just deserialize to zero.
    #[serde(default)]
    detector_panics: u32,

    volume: VolumeDetector,
    distribution: FadingHistogramDetector,
    cardinality: CardinalityDetector,
    burst: BurstDetector,
    spectral: SpectralDetector,
    change_point: ChangePointDetector,
    drift: DriftDetector,
    multiscale: MultiScaleDetector,
    fingerprint: FingerprintDetector,
    rrcf: RrcfDetector,

    ensemble: EnsembleState,
}

impl Profile {
    /// `entity_hash` must be supplied at construction because the RRCF
    /// detector seeds its reservoir PRNGs from it, for deterministic replay
    /// (§9 "Open question — RRCF reservoir seed").
    pub fn new(entity_hash: u64, config: &ProfileConfig) -> Self {
        Self {
            entity_hash,
            last_seen_ns: 0,
            event_count: 0,
            warmup_n: config.warmup_n,
            priority: 0,
            detector_panics: 0,
            volume: VolumeDetector::new(),
            distribution: FadingHistogramDetector::new(),
            cardinality: CardinalityDetector::new(),
            burst: BurstDetector::new(),
            spectral: SpectralDetector::new(),
            change_point: ChangePointDetector::new(),
            drift: DriftDetector::new(),
            multiscale: MultiScaleDetector::new(),
            fingerprint: FingerprintDetector::new(),
            rrcf: RrcfDetector::new(entity_hash),
            ensemble: EnsembleState::new(),
        }
    }

    pub fn entity_hash(&self) -> u64 {
        self.entity_hash
    }

    pub fn event_count(&self) -> u64 {
        self.event_count
    }

    pub fn last_seen_ns(&self) -> u64 {
        self.last_seen_ns
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn set_priority(&mut self, priority: u8) {
        self.priority = priority;
    }

    pub fn is_warmed_up(&self) -> bool {
        self.event_count >= self.warmup_n
    }

    pub fn weights(&self) -> &[f64; D] {
        self.ensemble.weights()
    }

    pub fn detector_panics(&self) -> u32 {
        self.detector_panics
    }

    /// Runs every detector and returns the per-detector score vector.
    /// **Always** runs, regardless of warmup, policy, or decision outcome
    /// (§4.2: "State is always updated"). Each detector call is
    /// isolated behind `catch_unwind` (§4.6 "a detector that panics
    /// defensively... the shard logs and continues with scores=0 for that
    /// detector on that event"); a panic in one detector never prevents the
    /// other nine from updating.
    pub fn update(&mut self, value: f64, timestamp_ns: u64) -> DetectorScores {
        self.last_seen_ns = self.last_seen_ns.max(timestamp_ns);
        self.event_count += 1;

        let mut scores = [0.0f64; D];
        scores[DetectorId::Volume.index()] =
            self.guarded(DetectorId::Volume, |p| p.volume.update(value, timestamp_ns));
        scores[DetectorId::Distribution.index()] = self.guarded(DetectorId::Distribution, |p| {
            p.distribution.update(value, timestamp_ns)
        });
        scores[DetectorId::Cardinality.index()] = self
            .guarded(DetectorId::Cardinality, |p| p.cardinality.update(value, timestamp_ns));
        scores[DetectorId::Burst.index()] =
            self.guarded(DetectorId::Burst, |p| p.burst.update(value, timestamp_ns));
        scores[DetectorId::Spectral.index()] =
            self.guarded(DetectorId::Spectral, |p| p.spectral.update(value, timestamp_ns));
        scores[DetectorId::ChangePoint.index()] = self.guarded(DetectorId::ChangePoint, |p| {
            p.change_point.update(value, timestamp_ns)
        });
        scores[DetectorId::Drift.index()] =
            self.guarded(DetectorId::Drift, |p| p.drift.update(value, timestamp_ns));
        scores[DetectorId::MultiScale.index()] =
            self.guarded(DetectorId::MultiScale, |p| p.multiscale.update(value, timestamp_ns));
        scores[DetectorId::Fingerprint.index()] = self.guarded(DetectorId::Fingerprint, |p| {
            p.fingerprint.update(value, timestamp_ns)
        });
        scores[DetectorId::Rrcf.index()] =
            self.guarded(DetectorId::Rrcf, |p| p.rrcf.update(value, timestamp_ns));
        scores
    }

    /// Runs one detector's `update` behind `catch_unwind`, sanitizing NaN
    /// and infinities (§4.1 "Failure semantics") and substituting
    /// `0.0` plus a logged, counted panic if the call unwinds.
    fn guarded<F>(&mut self, detector: DetectorId, f: F) -> f64
    where
        F: FnOnce(&mut Self) -> f64,
    {
        match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| f(self))) {
            Ok(score) => sanitize(score),
            Err(_) => {
                self.detector_panics += 1;
                tracing::error!(
                    entity_hash = self.entity_hash,
                    detector = %detector,
                    total_panics = self.detector_panics,
                    "detector panicked; substituting score=0 for this event"
                );
                0.0
            }
        }
    }

    /// Combines the just-computed scores into an ensemble result, updating
    /// the adaptive threshold estimator in the process.
    pub fn combine(&mut self, scores: &DetectorScores) -> CombineResult {
        self.ensemble.combine(scores)
    }

    pub fn is_anomalous(
        &self,
        scores: &DetectorScores,
        combined: &CombineResult,
        config: &crate::config::EnsembleConfig,
    ) -> bool {
        self.ensemble
            .is_anomalous(scores, combined, self.is_warmed_up(), config)
    }

    /// Routes feedback to the ensemble's bandit; resets the behavioral
    /// fingerprint when the label is a confirmed attack (§4.2:
    /// "detector states themselves are not touched except for resetting
    /// behavioral fingerprint if label_class=attack_known").
    pub fn apply_feedback(&mut self, event: &FeedbackEvent, config: &crate::config::EnsembleConfig) {
        self.ensemble.apply_feedback(event, config.detector_fire_threshold);
        if event.label_class == LabelClass::AttackKnown {
            self.fingerprint.reset_profile();
        }
    }

    /// Applies a policy `adjust_prior` rule's delta to one detector's
    /// bandit arm ahead of the next event (§4.4).
    pub fn apply_prior_delta(&mut self, detector: DetectorId, alpha_delta: f64, beta_delta: f64) {
        self.ensemble.apply_prior_delta(detector, alpha_delta, beta_delta);
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(CoreError::Codec)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(CoreError::Codec)
    }
}

impl Evictable for Profile {
    fn last_seen_ns(&self) -> u64 {
        self.last_seen_ns
    }

    fn priority(&self) -> u8 {
        self.priority
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warmup_suppresses_signal() {
        let config = ProfileConfig {
            warmup_n: 10,
            ..Default::default()
        };
        let mut p = Profile::new(1, &config);
        for i in 0..9u64 {
            let scores = p.update(1.0, i * 20_000_000);
            let combined = p.combine(&scores);
            assert!(!p.is_anomalous(&scores, &combined, &config.ensemble));
        }
    }

    #[test]
    fn test_event_count_monotonic() {
        let config = ProfileConfig::default();
        let mut p = Profile::new(1, &config);
        let mut last = 0;
        for i in 0..50u64 {
            p.update(1.0, i * 1_000_000);
            assert!(p.event_count() >= last);
            last = p.event_count();
        }
    }

    #[test]
    fn test_serialize_roundtrip_preserves_event_count() {
        let config = ProfileConfig::default();
        let mut p = Profile::new(42, &config);
        for i in 0..20u64 {
            p.update(1.0, i * 1_000_000);
        }
        let bytes = p.serialize().unwrap();
        let restored = Profile::deserialize(&bytes).unwrap();
        assert_eq!(restored.event_count(), p.event_count());
        assert_eq!(restored.entity_hash(), p.entity_hash());
    }

    #[test]
    fn test_feedback_does_not_change_event_count() {
        use crate::feedback::{LabelClass, ReviewSource};
        let config = ProfileConfig::default();
        let mut p = Profile::new(1, &config);
        p.update(1.0, 0);
        let count_before = p.event_count();
        p.apply_feedback(&FeedbackEvent {
            entity_hash: 1,
            was_true_positive: true,
            confidence: 1.0,
            label_class: LabelClass::Novel,
            detector_scores_at_event: [0.0; D],
            pattern_id: None,
            review_source: ReviewSource::Human,
            feedback_latency_ms: 0,
        }, &config.ensemble);
        assert_eq!(p.event_count(), count_before);
    }

    #[test]
    fn test_scores_always_in_unit_range() {
        let config = ProfileConfig::default();
        let mut p = Profile::new(1, &config);
        for i in 0..200u64 {
            let scores = p.update((i as f64).sin() * 1000.0, i * 1_000_000);
            for s in scores {
                assert!((0.0..=1.0).contains(&s));
            }
        }
    }
}
