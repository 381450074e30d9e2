//! Tier-1 detection engine core: event model, online detectors, profile
//! state, ensemble decision logic, and the policy runtime. No networking,
//! no persistence I/O, no async — this crate is the hot-path logic that a
//! shard worker drives synchronously per event; everything else lives in
//! `gatekeeper-storage` (checkpoint codec, registry, sketches) or the
//! `gatekeeper-server` front-end.

pub mod config;
pub mod detectors;
pub mod ensemble;
pub mod error;
pub mod event;
pub mod feedback;
pub mod p2;
pub mod policy;
pub mod profile;
pub mod signal;
pub mod util;

pub use config::{EnsembleConfig, ProfileConfig, WEIGHT_FLOOR};
pub use detectors::{DetectorId, DetectorScores, D};
pub use ensemble::{CombineResult, EnsembleState};
pub use error::{CoreError, Result};
pub use event::{hash_entity_id, shard_for, within_skew_window, Event, DEFAULT_SKEW_WINDOW_NS};
pub use feedback::{FeedbackEvent, LabelClass, ReviewSource};
pub use policy::{
    DetectorPriorDelta, PatternRule, PolicyDefaults, PolicyOutcome, PolicyRuntime, PolicySnapshot,
    RuleAction,
};
pub use profile::Profile;
pub use signal::{fired_bitmask, AnomalySignal, Attribution, Severity, SIGNAL_SCHEMA_VERSION};

#[cfg(test)]
mod integration_tests {
    use super::*;

    /// End-to-end smoke test: a clean burst on a single entity eventually
    /// fires the decision function with Burst as the primary detector
    /// (mirrors scenario S1 in §8, at reduced scale).
    #[test]
    fn test_burst_scenario_fires_after_warmup() {
        let profile_config = ProfileConfig {
            warmup_n: 10,
            ..Default::default()
        };
        let entity_hash = hash_entity_id(b"u1");
        let mut profile = Profile::new(entity_hash, &profile_config);

        let mut ts = 0u64;
        for _ in 0..20 {
            ts += 20_000_000;
            let scores = profile.update(1.0, ts);
            let combined = profile.combine(&scores);
            profile.is_anomalous(&scores, &combined, &profile_config.ensemble);
        }

        let mut fired = false;
        for _ in 0..20 {
            ts += 1_000; // burst: far below the ~20ms baseline cadence
            let scores = profile.update(1.0, ts);
            let combined = profile.combine(&scores);
            if profile.is_anomalous(&scores, &combined, &profile_config.ensemble) {
                fired = true;
                assert_eq!(combined.primary, DetectorId::Burst);
            }
        }
        assert!(fired, "expected burst scenario to eventually fire");
    }

    #[test]
    fn test_policy_suppression_still_updates_state() {
        let profile_config = ProfileConfig::default();
        let entity_hash = hash_entity_id(b"u1");
        let mut profile = Profile::new(entity_hash, &profile_config);

        let rule = PatternRule {
            pattern_id: "suppress-u1".into(),
            action: RuleAction::Suppress,
            entity_hashes: vec![entity_hash],
            detector_ids: vec![],
            min_confidence: 0.0,
            score_scale: None,
            confidence_scale: None,
            detector_priors: vec![],
            ttl_sec: 3600,
        };
        let snapshot = PolicySnapshot::new(
            "v1".into(),
            0,
            vec![rule],
            PolicyDefaults::default(),
            1.0,
            None,
        );
        let runtime = PolicyRuntime::new(snapshot);

        let count_before = profile.event_count();
        for i in 0..50u64 {
            let scores = profile.update(1.0, i * 20_000_000);
            let combined = profile.combine(&scores);
            let active = runtime.snapshot_for(entity_hash);
            let (outcome, _) =
                active.evaluate(entity_hash, combined.primary, combined.confidence, 0);
            assert!(outcome.suppressed);
        }
        assert!(profile.event_count() > count_before);
    }
}
