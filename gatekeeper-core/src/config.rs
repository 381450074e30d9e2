//! Plain configuration structs for the detection path.
//!
//! Configuration *layering* (file > env > defaults) belongs to the
//! front-end only. Detectors, profiles, and the ensemble receive these
//! plain structs at construction — no `serde`/file-loading dependency
//! leaks into the hot path.

use serde::{Deserialize, Serialize};

/// Weight floor `ε` — no detector weight may fall below this after any
/// number of feedback updates (§3, §8 "Weight floor").
pub const WEIGHT_FLOOR: f64 = 0.001;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProfileConfig {
    /// Events required before a profile leaves warmup and can emit signals
    /// (§3: default 10-50).
    pub warmup_n: u64,
    pub ensemble: EnsembleConfig,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            warmup_n: 10,
            ensemble: EnsembleConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnsembleConfig {
    /// At least one detector must clear this score for the event to be
    /// eligible for an anomaly decision (§4.3).
    pub min_detector_score_for_anomaly: f64,
    /// Ensemble score floor for an anomaly decision.
    pub min_ensemble_score_for_anomaly: f64,
    /// Confidence floor for an anomaly decision.
    pub confidence_threshold: f64,
    /// Per-detector score at or above which it counts toward
    /// `detectors_fired` and toward bandit feedback attribution.
    pub detector_fire_threshold: f64,
    /// Whether the adaptive P² threshold on ensemble score additionally
    /// gates the anomaly decision.
    pub use_adaptive_ensemble_threshold: bool,
    /// Safety-net floor §9 calls for when the adaptive threshold
    /// degenerates on an adversarial stream (long plateau, NaN, or too few
    /// samples to trust).
    pub fixed_sensitivity_floor: f64,
    /// Consecutive updates with no meaningful change in the adaptive
    /// threshold before it's considered "plateaued" and the fixed floor is
    /// used instead.
    pub plateau_limit: u32,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            min_detector_score_for_anomaly: 0.30,
            min_ensemble_score_for_anomaly: 0.15,
            confidence_threshold: 0.50,
            detector_fire_threshold: 0.30,
            use_adaptive_ensemble_threshold: true,
            fixed_sensitivity_floor: 0.15,
            plateau_limit: 5_000,
        }
    }
}
