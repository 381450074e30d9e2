//! `AnomalySignal` — the output contract emitted when the decision function
//! classifies an event as anomalous (§3).

use crate::detectors::{DetectorId, DetectorScores, D};
use serde::{Deserialize, Serialize};

/// Wire schema version for `AnomalySignal`; bump on any breaking field
/// change so Tier-2 consumers can detect incompatible producers.
pub const SIGNAL_SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Severity banding over `ensemble_score` (§4.3).
    pub fn from_score(ensemble_score: f64) -> Severity {
        if ensemble_score >= 0.85 {
            Severity::Critical
        } else if ensemble_score >= 0.6 {
            Severity::High
        } else if ensemble_score >= 0.35 {
            Severity::Medium
        } else if ensemble_score >= 0.15 {
            Severity::Low
        } else {
            Severity::None
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Severity::None => "none",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(name)
    }
}

/// Which detector(s) drove the decision, and why.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attribution {
    pub primary: DetectorId,
    pub secondary: Option<DetectorId>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalySignal {
    pub schema_version: u32,
    pub entity_hash: u64,
    pub timestamp: u64,
    pub ensemble_score: f64,
    pub severity: Severity,
    pub primary_detector_id: DetectorId,
    /// Bit `i` set iff `detector_scores[i] >= detector_fire_threshold`.
    pub detectors_fired_bitmask: u16,
    pub confidence: f64,
    pub detector_scores: DetectorScores,
    pub policy_version: String,
    pub attribution: Attribution,
}

/// Builds the `detectors_fired_bitmask` field from raw scores against a
/// fire threshold (§4.3 "`detectors_fired` bitmask").
pub fn fired_bitmask(scores: &DetectorScores, fire_threshold: f64) -> u16 {
    let mut mask = 0u16;
    for i in 0..D {
        if scores[i] >= fire_threshold {
            mask |= 1 << i;
        }
    }
    mask
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_bands() {
        assert_eq!(Severity::from_score(0.0), Severity::None);
        assert_eq!(Severity::from_score(0.14), Severity::None);
        assert_eq!(Severity::from_score(0.15), Severity::Low);
        assert_eq!(Severity::from_score(0.34), Severity::Low);
        assert_eq!(Severity::from_score(0.35), Severity::Medium);
        assert_eq!(Severity::from_score(0.59), Severity::Medium);
        assert_eq!(Severity::from_score(0.6), Severity::High);
        assert_eq!(Severity::from_score(0.84), Severity::High);
        assert_eq!(Severity::from_score(0.85), Severity::Critical);
        assert_eq!(Severity::from_score(1.0), Severity::Critical);
    }

    #[test]
    fn test_fired_bitmask() {
        let mut scores = [0.0; D];
        scores[DetectorId::Burst.index()] = 0.9;
        scores[DetectorId::Rrcf.index()] = 0.1;
        let mask = fired_bitmask(&scores, 0.30);
        assert_eq!(mask, 1 << DetectorId::Burst.index());
    }
}
