//! `FeedbackEvent` — the input contract through which Tier-2 adjusts
//! ensemble weights online (§3, §4.3).

use crate::detectors::DetectorScores;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelClass {
    BenignKnown,
    AttackKnown,
    Novel,
    Uncertain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewSource {
    Human,
    Llm,
    Auto,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackEvent {
    pub entity_hash: u64,
    pub was_true_positive: bool,
    pub confidence: f64,
    pub label_class: LabelClass,
    pub detector_scores_at_event: DetectorScores,
    pub pattern_id: Option<String>,
    pub review_source: ReviewSource,
    pub feedback_latency_ms: u64,
}
