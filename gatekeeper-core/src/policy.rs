//! Policy Runtime (§4.4).
//!
//! A `PolicySnapshot` is an immutable, versioned bundle of rules published
//! by the offline Tier-2 pipeline. `PolicyRuntime` holds the current
//! snapshot (plus, during canary rollout, a fallback snapshot) behind a
//! `parking_lot::RwLock<Arc<_>>`: publish takes the write lock once to swap
//! the pointer, every per-event read takes an uncontended read lock and
//! clones an `Arc`, so readers always observe one complete snapshot for the
//! whole of an event's processing — never a mix of old and new rules.

use crate::detectors::DetectorId;
use crate::error::{CoreError, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleAction {
    Suppress,
    Boost,
    AdjustPrior,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorPriorDelta {
    pub detector_id: DetectorId,
    pub alpha_delta: f64,
    pub beta_delta: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternRule {
    pub pattern_id: String,
    pub action: RuleAction,
    /// Empty means "matches any entity" (a wildcard rule).
    pub entity_hashes: Vec<u64>,
    /// Empty means "matches any detector".
    pub detector_ids: Vec<DetectorId>,
    pub min_confidence: f64,
    pub score_scale: Option<f64>,
    pub confidence_scale: Option<f64>,
    pub detector_priors: Vec<DetectorPriorDelta>,
    pub ttl_sec: u64,
}

impl PatternRule {
    fn is_wildcard(&self) -> bool {
        self.entity_hashes.is_empty()
    }

    fn expired(&self, created_at: u64, now_unix_sec: u64) -> bool {
        self.ttl_sec > 0 && now_unix_sec.saturating_sub(created_at) > self.ttl_sec
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDefaults {
    pub score_scale: f64,
    pub confidence_scale: f64,
}

impl Default for PolicyDefaults {
    fn default() -> Self {
        Self {
            score_scale: 1.0,
            confidence_scale: 1.0,
        }
    }
}

/// An immutable, versioned snapshot plus its publish-time rule index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicySnapshot {
    pub version: String,
    pub created_at: u64,
    pub rules: Vec<PatternRule>,
    pub defaults: PolicyDefaults,
    pub canary_percent: f64,
    pub fallback_version: Option<String>,

    #[serde(skip)]
    by_entity: HashMap<u64, Vec<usize>>,
    #[serde(skip)]
    by_detector: HashMap<DetectorId, Vec<usize>>,
    #[serde(skip)]
    wildcards: Vec<usize>,
}

impl PolicySnapshot {
    pub fn new(
        version: String,
        created_at: u64,
        rules: Vec<PatternRule>,
        defaults: PolicyDefaults,
        canary_percent: f64,
        fallback_version: Option<String>,
    ) -> Self {
        let mut snapshot = Self {
            version,
            created_at,
            rules,
            defaults,
            canary_percent,
            fallback_version,
            by_entity: HashMap::new(),
            by_detector: HashMap::new(),
            wildcards: Vec::new(),
        };
        snapshot.build_index();
        snapshot
    }

    /// Indexes rules by `entity_hash` and `detector_id` at publish time so
    /// per-event lookup is O(1) exact-match plus a short wildcard scan
    /// (§4.4).
    fn build_index(&mut self) {
        self.by_entity.clear();
        self.by_detector.clear();
        self.wildcards.clear();
        for (idx, rule) in self.rules.iter().enumerate() {
            if rule.is_wildcard() {
                self.wildcards.push(idx);
            } else {
                for &h in &rule.entity_hashes {
                    self.by_entity.entry(h).or_default().push(idx);
                }
            }
            for &d in &rule.detector_ids {
                self.by_detector.entry(d).or_default().push(idx);
            }
        }
    }

    /// Deserializes a snapshot published over the wire and rebuilds its
    /// rule index. The index fields are `#[serde(skip)]`, so a plain
    /// `bincode::deserialize` would leave every lookup table empty.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut snapshot: Self = bincode::deserialize(bytes).map_err(CoreError::Codec)?;
        snapshot.build_index();
        Ok(snapshot)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(CoreError::Codec)
    }

    /// Whether `entity_hash` observes this snapshot or should fall back to
    /// `fallback_version` (§4.4 "Canary handling").
    pub fn applies_to(&self, entity_hash: u64) -> bool {
        if self.canary_percent >= 1.0 {
            return true;
        }
        let bucket = entity_hash % 100;
        (bucket as f64) < self.canary_percent * 100.0
    }

    fn candidate_rules(&self, entity_hash: u64, primary_detector: DetectorId) -> Vec<usize> {
        let mut idxs: Vec<usize> = self
            .by_entity
            .get(&entity_hash)
            .cloned()
            .unwrap_or_default();
        if let Some(by_det) = self.by_detector.get(&primary_detector) {
            idxs.extend(by_det.iter().copied());
        }
        idxs.extend(self.wildcards.iter().copied());
        idxs.sort_unstable();
        idxs.dedup();
        idxs
    }
}

/// Outcome of applying policy to one event's decision.
#[derive(Debug, Clone)]
pub struct PolicyOutcome {
    pub score_scale: f64,
    pub confidence_scale: f64,
    pub suppressed: bool,
    pub matched_rule: Option<String>,
}

impl PolicySnapshot {
    /// Applies matched rules in deterministic priority order `suppress >
    /// boost > adjust_prior > defaults` (§4.4). `adjust_prior` deltas
    /// are returned separately since they mutate the profile's bandit
    /// state, not the current event's score.
    pub fn evaluate(
        &self,
        entity_hash: u64,
        primary_detector: DetectorId,
        confidence: f64,
        now_unix_sec: u64,
    ) -> (PolicyOutcome, Vec<DetectorPriorDelta>) {
        let mut outcome = PolicyOutcome {
            score_scale: self.defaults.score_scale,
            confidence_scale: self.defaults.confidence_scale,
            suppressed: false,
            matched_rule: None,
        };
        let mut priors = Vec::new();

        let mut suppress_match: Option<&PatternRule> = None;
        let mut boost_match: Option<&PatternRule> = None;
        let mut adjust_matches: Vec<&PatternRule> = Vec::new();

        for idx in self.candidate_rules(entity_hash, primary_detector) {
            let Some(rule) = self.rules.get(idx) else {
                continue;
            };
            if confidence < rule.min_confidence {
                continue;
            }
            if rule.expired(self.created_at, now_unix_sec) {
                continue;
            }
            match rule.action {
                RuleAction::Suppress => {
                    if suppress_match.is_none() {
                        suppress_match = Some(rule);
                    }
                }
                RuleAction::Boost => {
                    if boost_match.is_none() {
                        boost_match = Some(rule);
                    }
                }
                RuleAction::AdjustPrior => adjust_matches.push(rule),
            }
        }

        if let Some(rule) = suppress_match {
            outcome.suppressed = true;
            outcome.matched_rule = Some(rule.pattern_id.clone());
        } else if let Some(rule) = boost_match {
            outcome.score_scale = rule.score_scale.unwrap_or(outcome.score_scale).clamp(0.0, 1.0);
            outcome.confidence_scale = rule
                .confidence_scale
                .unwrap_or(outcome.confidence_scale)
                .clamp(0.0, 1.0);
            outcome.matched_rule = Some(rule.pattern_id.clone());
        }

        for rule in adjust_matches {
            priors.extend(rule.detector_priors.iter().cloned());
        }

        (outcome, priors)
    }
}

/// Process-wide holder of the active and fallback snapshots. Cheap to read
/// from every shard; mutated only by the publisher (§4.4, §5 "Policy
/// snapshot: read by all shards via an atomic pointer").
pub struct PolicyRuntime {
    active: RwLock<Arc<PolicySnapshot>>,
    fallback: RwLock<Option<Arc<PolicySnapshot>>>,
}

impl PolicyRuntime {
    pub fn new(initial: PolicySnapshot) -> Self {
        Self {
            active: RwLock::new(Arc::new(initial)),
            fallback: RwLock::new(None),
        }
    }

    /// Atomically swaps in a new snapshot. Any rule referencing
    /// `fallback_version` keeps the previously-active snapshot available
    /// for canary'd-out entities until the next publish.
    pub fn publish(&self, snapshot: PolicySnapshot) {
        let previous = self.active.read().clone();
        *self.fallback.write() = Some(previous);
        *self.active.write() = Arc::new(snapshot);
    }

    /// Rolls back to a snapshot with the given version if it is currently
    /// held as the fallback; otherwise returns an error (§6
    /// `POST /policy/rollback`).
    pub fn rollback(&self, version: &str) -> Result<()> {
        let fallback = self.fallback.read().clone();
        match fallback {
            Some(snapshot) if snapshot.version == version => {
                *self.active.write() = snapshot;
                Ok(())
            }
            _ => Err(CoreError::InvalidPolicy(format!(
                "no known snapshot with version {version} to roll back to"
            ))),
        }
    }

    pub fn version(&self) -> String {
        self.active.read().version.clone()
    }

    /// The full currently-active snapshot (ignoring canary routing), for
    /// callers that need more than the version string — e.g. the front-end
    /// recomputing a checksum for `GET /policy/version`.
    pub fn current(&self) -> Arc<PolicySnapshot> {
        self.active.read().clone()
    }

    /// The snapshot that should score `entity_hash`'s current event: the
    /// active snapshot if the entity is inside the canary cohort (or there
    /// is no canary in effect), otherwise the fallback.
    pub fn snapshot_for(&self, entity_hash: u64) -> Arc<PolicySnapshot> {
        let active = self.active.read().clone();
        if active.applies_to(entity_hash) {
            return active;
        }
        self.fallback
            .read()
            .clone()
            .unwrap_or(active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_snapshot(version: &str, canary_percent: f64) -> PolicySnapshot {
        PolicySnapshot::new(
            version.to_string(),
            0,
            Vec::new(),
            PolicyDefaults::default(),
            canary_percent,
            None,
        )
    }

    #[test]
    fn test_suppress_rule_suppresses() {
        let rule = PatternRule {
            pattern_id: "p1".into(),
            action: RuleAction::Suppress,
            entity_hashes: vec![42],
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
        let (outcome, _) = snapshot.evaluate(42, DetectorId::Burst, 0.9, 10);
        assert!(outcome.suppressed);
    }

    #[test]
    fn test_expired_rule_does_not_apply() {
        let rule = PatternRule {
            pattern_id: "p1".into(),
            action: RuleAction::Suppress,
            entity_hashes: vec![42],
            detector_ids: vec![],
            min_confidence: 0.0,
            score_scale: None,
            confidence_scale: None,
            detector_priors: vec![],
            ttl_sec: 10,
        };
        let snapshot = PolicySnapshot::new(
            "v1".into(),
            0,
            vec![rule],
            PolicyDefaults::default(),
            1.0,
            None,
        );
        let (outcome, _) = snapshot.evaluate(42, DetectorId::Burst, 0.9, 10_000);
        assert!(!outcome.suppressed);
    }

    #[test]
    fn test_boost_scales_clipped() {
        let rule = PatternRule {
            pattern_id: "p1".into(),
            action: RuleAction::Boost,
            entity_hashes: vec![],
            detector_ids: vec![DetectorId::Burst],
            min_confidence: 0.0,
            score_scale: Some(5.0),
            confidence_scale: Some(5.0),
            detector_priors: vec![],
            ttl_sec: 0,
        };
        let snapshot = PolicySnapshot::new(
            "v1".into(),
            0,
            vec![rule],
            PolicyDefaults::default(),
            1.0,
            None,
        );
        let (outcome, _) = snapshot.evaluate(1, DetectorId::Burst, 0.9, 0);
        assert_eq!(outcome.score_scale, 1.0);
        assert_eq!(outcome.confidence_scale, 1.0);
    }

    #[test]
    fn test_canary_routes_minority_to_fallback() {
        let runtime = PolicyRuntime::new(empty_snapshot("v0", 1.0));
        runtime.publish(empty_snapshot("v1", 0.1));
        let mut under_canary = 0;
        for entity_hash in 0..1000u64 {
            let snapshot = runtime.snapshot_for(entity_hash);
            if snapshot.version == "v1" {
                under_canary += 1;
            }
        }
        assert!((80..=120).contains(&under_canary), "got {under_canary}");
    }

    #[test]
    fn test_rollback_to_non_fallback_version_fails() {
        let runtime = PolicyRuntime::new(empty_snapshot("v0", 1.0));
        assert!(runtime.rollback("does-not-exist").is_err());
    }

    #[test]
    fn test_from_bytes_rebuilds_index() {
        let rule = PatternRule {
            pattern_id: "p1".into(),
            action: RuleAction::Suppress,
            entity_hashes: vec![42],
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
        let bytes = snapshot.to_bytes().unwrap();
        let restored = PolicySnapshot::from_bytes(&bytes).unwrap();
        let (outcome, _) = restored.evaluate(42, DetectorId::Burst, 0.9, 10);
        assert!(outcome.suppressed);
    }

    #[test]
    fn test_rollback_restores_previous_version() {
        let runtime = PolicyRuntime::new(empty_snapshot("v0", 1.0));
        runtime.publish(empty_snapshot("v1", 1.0));
        assert_eq!(runtime.version(), "v1");
        runtime.rollback("v0").unwrap();
        assert_eq!(runtime.version(), "v0");
    }
}
