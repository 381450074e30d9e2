//! Event and EntityHash — the data model ingested on the hot path.

use std::hash::Hasher;
use twox_hash::XxHash64;

/// A fixed-precision seed so hashing is stable across process restarts
/// (required for deterministic replay, §8 "Determinism").
const ENTITY_HASH_SEED: u64 = 0x9E3779B97F4A7C15;

/// A single telemetry data point for one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub entity_id: Vec<u8>,
    pub value: f64,
    pub timestamp_ns: u64,
}

impl Event {
    pub fn new(entity_id: impl Into<Vec<u8>>, value: f64, timestamp_ns: u64) -> Self {
        Self {
            entity_id: entity_id.into(),
            value,
            timestamp_ns,
        }
    }

    /// Stable 64-bit hash of `entity_id`, used both for shard routing and as
    /// the profile registry key (§3 "EntityHash").
    pub fn entity_hash(&self) -> u64 {
        hash_entity_id(&self.entity_id)
    }
}

/// Hash an entity id the same way regardless of whether it arrives as part
/// of an `Event`, a `FeedbackEvent`, or a policy rule's `entity_hashes` set —
/// callers that already have raw bytes should go through this function so
/// shard routing and rule matching agree bit-for-bit.
pub fn hash_entity_id(entity_id: &[u8]) -> u64 {
    let mut hasher = XxHash64::with_seed(ENTITY_HASH_SEED);
    hasher.write(entity_id);
    hasher.finish()
}

/// Route an entity hash to a shard index. `shard_count` must be a power of
/// two (§3 "shard = hash & (N-1)").
#[inline]
pub fn shard_for(entity_hash: u64, shard_count: usize) -> usize {
    debug_assert!(shard_count.is_power_of_two());
    (entity_hash as usize) & (shard_count - 1)
}

/// Default acceptable clock skew window around wall-clock time (§3).
pub const DEFAULT_SKEW_WINDOW_NS: u64 = 3_600 * 1_000_000_000;

/// Whether `timestamp_ns` falls within `skew_window_ns` of `now_ns`.
#[inline]
pub fn within_skew_window(timestamp_ns: u64, now_ns: u64, skew_window_ns: u64) -> bool {
    let delta = if timestamp_ns > now_ns {
        timestamp_ns - now_ns
    } else {
        now_ns - timestamp_ns
    };
    delta <= skew_window_ns
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic() {
        let a = hash_entity_id(b"user-123");
        let b = hash_entity_id(b"user-123");
        assert_eq!(a, b);
    }

    #[test]
    fn test_different_ids_differ() {
        assert_ne!(hash_entity_id(b"user-123"), hash_entity_id(b"user-124"));
    }

    #[test]
    fn test_shard_for_is_in_range() {
        for i in 0..1000u64 {
            let shard = shard_for(hash_entity_id(&i.to_le_bytes()), 16);
            assert!(shard < 16);
        }
    }

    #[test]
    fn test_skew_window() {
        assert!(within_skew_window(1_000, 1_000, 0));
        assert!(within_skew_window(1_000, 2_000, 1_000));
        assert!(!within_skew_window(1_000, 3_000, 1_000));
    }
}
