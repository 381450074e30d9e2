//! Count-Min Sketch — small-capacity approximate frequency counting.
//!
//! Used by the Behavioral Fingerprint detector to track approximate
//! service-of-origin frequencies per entity without unbounded memory. Unlike
//! a concurrent registry-wide sketch, each instance here is owned by exactly
//! one profile and is never shared, so counters are plain `u32`, not atomics.

use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// A single-writer Count-Min Sketch with caller-specified (depth, width).
///
/// Memory usage is fixed at `depth * width * 4` bytes regardless of how many
/// unique items are counted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountMinSketch {
    counters: Vec<Vec<u32>>,
    seeds: Vec<u64>,
    width: usize,
}

impl CountMinSketch {
    /// Create a sketch sized for small per-entity capacity (default depth=4,
    /// width=64 -> 1KB), matching the "count-min sketch of small capacity"
    /// requirement on the Behavioral Fingerprint detector.
    pub fn new(depth: usize, width: usize) -> Self {
        assert!(depth > 0 && width > 0);
        let seeds: Vec<u64> = (0..depth)
            .map(|i| 0x517cc1b727220a95u64.wrapping_mul(i as u64 * 2 + 1))
            .collect();
        Self {
            counters: vec![vec![0u32; width]; depth],
            seeds,
            width,
        }
    }

    pub fn small() -> Self {
        Self::new(4, 64)
    }

    /// Increment the count for an item, returning the new estimated count.
    pub fn increment(&mut self, item: u64) -> u32 {
        let mut min_count = u32::MAX;
        for (row, &seed) in self.counters.iter_mut().zip(self.seeds.iter()) {
            let index = Self::hash(item, seed) as usize % self.width;
            row[index] = row[index].saturating_add(1);
            min_count = min_count.min(row[index]);
        }
        min_count
    }

    pub fn estimate(&self, item: u64) -> u32 {
        let mut min_count = u32::MAX;
        for (row, &seed) in self.counters.iter().zip(self.seeds.iter()) {
            let index = Self::hash(item, seed) as usize % self.width;
            min_count = min_count.min(row[index]);
        }
        min_count
    }

    /// Halve all counters; used for periodic time-windowed decay.
    pub fn decay(&mut self) {
        for row in &mut self.counters {
            for c in row.iter_mut() {
                *c /= 2;
            }
        }
    }

    pub fn reset(&mut self) {
        for row in &mut self.counters {
            row.iter_mut().for_each(|c| *c = 0);
        }
    }

    fn hash(item: u64, seed: u64) -> u64 {
        let mut hasher = FxHasher { state: seed };
        item.hash(&mut hasher);
        hasher.finish()
    }
}

impl Default for CountMinSketch {
    fn default() -> Self {
        Self::small()
    }
}

struct FxHasher {
    state: u64,
}

impl Hasher for FxHasher {
    fn finish(&self) -> u64 {
        self.state
    }

    fn write(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.state = self.state.wrapping_mul(0x5851f42d4c957f2d);
            self.state ^= *byte as u64;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_and_estimate() {
        let mut sketch = CountMinSketch::small();
        assert_eq!(sketch.increment(123), 1);
        assert_eq!(sketch.increment(123), 2);
        assert_eq!(sketch.increment(123), 3);
        assert_eq!(sketch.estimate(123), 3);
        assert_eq!(sketch.increment(456), 1);
    }

    #[test]
    fn test_decay() {
        let mut sketch = CountMinSketch::small();
        for _ in 0..100 {
            sketch.increment(999);
        }
        assert_eq!(sketch.estimate(999), 100);
        sketch.decay();
        assert_eq!(sketch.estimate(999), 50);
    }
}
