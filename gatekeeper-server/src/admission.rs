// Copyright 2026 Gatekeeper Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Admission control and classified loss accounting (§4.7, §7).
//!
//! Every inbound event resolves to exactly one of {enqueued,
//! dropped-with-classified-reason} (§8 "Loss accounting"). The ingest
//! rate limiter here bounds accepted throughput before an event even
//! reaches a shard's channel; once past admission, backpressure on the
//! shard/feedback/forwarder channels is reported directly by `try_send`
//! failures via [`DropCounters`].

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Reasons an inbound event or downstream item can be dropped, named to
/// match §4.7/§6's literal counter names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropClass {
    Parse,
    Skew,
    Ingest,
    Shard,
    Persistence,
    Feedback,
    Forwarder,
}

const DROP_CLASS_COUNT: usize = 7;

impl DropClass {
    fn index(self) -> usize {
        match self {
            DropClass::Parse => 0,
            DropClass::Skew => 1,
            DropClass::Ingest => 2,
            DropClass::Shard => 3,
            DropClass::Persistence => 4,
            DropClass::Feedback => 5,
            DropClass::Forwarder => 6,
        }
    }

    fn label(self) -> &'static str {
        match self {
            DropClass::Parse => "drop.parse",
            DropClass::Skew => "drop.skew",
            DropClass::Ingest => "drop.ingest",
            DropClass::Shard => "drop.shard",
            DropClass::Persistence => "drop.persistence",
            DropClass::Feedback => "drop.feedback",
            DropClass::Forwarder => "drop.forwarder",
        }
    }
}

/// Monotonic, relaxed-ordering counters — single consumer (`/stats`), so no
/// stronger ordering is needed (§5 "Global counters").
#[derive(Debug, Default)]
pub struct DropCounters {
    counts: [AtomicU64; DROP_CLASS_COUNT],
}

impl DropCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, class: DropClass) {
        self.counts[class.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, class: DropClass) -> u64 {
        self.counts[class.index()].load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> DropCountersSnapshot {
        DropCountersSnapshot {
            drop_parse: self.get(DropClass::Parse),
            drop_skew: self.get(DropClass::Skew),
            drop_ingest: self.get(DropClass::Ingest),
            drop_shard: self.get(DropClass::Shard),
            drop_persistence: self.get(DropClass::Persistence),
            drop_feedback: self.get(DropClass::Feedback),
            drop_forwarder: self.get(DropClass::Forwarder),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DropCountersSnapshot {
    #[serde(rename = "drop.parse")]
    pub drop_parse: u64,
    #[serde(rename = "drop.skew")]
    pub drop_skew: u64,
    #[serde(rename = "drop.ingest")]
    pub drop_ingest: u64,
    #[serde(rename = "drop.shard")]
    pub drop_shard: u64,
    #[serde(rename = "drop.persistence")]
    pub drop_persistence: u64,
    #[serde(rename = "drop.feedback")]
    pub drop_feedback: u64,
    #[serde(rename = "drop.forwarder")]
    pub drop_forwarder: u64,
}

/// Token bucket rate limiter; refills continuously based on elapsed wall
/// time since the last `try_acquire`.
#[derive(Debug)]
pub struct TokenBucket {
    tokens: AtomicU64,
    max_tokens: u64,
    refill_rate: u64,
    last_refill: Mutex<Instant>,
}

impl TokenBucket {
    pub fn new(max_tokens: u64, refill_rate: u64) -> Self {
        Self {
            tokens: AtomicU64::new(max_tokens),
            max_tokens,
            refill_rate,
            last_refill: Mutex::new(Instant::now()),
        }
    }

    pub fn try_acquire(&self, count: u64) -> bool {
        self.refill();
        let current = self.tokens.load(Ordering::Relaxed);
        if current < count {
            return false;
        }
        self.tokens
            .compare_exchange_weak(current, current - count, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok()
    }

    fn refill(&self) {
        let mut last_refill = self.last_refill.lock().unwrap();
        let now = Instant::now();
        let elapsed = now.duration_since(*last_refill);
        *last_refill = now;

        let to_add = (elapsed.as_secs_f64() * self.refill_rate as f64) as u64;
        if to_add > 0 {
            let current = self.tokens.load(Ordering::Relaxed);
            self.tokens
                .store((current + to_add).min(self.max_tokens), Ordering::Relaxed);
        }
    }

    pub fn available(&self) -> u64 {
        self.tokens.load(Ordering::Relaxed)
    }
}

/// Bounds raw ingest admission ahead of sharding. Feedback and policy
/// control-plane traffic never go through this limiter — §4.7 calls
/// for control traffic to never be starved by ingest volume.
pub struct IngestAdmission {
    bucket: TokenBucket,
    pub drops: DropCounters,
}

impl IngestAdmission {
    pub fn new(max_rate: u64, burst: u64) -> Self {
        Self {
            bucket: TokenBucket::new(burst, max_rate),
            drops: DropCounters::new(),
        }
    }

    /// `Ok(())` admits the event for routing; `Err(retry_after)` means the
    /// caller should receive `429` (§4.7).
    pub fn admit(&self, count: u64) -> Result<(), Duration> {
        if self.bucket.try_acquire(count) {
            Ok(())
        } else {
            self.drops.record(DropClass::Ingest);
            let deficit = count.saturating_sub(self.bucket.available());
            let retry_ms = ((deficit * 1000) / self.bucket.refill_rate.max(1)).max(50);
            Err(Duration::from_millis(retry_ms))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_bucket_exhausts_and_refills() {
        let bucket = TokenBucket::new(10, 1000);
        assert!(bucket.try_acquire(10));
        assert!(!bucket.try_acquire(1));
        std::thread::sleep(Duration::from_millis(20));
        assert!(bucket.try_acquire(1));
    }

    #[test]
    fn test_drop_counters_independent_per_class() {
        let counters = DropCounters::new();
        counters.record(DropClass::Skew);
        counters.record(DropClass::Skew);
        counters.record(DropClass::Shard);
        assert_eq!(counters.get(DropClass::Skew), 2);
        assert_eq!(counters.get(DropClass::Shard), 1);
        assert_eq!(counters.get(DropClass::Parse), 0);
    }

    #[test]
    fn test_drop_class_label_is_dotted_stat_name() {
        assert_eq!(DropClass::Forwarder.label(), "drop.forwarder");
    }

    #[test]
    fn test_admission_rejects_over_burst() {
        let admission = IngestAdmission::new(1, 5);
        for _ in 0..5 {
            assert!(admission.admit(1).is_ok());
        }
        assert!(admission.admit(1).is_err());
        assert_eq!(admission.drops.get(DropClass::Ingest), 1);
    }
}
