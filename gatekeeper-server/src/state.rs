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

//! Shared application state threaded through every `axum` handler.

use crate::admission::{DropClass, DropCounters, IngestAdmission};
use crate::config::GatekeeperConfig;
use crate::shard::ShardHandle;
use gatekeeper_core::{AnomalySignal, PolicyRuntime};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatekeeperConfig>,
    pub shards: Arc<Vec<ShardHandle>>,
    pub policy: Arc<PolicyRuntime>,
    pub admission: Arc<IngestAdmission>,
    /// Counters for every drop class *except* `drop.ingest`, which the
    /// admission layer's own bucket already tracks (§4.7, §6 `/stats`).
    pub drops: Arc<DropCounters>,
    pub forwarder_tx: crossbeam_channel::Sender<AnomalySignal>,
    pub started_at: Instant,
    pub next_checkpoint_id: Arc<AtomicU64>,
    /// Cleared on the first accepted ingest event. Checkpoint import is only
    /// permitted while this is still `true` (§6 "`import(blob)` is only
    /// valid at startup... rejected after warmup with `409`").
    pub importable: Arc<AtomicBool>,
}

impl AppState {
    pub fn shard_for(&self, entity_hash: u64) -> &ShardHandle {
        let idx = gatekeeper_core::shard_for(entity_hash, self.shards.len());
        &self.shards[idx]
    }

    pub fn mark_warmed_up(&self) {
        self.importable.store(false, Ordering::Relaxed);
    }

    pub fn is_importable(&self) -> bool {
        self.importable.load(Ordering::Relaxed)
    }

    pub fn record_drop(&self, class: DropClass) {
        self.drops.record(class);
    }

    pub fn next_checkpoint_id(&self) -> u64 {
        self.next_checkpoint_id.fetch_add(1, Ordering::Relaxed)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::shard::{ShardHandle, ShardStats};
    use gatekeeper_core::PolicySnapshot;

    /// Builds an `AppState` with `shard_count` shards, each a bare channel
    /// pair with **no** worker thread draining it — callers control
    /// exactly how many sends succeed before a channel saturates, which a
    /// real spawned worker (draining in the background) cannot guarantee
    /// deterministically in a test.
    pub(crate) fn test_app_state(shard_count: usize, inbound_capacity: usize) -> AppState {
        let config = GatekeeperConfig::default();
        let shards: Vec<ShardHandle> = (0..shard_count)
            .map(|_| {
                let (inbound_tx, inbound_rx) = crossbeam_channel::bounded(inbound_capacity);
                let (feedback_tx, feedback_rx) = crossbeam_channel::bounded(inbound_capacity);
                let (checkpoint_tx, checkpoint_rx) = crossbeam_channel::bounded(1);
                let (import_tx, import_rx) = crossbeam_channel::bounded(1);
                // Leak the receivers so the channels stay open without a
                // consumer; the test only cares about sender-side backpressure.
                std::mem::forget(inbound_rx);
                std::mem::forget(feedback_rx);
                std::mem::forget(checkpoint_rx);
                std::mem::forget(import_rx);
                ShardHandle {
                    inbound: inbound_tx,
                    feedback: feedback_tx,
                    checkpoint: checkpoint_tx,
                    import: import_tx,
                    stats: Arc::new(ShardStats::default()),
                }
            })
            .collect();

        let (forwarder_tx, forwarder_rx) = crossbeam_channel::bounded(1024);
        std::mem::forget(forwarder_rx);

        let policy = PolicySnapshot::new(
            "v0".into(),
            0,
            Vec::new(),
            gatekeeper_core::PolicyDefaults::default(),
            1.0,
            None,
        );

        AppState {
            config: Arc::new(config),
            shards: Arc::new(shards),
            policy: Arc::new(PolicyRuntime::new(policy)),
            admission: Arc::new(crate::admission::IngestAdmission::new(1_000_000, 1_000_000)),
            drops: Arc::new(DropCounters::new()),
            forwarder_tx,
            started_at: Instant::now(),
            next_checkpoint_id: Arc::new(AtomicU64::new(0)),
            importable: Arc::new(AtomicBool::new(true)),
        }
    }
}
