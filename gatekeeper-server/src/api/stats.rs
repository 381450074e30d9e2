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

//! `GET /stats` (§4.7): ingest counters, per-class drop counters,
//! active profiles per shard, channel depths, policy version, signal
//! schema version, P50/P95/P99 latency, and per-detector trigger counts.

use crate::admission::DropCountersSnapshot;
use crate::api::ApiError;
use crate::shard::LatencyPercentiles;
use crate::state::AppState;
use axum::{extract::State, Json};
use gatekeeper_core::DetectorId;
use serde::Serialize;
use std::sync::atomic::Ordering;

#[derive(Debug, Serialize)]
pub struct ShardStatsView {
    pub shard_id: usize,
    pub events_processed: u64,
    pub signals_emitted: u64,
    pub feedback_applied: u64,
    pub active_profiles: usize,
    pub evictions: u64,
    pub health_degraded: bool,
    pub inbound_depth: usize,
    pub feedback_depth: usize,
    pub latency: LatencyPercentiles,
    pub detector_triggers: Vec<(String, u64)>,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub uptime_secs: u64,
    pub policy_version: String,
    pub signal_schema_version: u32,
    pub drops: DropCountersSnapshot,
    pub shards: Vec<ShardStatsView>,
}

pub async fn get_stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, ApiError> {
    let shards = state
        .shards
        .iter()
        .enumerate()
        .map(|(shard_id, handle)| {
            let detector_triggers = DetectorId::ALL
                .iter()
                .map(|d| {
                    (
                        d.to_string(),
                        handle.stats.detector_triggers[d.index()].load(Ordering::Relaxed),
                    )
                })
                .collect();
            ShardStatsView {
                shard_id,
                events_processed: handle.stats.events_processed.load(Ordering::Relaxed),
                signals_emitted: handle.stats.signals_emitted.load(Ordering::Relaxed),
                feedback_applied: handle.stats.feedback_applied.load(Ordering::Relaxed),
                active_profiles: handle.stats.active_profiles.load(Ordering::Relaxed),
                evictions: handle.stats.evictions.load(Ordering::Relaxed),
                health_degraded: handle.stats.health_degraded.load(Ordering::Relaxed),
                inbound_depth: handle.inbound_depth(),
                feedback_depth: handle.feedback_depth(),
                latency: *handle.stats.latency_us.lock(),
                detector_triggers,
            }
        })
        .collect();

    // `drop.ingest` lives on the admission layer's own counters (it rejects
    // events before they ever reach a shard); every other class lives on
    // `state.drops` (§6 `/stats` "per-class drop counters").
    let mut drops = state.drops.snapshot();
    drops.drop_ingest = state.admission.drops.get(crate::admission::DropClass::Ingest);

    Ok(Json(StatsResponse {
        uptime_secs: state.started_at.elapsed().as_secs(),
        policy_version: state.policy.version(),
        signal_schema_version: gatekeeper_core::SIGNAL_SCHEMA_VERSION,
        drops,
        shards,
    }))
}
