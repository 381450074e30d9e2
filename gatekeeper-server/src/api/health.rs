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

//! `GET /health` (§6).

use crate::state::AppState;
use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::sync::atomic::Ordering;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub shard_count: usize,
    pub degraded_shards: Vec<usize>,
}

/// `200` as long as the process is serving traffic, even if individual
/// shards have flipped their per-shard health flag after repeated detector
/// panics (§4.6) — that is surfaced for the operator, not treated as
/// down, since the shard keeps running with `scores=0` substituted.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let degraded_shards: Vec<usize> = state
        .shards
        .iter()
        .enumerate()
        .filter(|(_, handle)| handle.stats.health_degraded.load(Ordering::Relaxed))
        .map(|(idx, _)| idx)
        .collect();

    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok",
            shard_count: state.shards.len(),
            degraded_shards,
        }),
    )
}
