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

//! `POST /ingest` and `POST /ingest/batch` (§6).
//!
//! Bodies are parsed with `simd_json` off a thread-local scratch buffer
//! (§4.7 "Parse with SIMD JSON into fixed-layout event structs using a
//! thread-local scratch buffer (zero allocation per event in the steady
//! state)") rather than through axum's `Json` extractor, which would parse
//! with plain `serde_json` and allocate per request.

use crate::admission::DropClass;
use crate::api::ApiError;
use crate::parse;
use crate::shard::ShardEvent;
use crate::state::AppState;
use axum::{body::Bytes, extract::State, http::StatusCode, Json};
use gatekeeper_core::{hash_entity_id, within_skew_window};
use serde::{Deserialize, Serialize};

/// Wire shape is `{u, v, t}` per §6; field names are spelled out for
/// readability in the rest of the module and mapped at the (de)serde
/// boundary.
#[derive(Debug, Deserialize)]
pub struct IngestEvent {
    #[serde(rename = "u")]
    pub entity_id: String,
    #[serde(rename = "v")]
    pub value: f64,
    #[serde(rename = "t")]
    pub timestamp_ns: u64,
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub accepted: usize,
    pub rejected: usize,
}

/// No computed token-bucket deficit applies to a shard's bounded channel
/// (unlike admission's rate limiter, it has no refill rate to derive a
/// delay from); this is a fixed "try again shortly" hint, matching the
/// floor `IngestAdmission::admit` itself falls back to.
const SHARD_BACKPRESSURE_RETRY_MS: u64 = 50;

/// Outcome of routing one parsed event, prior to mapping onto an HTTP
/// response. Only [`RouteOutcome::DroppedShard`] (backpressure) is ever
/// surfaced to the caller as a non-2xx status; parse/skew drops are
/// recorded and silently accepted (§7 "Malformed event: drop, increment
/// `drop.parse`. Never reported per-event to caller").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RouteOutcome {
    Enqueued,
    DroppedParse,
    DroppedSkew,
    DroppedShard,
}

/// Single-event ingest. Malformed bodies and out-of-window timestamps are
/// dropped (classified `drop.parse`/`drop.skew`) but still answered `202`
/// — §6 documents only `202`/`429` as valid responses for this route, and
/// §7 is explicit that a malformed event is never reported per-event to
/// the caller. Only backpressure (a full shard channel) yields `429`.
#[tracing::instrument(skip(state, body))]
pub async fn ingest_event(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    admit_one(&state)?;

    let event = match parse::parse_event(&body) {
        Ok(event) => event,
        Err(_) => {
            state.record_drop(DropClass::Parse);
            return Ok(StatusCode::ACCEPTED);
        }
    };

    match route_event(&state, event) {
        RouteOutcome::DroppedShard => Err(ApiError::RateLimited {
            retry_after_ms: SHARD_BACKPRESSURE_RETRY_MS,
        }),
        RouteOutcome::Enqueued | RouteOutcome::DroppedParse | RouteOutcome::DroppedSkew => {
            Ok(StatusCode::ACCEPTED)
        }
    }
}

/// Batch ingest: body is a bare JSON array, at most
/// `server.ingest_batch_max` events per call (§6 "length ≤10k"). Individual
/// parse/skew/shard failures are counted but do not fail the whole batch;
/// the response reports how many were accepted.
#[tracing::instrument(skip(state, body))]
pub async fn ingest_batch(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<IngestResponse>), ApiError> {
    let events = parse::parse_batch(&body)
        .map_err(|e| ApiError::BadRequest(format!("malformed batch body: {e}")))?;

    if events.len() > state.config.server.ingest_batch_max {
        return Err(ApiError::BadRequest(format!(
            "batch of {} events exceeds ingest_batch_max of {}",
            events.len(),
            state.config.server.ingest_batch_max
        )));
    }

    admit_one(&state)?;

    let mut accepted = 0usize;
    let mut rejected = 0usize;
    for event in events {
        match route_event(&state, event) {
            RouteOutcome::Enqueued => accepted += 1,
            RouteOutcome::DroppedParse | RouteOutcome::DroppedSkew | RouteOutcome::DroppedShard => {
                rejected += 1
            }
        }
    }

    Ok((StatusCode::ACCEPTED, Json(IngestResponse { accepted, rejected })))
}

fn admit_one(state: &AppState) -> Result<(), ApiError> {
    state
        .admission
        .admit(1)
        .map_err(|retry_after| ApiError::RateLimited {
            retry_after_ms: retry_after.as_millis() as u64,
        })
}

fn route_event(state: &AppState, event: IngestEvent) -> RouteOutcome {
    if event.entity_id.is_empty() {
        state.record_drop(DropClass::Parse);
        return RouteOutcome::DroppedParse;
    }

    let now_ns = unix_now_ns();
    if !within_skew_window(event.timestamp_ns, now_ns, gatekeeper_core::DEFAULT_SKEW_WINDOW_NS) {
        state.record_drop(DropClass::Skew);
        return RouteOutcome::DroppedSkew;
    }

    let entity_hash = hash_entity_id(event.entity_id.as_bytes());
    let shard = state.shard_for(entity_hash);
    let shard_event = ShardEvent {
        entity_hash,
        value: event.value,
        timestamp_ns: event.timestamp_ns,
    };
    if shard.inbound.try_send(shard_event).is_err() {
        state.record_drop(DropClass::Shard);
        return RouteOutcome::DroppedShard;
    }

    if state.is_importable() {
        state.mark_warmed_up();
    }

    RouteOutcome::Enqueued
}

fn unix_now_ns() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::DropClass;
    use crate::state::test_support::test_app_state;

    fn event(entity_id: &str, value: f64) -> IngestEvent {
        IngestEvent {
            entity_id: entity_id.to_string(),
            value,
            timestamp_ns: unix_now_ns(),
        }
    }

    #[test]
    fn test_empty_entity_id_counts_drop_parse() {
        let state = test_app_state(1, 8);
        let outcome = route_event(&state, event("", 1.0));
        assert_eq!(outcome, RouteOutcome::DroppedParse);
        assert_eq!(state.drops.get(DropClass::Parse), 1);
    }

    #[test]
    fn test_timestamp_outside_skew_counts_drop_skew() {
        let state = test_app_state(1, 8);
        let mut stale = event("u1", 1.0);
        stale.timestamp_ns = 0; // far outside the default 1h skew window
        let outcome = route_event(&state, stale);
        assert_eq!(outcome, RouteOutcome::DroppedSkew);
        assert_eq!(state.drops.get(DropClass::Skew), 1);
    }

    /// Scenario S5: saturating a shard's inbound channel drops exactly the
    /// excess events with `drop.shard`, while every event that fit within
    /// capacity is routed successfully.
    #[test]
    fn test_saturated_shard_channel_classifies_drop_shard() {
        let capacity = 4;
        let state = test_app_state(1, capacity);

        let mut accepted = 0;
        let mut shard_drops = 0;
        for i in 0..(capacity * 10) {
            match route_event(&state, event(&format!("u{i}"), 1.0)) {
                RouteOutcome::Enqueued => accepted += 1,
                RouteOutcome::DroppedShard => shard_drops += 1,
                other => panic!("unexpected outcome: {other:?}"),
            }
        }

        assert_eq!(accepted, capacity);
        assert_eq!(shard_drops, capacity * 10 - capacity);
        assert_eq!(state.drops.get(DropClass::Shard), shard_drops as u64);
    }
}
