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

//! `POST /feedback` (§3, §6): routes a `FeedbackEvent` to the shard
//! that owns `entity_hash` deterministically (`entity_hash % N`), never the
//! hash-derived shard-routing function used for raw ingest, per §3
//! "Routed deterministically to `entity_hash % N`".

use crate::admission::DropClass;
use crate::api::ApiError;
use crate::state::AppState;
use axum::{extract::State, http::StatusCode, Json};
use gatekeeper_core::FeedbackEvent;

pub async fn submit_feedback(
    State(state): State<AppState>,
    Json(event): Json<FeedbackEvent>,
) -> Result<StatusCode, ApiError> {
    let shard_count = state.shards.len() as u64;
    let idx = (event.entity_hash % shard_count) as usize;
    let shard = &state.shards[idx];

    if shard.feedback.try_send(event).is_err() {
        state.record_drop(DropClass::Feedback);
        return Err(ApiError::Internal("feedback channel full".into()));
    }

    Ok(StatusCode::ACCEPTED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::test_app_state;
    use gatekeeper_core::{LabelClass, ReviewSource};

    fn feedback_for(entity_hash: u64) -> FeedbackEvent {
        FeedbackEvent {
            entity_hash,
            was_true_positive: true,
            confidence: 0.9,
            label_class: LabelClass::Novel,
            detector_scores_at_event: [0.0; gatekeeper_core::D],
            pattern_id: None,
            review_source: ReviewSource::Human,
            feedback_latency_ms: 5,
        }
    }

    #[test]
    fn test_full_feedback_channel_counts_drop_feedback() {
        let capacity = 2;
        let state = test_app_state(1, capacity);
        for _ in 0..capacity {
            state.shards[0].feedback.try_send(feedback_for(1)).unwrap();
        }
        assert!(state.shards[0].feedback.try_send(feedback_for(1)).is_err());
        state.record_drop(DropClass::Feedback);
        assert_eq!(state.drops.get(DropClass::Feedback), 1);
    }

    #[test]
    fn test_feedback_routes_by_entity_hash_modulo_shard_count() {
        let state = test_app_state(4, 8);
        let entity_hash = 10u64; // 10 % 4 == 2
        let shard_count = state.shards.len() as u64;
        let idx = (entity_hash % shard_count) as usize;
        assert_eq!(idx, 2);
        state.shards[idx].feedback.try_send(feedback_for(entity_hash)).unwrap();
        assert_eq!(state.shards[idx].feedback.len(), 1);
    }
}
