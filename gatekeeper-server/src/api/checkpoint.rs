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

//! `GET /checkpoint/export`, `POST /checkpoint/import` (§4.7, §6).
//!
//! Each shard serializes its own state on its own turn via a one-shot
//! request/reply (§5 "Checkpoint export/import is coordinated via a
//! one-shot request message to each shard"). The exported blob is a
//! bincode-encoded `Vec` of per-shard frames, each framed independently by
//! `gatekeeper_storage::encode_container` (magic/version/crc per shard), so
//! a partial/corrupt frame for one shard doesn't invalidate the rest.

use crate::admission::DropClass;
use crate::api::ApiError;
use crate::shard::{CheckpointRequest, ImportRequest};
use crate::state::AppState;
use axum::{body::Bytes, extract::State, http::StatusCode};
use gatekeeper_core::Profile;
use std::time::Duration;

const SHARD_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Streams back the most recently assembled checkpoint blob across all
/// shards (§6 "`GET /checkpoint/export` → streaming binary blob").
pub async fn export_checkpoint(State(state): State<AppState>) -> Result<Bytes, ApiError> {
    let checkpoint_id = state.next_checkpoint_id();
    let mut frames: Vec<Vec<u8>> = Vec::with_capacity(state.shards.len());

    for (shard_id, shard) in state.shards.iter().enumerate() {
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        if shard.checkpoint.send(CheckpointRequest { reply: reply_tx }).is_err() {
            state.record_drop(DropClass::Persistence);
            continue;
        }
        match reply_rx.recv_timeout(SHARD_REPLY_TIMEOUT) {
            Ok(payload) if !payload.is_empty() => {
                let frame = gatekeeper_storage::encode_container(
                    shard_id as u16,
                    checkpoint_id,
                    &payload,
                );
                frames.push(frame);
            }
            _ => {
                state.record_drop(DropClass::Persistence);
            }
        }
    }

    let blob = bincode::serialize(&frames)
        .map_err(|e| ApiError::Internal(format!("checkpoint serialize failed: {e}")))?;
    Ok(Bytes::from(blob))
}

/// Restores shard state from a previously exported blob. Only valid at
/// startup, before the front-end has accepted its first ingest event
/// (§6 "`import(blob)` is only valid at startup; rejected after
/// warmup with `409`").
pub async fn import_checkpoint(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    if !state.is_importable() {
        return Err(ApiError::Conflict(
            "checkpoint import rejected: ingest has already started".into(),
        ));
    }

    let frames: Vec<Vec<u8>> = bincode::deserialize(&body)
        .map_err(|e| ApiError::BadRequest(format!("malformed checkpoint blob: {e}")))?;

    let mut restored_shards = 0usize;
    for frame in frames {
        let decoded = gatekeeper_storage::decode_container(&frame)?;
        let shard_idx = decoded.shard_id as usize;
        let Some(shard) = state.shards.get(shard_idx) else {
            tracing::warn!(shard_id = decoded.shard_id, "checkpoint frame references unknown shard, skipping");
            continue;
        };

        let profile_blobs: Vec<Vec<u8>> = bincode::deserialize(&decoded.payload)
            .map_err(|e| ApiError::BadRequest(format!("malformed shard payload: {e}")))?;
        let mut profiles = Vec::with_capacity(profile_blobs.len());
        for blob in profile_blobs {
            let profile =
                Profile::deserialize(&blob).map_err(|e| ApiError::BadRequest(e.to_string()))?;
            profiles.push(profile);
        }

        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        shard
            .import
            .send(ImportRequest { profiles, reply: reply_tx })
            .map_err(|_| ApiError::Internal("shard import channel closed".into()))?;
        reply_rx
            .recv_timeout(SHARD_REPLY_TIMEOUT)
            .map_err(|_| ApiError::Internal("shard import timed out".into()))?;
        restored_shards += 1;
    }

    tracing::info!(restored_shards, "checkpoint import complete");
    Ok(StatusCode::OK)
}
