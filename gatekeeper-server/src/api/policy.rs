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

//! `POST /policy/snapshot`, `GET /policy/version`, `POST /policy/rollback`
//! (§6, §4.4).

use crate::api::ApiError;
use crate::state::AppState;
use axum::{body::Bytes, extract::State, http::StatusCode, Json};
use gatekeeper_core::PolicySnapshot;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct PolicyPublishResponse {
    pub version: String,
}

/// Body is a checkpoint-container-framed, bincode-serialized
/// `PolicySnapshot` (§6 describes the publish body only as "an opaque
/// binary blob containing the `PolicySnapshot`"; reusing the checkpoint
/// container codec here is an implementation choice, not a spec quote).
pub async fn publish_policy(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<PolicyPublishResponse>), ApiError> {
    let decoded = gatekeeper_storage::decode_container(&body)?;
    let snapshot = PolicySnapshot::from_bytes(&decoded.payload)?;
    let version = snapshot.version.clone();
    state.policy.publish(snapshot);
    tracing::info!(version = %version, "published new policy snapshot");
    Ok((StatusCode::OK, Json(PolicyPublishResponse { version })))
}

#[derive(Debug, Serialize)]
pub struct PolicyVersionResponse {
    pub version: String,
    pub checksum: u32,
}

pub async fn policy_version(State(state): State<AppState>) -> Result<Json<PolicyVersionResponse>, ApiError> {
    let current = state.policy.current();
    let bytes = current.to_bytes()?;
    Ok(Json(PolicyVersionResponse {
        version: current.version.clone(),
        checksum: crc32fast::hash(&bytes),
    }))
}

#[derive(Debug, Deserialize)]
pub struct RollbackRequest {
    pub version: String,
}

/// Rolls back to the snapshot held as the fallback; `409` if no matching
/// fallback is available (§6 `POST /policy/rollback`).
pub async fn rollback_policy(
    State(state): State<AppState>,
    Json(request): Json<RollbackRequest>,
) -> Result<Json<PolicyVersionResponse>, ApiError> {
    state
        .policy
        .rollback(&request.version)
        .map_err(|err| ApiError::Conflict(err.to_string()))?;
    let current = state.policy.current();
    let bytes = current.to_bytes()?;
    Ok(Json(PolicyVersionResponse {
        version: current.version.clone(),
        checksum: crc32fast::hash(&bytes),
    }))
}
