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

//! HTTP surface: one module per concern, one file per endpoint group.

pub mod checkpoint;
pub mod feedback;
pub mod health;
pub mod ingest;
pub mod policy;
pub mod stats;

pub use checkpoint::*;
pub use feedback::*;
pub use health::*;
pub use ingest::*;
pub use policy::*;
pub use stats::*;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// HTTP-facing error type for every handler in this module. Config and
/// startup failures never reach an axum extractor; those are handled with
/// `anyhow::Result` in `main.rs`/`config.rs` instead.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
}

impl From<gatekeeper_core::CoreError> for ApiError {
    fn from(err: gatekeeper_core::CoreError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl From<gatekeeper_storage::StorageError> for ApiError {
    fn from(err: gatekeeper_storage::StorageError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::RateLimited { retry_after_ms } => (
                StatusCode::TOO_MANY_REQUESTS,
                format!("retry after {retry_after_ms}ms"),
            ),
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}
