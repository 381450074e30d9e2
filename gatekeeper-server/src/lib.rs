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

//! Gatekeeper Front-End (§4.7): ingest endpoint, deterministic
//! sharding, backpressure/loss accounting, async signal forwarder,
//! feedback/policy endpoints, and checkpoint persistence glue. The hot
//! path itself lives in `gatekeeper-core`/`gatekeeper-storage`; this crate
//! only owns HTTP, admission control, and the shard worker threads.

pub mod admission;
pub mod api;
pub mod config;
pub mod forwarder;
pub mod parse;
pub mod shard;
pub mod state;

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use gatekeeper_core::PolicyRuntime;
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::Arc;
use std::time::Instant;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use admission::{DropCounters, IngestAdmission};
use api::{
    export_checkpoint, get_stats, health_check, import_checkpoint, ingest_batch, ingest_event,
    policy_version, publish_policy, rollback_policy, submit_feedback,
};
use config::GatekeeperConfig;
use state::AppState;

/// Builds every shard worker, the forwarder, and the axum router, then
/// serves HTTP until the process is signaled to stop.
pub async fn run_server(config: GatekeeperConfig) -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gatekeeper_server=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting Gatekeeper");
    config.validate().context("invalid configuration")?;
    tracing::info!(shard_count = config.sharding.shard_count, "configuration loaded");

    let drops = Arc::new(DropCounters::new());
    let admission = Arc::new(IngestAdmission::new(
        config.admission.ingest_max_rate,
        config.admission.ingest_burst,
    ));

    let (forwarder_tx, forwarder_handle) =
        forwarder::spawn_forwarder(config.tier2.clone(), drops.clone());

    let initial_policy = gatekeeper_core::PolicySnapshot::new(
        "v0".to_string(),
        unix_now_secs(),
        Vec::new(),
        gatekeeper_core::PolicyDefaults::default(),
        1.0,
        None,
    );
    let policy = Arc::new(PolicyRuntime::new(initial_policy));

    let shards: Vec<_> = (0..config.sharding.shard_count)
        .map(|shard_id| {
            shard::spawn_shard(
                shard_id,
                config.sharding.clone(),
                config.profile.clone(),
                config.checkpoint.clone(),
                policy.clone(),
                forwarder_tx.clone(),
                drops.clone(),
            )
        })
        .collect();

    let state = AppState {
        config: Arc::new(config.clone()),
        shards: Arc::new(shards),
        policy,
        admission,
        drops,
        forwarder_tx,
        started_at: Instant::now(),
        next_checkpoint_id: Arc::new(AtomicU64::new(0)),
        importable: Arc::new(AtomicBool::new(true)),
    };

    let mut app = Router::new()
        .route("/ingest", post(ingest_event))
        .route("/ingest/batch", post(ingest_batch))
        .route("/policy/snapshot", post(publish_policy))
        .route("/policy/version", get(policy_version))
        .route("/policy/rollback", post(rollback_policy))
        .route("/feedback", post(submit_feedback))
        .route("/checkpoint/export", get(export_checkpoint))
        .route("/checkpoint/import", post(import_checkpoint))
        .route("/stats", get(get_stats))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    if config.server.enable_cors {
        app = app.layer(CorsLayer::permissive());
    }

    let listener = tokio::net::TcpListener::bind(&config.server.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server.listen_addr))?;
    tracing::info!(addr = %config.server.listen_addr, "Gatekeeper listening");

    axum::serve(listener, app)
        .await
        .context("HTTP server terminated unexpectedly")?;

    forwarder_handle.abort();
    Ok(())
}

fn unix_now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
