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

//! Shard Worker (§4.6): a single-threaded, single-owner event loop
//! pinned to a dedicated OS thread (not a tokio task — the hot path must
//! never await or allocate, so it gets its own thread rather than sharing
//! the async runtime's scheduler). Owns exactly one registry, one inbound
//! event channel, and one feedback channel.

use crate::admission::{DropClass, DropCounters};
use crate::config::{CheckpointConfig, ShardingConfig};
use gatekeeper_core::{
    fired_bitmask, AnomalySignal, Attribution, DetectorId, FeedbackEvent, PolicyRuntime, Profile,
    ProfileConfig, Severity, D,
};
use gatekeeper_storage::Registry;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One inbound event, already hashed and routed by the front-end.
#[derive(Debug, Clone)]
pub struct ShardEvent {
    pub entity_hash: u64,
    pub value: f64,
    pub timestamp_ns: u64,
}

/// A request to serialize this shard's current state into a checkpoint
/// blob, delivered via a one-shot reply channel (§5 "Checkpoint
/// export/import is coordinated via a one-shot request message to each
/// shard").
pub struct CheckpointRequest {
    pub reply: crossbeam_channel::Sender<Vec<u8>>,
}

/// A request to load previously-checkpointed profiles into this shard's
/// registry, delivered the same way as [`CheckpointRequest`]. Only sent
/// before the front-end starts accepting ingest traffic (§4.7
/// "`import(blob)` is only valid at startup").
pub struct ImportRequest {
    pub profiles: Vec<Profile>,
    pub reply: crossbeam_channel::Sender<()>,
}

/// Shared, cross-thread-readable counters and gauges for `/stats`
/// (§4.7). Updated by the shard thread with relaxed atomics; read by the
/// HTTP layer from any thread.
#[derive(Debug, Default)]
pub struct ShardStats {
    pub events_processed: AtomicU64,
    pub signals_emitted: AtomicU64,
    pub feedback_applied: AtomicU64,
    pub active_profiles: AtomicUsize,
    pub evictions: AtomicU64,
    pub detector_triggers: [AtomicU64; D],
    pub health_degraded: AtomicBool,
    pub latency_us: Mutex<LatencyPercentiles>,
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct LatencyPercentiles {
    pub p50_us: f64,
    pub p95_us: f64,
    pub p99_us: f64,
}

impl ShardStats {
    fn record_signal(&self, scores_fired: u16) {
        self.signals_emitted.fetch_add(1, Ordering::Relaxed);
        for i in 0..D {
            if scores_fired & (1 << i) != 0 {
                self.detector_triggers[i].fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Handle to a running shard, held by the front-end for routing.
#[derive(Clone)]
pub struct ShardHandle {
    pub inbound: crossbeam_channel::Sender<ShardEvent>,
    pub feedback: crossbeam_channel::Sender<FeedbackEvent>,
    pub checkpoint: crossbeam_channel::Sender<CheckpointRequest>,
    pub import: crossbeam_channel::Sender<ImportRequest>,
    pub stats: Arc<ShardStats>,
}

impl ShardHandle {
    pub fn inbound_depth(&self) -> usize {
        self.inbound.len()
    }

    pub fn feedback_depth(&self) -> usize {
        self.feedback.len()
    }
}

/// Spawns a shard worker on a dedicated OS thread and returns a handle to
/// it. `forwarder_tx` is the shared bounded channel feeding the async
/// signal forwarder; sending to it never blocks the shard (a full channel
/// drops and counts `drop.forwarder`).
pub fn spawn_shard(
    shard_id: usize,
    sharding: ShardingConfig,
    profile_config: ProfileConfig,
    checkpoint_config: CheckpointConfig,
    policy: Arc<PolicyRuntime>,
    forwarder_tx: crossbeam_channel::Sender<AnomalySignal>,
    drops: Arc<DropCounters>,
) -> ShardHandle {
    let (inbound_tx, inbound_rx) = crossbeam_channel::bounded(sharding.inbound_channel_capacity);
    let (feedback_tx, feedback_rx) = crossbeam_channel::bounded(sharding.feedback_channel_capacity);
    let (checkpoint_tx, checkpoint_rx) = crossbeam_channel::bounded(4);
    let (import_tx, import_rx) = crossbeam_channel::bounded(4);
    let stats = Arc::new(ShardStats::default());

    let handle = ShardHandle {
        inbound: inbound_tx,
        feedback: feedback_tx,
        checkpoint: checkpoint_tx,
        import: import_tx,
        stats: stats.clone(),
    };

    let worker_stats = stats.clone();
    std::thread::Builder::new()
        .name(format!("gatekeeper-shard-{shard_id}"))
        .spawn(move || {
            let now = Instant::now();
            let mut worker = ShardWorker {
                shard_id,
                registry: Registry::new(sharding.registry_capacity_per_shard),
                profile_config,
                checkpoint_config,
                policy,
                forwarder_tx,
                drops,
                stats: worker_stats,
                inbound_rx,
                feedback_rx,
                checkpoint_rx,
                import_rx,
                sharding,
                latency_p50: gatekeeper_core::p2::P2Quantile::new(0.5),
                latency_p95: gatekeeper_core::p2::P2Quantile::new(0.95),
                latency_p99: gatekeeper_core::p2::P2Quantile::new(0.99),
                events_since_tick: 0,
                last_tick: now,
                events_since_checkpoint: 0,
                last_checkpoint: now,
                next_checkpoint_id: 0,
            };
            worker.run();
        })
        .expect("failed to spawn shard worker thread");

    handle
}

struct ShardWorker {
    shard_id: usize,
    registry: Registry<Profile>,
    profile_config: ProfileConfig,
    checkpoint_config: CheckpointConfig,
    policy: Arc<PolicyRuntime>,
    forwarder_tx: crossbeam_channel::Sender<AnomalySignal>,
    drops: Arc<DropCounters>,
    stats: Arc<ShardStats>,
    inbound_rx: crossbeam_channel::Receiver<ShardEvent>,
    feedback_rx: crossbeam_channel::Receiver<FeedbackEvent>,
    checkpoint_rx: crossbeam_channel::Receiver<CheckpointRequest>,
    import_rx: crossbeam_channel::Receiver<ImportRequest>,
    sharding: ShardingConfig,
    latency_p50: gatekeeper_core::p2::P2Quantile,
    latency_p95: gatekeeper_core::p2::P2Quantile,
    latency_p99: gatekeeper_core::p2::P2Quantile,
    events_since_tick: u64,
    last_tick: Instant,
    /// Separate from `events_since_tick`/`last_tick`, which gate the
    /// unrelated eviction/stats housekeeping tick — checkpoint cadence is
    /// its own configured interval (§4.6 step 4, `CheckpointConfig`).
    events_since_checkpoint: u64,
    last_checkpoint: Instant,
    next_checkpoint_id: u64,
}

const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Repeated-panic threshold per entity before a shard flips its per-shard
/// health flag (§4.6 "repeated panics flip a per-shard health flag
/// visible in stats").
const DETECTOR_PANIC_DEGRADE_THRESHOLD: u32 = 3;

impl ShardWorker {
    fn run(&mut self) {
        tracing::info!(shard_id = self.shard_id, "shard worker starting");
        loop {
            crossbeam_channel::select! {
                recv(self.checkpoint_rx) -> msg => {
                    if let Ok(request) = msg {
                        self.handle_checkpoint_request(request);
                    } else {
                        break;
                    }
                }
                recv(self.import_rx) -> msg => {
                    if let Ok(request) = msg {
                        self.handle_import_request(request);
                    } else {
                        break;
                    }
                }
                recv(self.feedback_rx) -> msg => {
                    if let Ok(event) = msg {
                        self.drain_feedback(event);
                    } else {
                        break;
                    }
                }
                recv(self.inbound_rx) -> msg => {
                    match msg {
                        Ok(event) => self.drain_inbound(event),
                        Err(_) => break,
                    }
                }
                default(TICK_INTERVAL) => {
                    self.on_tick();
                }
            }
        }
        tracing::info!(shard_id = self.shard_id, "shard worker stopped");
    }

    fn drain_inbound(&mut self, first: ShardEvent) {
        let mut batch = vec![first];
        while batch.len() < self.sharding.drain_batch_size {
            match self.inbound_rx.try_recv() {
                Ok(event) => batch.push(event),
                Err(_) => break,
            }
        }
        for event in batch {
            self.process_event(event);
        }
    }

    fn drain_feedback(&mut self, first: FeedbackEvent) {
        let mut batch = vec![first];
        while batch.len() < self.sharding.feedback_drain_size {
            match self.feedback_rx.try_recv() {
                Ok(event) => batch.push(event),
                Err(_) => break,
            }
        }
        for event in batch {
            self.apply_feedback(event);
        }
    }

    fn process_event(&mut self, event: ShardEvent) {
        let started = Instant::now();
        let profile_config = &self.profile_config;
        let profile = self
            .registry
            .get_or_create(event.entity_hash, || Profile::new(event.entity_hash, profile_config));

        let scores = profile.update(event.value, event.timestamp_ns);
        if profile.detector_panics() >= DETECTOR_PANIC_DEGRADE_THRESHOLD {
            self.stats.health_degraded.store(true, Ordering::Relaxed);
        }
        let combined = profile.combine(&scores);
        let anomalous = profile.is_anomalous(&scores, &combined, &self.profile_config.ensemble);

        self.stats.events_processed.fetch_add(1, Ordering::Relaxed);
        self.events_since_tick += 1;
        self.events_since_checkpoint += 1;

        // §4.6 step 2: policy application runs on every event, not only
        // anomalous ones — `adjust_prior` rules must bias detector weights
        // regardless of whether this particular event fires a signal.
        let active_policy = self.policy.snapshot_for(event.entity_hash);
        let (outcome, priors) = active_policy.evaluate(
            event.entity_hash,
            combined.primary,
            combined.confidence,
            unix_seconds(event.timestamp_ns),
        );
        if !priors.is_empty() {
            for delta in priors {
                profile.apply_prior_delta(delta.detector_id, delta.alpha_delta, delta.beta_delta);
            }
        }

        if anomalous && !outcome.suppressed {
            let ensemble_score = (combined.ensemble_score * outcome.score_scale).clamp(0.0, 1.0);
            let confidence = (combined.confidence * outcome.confidence_scale).clamp(0.0, 1.0);
            let bitmask = fired_bitmask(&scores, self.profile_config.ensemble.detector_fire_threshold);
            let signal = AnomalySignal {
                schema_version: gatekeeper_core::SIGNAL_SCHEMA_VERSION,
                entity_hash: event.entity_hash,
                timestamp: event.timestamp_ns,
                ensemble_score,
                severity: Severity::from_score(ensemble_score),
                primary_detector_id: combined.primary,
                detectors_fired_bitmask: bitmask,
                confidence,
                detector_scores: scores,
                policy_version: active_policy.version.clone(),
                attribution: Attribution {
                    primary: combined.primary,
                    secondary: combined.secondary,
                    reason: outcome
                        .matched_rule
                        .unwrap_or_else(|| format!("ensemble_score={ensemble_score:.3}")),
                },
            };
            self.stats.record_signal(bitmask);
            if self.forwarder_tx.try_send(signal).is_err() {
                self.drops.record(DropClass::Forwarder);
            }
        }

        let elapsed_us = started.elapsed().as_micros() as f64;
        self.latency_p50.update(elapsed_us);
        self.latency_p95.update(elapsed_us);
        self.latency_p99.update(elapsed_us);
    }

    fn apply_feedback(&mut self, event: FeedbackEvent) {
        let ensemble_config = &self.profile_config.ensemble;
        if let Some(profile) = self.registry.peek_mut(event.entity_hash) {
            profile.apply_feedback(&event, ensemble_config);
            self.stats.feedback_applied.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn handle_checkpoint_request(&mut self, request: CheckpointRequest) {
        match self.serialize_shard() {
            Ok(bytes) => {
                let _ = request.reply.send(bytes);
            }
            Err(err) => {
                tracing::warn!(shard_id = self.shard_id, error = %err, "checkpoint serialize failed");
                self.drops.record(DropClass::Persistence);
                let _ = request.reply.send(Vec::new());
            }
        }
    }

    /// Loads checkpointed profiles into this shard's registry. Only ever
    /// sent before the front-end starts accepting ingest traffic
    /// (§4.7 "`import(blob)` is only valid at startup"), so there is no
    /// concern about racing with live `process_event` mutation.
    fn handle_import_request(&mut self, request: ImportRequest) {
        let restored = request.profiles.len();
        for profile in request.profiles {
            let entity_hash = profile.entity_hash();
            self.registry.get_or_create(entity_hash, || profile);
        }
        self.stats
            .active_profiles
            .store(self.registry.len(), Ordering::Relaxed);
        tracing::info!(shard_id = self.shard_id, restored, "checkpoint import complete");
        let _ = request.reply.send(());
    }

    fn serialize_shard(&self) -> gatekeeper_core::Result<Vec<u8>> {
        let profiles: Vec<Vec<u8>> = self
            .registry
            .values()
            .map(|p| p.serialize())
            .collect::<gatekeeper_core::Result<_>>()?;
        bincode::serialize(&profiles).map_err(gatekeeper_core::CoreError::Codec)
    }

    fn on_tick(&mut self) {
        let now = Instant::now();
        if now.duration_since(self.last_tick) >= TICK_INTERVAL || self.events_since_tick >= 10_000 {
            let idle_cutoff = self.sharding.idle_expire_secs * 1_000_000_000;
            let now_ns = unix_now_ns();
            let evicted = self.registry.expire_idle(now_ns, idle_cutoff);
            if evicted > 0 {
                self.stats.evictions.fetch_add(evicted, Ordering::Relaxed);
            }
            self.stats
                .active_profiles
                .store(self.registry.len(), Ordering::Relaxed);
            *self.stats.latency_us.lock() = LatencyPercentiles {
                p50_us: self.latency_p50.value(),
                p95_us: self.latency_p95.value(),
                p99_us: self.latency_p99.value(),
            };
            self.events_since_tick = 0;
            self.last_tick = now;
        }
        self.maybe_emit_periodic_checkpoint(now);
    }

    /// §4.6 step 4: periodically emit a checkpoint request to the
    /// persistence collaborator, on the cadence configured by
    /// `CheckpointConfig.interval_events`/`interval_secs`. Reuses
    /// `handle_checkpoint_request` (the same mechanism `GET
    /// /checkpoint/export` drives) against a locally-built one-shot
    /// channel, since the shard thread cannot send itself a message on its
    /// own inbound `checkpoint_rx` and then wait on it.
    fn maybe_emit_periodic_checkpoint(&mut self, now: Instant) {
        let due_by_events = self.events_since_checkpoint >= self.checkpoint_config.interval_events;
        let due_by_time = now.duration_since(self.last_checkpoint)
            >= Duration::from_secs(self.checkpoint_config.interval_secs.max(1));
        if !due_by_events && !due_by_time {
            return;
        }

        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        self.handle_checkpoint_request(CheckpointRequest { reply: reply_tx });
        if let Ok(payload) = reply_rx.try_recv() {
            // An empty payload means `handle_checkpoint_request` already
            // logged and counted a serialize failure.
            if !payload.is_empty() {
                let checkpoint_id = self.next_checkpoint_id;
                self.next_checkpoint_id += 1;
                let frame = gatekeeper_storage::encode_container(self.shard_id as u16, checkpoint_id, &payload);
                match persist_checkpoint_frame(&self.checkpoint_config.dir, self.shard_id, &frame) {
                    Ok(()) => {
                        tracing::debug!(
                            shard_id = self.shard_id,
                            checkpoint_id,
                            bytes = frame.len(),
                            "periodic checkpoint persisted"
                        );
                    }
                    Err(err) => {
                        tracing::warn!(shard_id = self.shard_id, error = %err, "periodic checkpoint persist failed");
                        self.drops.record(DropClass::Persistence);
                    }
                }
            }
        }

        self.events_since_checkpoint = 0;
        self.last_checkpoint = now;
    }
}

fn persist_checkpoint_frame(dir: &std::path::Path, shard_id: usize, frame: &[u8]) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    std::fs::write(dir.join(format!("shard-{shard_id}.gkcp")), frame)
}

fn unix_now_ns() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

fn unix_seconds(timestamp_ns: u64) -> u64 {
    timestamp_ns / 1_000_000_000
}
