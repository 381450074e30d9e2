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

//! Signal forwarder: batches emitted `AnomalySignal`s and ships them to
//! Tier-2 over HTTP. Size-or-timeout draining, split across a sync/async
//! boundary: shard workers publish to a `crossbeam_channel` (shard threads
//! never touch the async runtime directly), so a dedicated OS thread drains
//! that channel and hands batches to a tokio task over an `mpsc` channel for
//! delivery.

use crate::admission::{DropClass, DropCounters};
use crate::config::Tier2Config;
use gatekeeper_core::AnomalySignal;
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;

/// Spawns the batching thread and the async delivery task, returning the
/// channel shard workers publish signals to and a handle to the delivery
/// task (awaited by `run_server` alongside the HTTP listener).
pub fn spawn_forwarder(
    config: Tier2Config,
    drops: Arc<DropCounters>,
) -> (crossbeam_channel::Sender<AnomalySignal>, tokio::task::JoinHandle<()>) {
    let (signal_tx, signal_rx) = crossbeam_channel::bounded(config.outbound_channel_capacity);
    let (batch_tx, batch_rx) = tokio::sync::mpsc::channel::<Vec<AnomalySignal>>(64);

    let batch_size = config.batch_size;
    let flush_interval = Duration::from_millis(config.flush_interval_ms);
    std::thread::Builder::new()
        .name("gatekeeper-forwarder-batcher".into())
        .spawn(move || batch_worker(signal_rx, batch_tx, batch_size, flush_interval))
        .expect("failed to spawn forwarder batcher thread");

    let delivery = tokio::spawn(deliver_loop(config, batch_rx, drops));
    (signal_tx, delivery)
}

/// Drains `signal_rx` into size- or timeout-bounded batches and forwards
/// each completed batch across the sync/async boundary via `blocking_send`.
fn batch_worker(
    signal_rx: crossbeam_channel::Receiver<AnomalySignal>,
    batch_tx: tokio::sync::mpsc::Sender<Vec<AnomalySignal>>,
    batch_size: usize,
    flush_interval: Duration,
) {
    let mut buffer: Vec<AnomalySignal> = Vec::with_capacity(batch_size);
    let mut last_flush = Instant::now();
    loop {
        let remaining = flush_interval.saturating_sub(last_flush.elapsed());
        match signal_rx.recv_timeout(remaining) {
            Ok(signal) => {
                buffer.push(signal);
                if buffer.len() >= batch_size {
                    let batch = std::mem::replace(&mut buffer, Vec::with_capacity(batch_size));
                    if batch_tx.blocking_send(batch).is_err() {
                        break;
                    }
                    last_flush = Instant::now();
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                if !buffer.is_empty() {
                    let batch = std::mem::replace(&mut buffer, Vec::with_capacity(batch_size));
                    if batch_tx.blocking_send(batch).is_err() {
                        break;
                    }
                }
                last_flush = Instant::now();
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        }
    }
    tracing::info!("forwarder batcher thread stopped");
}

#[derive(Debug, Serialize)]
struct AnomaliesPayload<'a> {
    signals: &'a [AnomalySignal],
}

/// Consumes completed batches and delivers them to Tier-2, falling back to
/// a rotating file on persistent failure (§4.7, §7 "Forwarder send
/// failure").
async fn deliver_loop(
    config: Tier2Config,
    mut batch_rx: tokio::sync::mpsc::Receiver<Vec<AnomalySignal>>,
    drops: Arc<DropCounters>,
) {
    let client = if config.url.is_some() {
        Some(
            reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .expect("failed to build tier-2 http client"),
        )
    } else {
        tracing::warn!("TIER2_URL not set; signal forwarder will write directly to fallback file");
        None
    };

    while let Some(batch) = batch_rx.recv().await {
        if batch.is_empty() {
            continue;
        }
        let delivered = match (&client, &config.url) {
            (Some(client), Some(url)) => deliver_with_retry(client, url, &batch, &config).await,
            _ => false,
        };
        if !delivered {
            if let Err(err) = append_fallback(&config.fallback_path, &batch).await {
                tracing::error!(error = %err, "tier-2 fallback write failed");
                drops.record(DropClass::Forwarder);
            }
        }
    }
    tracing::info!("forwarder delivery task stopped");
}

/// Jittered exponential backoff: base 100ms, cap 5s, max 3 attempts
/// (§4.7). Returns `true` once Tier-2 acknowledges with a `2xx`.
async fn deliver_with_retry(
    client: &reqwest::Client,
    url: &str,
    batch: &[AnomalySignal],
    config: &Tier2Config,
) -> bool {
    let endpoint = format!("{}/tier2/anomalies", url.trim_end_matches('/'));
    let payload = AnomaliesPayload { signals: batch };

    for attempt in 0..config.backoff_max_attempts {
        match client.post(&endpoint).json(&payload).send().await {
            Ok(response) if response.status().is_success() => return true,
            Ok(response) => {
                tracing::warn!(
                    status = %response.status(),
                    attempt,
                    "tier-2 rejected anomaly batch"
                );
            }
            Err(err) => {
                tracing::warn!(error = %err, attempt, "tier-2 delivery attempt failed");
            }
        }
        if attempt + 1 < config.backoff_max_attempts {
            tokio::time::sleep(backoff_delay(attempt, config)).await;
        }
    }
    false
}

fn backoff_delay(attempt: u32, config: &Tier2Config) -> Duration {
    let exp = config.backoff_base_ms.saturating_mul(1u64 << attempt.min(16));
    let capped = exp.min(config.backoff_cap_ms);
    let jitter = rand::thread_rng().gen_range(0..=capped / 4 + 1);
    Duration::from_millis(capped + jitter)
}

/// Appends a batch to the rotating dead-letter file as newline-delimited
/// JSON, creating parent directories on first use.
async fn append_fallback(path: &std::path::Path, batch: &[AnomalySignal]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    let mut out = Vec::new();
    for signal in batch {
        serde_json::to_writer(&mut out, signal)?;
        out.push(b'\n');
    }
    file.write_all(&out).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_delay_grows_and_caps() {
        let config = Tier2Config {
            url: None,
            backoff_base_ms: 100,
            backoff_cap_ms: 500,
            backoff_max_attempts: 5,
            ..default_tier2_config_for_test()
        };
        let d0 = backoff_delay(0, &config);
        let d3 = backoff_delay(3, &config);
        assert!(d0.as_millis() >= 100);
        assert!(d3.as_millis() <= 500 + 500 / 4 + 1);
    }

    fn default_tier2_config_for_test() -> Tier2Config {
        Tier2Config {
            url: None,
            batch_size: 100,
            flush_interval_ms: 1000,
            backoff_base_ms: 100,
            backoff_max_attempts: 3,
            backoff_cap_ms: 5000,
            fallback_path: std::path::PathBuf::from("/tmp/gatekeeper-test-fallback.jsonl"),
            outbound_channel_capacity: 8192,
        }
    }
}
