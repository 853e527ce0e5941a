// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Offline-queue drain: per-kind FIFO delivery with full-jitter backoff.

use crate::client::{CommandClient, DeliveryOutcome};
use dw_storage::{OfflineQueue, QueueKind};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

const BACKOFF_BASE: Duration = Duration::from_secs(5);
const BACKOFF_CAP: Duration = Duration::from_secs(600);

#[derive(Debug, Default, Clone, Copy)]
pub struct DrainStats {
    pub delivered: usize,
    pub retried: usize,
    pub dead: usize,
}

/// Single reader of the offline queue.
pub struct QueueSender {
    queue: Arc<OfflineQueue>,
    client: Arc<CommandClient>,
    /// Per-kind hold-off: the head entry's next attempt time.
    holdoff: Mutex<HashMap<QueueKind, Instant>>,
}

impl QueueSender {
    pub fn new(queue: Arc<OfflineQueue>, client: Arc<CommandClient>) -> Self {
        Self { queue, client, holdoff: Mutex::new(HashMap::new()) }
    }

    /// One drain pass: for each kind with pending entries past its
    /// hold-off, deliver from the head until the first failure. Within a
    /// kind delivery is strictly FIFO; a retrying head blocks its kind,
    /// never the others.
    pub async fn drain_once(&self) -> DrainStats {
        let mut stats = DrainStats::default();
        for kind in self.queue.pending_kinds() {
            if let Some(until) = self.holdoff.lock().get(&kind) {
                if Instant::now() < *until {
                    continue;
                }
            }
            loop {
                let Some(entry) = self.queue.peek(kind) else { break };
                match self.client.deliver(kind, &entry.payload).await {
                    DeliveryOutcome::Delivered => {
                        if let Err(e) = self.queue.mark_delivered(entry.seq) {
                            tracing::error!(seq = entry.seq, error = %e, "tombstone write failed");
                            break;
                        }
                        self.holdoff.lock().remove(&kind);
                        stats.delivered += 1;
                    }
                    DeliveryOutcome::Retry(reason) => {
                        let attempts = self.queue.record_attempt(entry.seq).unwrap_or(1);
                        let delay = backoff_delay(attempts);
                        self.holdoff.lock().insert(kind, Instant::now() + delay);
                        tracing::debug!(
                            %kind,
                            seq = entry.seq,
                            attempts,
                            delay_ms = delay.as_millis() as u64,
                            %reason,
                            "delivery deferred"
                        );
                        stats.retried += 1;
                        break;
                    }
                    DeliveryOutcome::Dead(reason) => {
                        if let Err(e) = self.queue.mark_dead(entry.seq, &reason) {
                            tracing::error!(seq = entry.seq, error = %e, "dead-letter failed");
                            break;
                        }
                        stats.dead += 1;
                        // Head removed; the next entry of this kind may go
                    }
                }
            }
        }
        stats
    }
}

/// Full jitter: uniform in [0, min(cap, base * 2^(attempts-1))].
fn backoff_delay(attempts: u32) -> Duration {
    let exp = attempts.saturating_sub(1).min(16);
    let ceiling = BACKOFF_BASE
        .saturating_mul(2u32.saturating_pow(exp))
        .min(BACKOFF_CAP);
    let millis = ceiling.as_millis() as u64;
    Duration::from_millis(rand::thread_rng().gen_range(0..=millis))
}

#[cfg(test)]
#[path = "sender_tests.rs"]
mod tests;
