// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Offline queue: durable at-least-once buffer for outbound records.
//!
//! Disk layout under `<state_dir>/queue/`:
//!
//! ```text
//! segment-YYYY-MM-DD.log   -- append-only frames (4-byte BE length + JSON)
//! tombstones.log           -- JSON lines of delivered/dead sequence numbers
//! dead/<seq>.json          -- dead-lettered entries kept for forensics
//! archive/<segment>.zst    -- rotated segments, compressed
//! ```
//!
//! Single writer, single reader. Appends are fsync'd before return; a
//! delivery is acknowledged by an fsync'd tombstone. Rotation compacts
//! undelivered entries into the new day's segment and compresses the old
//! one into the archive. At the soft cap, evidence evicts older entries
//! and never drops; non-evidence waits up to [`BACKPRESSURE_WAIT`] for a
//! slot before dropping.

use chrono::NaiveDate;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Soft cap: entries.
pub const SOFT_CAP_ENTRIES: usize = 10_000;
/// Soft cap: age in days.
pub const SOFT_CAP_DAYS: i64 = 7;
/// How long a non-evidence enqueue waits for space at the cap before the
/// entry is dropped.
pub const BACKPRESSURE_WAIT: Duration = Duration::from_secs(5);
/// Fallback poll while waiting, in case no delivery wakes the waiter.
const BACKPRESSURE_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("corrupt queue frame in {path}: {detail}")]
    Corrupt { path: PathBuf, detail: String },
    #[error("unknown queue entry seq {0}")]
    Unknown(u64),
}

/// Outbound record kinds, each with its own delivery endpoint and FIFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueKind {
    Evidence,
    Incident,
    PatternStat,
    Execution,
    DomainDiscovery,
    EnumerationResult,
    CheckinMeta,
}

dw_core::simple_display! {
    QueueKind {
        Evidence => "evidence",
        Incident => "incident",
        PatternStat => "pattern_stat",
        Execution => "execution",
        DomainDiscovery => "domain_discovery",
        EnumerationResult => "enumeration_result",
        CheckinMeta => "checkin_meta",
    }
}

impl QueueKind {
    pub const ALL: [QueueKind; 7] = [
        QueueKind::Evidence,
        QueueKind::Incident,
        QueueKind::PatternStat,
        QueueKind::Execution,
        QueueKind::DomainDiscovery,
        QueueKind::EnumerationResult,
        QueueKind::CheckinMeta,
    ];
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub seq: u64,
    pub kind: QueueKind,
    pub payload: Value,
    /// RFC-3339 UTC enqueue time.
    pub enqueued_at: String,
    #[serde(default)]
    pub attempts: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct Tombstone {
    seq: u64,
    #[serde(default)]
    dead: bool,
}

/// Result of an enqueue under the cap policy.
#[derive(Debug, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued(u64),
    /// The incoming entry was dropped (queue full of evidence and the
    /// entry is not evidence).
    Dropped,
}

pub struct OfflineQueue {
    dir: PathBuf,
    inner: Mutex<Inner>,
    /// Wakes backpressured enqueues when a delivery frees a slot.
    space: tokio::sync::Notify,
}

struct Inner {
    next_seq: u64,
    entries: BTreeMap<u64, QueueEntry>,
    segment: File,
    segment_day: NaiveDate,
    tombstones: File,
    dropped: u64,
}

impl OfflineQueue {
    pub fn open(dir: &Path, today: NaiveDate) -> Result<Self, QueueError> {
        std::fs::create_dir_all(dir.join("dead"))?;
        std::fs::create_dir_all(dir.join("archive"))?;

        // Replay every live segment, oldest first
        let mut entries: BTreeMap<u64, QueueEntry> = BTreeMap::new();
        let mut segments: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("segment-") && n.ends_with(".log"))
            })
            .collect();
        segments.sort();
        for segment in &segments {
            for entry in read_frames(segment)? {
                entries.insert(entry.seq, entry);
            }
        }

        // Drop delivered/dead entries
        let tomb_path = dir.join("tombstones.log");
        let mut tombstoned: HashSet<u64> = HashSet::new();
        if let Ok(text) = std::fs::read_to_string(&tomb_path) {
            for line in text.lines() {
                if let Ok(t) = serde_json::from_str::<Tombstone>(line) {
                    tombstoned.insert(t.seq);
                }
            }
        }
        entries.retain(|seq, _| !tombstoned.contains(seq));

        let next_seq = entries
            .keys()
            .last()
            .copied()
            .max(tombstoned.iter().max().copied())
            .map_or(1, |max| max + 1);

        let segment = open_append(&segment_path(dir, today))?;
        let tombstones = open_append(&tomb_path)?;
        tracing::info!(
            pending = entries.len(),
            next_seq,
            dir = %dir.display(),
            "offline queue opened"
        );
        Ok(Self {
            dir: dir.to_path_buf(),
            inner: Mutex::new(Inner {
                next_seq,
                entries,
                segment,
                segment_day: today,
                tombstones,
                dropped: 0,
            }),
            space: tokio::sync::Notify::new(),
        })
    }

    /// Append with bounded backpressure. Evidence never drops: at the cap
    /// it evicts the oldest non-evidence entry, then the oldest evidence.
    /// A non-evidence entry arriving at a queue full of evidence blocks
    /// for up to [`BACKPRESSURE_WAIT`] for space before dropping.
    pub async fn enqueue(
        &self,
        kind: QueueKind,
        payload: Value,
        enqueued_at: String,
    ) -> Result<EnqueueOutcome, QueueError> {
        let deadline = tokio::time::Instant::now() + BACKPRESSURE_WAIT;
        loop {
            if let Some(seq) = self.offer(kind, &payload, &enqueued_at)? {
                return Ok(EnqueueOutcome::Enqueued(seq));
            }
            if tokio::time::Instant::now() >= deadline {
                self.record_drop(kind);
                return Ok(EnqueueOutcome::Dropped);
            }
            // Woken early when a delivery or dead-letter frees a slot
            tokio::select! {
                _ = self.space.notified() => {}
                _ = tokio::time::sleep(BACKPRESSURE_POLL) => {}
            }
        }
    }

    /// Immediate append under the cap policy; no waiting. A non-evidence
    /// entry that finds the queue full of evidence is dropped right away.
    /// Synchronous callers (the evidence pipeline, tests) use this; the
    /// async [`OfflineQueue::enqueue`] adds the bounded wait.
    pub fn try_enqueue(
        &self,
        kind: QueueKind,
        payload: Value,
        enqueued_at: String,
    ) -> Result<EnqueueOutcome, QueueError> {
        match self.offer(kind, &payload, &enqueued_at)? {
            Some(seq) => Ok(EnqueueOutcome::Enqueued(seq)),
            None => {
                self.record_drop(kind);
                Ok(EnqueueOutcome::Dropped)
            }
        }
    }

    /// One cap-policy attempt: `Some(seq)` on append, `None` when the
    /// queue is at the cap with nothing evictable for this kind.
    fn offer(
        &self,
        kind: QueueKind,
        payload: &Value,
        enqueued_at: &str,
    ) -> Result<Option<u64>, QueueError> {
        let mut inner = self.inner.lock();
        while inner.entries.len() >= SOFT_CAP_ENTRIES {
            let victim = inner
                .entries
                .iter()
                .find(|(_, e)| e.kind != QueueKind::Evidence)
                .map(|(seq, _)| *seq)
                .or_else(|| {
                    if kind == QueueKind::Evidence {
                        inner.entries.keys().next().copied()
                    } else {
                        None
                    }
                });
            match victim {
                Some(seq) => {
                    evict(&mut inner, seq)?;
                }
                None => return Ok(None),
            }
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        let entry = QueueEntry {
            seq,
            kind,
            payload: payload.clone(),
            enqueued_at: enqueued_at.to_string(),
            attempts: 0,
        };
        write_frame(&mut inner.segment, &entry)?;
        inner.segment.sync_data()?;
        inner.entries.insert(seq, entry);
        Ok(Some(seq))
    }

    fn record_drop(&self, kind: QueueKind) {
        let mut inner = self.inner.lock();
        inner.dropped += 1;
        tracing::warn!(%kind, dropped = inner.dropped, "queue full, entry dropped");
    }

    /// Oldest undelivered entry of a kind (delivery is FIFO per kind).
    pub fn peek(&self, kind: QueueKind) -> Option<QueueEntry> {
        self.inner
            .lock()
            .entries
            .values()
            .find(|e| e.kind == kind)
            .cloned()
    }

    /// Kinds with pending entries, for the drain loop.
    pub fn pending_kinds(&self) -> Vec<QueueKind> {
        let inner = self.inner.lock();
        QueueKind::ALL
            .into_iter()
            .filter(|k| inner.entries.values().any(|e| e.kind == *k))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Count of entries dropped by the cap policy since open.
    pub fn dropped_count(&self) -> u64 {
        self.inner.lock().dropped
    }

    /// Record a delivery attempt; returns the new attempt count.
    pub fn record_attempt(&self, seq: u64) -> Result<u32, QueueError> {
        let mut inner = self.inner.lock();
        let entry = inner.entries.get_mut(&seq).ok_or(QueueError::Unknown(seq))?;
        entry.attempts += 1;
        Ok(entry.attempts)
    }

    /// Acknowledge delivery: fsync'd tombstone, entry removed.
    pub fn mark_delivered(&self, seq: u64) -> Result<(), QueueError> {
        {
            let mut inner = self.inner.lock();
            if inner.entries.remove(&seq).is_none() {
                return Err(QueueError::Unknown(seq));
            }
            write_tombstone(&mut inner.tombstones, seq, false)?;
        }
        self.space.notify_waiters();
        Ok(())
    }

    /// Dead-letter an entry: kept on disk for forensics, skipped by the
    /// sender from now on.
    pub fn mark_dead(&self, seq: u64, reason: &str) -> Result<(), QueueError> {
        {
            let mut inner = self.inner.lock();
            let Some(mut entry) = inner.entries.remove(&seq) else {
                return Err(QueueError::Unknown(seq));
            };
            entry.attempts += 1;
            let record = serde_json::json!({ "entry": entry, "reason": reason });
            let path = self.dir.join("dead").join(format!("{seq}.json"));
            crate::write_atomic(&path, &serde_json::to_vec_pretty(&record).unwrap_or_default())?;
            write_tombstone(&mut inner.tombstones, seq, true)?;
            tracing::warn!(seq, reason, "queue entry dead-lettered");
        }
        self.space.notify_waiters();
        Ok(())
    }

    /// Daily rotation: age out expired entries, rewrite survivors into the
    /// new day's segment, archive old segments compressed, reset the
    /// tombstone log.
    pub fn rotate(&self, today: NaiveDate) -> Result<(), QueueError> {
        let mut inner = self.inner.lock();
        if inner.segment_day == today {
            return Ok(());
        }

        // Age cap: drop entries older than 7 days, non-evidence first
        let cutoff = today - chrono::Duration::days(SOFT_CAP_DAYS);
        let expired: Vec<u64> = inner
            .entries
            .values()
            .filter(|e| {
                dw_core::parse_rfc3339(&e.enqueued_at)
                    .map(|t| t.date_naive() < cutoff)
                    .unwrap_or(false)
            })
            .map(|e| e.seq)
            .collect();
        let (non_evidence, evidence): (Vec<u64>, Vec<u64>) = expired
            .into_iter()
            .partition(|seq| inner.entries[seq].kind != QueueKind::Evidence);
        for seq in non_evidence.into_iter().chain(evidence) {
            inner.entries.remove(&seq);
            inner.dropped += 1;
        }

        // New segment with just the survivors
        let new_path = segment_path(&self.dir, today);
        let mut new_segment = open_append(&new_path)?;
        for entry in inner.entries.values() {
            write_frame(&mut new_segment, entry)?;
        }
        new_segment.sync_data()?;

        // Archive old segments
        let old: Vec<PathBuf> = std::fs::read_dir(&self.dir)?
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| {
                p != &new_path
                    && p.file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with("segment-") && n.ends_with(".log"))
            })
            .collect();
        for path in old {
            archive_segment(&self.dir, &path)?;
        }

        // Tombstones referenced the archived segments; start fresh
        let tomb_path = self.dir.join("tombstones.log");
        crate::write_atomic(&tomb_path, b"")?;
        inner.tombstones = open_append(&tomb_path)?;
        inner.segment = new_segment;
        inner.segment_day = today;
        tracing::info!(day = %today, pending = inner.entries.len(), "queue rotated");
        Ok(())
    }
}

fn segment_path(dir: &Path, day: NaiveDate) -> PathBuf {
    dir.join(format!("segment-{}.log", day.format("%Y-%m-%d")))
}

fn open_append(path: &Path) -> Result<File, QueueError> {
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

fn write_frame(file: &mut File, entry: &QueueEntry) -> Result<(), QueueError> {
    let payload = serde_json::to_vec(entry).map_err(|e| QueueError::Corrupt {
        path: PathBuf::new(),
        detail: e.to_string(),
    })?;
    file.write_all(&(payload.len() as u32).to_be_bytes())?;
    file.write_all(&payload)?;
    Ok(())
}

fn write_tombstone(file: &mut File, seq: u64, dead: bool) -> Result<(), QueueError> {
    let mut line = serde_json::to_vec(&Tombstone { seq, dead }).map_err(|e| {
        QueueError::Corrupt { path: PathBuf::new(), detail: e.to_string() }
    })?;
    line.push(b'\n');
    file.write_all(&line)?;
    file.sync_data()?;
    Ok(())
}

fn read_frames(path: &Path) -> Result<Vec<QueueEntry>, QueueError> {
    let mut bytes = Vec::new();
    File::open(path)?.read_to_end(&mut bytes)?;
    let mut entries = Vec::new();
    let mut at = 0usize;
    while at + 4 <= bytes.len() {
        let len = u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
            as usize;
        at += 4;
        if at + len > bytes.len() {
            // Torn tail frame after a crash; everything before it is good
            tracing::warn!(path = %path.display(), "torn queue frame dropped");
            break;
        }
        match serde_json::from_slice::<QueueEntry>(&bytes[at..at + len]) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                return Err(QueueError::Corrupt {
                    path: path.to_path_buf(),
                    detail: e.to_string(),
                })
            }
        }
        at += len;
    }
    Ok(entries)
}

fn evict(inner: &mut Inner, seq: u64) -> Result<(), QueueError> {
    inner.entries.remove(&seq);
    inner.dropped += 1;
    write_tombstone(&mut inner.tombstones, seq, false)?;
    tracing::warn!(seq, dropped = inner.dropped, "queue cap eviction");
    Ok(())
}

fn archive_segment(dir: &Path, segment: &Path) -> Result<(), QueueError> {
    let name = segment
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("segment")
        .to_string();
    let mut raw = Vec::new();
    File::open(segment)?.read_to_end(&mut raw)?;
    let compressed = zstd::encode_all(raw.as_slice(), 3).map_err(QueueError::Io)?;
    crate::write_atomic(&dir.join("archive").join(format!("{name}.zst")), &compressed)?;
    std::fs::remove_file(segment)?;
    Ok(())
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
