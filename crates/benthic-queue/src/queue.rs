//! # One message queue
//!
//! A queue holds the messages of one stream. Storage is a slab (stable
//! handles, O(1) remove) with a `VecDeque` of handles carrying FIFO order and
//! a `frame → handles` map tracking entries in flight awaiting ack. Every
//! entry lives in exactly one of the two index structures:
//!
//! ```text
//!  push ──▶ fifo ──select/take──▶ waiting_for_ack ──ack──▶ gone
//!             ▲                        │
//!             └────────── nack ────────┘ (back to the head)
//! ```
//!
//! TTL expiry removes from either side. All operations are bounded and
//! non-blocking; the caller supplies `now` from its clock.

use quanta::Instant;
use serde::{Deserialize, Serialize};
use slab::Slab;
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use bytes::Bytes;

use crate::error::QueueError;
use crate::message::{DataRequest, QueuedMessage};

/// Elapsed-seconds clamp making never-sent queues maximal but finite.
pub(crate) const SCORE_ELAPSED_CLAMP: f64 = 86_400.0;

// ─── Configuration ──────────────────────────────────────────────────────────

/// Per-stream queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub stream_id: u32,
    pub name: String,
    /// Max queued (not yet sent) entries; 0 means unbounded.
    pub capacity: usize,
    /// Default lifetime for pushed messages.
    pub ttl: Duration,
    /// Default `P0`.
    pub base_priority: f64,
    /// Default `τ`.
    pub time_constant: Duration,
    /// Default per-message ack request.
    pub ack: bool,
    /// Never buffer: ask a producer for data at selection time.
    pub on_demand: bool,
    /// Restrict this queue to one destination.
    pub dest_filter: Option<i32>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            stream_id: 0,
            name: String::new(),
            capacity: 100,
            ttl: Duration::from_secs(1800),
            base_priority: 1.0,
            time_constant: Duration::from_secs(60),
            ack: false,
            on_demand: false,
            dest_filter: None,
        }
    }
}

impl QueueConfig {
    pub fn new(stream_id: u32, name: impl Into<String>) -> Self {
        QueueConfig {
            stream_id,
            name: name.into(),
            ..Default::default()
        }
    }

    /// Build a message with this queue's default scheduling parameters.
    pub fn message(&self, data: Bytes, dest: i32) -> QueuedMessage {
        QueuedMessage {
            data,
            dest,
            src: 0,
            ack_requested: self.ack,
            ttl: self.ttl,
            base_priority: self.base_priority,
            time_constant: self.time_constant,
            send_attempts: 0,
        }
    }
}

// ─── Queue ──────────────────────────────────────────────────────────────────

/// Opaque handle to an entry, valid until the entry leaves the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryHandle(usize);

#[derive(Debug)]
struct Entry {
    msg: QueuedMessage,
    pushed_at: Instant,
    /// Set while parked on the ack map.
    frame: Option<u32>,
}

/// Outcome of a push that may have displaced an older entry.
#[derive(Debug)]
pub struct PushOutcome {
    pub evicted: Option<QueuedMessage>,
}

/// FIFO of one stream plus the in-flight ack map.
pub struct Queue {
    cfg: QueueConfig,
    entries: Slab<Entry>,
    fifo: VecDeque<usize>,
    waiting_for_ack: BTreeMap<u32, Vec<usize>>,
    last_send: Option<Instant>,
}

impl Queue {
    pub fn new(cfg: QueueConfig) -> Self {
        Queue {
            cfg,
            entries: Slab::new(),
            fifo: VecDeque::new(),
            waiting_for_ack: BTreeMap::new(),
            last_send: None,
        }
    }

    pub fn cfg(&self) -> &QueueConfig {
        &self.cfg
    }

    /// Entries in any state (queued or pending ack).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries waiting to be selected.
    pub fn queued_len(&self) -> usize {
        self.fifo.len()
    }

    /// Entries in flight on the ack map.
    pub fn pending_ack_len(&self) -> usize {
        self.waiting_for_ack.values().map(Vec::len).sum()
    }

    pub fn last_send_time(&self) -> Option<Instant> {
        self.last_send
    }

    /// Push time of the most recently queued entry.
    pub fn newest_msg_time(&self) -> Option<Instant> {
        self.fifo
            .iter()
            .filter_map(|&k| self.entries.get(k))
            .map(|e| e.pushed_at)
            .max()
    }

    // ─── Scoring ────────────────────────────────────────────────────────

    fn elapsed_since_send(&self, now: Instant) -> f64 {
        match self.last_send {
            Some(ts) => now.duration_since(ts).as_secs_f64().min(SCORE_ELAPSED_CLAMP),
            None => SCORE_ELAPSED_CLAMP,
        }
    }

    fn score_with(&self, base_priority: f64, time_constant: Duration, now: Instant) -> f64 {
        let tau = time_constant.as_secs_f64().max(f64::EPSILON);
        base_priority * self.elapsed_since_send(now) / tau
    }

    /// Priority score from the queue's own configured parameters, used for
    /// on-demand queues that hold no entries.
    pub fn config_score(&self, now: Instant) -> f64 {
        self.score_with(self.cfg.base_priority, self.cfg.time_constant, now)
    }

    fn entry_score(&self, entry: &Entry, now: Instant) -> f64 {
        self.score_with(entry.msg.base_priority, entry.msg.time_constant, now)
    }

    // ─── Push / eviction ────────────────────────────────────────────────

    /// Append a message. At capacity (queued plus in-flight entries), the
    /// queued entry with the lowest current score is evicted first (ties
    /// broken by oldest push time); entries pending ack are not evictable,
    /// so a queue whose whole capacity is in flight fails with
    /// [`QueueError::Full`].
    pub fn push(&mut self, msg: QueuedMessage, now: Instant) -> Result<PushOutcome, QueueError> {
        let mut evicted = None;
        if self.cfg.capacity > 0 && self.entries.len() >= self.cfg.capacity {
            let victim = self.lowest_scoring_queued(now).ok_or(QueueError::Full {
                stream_id: self.cfg.stream_id,
            })?;
            let old = self.remove_queued(victim);
            tracing::debug!(
                stream_id = self.cfg.stream_id,
                "queue at capacity, evicting lowest-priority entry"
            );
            evicted = Some(old);
        }
        let key = self.entries.insert(Entry {
            msg,
            pushed_at: now,
            frame: None,
        });
        self.fifo.push_back(key);
        Ok(PushOutcome { evicted })
    }

    fn lowest_scoring_queued(&self, now: Instant) -> Option<usize> {
        let mut best: Option<(f64, Instant, usize)> = None;
        for &key in &self.fifo {
            let Some(entry) = self.entries.get(key) else {
                continue;
            };
            let score = self.entry_score(entry, now);
            let better = match &best {
                None => true,
                Some((s, t, _)) => score < *s || (score == *s && entry.pushed_at < *t),
            };
            if better {
                best = Some((score, entry.pushed_at, key));
            }
        }
        best.map(|(_, _, k)| k)
    }

    fn remove_queued(&mut self, key: usize) -> QueuedMessage {
        self.fifo.retain(|&k| k != key);
        self.entries.remove(key).msg
    }

    // ─── Selection ──────────────────────────────────────────────────────

    /// Highest-scoring queued entry that matches the request destination,
    /// fits in `max_bytes`, and has not outlived its TTL. Ties fall back to
    /// FIFO order. Expired entries are skipped here and reaped by
    /// [`Queue::expire`].
    pub fn select_for_send(
        &self,
        request: &DataRequest,
        max_bytes: usize,
        now: Instant,
    ) -> Option<(EntryHandle, f64)> {
        let mut best: Option<(f64, usize)> = None;
        for &key in &self.fifo {
            let Some(entry) = self.entries.get(key) else {
                continue;
            };
            if entry.pushed_at + entry.msg.ttl <= now {
                continue;
            }
            if !entry.msg.matches_dest(request.dest) {
                continue;
            }
            if let Some(filter) = self.cfg.dest_filter {
                if entry.msg.dest != filter {
                    continue;
                }
            }
            if entry.msg.data.len() > max_bytes {
                continue;
            }
            let score = self.entry_score(entry, now);
            // Strict comparison keeps the earliest entry on ties.
            if best.is_none_or(|(s, _)| score > s) {
                best = Some((score, key));
            }
        }
        best.map(|(s, k)| (EntryHandle(k), s))
    }

    /// Move a selected entry out for transmission on `frame`.
    ///
    /// Ack-requested entries park on the ack map; others complete
    /// immediately. Returns the message (cloned for parked entries).
    pub fn take(&mut self, handle: EntryHandle, frame: u32, now: Instant) -> Option<QueuedMessage> {
        let key = handle.0;
        if !self.entries.contains(key) {
            return None;
        }
        self.fifo.retain(|&k| k != key);
        self.last_send = Some(now);

        let entry = self.entries.get_mut(key)?;
        entry.msg.send_attempts += 1;
        if entry.msg.ack_requested {
            entry.frame = Some(frame);
            let msg = entry.msg.clone();
            self.waiting_for_ack.entry(frame).or_default().push(key);
            Some(msg)
        } else {
            Some(self.entries.remove(key).msg)
        }
    }

    /// Track an unbuffered (on-demand) message in flight on `frame`.
    pub fn park_on_demand(&mut self, msg: QueuedMessage, frame: u32, now: Instant) {
        self.last_send = Some(now);
        if !msg.ack_requested {
            return;
        }
        let key = self.entries.insert(Entry {
            msg,
            pushed_at: now,
            frame: Some(frame),
        });
        self.waiting_for_ack.entry(frame).or_default().push(key);
    }

    // ─── Ack / nack ─────────────────────────────────────────────────────

    /// Remove and return the next entry pending on `frame`, FIFO within the
    /// frame. `None` is legal: the entry may have expired already.
    pub fn pop_on_ack(&mut self, frame: u32) -> Option<QueuedMessage> {
        let pending = self.waiting_for_ack.get_mut(&frame)?;
        let key = if pending.is_empty() {
            None
        } else {
            Some(pending.remove(0))
        };
        if pending.is_empty() {
            self.waiting_for_ack.remove(&frame);
        }
        self.entries.try_remove(key?).map(|e| e.msg)
    }

    /// Return one entry pending on `frame` to the *head* of the FIFO so
    /// retransmission order is preserved. Draining a multi-entry frame by
    /// repeated calls restores the original order.
    pub fn pop_on_nack(&mut self, frame: u32) -> Option<QueuedMessage> {
        let pending = self.waiting_for_ack.get_mut(&frame)?;
        // Last first: each pop_front'd entry lands ahead of the previous one.
        let key = pending.pop()?;
        if pending.is_empty() {
            self.waiting_for_ack.remove(&frame);
        }
        let entry = self.entries.get_mut(key)?;
        entry.frame = None;
        self.fifo.push_front(key);
        Some(entry.msg.clone())
    }

    /// Return every in-flight entry to the queue, preserving order.
    pub fn clear_pending(&mut self) {
        let frames: Vec<u32> = self.waiting_for_ack.keys().copied().collect();
        for frame in frames.into_iter().rev() {
            while self.pop_on_nack(frame).is_some() {}
        }
    }

    // ─── Expiry ─────────────────────────────────────────────────────────

    /// Remove and return every entry past its TTL, from the FIFO and the
    /// ack map alike.
    pub fn expire(&mut self, now: Instant) -> Vec<QueuedMessage> {
        let dead: Vec<usize> = self
            .entries
            .iter()
            .filter(|(_, e)| e.pushed_at + e.msg.ttl <= now)
            .map(|(k, _)| k)
            .collect();
        let mut out = Vec::with_capacity(dead.len());
        for key in dead {
            self.fifo.retain(|&k| k != key);
            for pending in self.waiting_for_ack.values_mut() {
                pending.retain(|&k| k != key);
            }
            self.waiting_for_ack.retain(|_, v| !v.is_empty());
            out.push(self.entries.remove(key).msg);
        }
        if !out.is_empty() {
            tracing::debug!(
                stream_id = self.cfg.stream_id,
                expired = out.len(),
                "entries outlived their ttl"
            );
        }
        out
    }

    /// Drop everything, queued and pending.
    pub fn flush(&mut self) {
        self.entries.clear();
        self.fifo.clear();
        self.waiting_for_ack.clear();
    }
}
