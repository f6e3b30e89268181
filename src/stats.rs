//! Counters and running aggregates for the client
//!
//! Counters are monotonic and cheap to bump from any task. Aggregates
//! observe numeric samples and are snapshot-and-reset on `flush`, so each
//! stats report covers exactly one interval.

use crate::transport::PoolStatus;
use serde::Serialize;
use serde_json::{Map, Number, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Monotonic event counters.
#[derive(Debug, Default)]
pub struct Counters {
    pub error_count: AtomicU64,
    pub retry_count: AtomicU64,
    pub queued_messages: AtomicU64,
    pub sent_messages: AtomicU64,
    pub queued_bytes: AtomicU64,
    pub sent_bytes: AtomicU64,
    pub transferred_bytes: AtomicU64,
}

/// Point-in-time copy of [`Counters`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub error_count: u64,
    pub retry_count: u64,
    pub queued_messages: u64,
    pub sent_messages: u64,
    pub queued_bytes: u64,
    pub sent_bytes: u64,
    pub transferred_bytes: u64,
}

impl Counters {
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            error_count: self.error_count.load(Ordering::Relaxed),
            retry_count: self.retry_count.load(Ordering::Relaxed),
            queued_messages: self.queued_messages.load(Ordering::Relaxed),
            sent_messages: self.sent_messages.load(Ordering::Relaxed),
            queued_bytes: self.queued_bytes.load(Ordering::Relaxed),
            sent_bytes: self.sent_bytes.load(Ordering::Relaxed),
            transferred_bytes: self.transferred_bytes.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct AggState {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
}

/// Running summary of numeric samples, reset when flushed.
#[derive(Debug, Default)]
pub struct Aggregate {
    state: Mutex<AggState>,
}

impl Aggregate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&self, sample: f64) {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if state.count == 0 {
            state.min = sample;
            state.max = sample;
        } else {
            state.min = state.min.min(sample);
            state.max = state.max.max(sample);
        }
        state.count += 1;
        state.sum += sample;
    }

    /// Emit `{prefix_count, prefix_sum, prefix_min, prefix_max, prefix_avg}`
    /// into `out`, then reset. With no samples only `prefix_count: 0` is
    /// emitted.
    pub fn flush(&self, prefix: &str, out: &mut Map<String, Value>) {
        let state = {
            let mut locked =
                self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::take(&mut *locked)
        };
        out.insert(format!("{prefix}_count"), Value::from(state.count));
        if state.count == 0 {
            return;
        }
        let avg = state.sum / state.count as f64;
        for (suffix, value) in
            [("sum", state.sum), ("min", state.min), ("max", state.max), ("avg", avg)]
        {
            if let Some(n) = Number::from_f64(value) {
                out.insert(format!("{prefix}_{suffix}"), Value::Number(n));
            }
        }
    }
}

/// Snapshot returned by [`HecClient::flush_stats`].
///
/// [`HecClient::flush_stats`]: crate::HecClient::flush_stats
#[derive(Debug, Clone, Serialize)]
pub struct HecStats {
    #[serde(flatten)]
    pub counters: CounterSnapshot,
    /// Flushed aggregates: request_duration, batch_size, batch_size_bytes,
    /// batch_size_compressed.
    #[serde(flatten)]
    pub aggregates: Map<String, Value>,
    pub pool: PoolStatus,
    pub active_flushes: usize,
    pub queue_depth: usize,
    pub queue_size_bytes: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_tracks_count_sum_min_max_avg() {
        let agg = Aggregate::new();
        for sample in [4.0, 1.0, 7.0] {
            agg.observe(sample);
        }
        let mut out = Map::new();
        agg.flush("batch_size", &mut out);
        assert_eq!(out["batch_size_count"], Value::from(3));
        assert_eq!(out["batch_size_sum"], Value::from(12.0));
        assert_eq!(out["batch_size_min"], Value::from(1.0));
        assert_eq!(out["batch_size_max"], Value::from(7.0));
        assert_eq!(out["batch_size_avg"], Value::from(4.0));
    }

    #[test]
    fn flush_resets_the_aggregate() {
        let agg = Aggregate::new();
        agg.observe(10.0);
        let mut first = Map::new();
        agg.flush("x", &mut first);
        assert_eq!(first["x_count"], Value::from(1));

        let mut second = Map::new();
        agg.flush("x", &mut second);
        assert_eq!(second["x_count"], Value::from(0));
        assert!(second.get("x_sum").is_none());
    }

    #[test]
    fn empty_aggregate_emits_only_count() {
        let agg = Aggregate::new();
        let mut out = Map::new();
        agg.flush("request_duration", &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out["request_duration_count"], Value::from(0));
    }

    #[test]
    fn counters_snapshot_is_consistent_copy() {
        let counters = Counters::default();
        counters.queued_messages.fetch_add(3, Ordering::Relaxed);
        counters.queued_bytes.fetch_add(120, Ordering::Relaxed);
        let snap = counters.snapshot();
        assert_eq!(snap.queued_messages, 3);
        assert_eq!(snap.queued_bytes, 120);
        assert_eq!(snap.sent_messages, 0);
    }
}
