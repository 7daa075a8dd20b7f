//! Bus delivery statistics

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

/// Point-in-time view of bus activity
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BusStats {
    /// Publish calls accepted by an open bus (queued or dropped)
    pub published: u64,
    /// Successful handler invocations
    pub delivered: u64,
    /// Handler invocations that errored, panicked or timed out
    pub failed: u64,
    /// Subset of `failed` that hit the handler timeout
    pub timed_out: u64,
    /// Events lost to the overflow policy
    pub dropped: u64,
    /// Events discarded by a non-draining stop
    pub discarded: u64,
    /// Events currently queued
    pub queue_depth: usize,
    /// Deepest the queue has been
    pub peak_queue_depth: usize,
    /// Events taken by a worker and not yet fully dispatched
    pub in_flight: usize,
    /// Registered subscriptions
    pub subscribers: usize,
    /// Whether workers are running
    pub running: bool,
    /// Mean time events spent queued before dispatch
    pub avg_queue_wait_ms: f64,
    /// Successful deliveries per event type
    pub deliveries_by_type: HashMap<String, u64>,
}

/// Counters shared between publishers and workers
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub published: AtomicU64,
    pub delivered: AtomicU64,
    pub failed: AtomicU64,
    pub timed_out: AtomicU64,
    pub dropped: AtomicU64,
    pub discarded: AtomicU64,
    pub dispatched: AtomicU64,
    pub total_wait_us: AtomicU64,
    pub peak_queue_depth: AtomicUsize,
    pub in_flight: AtomicUsize,
    deliveries_by_type: Mutex<HashMap<String, u64>>,
}

impl Counters {
    pub fn record_depth(&self, depth: usize) {
        self.peak_queue_depth.fetch_max(depth, Ordering::Relaxed);
    }

    pub fn record_dispatch(&self, wait_us: u64) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        self.total_wait_us.fetch_add(wait_us, Ordering::Relaxed);
    }

    pub fn record_delivered(&self, event_type: &str, count: u64) {
        if count == 0 {
            return;
        }
        self.delivered.fetch_add(count, Ordering::Relaxed);
        let mut by_type = self
            .deliveries_by_type
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *by_type.entry(event_type.to_string()).or_default() += count;
    }

    pub fn snapshot(&self, queue_depth: usize, subscribers: usize, running: bool) -> BusStats {
        let dispatched = self.dispatched.load(Ordering::Relaxed);
        let avg_queue_wait_ms = if dispatched > 0 {
            self.total_wait_us.load(Ordering::Relaxed) as f64 / dispatched as f64 / 1000.0
        } else {
            0.0
        };
        let deliveries_by_type = self
            .deliveries_by_type
            .lock()
            .map(|m| m.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone());

        BusStats {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            queue_depth,
            peak_queue_depth: self.peak_queue_depth.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            subscribers,
            running,
            avg_queue_wait_ms,
            deliveries_by_type,
        }
    }
}
