//! Metric sink contract and the counter-backed implementation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

/// Typed sinks fed by the store layer and the listener.
pub trait MetricsSink: Send + Sync {
    /// A store read completed: how many heartbeats and how long.
    fn record_store_read(&self, items: usize, elapsed: Duration);

    /// A store write batch committed.
    fn record_store_write(&self, items: usize, elapsed: Duration);

    /// A store delete batch completed.
    fn record_store_delete(&self, items: usize, elapsed: Duration);

    /// Heartbeat envelopes synced by one listener flush.
    fn record_synced_heartbeats(&self, count: usize);

    /// Fraction of wall time the store layer spent doing work,
    /// in `[0.0, 1.0]`.
    fn record_store_usage_fraction(&self, fraction: f64);
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl MetricsSink for NullSink {
    fn record_store_read(&self, _items: usize, _elapsed: Duration) {}
    fn record_store_write(&self, _items: usize, _elapsed: Duration) {}
    fn record_store_delete(&self, _items: usize, _elapsed: Duration) {}
    fn record_synced_heartbeats(&self, _count: usize) {}
    fn record_store_usage_fraction(&self, _fraction: f64) {}
}

/// Point-in-time view of everything a [`CounterSink`] has seen.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsReport {
    pub read_count: u64,
    pub read_micros: u64,
    pub write_count: u64,
    pub write_micros: u64,
    pub delete_count: u64,
    pub delete_micros: u64,
    pub synced_heartbeats: u64,
    pub last_usage_fraction: f64,
}

/// Monotonic in-process counters behind the sink contract.
#[derive(Debug, Default)]
pub struct CounterSink {
    read_count: AtomicU64,
    read_micros: AtomicU64,
    write_count: AtomicU64,
    write_micros: AtomicU64,
    delete_count: AtomicU64,
    delete_micros: AtomicU64,
    synced_heartbeats: AtomicU64,
    // Gauge, not a counter; a mutex keeps the f64 simple.
    last_usage_fraction: Mutex<f64>,
}

impl CounterSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&self) -> MetricsReport {
        MetricsReport {
            read_count: self.read_count.load(Ordering::Relaxed),
            read_micros: self.read_micros.load(Ordering::Relaxed),
            write_count: self.write_count.load(Ordering::Relaxed),
            write_micros: self.write_micros.load(Ordering::Relaxed),
            delete_count: self.delete_count.load(Ordering::Relaxed),
            delete_micros: self.delete_micros.load(Ordering::Relaxed),
            synced_heartbeats: self.synced_heartbeats.load(Ordering::Relaxed),
            last_usage_fraction: *self
                .last_usage_fraction
                .lock()
                .unwrap_or_else(|e| e.into_inner()),
        }
    }
}

impl MetricsSink for CounterSink {
    fn record_store_read(&self, items: usize, elapsed: Duration) {
        self.read_count.fetch_add(items as u64, Ordering::Relaxed);
        self.read_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    fn record_store_write(&self, items: usize, elapsed: Duration) {
        self.write_count.fetch_add(items as u64, Ordering::Relaxed);
        self.write_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    fn record_store_delete(&self, items: usize, elapsed: Duration) {
        self.delete_count.fetch_add(items as u64, Ordering::Relaxed);
        self.delete_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    fn record_synced_heartbeats(&self, count: usize) {
        self.synced_heartbeats
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    fn record_store_usage_fraction(&self, fraction: f64) {
        let mut gauge = self
            .last_usage_fraction
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *gauge = fraction.clamp(0.0, 1.0);
    }
}
