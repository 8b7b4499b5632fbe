//! pulsegrid-metrics — typed metric sinks for the health core.
//!
//! The store and listener report operation timings, synced-heartbeat
//! counts, and the store-usage fraction through the [`MetricsSink`]
//! trait. Counters live behind the sink rather than as process-wide
//! state so tests can assert on them and the fleet metrics emitter can
//! be swapped in without touching the hot paths.

pub mod sink;
pub mod usage;

pub use sink::{CounterSink, MetricsReport, MetricsSink, NullSink};
pub use usage::{UsageGuard, UsageTracker};
