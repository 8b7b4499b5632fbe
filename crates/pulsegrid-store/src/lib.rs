//! pulsegrid-store — the TTL-indexed projection of fleet state.
//!
//! [`HealthStore`] persists instance heartbeats under
//! `/apps/actual/{app_id},{app_version}/{instance_id}`, maintains a
//! host-presence node per execution agent, lazily prunes instance
//! entries whose host has expired, and keeps the freshness markers the
//! analyzer consults before acting.
//!
//! # Architecture
//!
//! Writes flow through a process-local read cache (one mutex, rebuilt
//! at most every `cache_reload_interval`) so a batched sync can delta
//! against known state instead of re-reading the KV store. Host
//! liveness is purely the existence of `/dea-presence/{host_id}`:
//! instance records carry no TTL of their own and are reaped by any
//! reader once their host's presence lapses.

pub mod actual;
mod cache;
pub mod desired;
pub mod error;
pub mod freshness;
mod keys;

pub use error::{StoreError, StoreResult};
pub use freshness::FreshnessStatus;

use std::sync::Arc;

use tokio::sync::Mutex;

use pulse_core::{Clock, Config};
use pulsegrid_kv::{KvError, KvResult, KvStore};
use pulsegrid_metrics::MetricsSink;

use crate::cache::HeartbeatCache;

/// The actual-state store, shared across the listener and analyzer.
pub struct HealthStore {
    kv: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    config: Config,
    metrics: Arc<dyn MetricsSink>,
    cache: Mutex<HeartbeatCache>,
}

impl HealthStore {
    pub fn new(
        kv: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
        config: Config,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            kv,
            clock,
            config,
            metrics,
            cache: Mutex::new(HeartbeatCache::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn now(&self) -> u64 {
        self.clock.now()
    }

    /// Run a KV operation under the configured deadline.
    pub(crate) async fn with_deadline<T>(
        &self,
        op: impl std::future::Future<Output = KvResult<T>>,
    ) -> KvResult<T> {
        match tokio::time::timeout(self.config.kv_timeout(), op).await {
            Ok(result) => result,
            Err(_) => Err(KvError::Timeout),
        }
    }
}
