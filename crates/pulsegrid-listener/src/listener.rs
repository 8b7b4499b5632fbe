//! The heartbeat listener and its background tasks.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use pulse_core::codec::decode_envelope;
use pulse_core::{BusError, BusMessage, Clock, Config, HeartbeatEnvelope, MessageBus};
use pulsegrid_metrics::{MetricsSink, UsageTracker};
use pulsegrid_store::HealthStore;

/// Subject carrying one heartbeat envelope per message.
pub const HEARTBEAT_SUBJECT: &str = "dea.heartbeat";

/// Subject hosts advertise on; only arrival matters.
pub const ADVERTISE_SUBJECT: &str = "dea.advertise";

/// Handles to the listener's background tasks.
pub struct ListenerTasks {
    pub flusher: JoinHandle<()>,
    pub usage: JoinHandle<()>,
}

/// Ingests heartbeats from the bus into the health store.
///
/// Cheap to clone; clones share the pending buffer and tracker. Bus
/// callbacks may run in parallel; the pending buffer's mutex
/// serializes appends. The flusher is the single writer by
/// construction (exactly one timer task) and holds no locks during
/// the KV round-trip.
#[derive(Clone)]
pub struct HeartbeatListener {
    config: Config,
    bus: Arc<dyn MessageBus>,
    store: Arc<HealthStore>,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn MetricsSink>,
    usage: Arc<UsageTracker>,
    pending: Arc<Mutex<Vec<HeartbeatEnvelope>>>,
}

impl HeartbeatListener {
    pub fn new(
        config: Config,
        bus: Arc<dyn MessageBus>,
        store: Arc<HealthStore>,
        clock: Arc<dyn Clock>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            config,
            bus,
            store,
            clock,
            metrics,
            usage: Arc::new(UsageTracker::new()),
            pending: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Subscribe to both subjects and spawn the flusher and
    /// usage-measurement tasks. On shutdown the flusher drains the
    /// buffer once and exits.
    pub async fn start(&self, shutdown: watch::Receiver<bool>) -> Result<ListenerTasks, BusError> {
        self.subscribe().await?;

        let flusher = self.spawn_flusher(shutdown.clone());
        let usage = self.spawn_usage_loop(shutdown);

        info!(
            batched_saves = self.config.batched_saves,
            flush_interval = ?self.config.flush_interval(),
            "heartbeat listener started"
        );
        Ok(ListenerTasks { flusher, usage })
    }

    /// Register the bus subscriptions without spawning the periodic
    /// tasks. Callers that drive flushing themselves (tests, embedded
    /// harnesses) pair this with [`HeartbeatListener::flush_now`].
    pub async fn subscribe(&self) -> Result<(), BusError> {
        self.subscribe_advertise().await?;
        if self.config.batched_saves {
            self.subscribe_heartbeat_batched().await
        } else {
            self.subscribe_heartbeat_per_message().await
        }
    }

    async fn subscribe_advertise(&self) -> Result<(), BusError> {
        let store = self.store.clone();
        let clock = self.clock.clone();
        self.bus
            .subscribe(
                ADVERTISE_SUBJECT,
                Arc::new(move |_msg: BusMessage| {
                    let store = store.clone();
                    let clock = clock.clone();
                    Box::pin(async move {
                        debug!("received host advertise");
                        bump_freshness(&store, clock.now()).await;
                    })
                }),
            )
            .await
    }

    async fn subscribe_heartbeat_batched(&self) -> Result<(), BusError> {
        let pending = self.pending.clone();
        self.bus
            .subscribe(
                HEARTBEAT_SUBJECT,
                Arc::new(move |msg: BusMessage| {
                    let pending = pending.clone();
                    Box::pin(async move {
                        debug!("got a heartbeat");
                        match decode_envelope(&msg.payload) {
                            Ok(envelope) => {
                                pending.lock().await.push(envelope);
                            }
                            Err(e) => {
                                error!(error = %e, "could not decode heartbeat, dropping");
                            }
                        }
                    })
                }),
            )
            .await
    }

    /// Debug path: one store round-trip per message.
    async fn subscribe_heartbeat_per_message(&self) -> Result<(), BusError> {
        let store = self.store.clone();
        let clock = self.clock.clone();
        let usage = self.usage.clone();
        self.bus
            .subscribe(
                HEARTBEAT_SUBJECT,
                Arc::new(move |msg: BusMessage| {
                    let store = store.clone();
                    let clock = clock.clone();
                    let usage = usage.clone();
                    Box::pin(async move {
                        debug!("got a heartbeat");
                        let envelope = match decode_envelope(&msg.payload) {
                            Ok(envelope) => envelope,
                            Err(e) => {
                                error!(error = %e, "could not decode heartbeat, dropping");
                                return;
                            }
                        };

                        let _busy = usage.track();
                        match store.sync_heartbeat(&envelope).await {
                            Ok(()) => bump_freshness(&store, clock.now()).await,
                            Err(e) => {
                                error!(host_id = %envelope.host_id, error = %e,
                                    "could not put heartbeat in store");
                            }
                        }
                    })
                }),
            )
            .await
    }

    /// Swap the pending buffer for an empty one and sync the snapshot.
    ///
    /// Public so shutdown paths and tests can force a drain; the
    /// periodic flusher calls it on every tick. An empty buffer is a
    /// no-op.
    pub async fn flush_now(&self) {
        let batch = {
            let mut pending = self.pending.lock().await;
            std::mem::take(&mut *pending)
        };
        if batch.is_empty() {
            return;
        }

        let flush_started = Instant::now();
        let _busy = self.usage.track();
        match self.store.sync_heartbeats(&batch).await {
            Ok(()) => {
                self.metrics.record_synced_heartbeats(batch.len());
                bump_freshness(&self.store, self.clock.now()).await;
                info!(
                    envelopes = batch.len(),
                    elapsed = ?flush_started.elapsed(),
                    "synced heartbeats"
                );
            }
            Err(e) => {
                // No retry: the next heartbeats from these hosts carry
                // the same authoritative snapshots.
                error!(error = %e, envelopes = batch.len(), "could not sync heartbeats");
            }
        }
    }

    /// Number of buffered envelopes awaiting the next flush.
    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }

    fn spawn_flusher(&self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let listener = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(listener.config.flush_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        listener.flush_now().await;
                    }
                    _ = shutdown.changed() => {
                        listener.flush_now().await;
                        debug!("flusher shutting down");
                        break;
                    }
                }
            }
        })
    }

    fn spawn_usage_loop(&self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let listener = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(listener.config.usage_measure_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let fraction = listener.usage.measure();
                        listener.metrics.record_store_usage_fraction(fraction);
                        info!(usage_pct = fraction * 100.0, "store usage");
                    }
                    _ = shutdown.changed() => {
                        debug!("usage loop shutting down");
                        break;
                    }
                }
            }
        })
    }
}

async fn bump_freshness(store: &HealthStore, now: u64) {
    match store.bump_actual_freshness(now).await {
        Ok(()) => debug!("bumped actual freshness"),
        Err(e) => error!(error = %e, "could not bump actual freshness"),
    }
}
