//! Standalone mode — the whole health loop in one process.
//!
//! A simulated fleet of hosts publishes heartbeat envelopes onto the
//! in-process bus at the configured heartbeat period; the listener
//! ingests them, and an analyzer pass runs each period. With
//! `--duplicate`, one app index is seeded with two instances so the
//! duplicate-resolution policy fires once the grace period elapses.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info};

use pulse_core::codec::encode_envelope;
use pulse_core::{
    AppState, Clock, Config, DesiredApp, HeartbeatEnvelope, InstanceHeartbeat, InstanceState,
    MemoryBus, MessageBus, PackageState, SystemClock,
};
use pulsegrid_analyzer::{AnalysisResult, Analyzer};
use pulsegrid_kv::{KvStore, MemoryKv, RedbKv};
use pulsegrid_listener::{HeartbeatListener, ADVERTISE_SUBJECT, HEARTBEAT_SUBJECT};
use pulsegrid_metrics::CounterSink;
use pulsegrid_store::HealthStore;

pub struct StandaloneOpts {
    pub hosts: usize,
    pub apps: usize,
    pub run_for: u64,
    pub data_dir: Option<PathBuf>,
    pub duplicate: bool,
}

pub async fn run(config: Config, opts: StandaloneOpts) -> anyhow::Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let kv: Arc<dyn KvStore> = match &opts.data_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            Arc::new(RedbKv::open(&dir.join("pulsegrid.redb"), clock.clone())?)
        }
        None => Arc::new(MemoryKv::new(clock.clone())),
    };
    let metrics = Arc::new(CounterSink::new());
    let bus = Arc::new(MemoryBus::new());
    let store = Arc::new(HealthStore::new(
        kv,
        clock.clone(),
        config.clone(),
        metrics.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let listener = HeartbeatListener::new(
        config.clone(),
        bus.clone(),
        store.clone(),
        clock.clone(),
        metrics.clone(),
    );
    let listener_tasks = listener
        .start(shutdown_rx.clone())
        .await
        .map_err(|e| anyhow::anyhow!("could not subscribe to the bus: {e}"))?;

    // Desired state: every app wants two instances.
    let desired: Vec<DesiredApp> = (0..opts.apps)
        .map(|n| DesiredApp {
            app_id: format!("app-{n}"),
            app_version: "v1".to_string(),
            number_of_instances: 2,
            state: AppState::Started,
            package_state: PackageState::Staged,
            updated_at: clock.now(),
        })
        .collect();
    store.save_desired_state(&desired).await?;
    store.bump_desired_freshness(clock.now()).await?;

    let fleet = build_fleet(&desired, opts.hosts, opts.duplicate, clock.now());
    info!(
        hosts = fleet.len(),
        apps = opts.apps,
        duplicate = opts.duplicate,
        run_for = opts.run_for,
        "standalone fleet starting"
    );

    let mut host_tasks = Vec::new();
    for (host_id, instances) in fleet {
        host_tasks.push(spawn_host(
            bus.clone(),
            host_id,
            instances,
            config.heartbeat_period.max(1),
            shutdown_rx.clone(),
        ));
    }

    // Drive the analyzer and keep desired state fresh until the
    // deadline.
    let analyzer = Analyzer::new(store.clone(), clock.clone());
    let deadline = tokio::time::Instant::now() + Duration::from_secs(opts.run_for);
    let mut ticker = tokio::time::interval(Duration::from_secs(config.heartbeat_period.max(1)));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = store.save_desired_state(&desired).await {
                    error!(error = %e, "could not refresh desired state");
                }
                if let Err(e) = store.bump_desired_freshness(clock.now()).await {
                    error!(error = %e, "could not bump desired freshness");
                }
                match analyzer.analyze().await {
                    Ok(AnalysisResult::Complete { stops }) => {
                        for stop in &stops {
                            info!(
                                app_id = %stop.app_id,
                                index = stop.instance_index,
                                instance_id = %stop.instance_id,
                                "pending stop for duplicate instance"
                            );
                        }
                    }
                    Ok(AnalysisResult::NotFresh(status)) => {
                        debug!(%status, "analysis skipped");
                    }
                    Err(e) => error!(error = %e, "analysis failed"),
                }
            }
            _ = tokio::time::sleep_until(deadline) => break,
        }
    }

    info!("draining and shutting down");
    let _ = shutdown_tx.send(true);
    let _ = listener_tasks.flusher.await;
    let _ = listener_tasks.usage.await;
    for task in host_tasks {
        let _ = task.await;
    }

    info!(
        report = %serde_json::to_string(&metrics.report())?,
        "standalone run complete"
    );
    Ok(())
}

/// Assign desired instances round-robin across the simulated hosts.
/// With `duplicate`, app-0 index 0 gets a second instance on the last
/// host.
fn build_fleet(
    desired: &[DesiredApp],
    hosts: usize,
    duplicate: bool,
    now: u64,
) -> Vec<(String, Vec<InstanceHeartbeat>)> {
    let hosts = hosts.max(1);
    let mut fleet: Vec<(String, Vec<InstanceHeartbeat>)> = (0..hosts)
        .map(|n| (format!("host-{n}"), Vec::new()))
        .collect();

    let mut slot = 0usize;
    for app in desired {
        for index in 0..app.number_of_instances {
            let host = slot % hosts;
            let host_id = fleet[host].0.clone();
            fleet[host].1.push(InstanceHeartbeat {
                app_id: app.app_id.clone(),
                app_version: app.app_version.clone(),
                instance_id: format!("inst-{}-{index}", app.app_id),
                instance_index: index,
                state: InstanceState::Running,
                state_timestamp: now as f64,
                host_id,
            });
            slot += 1;
        }
    }

    if duplicate {
        if let Some(app) = desired.first() {
            let host = hosts - 1;
            let host_id = fleet[host].0.clone();
            fleet[host].1.push(InstanceHeartbeat {
                app_id: app.app_id.clone(),
                app_version: app.app_version.clone(),
                instance_id: format!("inst-{}-0-duplicate", app.app_id),
                instance_index: 0,
                state: InstanceState::Running,
                state_timestamp: now as f64,
                host_id,
            });
        }
    }

    fleet
}

fn spawn_host(
    bus: Arc<MemoryBus>,
    host_id: String,
    instances: Vec<InstanceHeartbeat>,
    period: u64,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(period));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let _ = bus
                        .publish(ADVERTISE_SUBJECT, host_id.clone().into_bytes())
                        .await;
                    let payload = encode_envelope(&HeartbeatEnvelope {
                        host_id: host_id.clone(),
                        instances: instances.clone(),
                    });
                    let _ = bus.publish(HEARTBEAT_SUBJECT, payload).await;
                }
                _ = shutdown.changed() => {
                    debug!(%host_id, "simulated host stopping");
                    break;
                }
            }
        }
    })
}
