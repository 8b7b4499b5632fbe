//! End-to-end pipeline tests: bus → listener → store → analyzer.
//!
//! Everything runs against the in-process bus and the in-memory KV
//! store with a hand-driven clock, so freshness warm-up, presence
//! TTLs, and grace periods are exact.

use std::sync::Arc;

use pulse_core::codec::encode_envelope;
use pulse_core::{
    AppState, Config, DesiredApp, HeartbeatEnvelope, InstanceHeartbeat, InstanceState,
    ManualClock, MemoryBus, MessageBus, PackageState,
};
use pulsegrid_analyzer::{AnalysisResult, Analyzer};
use pulsegrid_kv::MemoryKv;
use pulsegrid_listener::{HeartbeatListener, ADVERTISE_SUBJECT, HEARTBEAT_SUBJECT};
use pulsegrid_metrics::CounterSink;
use pulsegrid_store::{FreshnessStatus, HealthStore};

struct Pipeline {
    clock: Arc<ManualClock>,
    bus: Arc<MemoryBus>,
    store: Arc<HealthStore>,
    listener: HeartbeatListener,
    analyzer: Analyzer,
    metrics: Arc<CounterSink>,
}

async fn pipeline() -> Pipeline {
    let config = Config {
        heartbeat_period: 10,
        heartbeat_ttl: 30,
        actual_freshness_ttl: 30,
        actual_warmup: 10,
        desired_freshness_ttl: 120,
        grace_period: 30,
        ..Config::default()
    };

    let clock = Arc::new(ManualClock::new(100));
    let kv = Arc::new(MemoryKv::new(clock.clone()));
    let metrics = Arc::new(CounterSink::new());
    let bus = Arc::new(MemoryBus::new());
    let store = Arc::new(HealthStore::new(
        kv,
        clock.clone(),
        config.clone(),
        metrics.clone(),
    ));
    let listener = HeartbeatListener::new(
        config,
        bus.clone(),
        store.clone(),
        clock.clone(),
        metrics.clone(),
    );

    // Flushes are driven by hand so the scenarios stay exact.
    listener.subscribe().await.unwrap();

    let analyzer = Analyzer::new(store.clone(), clock.clone());
    Pipeline {
        clock,
        bus,
        store,
        listener,
        analyzer,
        metrics,
    }
}

fn heartbeat(instance_id: &str, index: u32, host_id: &str, ts: f64) -> InstanceHeartbeat {
    InstanceHeartbeat {
        app_id: "app-1".to_string(),
        app_version: "v1".to_string(),
        instance_id: instance_id.to_string(),
        instance_index: index,
        state: InstanceState::Running,
        state_timestamp: ts,
        host_id: host_id.to_string(),
    }
}

fn desired(instances: u32) -> DesiredApp {
    DesiredApp {
        app_id: "app-1".to_string(),
        app_version: "v1".to_string(),
        number_of_instances: instances,
        state: AppState::Started,
        package_state: PackageState::Staged,
        updated_at: 100,
    }
}

async fn send_and_flush(p: &Pipeline, host_id: &str, instances: Vec<InstanceHeartbeat>) {
    let payload = encode_envelope(&HeartbeatEnvelope {
        host_id: host_id.to_string(),
        instances,
    });
    p.bus.publish(HEARTBEAT_SUBJECT, payload).await.unwrap();
    p.listener.flush_now().await;
}

fn expect_stops(result: AnalysisResult) -> Vec<pulse_core::PendingStop> {
    match result {
        AnalysisResult::Complete { stops } => stops,
        other => panic!("expected a completed analysis, got {other:?}"),
    }
}

#[tokio::test]
async fn duplicate_instance_is_resolved_after_grace_period() {
    let p = pipeline().await;

    // t=100: one host reports index 1 twice.
    let instances = vec![
        heartbeat("inst-a", 0, "h1", 100.0),
        heartbeat("inst-b", 1, "h1", 100.0),
        heartbeat("inst-c", 1, "h1", 100.0),
    ];
    send_and_flush(&p, "h1", instances.clone()).await;
    p.store.save_desired_state(&[desired(2)]).await.unwrap();
    p.store.bump_desired_freshness(100).await.unwrap();

    // t=120: inside the grace period, no stops.
    p.clock.set(120);
    send_and_flush(&p, "h1", instances.clone()).await;
    assert!(expect_stops(p.analyzer.analyze().await.unwrap()).is_empty());

    // t=130: grace elapsed, exactly one duplicate stop.
    p.clock.set(130);
    send_and_flush(&p, "h1", instances).await;
    let stops = expect_stops(p.analyzer.analyze().await.unwrap());
    assert_eq!(stops.len(), 1);
    assert_eq!(stops[0].instance_index, 1);
    assert!(stops[0].is_duplicate);
    assert_eq!(stops[0].instance_id, "inst-b");

    // t=155: the stopped instance is gone from the host's envelope;
    // nothing further to resolve.
    p.clock.set(155);
    send_and_flush(
        &p,
        "h1",
        vec![
            heartbeat("inst-a", 0, "h1", 100.0),
            heartbeat("inst-c", 1, "h1", 100.0),
        ],
    )
    .await;
    assert!(expect_stops(p.analyzer.analyze().await.unwrap()).is_empty());

    // The survivor is still indexed.
    let remaining = p.store.get_instance_heartbeats().await.unwrap();
    assert_eq!(remaining.len(), 2);
}

#[tokio::test]
async fn host_outage_quiesces_the_analyzer() {
    let p = pipeline().await;

    send_and_flush(&p, "h1", vec![heartbeat("inst-a", 0, "h1", 100.0)]).await;
    p.store.save_desired_state(&[desired(1)]).await.unwrap();
    p.store.bump_desired_freshness(100).await.unwrap();

    // The host goes silent. Past the presence TTL its instances are
    // swept, and past the freshness TTL the analyzer refuses to act.
    p.clock.set(131);
    assert!(p.store.get_instance_heartbeats().await.unwrap().is_empty());

    let result = p.analyzer.analyze().await.unwrap();
    assert_eq!(
        result,
        AnalysisResult::NotFresh(FreshnessStatus::ActualNotFresh)
    );
}

#[tokio::test]
async fn envelope_reconciliation_is_host_scoped() {
    let p = pipeline().await;

    send_and_flush(&p, "h1", vec![heartbeat("inst-a", 0, "h1", 100.0)]).await;
    send_and_flush(&p, "h2", vec![heartbeat("inst-b", 1, "h2", 100.0)]).await;

    // h1 now reports nothing; h2's instance must survive.
    p.clock.set(110);
    send_and_flush(&p, "h1", Vec::new()).await;

    let remaining = p.store.get_instance_heartbeats().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].instance_id, "inst-b");
}

#[tokio::test]
async fn advertise_alone_never_populates_actual_state() {
    let p = pipeline().await;

    p.bus
        .publish(ADVERTISE_SUBJECT, b"h1".to_vec())
        .await
        .unwrap();
    p.listener.flush_now().await;

    assert!(p.store.get_instance_heartbeats().await.unwrap().is_empty());

    // But it does start the freshness warm-up.
    p.clock.set(110);
    p.bus
        .publish(ADVERTISE_SUBJECT, b"h1".to_vec())
        .await
        .unwrap();
    assert!(p.store.is_actual_fresh(110).await.unwrap());
}

#[tokio::test]
async fn metrics_flow_through_the_pipeline() {
    let p = pipeline().await;

    send_and_flush(
        &p,
        "h1",
        vec![
            heartbeat("inst-a", 0, "h1", 100.0),
            heartbeat("inst-b", 1, "h1", 100.0),
        ],
    )
    .await;

    let report = p.metrics.report();
    assert_eq!(report.synced_heartbeats, 1);
    // Presence node plus two instance records.
    assert_eq!(report.write_count, 3);
}
