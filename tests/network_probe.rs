// HTTP latency probe against a local mock server.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chatsync::adapters::mock::FixedLatencyProbe;
use chatsync::adapters::{HttpLatencyProbe, MemoryCache};
use chatsync::config::NetworkConfig;
use chatsync::network::{ConnectionQuality, NetworkMonitor};
use chatsync::traits::{LatencyProbe, ProbeError};
use chatsync::{Collaborators, SyncEngine};
use common::{test_config, TestOrigin};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_probe_measures_round_trip() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let probe = HttpLatencyProbe::new(format!("{}/health", server.uri()));
    let rtt = probe.probe().await.unwrap();
    assert!(rtt < Duration::from_secs(5));
}

#[tokio::test]
async fn test_error_status_still_counts_as_reachable() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let probe = HttpLatencyProbe::new(format!("{}/health", server.uri()));
    assert!(probe.probe().await.is_ok());
}

#[tokio::test]
async fn test_slow_endpoint_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let probe = HttpLatencyProbe::new(format!("{}/health", server.uri()))
        .with_timeout(Duration::from_millis(50));
    assert_eq!(probe.probe().await.unwrap_err(), ProbeError::Timeout);
}

#[tokio::test]
async fn test_monitor_classifies_local_server_as_excellent() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let probe = HttpLatencyProbe::new(server.uri());
    let mut monitor = NetworkMonitor::new(NetworkConfig {
        excellent_below: Duration::from_secs(2),
        good_below: Duration::from_secs(4),
        ..NetworkConfig::default()
    });
    assert_eq!(monitor.measure(&probe).await, ConnectionQuality::Excellent);
}

#[tokio::test]
async fn test_engine_publishes_measured_quality() {
    let origin = TestOrigin::new();
    let collaborators = Collaborators {
        remote: origin.store.clone(),
        local: Arc::new(MemoryCache::new()),
        transport: Arc::new(origin.hub.connect("tab-a")),
        board: origin.hub.board(),
        provider: Arc::new(chatsync::adapters::mock::ScriptedProvider::new()),
        probe: Some(Arc::new(FixedLatencyProbe::new(Duration::from_millis(900)))),
    };
    let mut engine = SyncEngine::new(test_config(), collaborators);
    engine.start().await;

    assert_eq!(engine.measure_network().await, ConnectionQuality::Poor);
    assert_eq!(engine.online_status().quality, ConnectionQuality::Poor);
}
