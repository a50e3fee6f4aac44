mod common;

use std::time::Duration;

use common::{sample_snapshot, wait_for, MockProfiler, RecordingSink};
use liveprof::client::{ClientConfig, ClientState, FailoverProfilingClient, ProfilingClient};
use liveprof::domain::{ClientError, Endpoint};
use liveprof::profiling::TriggerTransport;
use liveprof::server::{spawn_background, ProfilingServer, ServerConfig, ServerEvent, ServerHandle};

fn start_server() -> (Endpoint, ServerHandle) {
    let config = ServerConfig {
        interval: Duration::from_millis(100),
        trigger_transport: TriggerTransport::Channel,
        ..ServerConfig::default()
    };
    let server = ProfilingServer::bind(
        MockProfiler::new(sample_snapshot()),
        &Endpoint::Tcp("127.0.0.1:0".to_string()),
        config,
    )
    .unwrap()
    .with_event_callback(Box::new(|_: &ServerEvent| {}));
    let endpoint = server.local_endpoint().cloned().unwrap();
    (endpoint, spawn_background(server).unwrap())
}

/// An address nothing listens on.
fn dead_endpoint() -> Endpoint {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    Endpoint::from(listener.local_addr().unwrap())
}

fn client_config() -> ClientConfig {
    ClientConfig {
        retry_delay: Duration::from_millis(50),
        ..ClientConfig::default()
    }
}

#[tokio::test]
async fn test_skips_dead_candidate() {
    let (live, server) = start_server();
    let dead = dead_endpoint();
    let sink = RecordingSink::default();

    let client =
        FailoverProfilingClient::new(sink.clone(), vec![dead.clone(), live.clone()], client_config()).unwrap();
    let handle = client.start();

    assert!(wait_for(Duration::from_secs(5), || !sink.stats().is_empty()).await);
    assert_eq!(handle.state(), ClientState::Connected(live.to_string()));
    assert_eq!(sink.stats()[0], sample_snapshot());

    let states = sink.states();
    assert_eq!(states[0], ClientState::Connecting(dead.to_string()));
    assert_eq!(states[1], ClientState::Disconnected);
    assert_eq!(states[2], ClientState::Connecting(live.to_string()));
    assert_eq!(states[3], ClientState::Connected(live.to_string()));

    // Nothing reaches the sink after stop
    handle.stop().await;
    let seen = sink.len();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(sink.len(), seen);

    server.shutdown().unwrap();
}

#[tokio::test]
async fn test_moves_on_when_server_goes_away() {
    let (first, first_server) = start_server();
    let (second, second_server) = start_server();
    let sink = RecordingSink::default();

    let handle = FailoverProfilingClient::new(sink.clone(), vec![first.clone(), second.clone()], client_config())
        .unwrap()
        .start();
    let mut states = handle.subscribe();

    assert!(wait_for(Duration::from_secs(5), || !sink.stats().is_empty()).await);
    assert_eq!(handle.state(), ClientState::Connected(first.to_string()));

    first_server.shutdown().unwrap();
    let switched = tokio::time::timeout(
        Duration::from_secs(5),
        states.wait_for(|state| *state == ClientState::Connected(second.to_string())),
    )
    .await
    .map(|seen| seen.is_ok());
    assert!(matches!(switched, Ok(true)));

    let received = sink.stats().len();
    assert!(wait_for(Duration::from_secs(5), || sink.stats().len() > received).await);

    handle.stop().await;
    second_server.shutdown().unwrap();
}

#[tokio::test]
async fn test_retries_until_a_server_appears() {
    let dead = dead_endpoint();
    let sink = RecordingSink::default();
    let handle = FailoverProfilingClient::new(sink.clone(), vec![dead.clone()], client_config())
        .unwrap()
        .start();

    let attempts = || {
        sink.states()
            .iter()
            .filter(|state| **state == ClientState::Connecting(dead.to_string()))
            .count()
    };
    assert!(wait_for(Duration::from_secs(5), || attempts() >= 3).await);
    assert!(!handle.is_finished());
    assert!(sink.stats().is_empty());
    handle.stop().await;
}

#[tokio::test]
async fn test_plain_client_reports_disconnect() {
    let (endpoint, server) = start_server();
    let sink = RecordingSink::default();
    let handle = ProfilingClient::new(sink.clone(), endpoint.clone(), client_config()).start();

    assert!(wait_for(Duration::from_secs(5), || !sink.stats().is_empty()).await);
    server.shutdown().unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), handle.join()).await.unwrap();
    assert!(matches!(result, Err(ClientError::Disconnected(addr)) if addr == endpoint.to_string()));
    assert_eq!(sink.states().last(), Some(&ClientState::Disconnected));
}

#[tokio::test]
async fn test_plain_client_connect_failure() {
    let sink = RecordingSink::default();
    let handle = ProfilingClient::new(sink.clone(), dead_endpoint(), client_config()).start();
    let result = handle.join().await;
    assert!(matches!(result, Err(ClientError::Connect { .. })));
    assert!(sink.stats().is_empty());
}

#[test]
fn test_failover_needs_candidates() {
    let result = FailoverProfilingClient::new(RecordingSink::default(), Vec::new(), ClientConfig::default());
    assert!(matches!(result, Err(ClientError::NoCandidates)));
}
