mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{sample_snapshot, wait_for, MockProfiler};
use liveprof::domain::Endpoint;
use liveprof::profiling::{Profiler, TriggerTransport};
use liveprof::protocol::{connect, decode_message, read_frame, BoxedReader, Socket};
use liveprof::server::{spawn_background, ProfilingServer, ServerConfig, ServerEvent};
use liveprof_common::{Message, StatsSnapshot};

const READ_TIMEOUT: Duration = Duration::from_secs(5);

fn config() -> ServerConfig {
    ServerConfig {
        interval: Duration::from_millis(200),
        trigger_transport: TriggerTransport::Channel,
        ..ServerConfig::default()
    }
}

fn recorder() -> (Arc<Mutex<Vec<ServerEvent>>>, Box<dyn Fn(&ServerEvent) + Send + Sync>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    (events, Box::new(move |event: &ServerEvent| sink.lock().unwrap().push(event.clone())))
}

async fn next_message(reader: &mut BoxedReader) -> Message {
    let payload = tokio::time::timeout(READ_TIMEOUT, read_frame(reader))
        .await
        .expect("frame within timeout")
        .unwrap()
        .expect("stream still open");
    decode_message(&payload).unwrap()
}

async fn next_stats(reader: &mut BoxedReader) -> StatsSnapshot {
    loop {
        if let Message::Stats { snapshot, .. } = next_message(reader).await {
            return snapshot;
        }
    }
}

#[tokio::test]
async fn test_every_client_receives_the_window() {
    let mock = MockProfiler::new(sample_snapshot());
    let profiler: Arc<dyn Profiler> = mock.clone();
    let server = ProfilingServer::bind(profiler, &Endpoint::Tcp("127.0.0.1:0".to_string()), config()).unwrap();
    let endpoint = server.local_endpoint().cloned().unwrap();
    let handle = spawn_background(server).unwrap();

    let mut readers = Vec::new();
    for _ in 0..3 {
        readers.push(connect(&endpoint).await.unwrap());
    }
    for reader in &mut readers {
        assert!(matches!(next_message(reader).await, Message::Hello { profiler, .. } if profiler == "mock"));
    }
    for reader in &mut readers {
        assert_eq!(next_stats(reader).await, sample_snapshot());
    }
    assert!(mock.clears.load(std::sync::atomic::Ordering::SeqCst) >= 1);

    handle.shutdown().unwrap();
    assert!(!mock.is_running());
}

#[tokio::test]
async fn test_dead_client_does_not_stop_the_others() {
    let mock = MockProfiler::new(sample_snapshot());
    let (events, on_event) = recorder();
    let server = ProfilingServer::bind(mock.clone(), &Endpoint::Tcp("127.0.0.1:0".to_string()), config())
        .unwrap()
        .with_event_callback(on_event);
    let endpoint = server.local_endpoint().cloned().unwrap();
    let handle = spawn_background(server).unwrap();

    let mut gone = connect(&endpoint).await.unwrap();
    let mut stays = connect(&endpoint).await.unwrap();
    next_message(&mut gone).await;
    drop(gone);

    // Two windows in a row reach the remaining client
    assert_eq!(next_stats(&mut stays).await, sample_snapshot());
    assert_eq!(next_stats(&mut stays).await, sample_snapshot());

    let disconnected = || {
        events
            .lock()
            .unwrap()
            .iter()
            .any(|event| matches!(event, ServerEvent::Disconnected { total: 1, .. }))
    };
    assert!(wait_for(Duration::from_secs(2), disconnected).await);

    drop(stays);
    let stopped = || events.lock().unwrap().contains(&ServerEvent::ProfilerStopped);
    assert!(wait_for(Duration::from_secs(2), stopped).await);
    assert!(!mock.is_running());
    assert!(!handle.is_finished());
    handle.shutdown().unwrap();

    let events = events.lock().unwrap();
    assert!(matches!(events[0], ServerEvent::Listening { .. }));
    assert_eq!(
        events.iter().filter(|e| matches!(e, ServerEvent::ProfilerStarted { .. })).count(),
        1
    );
}

#[tokio::test]
async fn test_socket_pair_server_ends_with_its_client() {
    let mock = MockProfiler::new(sample_snapshot());
    let (server_end, viewer_end) = Socket::pair().unwrap();
    let (events, on_event) = recorder();
    let mut server = ProfilingServer::new(mock.clone(), None, config()).unwrap().with_event_callback(on_event);
    server.connected(server_end);
    let handle = spawn_background(server).unwrap();

    let mut reader = viewer_end.into_reader().unwrap();
    assert!(matches!(next_message(&mut reader).await, Message::Hello { .. }));
    assert_eq!(next_stats(&mut reader).await, sample_snapshot());
    drop(reader);

    let finished = wait_for(Duration::from_secs(2), || handle.is_finished()).await;
    assert!(finished);
    handle.join().unwrap();
    assert!(!mock.is_running());

    let events = events.lock().unwrap();
    assert_eq!(events.first().map(ToString::to_string).as_deref(), Some("A client connected (total: 1)"));
    assert_eq!(events.last(), Some(&ServerEvent::ProfilerStopped));
}

#[tokio::test]
async fn test_huge_interval_is_capped() {
    let mock = MockProfiler::new(sample_snapshot());
    let (server_end, viewer_end) = Socket::pair().unwrap();
    let (events, on_event) = recorder();
    let config = ServerConfig {
        interval: Duration::MAX,
        ..config()
    };
    let mut server = ProfilingServer::new(mock.clone(), None, config).unwrap().with_event_callback(on_event);
    server.connected(server_end);
    let handle = spawn_background(server).unwrap();

    let mut reader = viewer_end.into_reader().unwrap();
    assert!(matches!(next_message(&mut reader).await, Message::Hello { .. }));
    let started = || {
        events
            .lock()
            .unwrap()
            .iter()
            .any(|event| matches!(event, ServerEvent::ProfilerStarted { .. }))
    };
    assert!(wait_for(Duration::from_secs(2), started).await);
    assert!(wait_for(Duration::from_secs(2), || mock.is_running()).await);

    // The window is still open and the loop is alive
    assert!(!handle.is_finished());
    handle.shutdown().unwrap();
    assert!(!mock.is_running());
}

#[test]
fn test_bind_failure_is_reported_up_front() {
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let endpoint = Endpoint::from(taken.local_addr().unwrap());
    let mock = MockProfiler::new(StatsSnapshot::default());
    let result = ProfilingServer::bind(mock, &endpoint, config());
    assert!(matches!(result, Err(liveprof::domain::ServerError::Bind { .. })));
}
