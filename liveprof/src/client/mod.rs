//! # Viewer Clients
//!
//! [`ProfilingClient`] reads frames from one server (or one pre-connected
//! socket) and hands every snapshot to a [`StatsSink`]. When the connection
//! ends the client ends, reporting why.
//!
//! [`FailoverProfilingClient`] walks an ordered list of candidate servers,
//! moving to the next one whenever a connection fails or drops and starting
//! over after the last, pausing `retry_delay` after each full pass. The sink
//! keeps what it was showing while no server is reachable.
//!
//! Both run as a task on the caller's tokio runtime; [`start`] returns
//! immediately with a [`ClientHandle`].
//!
//! [`start`]: ProfilingClient::start

pub mod sink;

use std::time::{Duration, SystemTime};

use futures::StreamExt;
use liveprof_common::{Message, PROTOCOL_VERSION};
use log::{debug, info, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;

pub use sink::{ChannelSink, ClientState, StatsSink, ViewerUpdate};

use crate::domain::{ClientError, Endpoint, ProtocolError};
use crate::protocol::{connect, BoxedReader, Socket, StatsCodec};

pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Title handed to the sink; defaults to the server's name.
    pub title: Option<String>,
    /// Pause after every full pass over the failover candidates.
    pub retry_delay: Duration,
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            title: None,
            retry_delay: DEFAULT_RETRY_DELAY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// Publishes state transitions to watchers and to the sink.
struct StateReporter {
    tx: watch::Sender<ClientState>,
}

impl StateReporter {
    fn report<S: StatsSink>(&self, sink: &mut S, state: ClientState) {
        sink.set_state(&state);
        self.tx.send_replace(state);
    }
}

enum Source {
    Endpoint(Endpoint),
    Socket(Socket),
}

/// Client for a single server.
pub struct ProfilingClient<S> {
    sink: S,
    source: Source,
    config: ClientConfig,
}

impl<S: StatsSink> ProfilingClient<S> {
    pub fn new(sink: S, endpoint: Endpoint, config: ClientConfig) -> Self {
        Self {
            sink,
            source: Source::Endpoint(endpoint),
            config,
        }
    }

    /// Read from an already connected socket, e.g. one end of a pair whose
    /// other end went to [`ProfilingServer::connected`](crate::server::ProfilingServer::connected).
    pub fn from_socket(sink: S, socket: Socket, config: ClientConfig) -> Self {
        Self {
            sink,
            source: Source::Socket(socket),
            config,
        }
    }

    /// Spawn the client on the current tokio runtime.
    #[must_use]
    pub fn start(self) -> ClientHandle {
        let (tx, rx) = watch::channel(ClientState::Disconnected);
        let task = tokio::spawn(self.run(StateReporter { tx }));
        ClientHandle::new(rx, task)
    }

    async fn run(mut self, states: StateReporter) -> Result<(), ClientError> {
        let (reader, server) = match self.source {
            Source::Endpoint(endpoint) => {
                states.report(&mut self.sink, ClientState::Connecting(endpoint.to_string()));
                let reader = match open(&endpoint, self.config.connect_timeout).await {
                    Ok(reader) => reader,
                    Err(err) => {
                        states.report(&mut self.sink, ClientState::Disconnected);
                        return Err(err);
                    }
                };
                (reader, endpoint)
            }
            Source::Socket(socket) => (socket.into_reader()?, Endpoint::Unix("socketpair".into())),
        };
        let title = self.config.title.clone().unwrap_or_else(|| server.title());

        states.report(&mut self.sink, ClientState::Connected(server.to_string()));
        let result = receive(reader, &mut self.sink, &title).await;
        states.report(&mut self.sink, ClientState::Disconnected);

        result?;
        Err(ClientError::Disconnected(server.to_string()))
    }
}

/// Client that cycles through candidate servers forever.
pub struct FailoverProfilingClient<S> {
    sink: S,
    candidates: Vec<Endpoint>,
    config: ClientConfig,
}

impl<S: StatsSink> FailoverProfilingClient<S> {
    pub fn new(sink: S, candidates: Vec<Endpoint>, config: ClientConfig) -> Result<Self, ClientError> {
        if candidates.is_empty() {
            return Err(ClientError::NoCandidates);
        }
        Ok(Self {
            sink,
            candidates,
            config,
        })
    }

    #[must_use]
    pub fn candidates(&self) -> &[Endpoint] {
        &self.candidates
    }

    /// Spawn the client on the current tokio runtime.
    #[must_use]
    pub fn start(self) -> ClientHandle {
        let (tx, rx) = watch::channel(ClientState::Disconnected);
        let task = tokio::spawn(self.run(StateReporter { tx }));
        ClientHandle::new(rx, task)
    }

    async fn run(mut self, states: StateReporter) -> Result<(), ClientError> {
        loop {
            for endpoint in &self.candidates {
                states.report(&mut self.sink, ClientState::Connecting(endpoint.to_string()));
                let reader = match open(endpoint, self.config.connect_timeout).await {
                    Ok(reader) => reader,
                    Err(err) => {
                        debug!("{err}");
                        states.report(&mut self.sink, ClientState::Disconnected);
                        continue;
                    }
                };

                let title = self.config.title.clone().unwrap_or_else(|| endpoint.title());
                states.report(&mut self.sink, ClientState::Connected(endpoint.to_string()));
                match receive(reader, &mut self.sink, &title).await {
                    Ok(()) => info!("Connection to {endpoint} closed"),
                    Err(err) => warn!("Connection to {endpoint} failed: {err}"),
                }
                states.report(&mut self.sink, ClientState::Disconnected);
            }
            tokio::time::sleep(self.config.retry_delay).await;
        }
    }
}

async fn open(endpoint: &Endpoint, timeout: Duration) -> Result<BoxedReader, ClientError> {
    let connect_error = |source| ClientError::Connect {
        endpoint: endpoint.clone(),
        source,
    };
    match tokio::time::timeout(timeout, connect(endpoint)).await {
        Ok(result) => result.map_err(connect_error),
        Err(_) => Err(connect_error(std::io::ErrorKind::TimedOut.into())),
    }
}

/// Feed every snapshot on `reader` to `sink` until the stream ends.
async fn receive<S: StatsSink>(reader: BoxedReader, sink: &mut S, title: &str) -> Result<(), ClientError> {
    let mut frames = FramedRead::new(reader, StatsCodec::new());
    while let Some(message) = frames.next().await {
        match message? {
            Message::Hello { version, profiler } => {
                if version != PROTOCOL_VERSION {
                    return Err(ProtocolError::VersionMismatch {
                        expected: PROTOCOL_VERSION,
                        found: version,
                    }
                    .into());
                }
                debug!("Server profiles with {profiler}");
            }
            Message::Stats { snapshot, .. } => sink.set_stats(snapshot, title, SystemTime::now()),
        }
    }
    Ok(())
}

/// Control over a running client task.
#[derive(Debug)]
pub struct ClientHandle {
    state: watch::Receiver<ClientState>,
    task: Option<JoinHandle<Result<(), ClientError>>>,
}

impl ClientHandle {
    fn new(state: watch::Receiver<ClientState>, task: JoinHandle<Result<(), ClientError>>) -> Self {
        Self {
            state,
            task: Some(task),
        }
    }

    #[must_use]
    pub fn state(&self) -> ClientState {
        self.state.borrow().clone()
    }

    /// Receiver that sees every later state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ClientState> {
        self.state.clone()
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Cancel the client and close its socket. The sink receives nothing
    /// once this returns.
    pub async fn stop(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
    }

    /// Wait for the client to end on its own and return why it ended.
    pub async fn join(mut self) -> Result<(), ClientError> {
        match self.task.take() {
            Some(task) => task.await.map_err(|err| ClientError::TaskFailed(err.to_string()))?,
            None => Ok(()),
        }
    }
}

impl Drop for ClientHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{encode_frame, encode_message};
    use liveprof_common::{StatNode, StatsSnapshot};
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Collect {
        stats: Arc<Mutex<Vec<(StatsSnapshot, String)>>>,
    }

    impl StatsSink for Collect {
        fn set_stats(&mut self, snapshot: StatsSnapshot, title: &str, _timestamp: SystemTime) {
            self.stats.lock().unwrap().push((snapshot, title.to_string()));
        }
    }

    fn stats_frame(name: &str) -> Vec<u8> {
        let message = Message::Stats {
            snapshot: StatsSnapshot::new(1, 0.1, 0.5, vec![StatNode::leaf(name, 1, 0.5)]),
            captured_at: SystemTime::now(),
        };
        encode_message(&message).unwrap().to_vec()
    }

    #[tokio::test]
    async fn test_socket_client_delivers_frames_then_reports_disconnect() {
        let (ours, mut theirs) = std::os::unix::net::UnixStream::pair().unwrap();
        theirs.write_all(&encode_message(&Message::hello("span")).unwrap()).unwrap();
        theirs.write_all(&stats_frame("a")).unwrap();
        theirs.write_all(&stats_frame("b")).unwrap();
        drop(theirs);

        let sink = Collect::default();
        let config = ClientConfig {
            title: Some("pair".to_string()),
            ..ClientConfig::default()
        };
        let handle = ProfilingClient::from_socket(sink.clone(), Socket::from(ours), config).start();
        let err = handle.join().await.unwrap_err();
        assert!(matches!(err, ClientError::Disconnected(_)));

        let stats = sink.stats.lock().unwrap();
        assert_eq!(stats.len(), 2);
        assert!(stats[0].0.child("a").is_some());
        assert!(stats[1].0.child("b").is_some());
        assert_eq!(stats[1].1, "pair");
    }

    #[tokio::test]
    async fn test_version_mismatch_disconnects() {
        let (ours, mut theirs) = std::os::unix::net::UnixStream::pair().unwrap();
        let hello = Message::Hello {
            version: PROTOCOL_VERSION + 1,
            profiler: "span".to_string(),
        };
        theirs.write_all(&encode_message(&hello).unwrap()).unwrap();
        theirs.write_all(&stats_frame("never")).unwrap();

        let sink = Collect::default();
        let handle = ProfilingClient::from_socket(sink.clone(), Socket::from(ours), ClientConfig::default()).start();
        let err = handle.join().await.unwrap_err();
        assert!(matches!(err, ClientError::Protocol(ProtocolError::VersionMismatch { .. })));
        assert!(sink.stats.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_payload_disconnects() {
        let (ours, mut theirs) = std::os::unix::net::UnixStream::pair().unwrap();
        theirs.write_all(&encode_frame(b"\xff\xfe").unwrap()).unwrap();

        let handle =
            ProfilingClient::from_socket(Collect::default(), Socket::from(ours), ClientConfig::default()).start();
        let err = handle.join().await.unwrap_err();
        assert!(matches!(err, ClientError::Protocol(ProtocolError::Payload(_))));
    }

    #[tokio::test]
    async fn test_plain_client_connect_failure_is_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = Endpoint::Unix(dir.path().join("nobody-home.sock"));
        let handle = ProfilingClient::new(Collect::default(), endpoint, ClientConfig::default()).start();
        let err = handle.join().await.unwrap_err();
        assert!(matches!(err, ClientError::Connect { .. }));
    }

    #[test]
    fn test_failover_requires_candidates() {
        let result = FailoverProfilingClient::new(Collect::default(), Vec::new(), ClientConfig::default());
        assert!(matches!(result, Err(ClientError::NoCandidates)));
    }
}
