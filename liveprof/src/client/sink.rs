//! Display sinks: where a client delivers what it receives.

use std::fmt;
use std::time::SystemTime;

use crossbeam_channel::Sender;
use liveprof_common::StatsSnapshot;

/// Connection state of a viewer client.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ClientState {
    #[default]
    Disconnected,
    /// Attempting the named server.
    Connecting(String),
    /// Receiving from the named server.
    Connected(String),
}

impl ClientState {
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, ClientState::Connected(_))
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientState::Disconnected => f.write_str("disconnected"),
            ClientState::Connecting(server) => write!(f, "connecting to {server}"),
            ClientState::Connected(server) => write!(f, "connected to {server}"),
        }
    }
}

/// Consumer of decoded snapshots. Owned by the client task, so calls never
/// overlap and stop once the client has been stopped.
pub trait StatsSink: Send + 'static {
    fn set_stats(&mut self, snapshot: StatsSnapshot, title: &str, timestamp: SystemTime);

    /// Called on every state transition. Data already shown stays; a
    /// viewer may mark it stale while not connected.
    fn set_state(&mut self, _state: &ClientState) {}
}

/// What [`ChannelSink`] forwards to the viewer thread.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewerUpdate {
    Stats {
        snapshot: StatsSnapshot,
        title: String,
        timestamp: SystemTime,
    },
    State(ClientState),
}

/// Sink that hands everything to another thread.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: Sender<ViewerUpdate>,
}

impl ChannelSink {
    #[must_use]
    pub fn new(tx: Sender<ViewerUpdate>) -> Self {
        Self { tx }
    }
}

impl StatsSink for ChannelSink {
    fn set_stats(&mut self, snapshot: StatsSnapshot, title: &str, timestamp: SystemTime) {
        // A closed viewer just stops receiving
        let _ = self.tx.send(ViewerUpdate::Stats {
            snapshot,
            title: title.to_string(),
            timestamp,
        });
    }

    fn set_state(&mut self, state: &ClientState) {
        let _ = self.tx.send(ViewerUpdate::State(state.clone()));
    }
}
