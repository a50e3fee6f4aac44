//! Connection and profiling events reported by the server loop.

use std::fmt;
use std::time::Duration;

use log::info;

use crate::domain::{Endpoint, PeerAddr};

#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Listening { endpoint: Endpoint },
    Connected { addr: PeerAddr, total: usize },
    Disconnected { addr: PeerAddr, total: usize },
    /// The first viewer arrived and windows are being captured.
    ProfilerStarted { interval: Duration },
    /// The last viewer left.
    ProfilerStopped,
}

impl fmt::Display for ServerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerEvent::Listening { endpoint } => write!(f, "Listening on {endpoint}"),
            ServerEvent::Connected { addr: PeerAddr::Local, total } => {
                write!(f, "A client connected (total: {total})")
            }
            ServerEvent::Connected { addr, total } => write!(f, "Connected from {addr} (total: {total})"),
            ServerEvent::Disconnected { addr: PeerAddr::Local, total } => {
                write!(f, "A client disconnected (total: {total})")
            }
            ServerEvent::Disconnected { addr, total } => {
                write!(f, "Disconnected from {addr} (total: {total})")
            }
            ServerEvent::ProfilerStarted { interval } => {
                write!(f, "Profiling every {} seconds...", interval.as_secs_f64())
            }
            ServerEvent::ProfilerStopped => f.write_str("Profiler stopped"),
        }
    }
}

/// Injected observer for [`ServerEvent`]s.
pub type EventCallback = Box<dyn Fn(&ServerEvent) + Send + Sync>;

/// Default callback: one `info!` line per event.
pub fn log_event(event: &ServerEvent) {
    info!("{event}");
}
