//! Structured error types for liveprof
//!
//! Using thiserror for automatic Display implementation and error chaining.

use super::types::{Endpoint, Signum};
use thiserror::Error;

#[derive(Error, Debug)]
#[error("Expected HOST:PORT or a unix socket path, got {0:?}")]
pub struct EndpointParseError(pub String);

#[derive(Error, Debug)]
pub enum TriggerError {
    #[error("Signal {0} cannot carry a trigger")]
    InvalidSignal(Signum),

    #[error("Signal {0} already drives another trigger")]
    SignalInUse(Signum),

    #[error("Trigger has not been prepared")]
    NotPrepared,

    #[error("Failed to install handler for signal {signum}: {source}")]
    InstallFailed {
        signum: Signum,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to send signal {signum}: {source}")]
    SendFailed {
        signum: Signum,
        #[source]
        source: std::io::Error,
    },

    #[error("Trigger control thread has exited")]
    ControlThreadGone,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Frame of {0} bytes exceeds the frame size limit")]
    FrameTooLarge(usize),

    #[error("Peer speaks protocol version {found}, expected {expected}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("Malformed payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind {endpoint}: {source}")]
    Bind {
        endpoint: Endpoint,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Trigger(#[from] TriggerError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: Endpoint,
        #[source]
        source: std::io::Error,
    },

    #[error("Connection to {0} closed")]
    Disconnected(String),

    #[error("No server address to connect to")]
    NoCandidates,

    #[error("Client task failed: {0}")]
    TaskFailed(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Dump file holds a {0} message, not statistics")]
    NotStats(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
