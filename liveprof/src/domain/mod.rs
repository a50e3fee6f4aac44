//! Domain model for liveprof
//!
//! This module contains core domain types and errors that provide:
//! - Compile-time safety via newtype pattern
//! - Parsing of user-supplied addresses
//! - Structured error handling

pub mod errors;
pub mod types;

// Re-export common types for convenience
pub use types::{Endpoint, PeerAddr, Signum};

pub use errors::{
    ClientError, EndpointParseError, ExportError, ProtocolError, ServerError, TriggerError,
};
