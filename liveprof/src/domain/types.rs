//! Newtypes and address types shared by the server and the viewer.

use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use super::errors::EndpointParseError;

/// Signal number used to toggle the profiler inside the target process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signum(pub i32);

impl Signum {
    /// `SIGUSR2`, which nothing in the Rust runtime reserves.
    pub const DEFAULT: Signum = Signum(libc::SIGUSR2);
}

impl Default for Signum {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for Signum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SIG#{}", self.0)
    }
}

/// Where a profiling server listens, or where a viewer connects to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// `HOST:PORT`, resolved when connecting.
    Tcp(String),
    /// Path of a unix domain socket.
    Unix(PathBuf),
}

impl Endpoint {
    /// Title shown by the viewer: `HOST:PORT` or the socket's file name.
    #[must_use]
    pub fn title(&self) -> String {
        match self {
            Endpoint::Tcp(addr) => addr.clone(),
            Endpoint::Unix(path) => path
                .file_name()
                .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned()),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(addr) => f.write_str(addr),
            Endpoint::Unix(path) => write!(f, "{}", path.display()),
        }
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Endpoint::Tcp(addr.to_string())
    }
}

impl FromStr for Endpoint {
    type Err = EndpointParseError;

    /// Accepts `unix:PATH`, anything that looks like a path, or `HOST:PORT`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(path) = s.strip_prefix("unix:") {
            return Ok(Endpoint::Unix(PathBuf::from(path)));
        }
        if s.contains('/') || Path::new(s).exists() {
            return Ok(Endpoint::Unix(PathBuf::from(s)));
        }

        let Some((host, port)) = s.rsplit_once(':') else {
            return Err(EndpointParseError(s.to_string()));
        };
        if host.is_empty() || port.parse::<u16>().is_err() {
            return Err(EndpointParseError(s.to_string()));
        }
        Ok(Endpoint::Tcp(s.to_string()))
    }
}

/// Address of a connected viewer, as far as the server can tell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerAddr {
    Tcp(SocketAddr),
    /// Unix socket or socket pair; such peers have no printable address.
    Local,
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerAddr::Tcp(addr) => write!(f, "{addr}"),
            PeerAddr::Local => f.write_str("local socket"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tcp_endpoint() {
        let endpoint: Endpoint = "127.0.0.1:8912".parse().unwrap();
        assert_eq!(endpoint, Endpoint::Tcp("127.0.0.1:8912".to_string()));
        assert_eq!(endpoint.title(), "127.0.0.1:8912");
    }

    #[test]
    fn test_parse_unix_endpoint() {
        let endpoint: Endpoint = "/tmp/liveprof.sock".parse().unwrap();
        assert_eq!(endpoint, Endpoint::Unix(PathBuf::from("/tmp/liveprof.sock")));
        assert_eq!(endpoint.title(), "liveprof.sock");

        let prefixed: Endpoint = "unix:relative.sock".parse().unwrap();
        assert_eq!(prefixed, Endpoint::Unix(PathBuf::from("relative.sock")));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("no-port-here".parse::<Endpoint>().is_err());
        assert!(":8912".parse::<Endpoint>().is_err());
        assert!("localhost:notaport".parse::<Endpoint>().is_err());
    }
}
