//! Stream sockets the protocol runs over: TCP and unix domain sockets.
//!
//! Listeners are bound with std types so bind errors surface before any
//! runtime exists; they are converted to tokio types inside the loop.

use std::io;
use std::net::{TcpListener, TcpStream};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;

use log::warn;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::domain::{Endpoint, PeerAddr, ServerError};

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A connected stream that has not been handed to a runtime yet.
#[derive(Debug)]
pub enum Socket {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl From<TcpStream> for Socket {
    fn from(stream: TcpStream) -> Self {
        Socket::Tcp(stream)
    }
}

impl From<UnixStream> for Socket {
    fn from(stream: UnixStream) -> Self {
        Socket::Unix(stream)
    }
}

impl Socket {
    /// Two connected unix sockets, for an in-process server and viewer.
    pub fn pair() -> io::Result<(Socket, Socket)> {
        let (a, b) = UnixStream::pair()?;
        Ok((Socket::Unix(a), Socket::Unix(b)))
    }

    /// Split into boxed tokio halves. Must run inside a tokio runtime.
    pub fn into_split(self) -> io::Result<(BoxedReader, BoxedWriter, PeerAddr)> {
        match self {
            Socket::Tcp(stream) => {
                stream.set_nonblocking(true)?;
                let peer = stream.peer_addr().map_or(PeerAddr::Local, PeerAddr::Tcp);
                let (read, write) = tokio::net::TcpStream::from_std(stream)?.into_split();
                Ok((Box::new(read), Box::new(write), peer))
            }
            Socket::Unix(stream) => {
                stream.set_nonblocking(true)?;
                let (read, write) = tokio::net::UnixStream::from_std(stream)?.into_split();
                Ok((Box::new(read), Box::new(write), PeerAddr::Local))
            }
        }
    }

    /// The whole stream as a reader. Must run inside a tokio runtime.
    pub fn into_reader(self) -> io::Result<BoxedReader> {
        match self {
            Socket::Tcp(stream) => {
                stream.set_nonblocking(true)?;
                Ok(Box::new(tokio::net::TcpStream::from_std(stream)?))
            }
            Socket::Unix(stream) => {
                stream.set_nonblocking(true)?;
                Ok(Box::new(tokio::net::UnixStream::from_std(stream)?))
            }
        }
    }
}

/// Open a stream to `endpoint`, keeping both directions in one reader so
/// the connection stays fully open while it is read.
pub async fn connect(endpoint: &Endpoint) -> io::Result<BoxedReader> {
    match endpoint {
        Endpoint::Tcp(addr) => Ok(Box::new(tokio::net::TcpStream::connect(addr.as_str()).await?)),
        Endpoint::Unix(path) => Ok(Box::new(tokio::net::UnixStream::connect(path).await?)),
    }
}

#[derive(Debug)]
enum ListenerKind {
    Tcp(TcpListener),
    Unix(UnixListener, SocketFile),
}

/// A bound, not yet serving, listening socket.
#[derive(Debug)]
pub struct Listener {
    kind: ListenerKind,
    endpoint: Endpoint,
}

impl Listener {
    pub fn bind(endpoint: &Endpoint) -> Result<Self, ServerError> {
        let bind_error = |source| ServerError::Bind {
            endpoint: endpoint.clone(),
            source,
        };
        match endpoint {
            Endpoint::Tcp(addr) => {
                let listener = TcpListener::bind(addr.as_str()).map_err(bind_error)?;
                listener.set_nonblocking(true).map_err(bind_error)?;
                let local = listener.local_addr().map_err(bind_error)?;
                Ok(Self {
                    kind: ListenerKind::Tcp(listener),
                    endpoint: Endpoint::from(local),
                })
            }
            Endpoint::Unix(path) => {
                let listener = UnixListener::bind(path).map_err(bind_error)?;
                let file = SocketFile(path.clone());
                listener.set_nonblocking(true).map_err(bind_error)?;
                Ok(Self {
                    kind: ListenerKind::Unix(listener, file),
                    endpoint: endpoint.clone(),
                })
            }
        }
    }

    /// Actual address, with the port filled in when binding port 0.
    #[must_use]
    pub fn local_endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Must run inside a tokio runtime.
    pub(crate) fn into_async(self) -> io::Result<AsyncListener> {
        match self.kind {
            ListenerKind::Tcp(listener) => Ok(AsyncListener::Tcp(tokio::net::TcpListener::from_std(listener)?)),
            ListenerKind::Unix(listener, file) => Ok(AsyncListener::Unix(
                tokio::net::UnixListener::from_std(listener)?,
                file,
            )),
        }
    }
}

pub(crate) enum AsyncListener {
    Tcp(tokio::net::TcpListener),
    Unix(tokio::net::UnixListener, SocketFile),
}

impl AsyncListener {
    pub(crate) async fn accept(&self) -> io::Result<(BoxedReader, BoxedWriter, PeerAddr)> {
        match self {
            AsyncListener::Tcp(listener) => {
                let (stream, addr) = listener.accept().await?;
                let (read, write) = stream.into_split();
                Ok((Box::new(read), Box::new(write), PeerAddr::Tcp(addr)))
            }
            AsyncListener::Unix(listener, _) => {
                let (stream, _) = listener.accept().await?;
                let (read, write) = stream.into_split();
                Ok((Box::new(read), Box::new(write), PeerAddr::Local))
            }
        }
    }
}

/// Removes a unix socket file once its listener is gone.
#[derive(Debug)]
pub(crate) struct SocketFile(PathBuf);

impl SocketFile {
    pub(crate) fn path(&self) -> &std::path::Path {
        &self.0
    }
}

impl Drop for SocketFile {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.0) {
            if err.kind() != io::ErrorKind::NotFound {
                warn!("Failed to remove {}: {err}", self.0.display());
            }
        }
    }
}
