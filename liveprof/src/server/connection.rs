//! The set of connected viewers.
//!
//! Only the server loop touches the set. Each connection's read half is
//! watched by a small task that reports the connection id once the peer
//! closes or errors; viewers never send anything the server acts on.

use std::time::Duration;

use log::debug;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::domain::PeerAddr;
use crate::protocol::{write_frame, BoxedReader, BoxedWriter};

pub type ConnectionId = u64;

struct Connection {
    id: ConnectionId,
    addr: PeerAddr,
    writer: BoxedWriter,
    watcher: JoinHandle<()>,
}

pub struct ConnectionSet {
    connections: Vec<Connection>,
    next_id: ConnectionId,
    closed_tx: UnboundedSender<ConnectionId>,
}

impl ConnectionSet {
    /// `closed_tx` receives the id of every connection whose peer went away.
    #[must_use]
    pub fn new(closed_tx: UnboundedSender<ConnectionId>) -> Self {
        Self {
            connections: Vec::new(),
            next_id: 0,
            closed_tx,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Track a new connection. Must run inside a tokio runtime.
    pub fn insert(&mut self, mut reader: BoxedReader, writer: BoxedWriter, addr: PeerAddr) -> ConnectionId {
        let id = self.next_id;
        self.next_id += 1;
        let closed_tx = self.closed_tx.clone();
        let watcher = tokio::spawn(async move {
            let mut buf = [0u8; 512];
            loop {
                match reader.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            let _ = closed_tx.send(id);
        });
        self.connections.push(Connection {
            id,
            addr,
            writer,
            watcher,
        });
        id
    }

    /// Forget a connection and close it. `None` if it was already gone.
    pub fn remove(&mut self, id: ConnectionId) -> Option<PeerAddr> {
        let index = self.connections.iter().position(|c| c.id == id)?;
        let connection = self.connections.remove(index);
        connection.watcher.abort();
        Some(connection.addr)
    }

    /// Write `frame` to one connection; a failure removes it.
    pub async fn send_to(&mut self, id: ConnectionId, frame: &[u8], timeout: Duration) -> Result<(), PeerAddr> {
        let Some(connection) = self.connections.iter_mut().find(|c| c.id == id) else {
            return Ok(());
        };
        if write_with_timeout(&mut connection.writer, frame, timeout).await {
            return Ok(());
        }
        Err(self.remove(id).unwrap_or(PeerAddr::Local))
    }

    /// Write `frame` to every connection. Connections whose write fails or
    /// times out are removed and returned; the others still get the frame.
    pub async fn broadcast(&mut self, frame: &[u8], timeout: Duration) -> Vec<PeerAddr> {
        let mut failed = Vec::new();
        for connection in &mut self.connections {
            if !write_with_timeout(&mut connection.writer, frame, timeout).await {
                debug!("Write to {} failed", connection.addr);
                failed.push(connection.id);
            }
        }
        failed.into_iter().filter_map(|id| self.remove(id)).collect()
    }

    /// Close every connection.
    pub fn clear(&mut self) {
        for connection in self.connections.drain(..) {
            connection.watcher.abort();
        }
    }
}

impl Drop for ConnectionSet {
    fn drop(&mut self) {
        self.clear();
    }
}

async fn write_with_timeout(writer: &mut BoxedWriter, frame: &[u8], timeout: Duration) -> bool {
    matches!(tokio::time::timeout(timeout, write_frame(writer, frame)).await, Ok(Ok(())))
}
