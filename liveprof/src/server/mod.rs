//! # Profiling Server
//!
//! Serves the target process's statistics to any number of viewers.
//!
//! ```text
//!                       ┌────────────── serve loop (one thread) ──────────────┐
//!   listener ── accept ─┤ ConnectionSet ◀── closed ids ◀── watcher tasks       │
//!                       │       │                                              │
//!                       │  window timer ── trigger.toggle() ── result/clear ──▶│── frame to all
//!                       └──────────────────────────────────────────────────────┘
//! ```
//!
//! Windows only run while at least one viewer is connected. Each window is
//! opened and closed through the [`BackgroundTrigger`]; the snapshot is read
//! and broadcast only after the closing toggle has been acknowledged, so a
//! viewer never sees a partial window. Accepting and reaping viewers goes on
//! while a window is open; only the two acknowledgements block the loop.

pub mod connection;
pub mod events;

use std::future::Future;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};

use liveprof_common::Message;
use log::{debug, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

pub use connection::{ConnectionId, ConnectionSet};
pub use events::{log_event, EventCallback, ServerEvent};

use crate::domain::{Endpoint, PeerAddr, ServerError, Signum};
use crate::profiling::{BackgroundTrigger, Profiler, TriggerTransport};
use crate::protocol::transport::AsyncListener;
use crate::protocol::{encode_message, BoxedReader, BoxedWriter, Listener, Socket};

/// Window length when none is configured.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// Address `liveprof serve` listens on by default.
pub const DEFAULT_BIND: &str = "127.0.0.1:8912";

pub const DEFAULT_SIGNUM: Signum = Signum::DEFAULT;

pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest window the loop schedules; longer intervals are capped to it.
pub const MAX_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// How long accepting pauses after a failed `accept` (e.g. `EMFILE`).
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Length of one profiling window.
    pub interval: Duration,
    /// A viewer that cannot take a frame within this is dropped.
    pub write_timeout: Duration,
    pub trigger_transport: TriggerTransport,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            trigger_transport: TriggerTransport::Signal(DEFAULT_SIGNUM),
        }
    }
}

pub struct ProfilingServer {
    trigger: BackgroundTrigger,
    listener: Option<Listener>,
    pending: Vec<Socket>,
    config: ServerConfig,
    on_event: EventCallback,
}

impl ProfilingServer {
    /// Create a server and register the trigger's handler.
    ///
    /// Call from the main thread: with the signal transport this installs
    /// the process-wide handler. `listener` may be `None` for a server fed
    /// only through [`connected`](Self::connected).
    pub fn new(
        profiler: Arc<dyn Profiler>,
        listener: Option<Listener>,
        config: ServerConfig,
    ) -> Result<Self, ServerError> {
        let mut trigger = BackgroundTrigger::new(profiler, config.trigger_transport)?;
        if let Some(previous) = trigger.prepare()? {
            debug!(
                "Replaced {} disposition for {}",
                if previous.is_default() { "default" } else { "custom" },
                previous.signum()
            );
        }
        Ok(Self {
            trigger,
            listener,
            pending: Vec::new(),
            config,
            on_event: Box::new(log_event),
        })
    }

    /// Bind `endpoint` and create a server on it. Bind failures are returned
    /// here, before any loop runs.
    pub fn bind(profiler: Arc<dyn Profiler>, endpoint: &Endpoint, config: ServerConfig) -> Result<Self, ServerError> {
        let listener = Listener::bind(endpoint)?;
        Self::new(profiler, Some(listener), config)
    }

    #[must_use]
    pub fn with_event_callback(mut self, on_event: EventCallback) -> Self {
        self.on_event = on_event;
        self
    }

    #[must_use]
    pub fn local_endpoint(&self) -> Option<&Endpoint> {
        self.listener.as_ref().map(Listener::local_endpoint)
    }

    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Register an already connected viewer, e.g. one end of a socket pair.
    pub fn connected(&mut self, socket: Socket) {
        self.pending.push(socket);
    }

    fn emit(&self, event: &ServerEvent) {
        (self.on_event)(event);
    }

    /// Serve until the process exits, or, without a listener, until the
    /// last viewer has gone.
    pub async fn serve_forever(self) -> Result<(), ServerError> {
        self.serve_until(std::future::pending()).await
    }

    /// Serve until `shutdown` resolves.
    pub async fn serve_until<F>(mut self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        let listener = self.listener.take().map(Listener::into_async).transpose()?;
        let (closed_tx, mut closed_rx) = mpsc::unbounded_channel();
        let mut connections = ConnectionSet::new(closed_tx);

        if let Some(listener) = &listener {
            self.emit(&ServerEvent::Listening {
                endpoint: listener_endpoint(listener),
            });
        }
        for socket in std::mem::take(&mut self.pending) {
            let (reader, writer, addr) = socket.into_split()?;
            self.admit(&mut connections, reader, writer, addr).await;
        }

        let mut window = WindowState::Idle;
        let mut accept_pause = AcceptPause::default();
        tokio::pin!(shutdown);

        loop {
            if connections.is_empty() {
                if window.is_cycling() {
                    self.stop_cycle(&mut window)?;
                }
                if listener.is_none() {
                    break;
                }
            } else if let WindowState::Idle | WindowState::Between = window {
                self.open_window(&mut window)?;
            }

            let deadline = window.deadline();
            tokio::select! {
                () = &mut shutdown => break,
                accepted = accept_next(listener.as_ref()), if !accept_pause.is_paused() => match accepted {
                    Ok((reader, writer, addr)) => self.admit(&mut connections, reader, writer, addr).await,
                    Err(err) => {
                        warn!("Accept failed: {err}");
                        accept_pause.failed(Instant::now());
                    }
                },
                () = tokio::time::sleep_until(accept_pause.resume_at()), if accept_pause.is_paused() => {
                    accept_pause.resume();
                }
                Some(id) = closed_rx.recv() => {
                    if let Some(addr) = connections.remove(id) {
                        self.emit(&ServerEvent::Disconnected { addr, total: connections.len() });
                    }
                }
                () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.close_window(&mut window, &mut connections).await?;
                }
            }
        }

        if window.is_cycling() {
            self.stop_cycle(&mut window)?;
        }
        connections.clear();
        Ok(())
    }

    async fn admit(&self, connections: &mut ConnectionSet, reader: BoxedReader, writer: BoxedWriter, addr: PeerAddr) {
        let id = connections.insert(reader, writer, addr.clone());
        self.emit(&ServerEvent::Connected {
            addr,
            total: connections.len(),
        });
        let hello = match encode_message(&Message::hello(self.trigger.profiler().kind())) {
            Ok(frame) => frame,
            Err(err) => {
                warn!("Failed to encode greeting: {err}");
                return;
            }
        };
        if let Err(addr) = connections.send_to(id, &hello, self.config.write_timeout).await {
            self.emit(&ServerEvent::Disconnected {
                addr,
                total: connections.len(),
            });
        }
    }

    fn open_window(&self, window: &mut WindowState) -> Result<(), ServerError> {
        if let WindowState::Idle = window {
            self.emit(&ServerEvent::ProfilerStarted {
                interval: self.config.interval,
            });
        }
        self.trigger.toggle()?;
        *window = WindowState::Open(Instant::now() + self.config.interval.min(MAX_INTERVAL));
        Ok(())
    }

    async fn close_window(&self, window: &mut WindowState, connections: &mut ConnectionSet) -> Result<(), ServerError> {
        self.trigger.toggle()?;
        *window = WindowState::Between;

        let profiler = self.trigger.profiler();
        let snapshot = profiler.result();
        profiler.clear();

        let frame = encode_message(&Message::Stats {
            snapshot,
            captured_at: SystemTime::now(),
        })?;
        for addr in connections.broadcast(&frame, self.config.write_timeout).await {
            self.emit(&ServerEvent::Disconnected {
                addr,
                total: connections.len(),
            });
        }
        Ok(())
    }

    fn stop_cycle(&self, window: &mut WindowState) -> Result<(), ServerError> {
        if let WindowState::Open(_) = window {
            self.trigger.toggle()?;
        }
        self.trigger.profiler().clear();
        *window = WindowState::Idle;
        self.emit(&ServerEvent::ProfilerStopped);
        Ok(())
    }
}

/// Where the loop is in the profiling cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WindowState {
    /// No viewers, profiler off.
    Idle,
    /// Profiler running until the deadline.
    Open(Instant),
    /// A window just closed; the next one opens on the next turn.
    Between,
}

impl WindowState {
    fn is_cycling(self) -> bool {
        !matches!(self, WindowState::Idle)
    }

    fn deadline(self) -> Option<Instant> {
        match self {
            WindowState::Open(deadline) => Some(deadline),
            _ => None,
        }
    }
}

fn listener_endpoint(listener: &AsyncListener) -> Endpoint {
    match listener {
        AsyncListener::Tcp(listener) => listener
            .local_addr()
            .map_or_else(|_| Endpoint::Tcp(String::from("?")), Endpoint::from),
        AsyncListener::Unix(_, file) => Endpoint::Unix(file.path().to_path_buf()),
    }
}

async fn accept_next(listener: Option<&AsyncListener>) -> std::io::Result<(BoxedReader, BoxedWriter, PeerAddr)> {
    match listener {
        Some(listener) => listener.accept().await,
        None => std::future::pending().await,
    }
}

/// Accepting stays off for [`ACCEPT_BACKOFF`] after a failure, so a
/// persistent error does not spin the loop.
#[derive(Debug, Default)]
struct AcceptPause {
    until: Option<Instant>,
}

impl AcceptPause {
    fn failed(&mut self, now: Instant) {
        self.until = Some(now + ACCEPT_BACKOFF);
    }

    fn is_paused(&self) -> bool {
        self.until.is_some()
    }

    fn resume_at(&self) -> Instant {
        self.until.unwrap_or_else(Instant::now)
    }

    fn resume(&mut self) {
        self.until = None;
    }
}

// ============================================================================
// Background Thread
// ============================================================================

/// A server running on its own thread.
#[derive(Debug)]
pub struct ServerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<Result<(), ServerError>>>,
}

impl ServerHandle {
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Ask the loop to stop and wait for it.
    pub fn shutdown(mut self) -> Result<(), ServerError> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.wait()
    }

    /// Wait for the loop to end on its own.
    pub fn join(mut self) -> Result<(), ServerError> {
        self.wait()
    }

    fn wait(&mut self) -> Result<(), ServerError> {
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .unwrap_or_else(|_| Err(ServerError::Io(std::io::Error::other("server thread panicked")))),
            None => Ok(()),
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// Run `server` on a dedicated thread with its own current-thread runtime,
/// next to the code being profiled.
pub fn spawn_background(server: ProfilingServer) -> Result<ServerHandle, ServerError> {
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let thread = std::thread::Builder::new()
        .name("liveprof-server".to_string())
        .spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
            runtime.block_on(server.serve_until(async {
                let _ = shutdown_rx.await;
            }))
        })?;
    Ok(ServerHandle {
        shutdown: Some(shutdown_tx),
        thread: Some(thread),
    })
}
