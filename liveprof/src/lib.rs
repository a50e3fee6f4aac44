//! # liveprof - Live Statistical Profiler with Remote Viewers
//!
//! liveprof collects a call-tree of timing statistics inside a running
//! program and serves it, one profiling window at a time, to any number of
//! viewers connected over a TCP or unix socket. The program keeps running
//! the whole time; profiling is switched on only while somebody watches.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Target Process                             │
//! │                                                                 │
//! │  ┌──────────────┐  start/stop   ┌──────────────────────────┐    │
//! │  │   Profiler   │◀──────────────│   BackgroundTrigger      │    │
//! │  │ (SpanProf.)  │   (signal     │  signal handler or       │    │
//! │  └──────┬───────┘    handler)   │  control thread + ack    │    │
//! │         │ result()/clear()      └────────────▲─────────────┘    │
//! │         ▼                                    │ toggle()         │
//! │  ┌─────────────────────────────────────────────────────────┐    │
//! │  │                ProfilingServer (serve loop)             │    │
//! │  │  accept ── ConnectionSet ── window timer ── broadcast    │    │
//! │  └───────────────────────────┬─────────────────────────────┘    │
//! └──────────────────────────────┼──────────────────────────────────┘
//!                                │ [u32 BE length][JSON Message]
//!                                ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  ProfilingClient / FailoverProfilingClient (tokio task)         │
//! │         │ StatsSink                                             │
//! │         ▼                                                       │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐         │
//! │  │ ChannelSink  │──▶│     TUI      │   │ HeadlessSink │         │
//! │  └──────────────┘   │  (ratatui)   │   │  (text)      │         │
//! │                     └──────┬───────┘   └──────────────┘         │
//! │                            ▼ `s`                                │
//! │                     ┌──────────────┐                            │
//! │                     │ Export (dump)│                            │
//! │                     └──────────────┘                            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! ### Target Side
//!
//! - [`profiling`]: the [`Profiler`](profiling::Profiler) trait, the span
//!   profiler, the recording tree and the background trigger
//!   - `recording`: mutable call-tree that freezes into a `StatsSnapshot`
//!   - `profiler`: `SpanProfiler`, explicit span instrumentation
//!   - `trigger`: start/stop from another thread via a signal or a control
//!     thread, acknowledged through `AckEvent`
//!
//! - [`server`]: the serve loop, the connection set and server events
//!
//! ### Wire
//!
//! - [`protocol`]: 4-byte big-endian length-prefixed frames carrying JSON
//!   [`Message`](liveprof_common::Message)s, and the sockets they travel on
//!
//! ### Viewer Side
//!
//! - [`client`]: single-server and failover clients feeding a `StatsSink`
//! - [`tui`]: interactive tree table, plus a headless text renderer
//! - [`export`]: one-snapshot dump files for offline viewing
//!
//! ### Support
//!
//! - [`cli`]: command-line arguments
//! - [`domain`]: newtypes (`Signum`, `Endpoint`, `PeerAddr`) and error types
//! - [`workload`]: the synthetic program `liveprof serve` profiles
//!
//! ## Profiling Cycle
//!
//! 1. The first viewer connects; the server toggles the profiler on
//! 2. After `interval` the server toggles it off and waits for the ack
//! 3. The snapshot is read, the recording cleared, and one `Stats` frame is
//!    written to every viewer
//! 4. The next window opens right away; after the last viewer leaves the
//!    profiler stays off
//!
//! ## Typical Usage
//!
//! ```bash
//! # Serve the demo workload, watch it from another terminal
//! liveprof serve --unix /tmp/prof.sock
//! liveprof view /tmp/prof.sock
//!
//! # Everything in one process
//! liveprof live -i 1
//! ```

// Expose modules for testing
pub mod cli;
pub mod client;
pub mod domain;
pub mod export;
pub mod profiling;
pub mod protocol;
pub mod server;
pub mod tui;
pub mod workload;
