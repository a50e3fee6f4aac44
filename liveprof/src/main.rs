//! # liveprof - Main Entry Point
//!
//! Three subcommands:
//! - **serve**: run the demo workload and serve its statistics on a socket
//! - **live**: workload, server and TUI in one process over a socket pair
//! - **view**: watch one or more servers, or open a saved dump
//!   (`--headless` prints text instead of starting the TUI, `--flat` one
//!   line per function)

#![allow(clippy::too_many_lines)]

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::bounded;
use liveprof::cli::{Args, Command, LiveArgs, ServeArgs, ViewArgs, ViewSource};
use liveprof::client::{
    ChannelSink, ClientConfig, ClientHandle, FailoverProfilingClient, ProfilingClient, StatsSink,
};
use liveprof::domain::{ClientError, Endpoint};
use liveprof::export::load_dump;
use liveprof::profiling::SpanProfiler;
use liveprof::protocol::Socket;
use liveprof::server::{spawn_background, ProfilingServer, ServerConfig, ServerEvent};
use liveprof::tui::headless::{render_flat_text, render_text, HeadlessSink};
use liveprof::tui::{self, ViewerMode};
use liveprof::workload::Workload;
use liveprof_common::SortKey;
use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;

/// Capacity of the client → TUI channel.
const VIEWER_QUEUE: usize = 1000;

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    let msg = err.to_string().to_lowercase();
    if msg.contains("expected host:port") || msg.contains("invalid source") {
        EXIT_USAGE
    } else {
        EXIT_ERROR
    }
}

#[tokio::main]
async fn run() -> Result<()> {
    let args = Args::parse();
    match args.command {
        Command::Serve(serve_args) => serve(serve_args).await,
        Command::Live(live_args) => live(live_args).await,
        Command::View(view_args) => view(view_args).await,
    }
}

// ============================================================================
// serve
// ============================================================================

async fn serve(args: ServeArgs) -> Result<()> {
    let endpoint = args.endpoint();
    let config = ServerConfig {
        interval: args.interval,
        trigger_transport: args.trigger_transport(),
        ..ServerConfig::default()
    };

    let profiler = SpanProfiler::new();
    let mut server = ProfilingServer::bind(Arc::new(profiler.clone()), &endpoint, config)
        .with_context(|| format!("Failed to serve on {endpoint}"))?;
    if args.verbose {
        server = server.with_event_callback(Box::new(|event: &ServerEvent| println!("{event}")));
    }

    println!("liveprof v{}", env!("CARGO_PKG_VERSION"));
    if let Some(local) = server.local_endpoint() {
        println!("listening: {local}");
    }
    println!("interval: {:.2}s", args.interval.as_secs_f64());

    let workload = Workload::spawn(profiler).context("Failed to start workload")?;

    let limit = (args.duration > 0).then(|| Duration::from_secs(args.duration));
    let shutdown = async move {
        let ctrl_c = tokio::signal::ctrl_c();
        match limit {
            Some(limit) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    () = tokio::time::sleep(limit) => info!("Duration limit reached"),
                }
            }
            None => {
                let _ = ctrl_c.await;
            }
        }
    };
    let result = server.serve_until(shutdown).await;
    workload.stop();
    result.context("Server failed")
}

// ============================================================================
// live
// ============================================================================

async fn live(args: LiveArgs) -> Result<()> {
    let config = ServerConfig {
        interval: args.interval,
        trigger_transport: args.trigger_transport(),
        ..ServerConfig::default()
    };

    let profiler = SpanProfiler::new();
    let (server_end, viewer_end) = Socket::pair().context("Failed to create socket pair")?;
    // The terminal belongs to the TUI; keep server chatter at debug level
    let mut server = ProfilingServer::new(Arc::new(profiler.clone()), None, config)
        .context("Failed to set up profiling server")?
        .with_event_callback(Box::new(|event: &ServerEvent| debug!("{event}")));
    server.connected(server_end);
    let server = spawn_background(server).context("Failed to start server thread")?;
    let workload = Workload::spawn(profiler).context("Failed to start workload")?;

    let (tx, rx) = bounded(VIEWER_QUEUE);
    let client_config = ClientConfig {
        title: Some("liveprof (in-process)".to_string()),
        ..ClientConfig::default()
    };
    let client = ProfilingClient::from_socket(ChannelSink::new(tx), viewer_end, client_config).start();

    let viewer = tokio::task::spawn_blocking(move || tui::run_viewer(rx, None, ViewerMode::Live)).await;

    client.stop().await;
    server.shutdown().context("Server failed")?;
    workload.stop();
    viewer.context("Viewer thread panicked")?
}

// ============================================================================
// view
// ============================================================================

async fn view(args: ViewArgs) -> Result<()> {
    let source = ViewSource::parse(&args.source).with_context(|| format!("Invalid source {:?}", args.source))?;
    match source {
        ViewSource::Dump(path) => {
            let (snapshot, captured_at) =
                load_dump(&path).with_context(|| format!("Failed to load dump {}", path.display()))?;
            let title = args.title.unwrap_or_else(|| {
                path.file_name()
                    .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned())
            });
            if args.headless {
                let text = if args.flat {
                    render_flat_text(&snapshot, &title, SortKey::default())
                } else {
                    render_text(&snapshot, &title, SortKey::default())
                };
                print!("{text}");
                return Ok(());
            }
            // Nothing else will arrive; the sender goes away right here
            let (_, rx) = bounded(1);
            tokio::task::spawn_blocking(move || {
                tui::run_viewer(rx, Some((snapshot, title, captured_at)), ViewerMode::Offline)
            })
            .await
            .context("Viewer thread panicked")?
        }
        ViewSource::Servers(servers) => {
            let config = ClientConfig {
                title: args.title,
                retry_delay: args.retry_delay,
                ..ClientConfig::default()
            };
            if args.headless {
                let sink = HeadlessSink::new(std::io::stdout(), SortKey::default()).flat(args.flat);
                let client = start_client(sink, servers, config)?;
                return wait_headless(client).await;
            }

            let (tx, rx) = bounded(VIEWER_QUEUE);
            let client = start_client(ChannelSink::new(tx), servers, config)?;
            let viewer = tokio::task::spawn_blocking(move || tui::run_viewer(rx, None, ViewerMode::Live)).await;
            client.stop().await;
            viewer.context("Viewer thread panicked")?
        }
    }
}

/// One server gets a plain client; several get a failover client.
fn start_client<S: StatsSink>(sink: S, mut servers: Vec<Endpoint>, config: ClientConfig) -> Result<ClientHandle> {
    if servers.len() == 1 {
        let endpoint = servers.remove(0);
        return Ok(ProfilingClient::new(sink, endpoint, config).start());
    }
    Ok(FailoverProfilingClient::new(sink, servers, config)?.start())
}

async fn wait_headless(client: ClientHandle) -> Result<()> {
    tokio::select! {
        result = client.join() => match result {
            Err(ClientError::Disconnected(server)) => {
                info!("{server} closed the connection");
                Ok(())
            }
            other => other.context("Client failed"),
        },
        _ = tokio::signal::ctrl_c() => Ok(()),
    }
}
