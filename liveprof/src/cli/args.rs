//! CLI argument definitions

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args as ClapArgs, Parser, Subcommand};

use crate::domain::{Endpoint, EndpointParseError, Signum};
use crate::profiling::TriggerTransport;
use crate::server::{DEFAULT_BIND, MAX_INTERVAL};

#[derive(Parser)]
#[command(
    name = "liveprof",
    version,
    about = "Profile a running program and watch its statistics live",
    after_help = "\
EXAMPLES:
    liveprof serve                           Serve the demo workload on 127.0.0.1:8912
    liveprof serve --unix /tmp/prof.sock     Serve on a unix socket
    liveprof view 127.0.0.1:8912             Watch a running server
    liveprof view a:8912,b:8912              Fail over between two servers
    liveprof view liveprof-1700000000.json   Open a saved dump
    liveprof view a:8912 --headless --flat   Print per-function totals
    liveprof live -i 1                       Workload, server and viewer in one process"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the demo workload and serve its statistics
    Serve(ServeArgs),
    /// Run the demo workload with an in-process viewer
    Live(LiveArgs),
    /// Show statistics from a server or a dump file
    View(ViewArgs),
}

#[derive(ClapArgs)]
pub struct ServeArgs {
    /// TCP address to listen on
    #[arg(long, value_name = "ADDR", default_value = DEFAULT_BIND)]
    pub bind: String,

    /// Listen on a unix socket instead of TCP
    #[arg(long, value_name = "PATH")]
    pub unix: Option<PathBuf>,

    /// Length of one profiling window in seconds
    #[arg(short, long, value_name = "SECS", default_value = "5", value_parser = parse_seconds)]
    pub interval: Duration,

    /// Signal number that toggles the profiler (default: SIGUSR2)
    #[arg(long, value_name = "N", conflicts_with = "channel_trigger")]
    pub signum: Option<i32>,

    /// Toggle the profiler from a control thread instead of a signal
    #[arg(long)]
    pub channel_trigger: bool,

    /// Stop after N seconds (0 = unlimited)
    #[arg(long, default_value = "0")]
    pub duration: u64,

    /// Print connection events to stdout
    #[arg(short, long)]
    pub verbose: bool,
}

impl ServeArgs {
    #[must_use]
    pub fn endpoint(&self) -> Endpoint {
        match &self.unix {
            Some(path) => Endpoint::Unix(path.clone()),
            None => Endpoint::Tcp(self.bind.clone()),
        }
    }

    #[must_use]
    pub fn trigger_transport(&self) -> TriggerTransport {
        trigger_transport(self.channel_trigger, self.signum)
    }
}

#[derive(ClapArgs)]
pub struct LiveArgs {
    /// Length of one profiling window in seconds
    #[arg(short, long, value_name = "SECS", default_value = "1", value_parser = parse_seconds)]
    pub interval: Duration,

    /// Toggle the profiler from a control thread instead of a signal
    #[arg(long)]
    pub channel_trigger: bool,
}

impl LiveArgs {
    #[must_use]
    pub fn trigger_transport(&self) -> TriggerTransport {
        trigger_transport(self.channel_trigger, None)
    }
}

#[derive(ClapArgs)]
pub struct ViewArgs {
    /// Dump file, unix socket path or HOST:PORT; comma separated servers are
    /// tried in turn
    #[arg(value_name = "SOURCE")]
    pub source: String,

    /// Print each snapshot as text instead of starting the TUI
    #[arg(long)]
    pub headless: bool,

    /// With --headless, print one line per function instead of the call tree
    #[arg(long, requires = "headless")]
    pub flat: bool,

    /// Title shown above the statistics
    #[arg(long)]
    pub title: Option<String>,

    /// Seconds to wait after every server in the list has failed
    #[arg(long, value_name = "SECS", default_value = "1", value_parser = parse_seconds)]
    pub retry_delay: Duration,
}

/// What `liveprof view` should open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewSource {
    Dump(PathBuf),
    Servers(Vec<Endpoint>),
}

impl ViewSource {
    /// A regular file is a dump; anything else is one or more servers.
    pub fn parse(source: &str) -> Result<Self, EndpointParseError> {
        let path = PathBuf::from(source);
        if std::fs::metadata(&path).is_ok_and(|meta| meta.is_file()) {
            return Ok(ViewSource::Dump(path));
        }
        let servers = source
            .split(',')
            .filter(|part| !part.trim().is_empty())
            .map(str::parse)
            .collect::<Result<Vec<Endpoint>, _>>()?;
        if servers.is_empty() {
            return Err(EndpointParseError(source.to_string()));
        }
        Ok(ViewSource::Servers(servers))
    }
}

fn trigger_transport(channel: bool, signum: Option<i32>) -> TriggerTransport {
    if channel {
        TriggerTransport::Channel
    } else {
        TriggerTransport::Signal(signum.map_or(Signum::DEFAULT, Signum))
    }
}

fn parse_seconds(s: &str) -> Result<Duration, String> {
    let secs: f64 = s.parse().map_err(|_| format!("`{s}` is not a number of seconds"))?;
    if !secs.is_finite() || secs <= 0.0 {
        return Err(format!("`{s}` must be a positive number of seconds"));
    }
    match Duration::try_from_secs_f64(secs) {
        Ok(duration) if duration <= MAX_INTERVAL => Ok(duration),
        _ => Err(format!("`{s}` exceeds the limit of {} seconds", MAX_INTERVAL.as_secs())),
    }
}
