//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

use liveprof::client::{ClientState, StatsSink};
use liveprof::profiling::Profiler;
use liveprof_common::{StatNode, StatsSnapshot};

/// Profiler that reports the same snapshot for every window.
#[derive(Debug)]
pub struct MockProfiler {
    running: AtomicBool,
    pub starts: AtomicUsize,
    pub clears: AtomicUsize,
    snapshot: StatsSnapshot,
}

impl MockProfiler {
    pub fn new(snapshot: StatsSnapshot) -> Arc<Self> {
        Arc::new(Self {
            running: AtomicBool::new(false),
            starts: AtomicUsize::new(0),
            clears: AtomicUsize::new(0),
            snapshot,
        })
    }
}

impl Profiler for MockProfiler {
    fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
        self.starts.fetch_add(1, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn result(&self) -> StatsSnapshot {
        self.snapshot.clone()
    }

    fn clear(&self) {
        self.clears.fetch_add(1, Ordering::SeqCst);
    }

    fn kind(&self) -> &'static str {
        "mock"
    }
}

/// root → {"a": 1 call, 0.5 s}
pub fn sample_snapshot() -> StatsSnapshot {
    StatsSnapshot::new(1, 0.25, 0.5, vec![StatNode::leaf("a", 1, 0.5)])
}

#[derive(Debug, Clone, PartialEq)]
pub enum SinkCall {
    Stats(StatsSnapshot, String),
    State(ClientState),
}

/// Sink that records every call; clones share the log.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    calls: Arc<Mutex<Vec<SinkCall>>>,
}

impl RecordingSink {
    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn stats(&self) -> Vec<StatsSnapshot> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SinkCall::Stats(snapshot, _) => Some(snapshot),
                SinkCall::State(_) => None,
            })
            .collect()
    }

    pub fn states(&self) -> Vec<ClientState> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SinkCall::State(state) => Some(state),
                SinkCall::Stats(..) => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl StatsSink for RecordingSink {
    fn set_stats(&mut self, snapshot: StatsSnapshot, title: &str, _timestamp: SystemTime) {
        self.calls.lock().unwrap().push(SinkCall::Stats(snapshot, title.to_string()));
    }

    fn set_state(&mut self, state: &ClientState) {
        self.calls.lock().unwrap().push(SinkCall::State(state.clone()));
    }
}

/// Poll `cond` every few milliseconds until it holds or `timeout` passes.
pub async fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
