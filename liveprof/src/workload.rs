//! Synthetic program for `liveprof serve` and `liveprof live`.
//!
//! A thread that loops over a few nested, instrumented phases with uneven
//! costs, so the viewer has a tree worth looking at.

use std::hint::black_box;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::profiling::SpanProfiler;

/// Pause at the end of every iteration, so the process is not pinned at
/// 100 % CPU.
const IDLE: Duration = Duration::from_millis(2);

/// The running workload thread. Dropping it stops the thread.
#[derive(Debug)]
pub struct Workload {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Workload {
    /// Start the workload, recording into `profiler`.
    pub fn spawn(profiler: SpanProfiler) -> io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let thread = std::thread::Builder::new()
            .name("liveprof-workload".to_string())
            .spawn(move || run(&profiler, &flag))?;
        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }

    /// Stop the thread and wait for it.
    pub fn stop(mut self) {
        self.halt();
    }

    fn halt(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Workload {
    fn drop(&mut self) {
        self.halt();
    }
}

fn run(profiler: &SpanProfiler, stop: &AtomicBool) {
    let mut round = 0_u64;
    while !stop.load(Ordering::Acquire) {
        round += 1;
        let main = profiler.enter("main_loop");
        {
            let parse = main.enter("parse");
            spin(20_000);
            for _ in 0..3 {
                let _token = parse.enter("tokenize");
                spin(5_000);
            }
        }
        {
            let compute = main.enter("compute");
            spin(40_000);
            // Every fourth round takes the slow path
            if round % 4 == 0 {
                let _slow = compute.enter("slow_path");
                spin(120_000);
            }
        }
        {
            let _report = main.enter("report");
            spin(10_000);
        }
        drop(main);

        let _idle = profiler.enter("idle");
        std::thread::sleep(IDLE);
    }
}

/// Burn roughly `iterations` loop turns of CPU.
fn spin(iterations: u64) -> u64 {
    let mut acc = 0_u64;
    for i in 0..iterations {
        acc = black_box(acc.wrapping_mul(31).wrapping_add(i));
    }
    acc
}
