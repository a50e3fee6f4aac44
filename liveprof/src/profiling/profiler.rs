//! # Instrumentation Layer
//!
//! [`Profiler`] is the seam between the remote-profiling machinery and
//! whatever actually measures the program. The trigger flips it on and off,
//! the server reads and clears its accumulated statistics.
//!
//! [`SpanProfiler`] is the bundled implementation: the program marks regions
//! with [`SpanProfiler::enter`] and the returned [`Span`] guards record call
//! counts and elapsed time into a shared [`RecordingStats`] tree while the
//! profiler is running.
//!
//! ## Signal Safety
//!
//! `start()` and `stop()` may run inside a signal handler. They must only
//! touch atomics and read clocks: no locks, no allocation.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use liveprof_common::StatsSnapshot;

use super::clock::{monotonic_ns, process_cpu_ns};
use super::recording::{NodeId, RecordingStats, ROOT};

/// What the trigger and the server need from an instrumentation layer.
pub trait Profiler: Send + Sync {
    /// Begin recording. Must be async-signal-safe. No-op when running.
    fn start(&self);

    /// Stop recording. Must be async-signal-safe. No-op when stopped.
    fn stop(&self);

    fn is_running(&self) -> bool;

    /// Freeze everything recorded since the last [`clear`](Profiler::clear).
    fn result(&self) -> StatsSnapshot;

    /// Discard the accumulated statistics.
    fn clear(&self);

    /// Short name announced to viewers.
    fn kind(&self) -> &'static str {
        "profiler"
    }
}

#[derive(Debug, Default)]
struct Inner {
    running: AtomicBool,
    window_wall_start: AtomicU64,
    window_cpu_start: AtomicU64,
    wall_ns: AtomicU64,
    cpu_ns: AtomicU64,
    windows: AtomicU64,
    stats: Mutex<RecordingStats>,
}

/// Explicit-span profiler. Cheap to clone; clones share one recording.
#[derive(Debug, Clone, Default)]
pub struct SpanProfiler {
    inner: Arc<Inner>,
}

impl SpanProfiler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a top-level span.
    pub fn enter(&self, name: &str) -> Span<'_> {
        self.open(ROOT, name)
    }

    fn stats(&self) -> MutexGuard<'_, RecordingStats> {
        self.inner.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open(&self, parent: NodeId, name: &str) -> Span<'_> {
        let mut stats = self.stats();
        let node = stats.ensure_child(parent, name);
        let entered_at = if self.is_running() {
            stats.record_entering(node);
            Some(Instant::now())
        } else {
            None
        };
        Span {
            profiler: self,
            node,
            generation: stats.generation(),
            entered_at,
        }
    }

    fn close(&self, node: NodeId, generation: u64, elapsed: Duration) {
        let mut stats = self.stats();
        // A clear() or stop() in between means the call belongs to no window
        if stats.generation() == generation && self.is_running() {
            stats.record_leaving(node, elapsed);
        }
    }

    fn window_times(&self) -> (Duration, Duration) {
        let inner = &self.inner;
        let mut wall = inner.wall_ns.load(Ordering::Acquire);
        let mut cpu = inner.cpu_ns.load(Ordering::Acquire);
        if inner.running.load(Ordering::Acquire) {
            wall += monotonic_ns().saturating_sub(inner.window_wall_start.load(Ordering::Acquire));
            cpu += process_cpu_ns().saturating_sub(inner.window_cpu_start.load(Ordering::Acquire));
        }
        (Duration::from_nanos(cpu), Duration::from_nanos(wall))
    }
}

impl Profiler for SpanProfiler {
    fn start(&self) {
        let inner = &self.inner;
        if inner.running.load(Ordering::Acquire) {
            return;
        }
        inner.window_wall_start.store(monotonic_ns(), Ordering::Release);
        inner.window_cpu_start.store(process_cpu_ns(), Ordering::Release);
        inner.running.store(true, Ordering::Release);
    }

    fn stop(&self) {
        let inner = &self.inner;
        if !inner.running.swap(false, Ordering::AcqRel) {
            return;
        }
        let wall = monotonic_ns().saturating_sub(inner.window_wall_start.load(Ordering::Acquire));
        let cpu = process_cpu_ns().saturating_sub(inner.window_cpu_start.load(Ordering::Acquire));
        inner.wall_ns.fetch_add(wall, Ordering::AcqRel);
        inner.cpu_ns.fetch_add(cpu, Ordering::AcqRel);
        inner.windows.fetch_add(1, Ordering::AcqRel);
    }

    fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    fn result(&self) -> StatsSnapshot {
        let (cpu, wall) = self.window_times();
        let windows = self.inner.windows.load(Ordering::Acquire);
        self.stats().freeze(windows, cpu, wall)
    }

    fn clear(&self) {
        let mut stats = self.stats();
        stats.clear();
        let inner = &self.inner;
        inner.wall_ns.store(0, Ordering::Release);
        inner.cpu_ns.store(0, Ordering::Release);
        inner.windows.store(0, Ordering::Release);
        if inner.running.load(Ordering::Acquire) {
            inner.window_wall_start.store(monotonic_ns(), Ordering::Release);
            inner.window_cpu_start.store(process_cpu_ns(), Ordering::Release);
        }
    }

    fn kind(&self) -> &'static str {
        "span"
    }
}

/// Guard for one entered region. Records when dropped.
#[must_use = "a span records its call when dropped"]
#[derive(Debug)]
pub struct Span<'p> {
    profiler: &'p SpanProfiler,
    node: NodeId,
    generation: u64,
    /// `None` when the profiler was stopped at entry.
    entered_at: Option<Instant>,
}

impl<'p> Span<'p> {
    /// Open a span nested under this one.
    pub fn enter(&self, name: &str) -> Span<'p> {
        self.profiler.open(self.node, name)
    }
}

impl Drop for Span<'_> {
    fn drop(&mut self) {
        if let Some(entered_at) = self.entered_at {
            self.profiler.close(self.node, self.generation, entered_at.elapsed());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spin(duration: Duration) {
        let start = Instant::now();
        while start.elapsed() < duration {
            std::hint::spin_loop();
        }
    }

    #[test]
    fn test_start_stop_toggle_running() {
        let profiler = SpanProfiler::new();
        assert!(!profiler.is_running());
        profiler.start();
        profiler.start();
        assert!(profiler.is_running());
        profiler.stop();
        assert!(!profiler.is_running());
        profiler.stop();
        assert_eq!(profiler.result().calls, 1);
    }

    #[test]
    fn test_spans_record_only_while_running() {
        let profiler = SpanProfiler::new();
        drop(profiler.enter("ignored"));

        profiler.start();
        {
            let outer = profiler.enter("outer");
            let _inner = outer.enter("inner");
            spin(Duration::from_millis(2));
        }
        profiler.stop();

        let snapshot = profiler.result();
        assert!(snapshot.child("ignored").is_none());
        let outer = snapshot.child("outer").unwrap();
        assert_eq!(outer.calls, 1);
        let inner = outer.child("inner").unwrap();
        assert!(inner.total_time >= 0.002);
        assert!(outer.total_time >= inner.total_time);
        assert!(snapshot.wall_time > 0.0);
        assert!(snapshot.is_consistent());
    }

    #[test]
    fn test_span_open_across_clear_is_discarded() {
        let profiler = SpanProfiler::new();
        profiler.start();
        let span = profiler.enter("straddler");
        profiler.clear();
        drop(span);
        let snapshot = profiler.result();
        assert!(snapshot.child("straddler").is_none());
    }

    #[test]
    fn test_nested_span_survives_window_boundary() {
        let profiler = SpanProfiler::new();
        let outer = profiler.enter("main_loop");
        profiler.start();
        {
            let _work = outer.enter("work");
        }
        profiler.stop();

        let snapshot = profiler.result();
        let main_loop = snapshot.child("main_loop").unwrap();
        assert_eq!(main_loop.calls, 0);
        assert_eq!(main_loop.child("work").unwrap().calls, 1);
        drop(outer);
    }

    #[test]
    fn test_clear_resets_window_times() {
        let profiler = SpanProfiler::new();
        profiler.start();
        spin(Duration::from_millis(1));
        profiler.stop();
        profiler.clear();
        let snapshot = profiler.result();
        assert_eq!(snapshot.calls, 0);
        assert_eq!(snapshot.wall_time, 0.0);
    }
}
