//! Clock reads that are safe to perform inside a signal handler.
//!
//! `clock_gettime` is on the POSIX list of async-signal-safe functions, so
//! the profiler's start/stop path reads time through it instead of
//! [`std::time::Instant`].

#![allow(unsafe_code)] // clock_gettime requires unsafe

use std::time::Duration;

fn read_clock(clock: libc::clockid_t) -> Duration {
    let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
    // SAFETY: ts is a valid, writable timespec
    let rc = unsafe { libc::clock_gettime(clock, &mut ts) };
    if rc != 0 {
        return Duration::ZERO;
    }
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    Duration::new(ts.tv_sec as u64, ts.tv_nsec as u32)
}

/// Monotonic wall clock, in nanoseconds since an arbitrary epoch.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn monotonic_ns() -> u64 {
    read_clock(libc::CLOCK_MONOTONIC).as_nanos() as u64
}

/// CPU time consumed by the whole process, in nanoseconds.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn process_cpu_ns() -> u64 {
    read_clock(libc::CLOCK_PROCESS_CPUTIME_ID).as_nanos() as u64
}
