//! # Background Trigger
//!
//! Lets an outside actor flip a [`Profiler`] on and off inside the target
//! process without the target's threads polling for it.
//!
//! ```text
//!   caller                 notification              handler
//!   ──────                 ────────────              ───────
//!   event.clear()
//!   notify() ───────────▶ kill(getpid(), signum) ──▶ running? stop : start
//!                          or channel send            event.set()
//!   event.wait() ◀──────────────────────────────────────────┘
//! ```
//!
//! Each [`toggle`](BackgroundTrigger::toggle) is one acknowledged phase.
//! [`run`](BackgroundTrigger::run) pairs two of them into a scoped window.
//!
//! Two transports carry the notification:
//! - [`TriggerTransport::Signal`]: a process signal handled by a `sigaction`
//!   handler. The handler only touches atomics and writes one byte.
//! - [`TriggerTransport::Channel`]: a dedicated control thread fed through a
//!   crossbeam channel, for hosts where signals are unavailable or taken.
//!
//! Overlapping `toggle`/`run` calls from different threads are not
//! supported. A notification that never reaches the handler leaves the
//! caller blocked.

#![allow(unsafe_code)] // sigaction, kill and the handler's raw slot access

use std::fmt;
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::Sender;
use liveprof_common::StatsSnapshot;
use log::{debug, warn};

use super::ack_event::{errno, AckEvent};
use super::profiler::Profiler;
use crate::domain::{Signum, TriggerError};

/// One past the highest signal number a trigger may use.
const SLOT_COUNT: usize = 65;

/// Per-signal registration, read by [`handle_signal`]. Each non-null entry
/// owns one strong count of its `TriggerShared`.
static SLOTS: [AtomicPtr<TriggerShared>; SLOT_COUNT] =
    [const { AtomicPtr::new(ptr::null_mut()) }; SLOT_COUNT];

/// How toggle requests reach the profiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerTransport {
    Signal(Signum),
    Channel,
}

impl Default for TriggerTransport {
    fn default() -> Self {
        TriggerTransport::Signal(Signum::DEFAULT)
    }
}

struct TriggerShared {
    profiler: Arc<dyn Profiler>,
    event: AckEvent,
}

impl TriggerShared {
    /// Runs on the notification path; must stay async-signal-safe.
    fn toggle(&self) {
        if self.profiler.is_running() {
            self.profiler.stop();
        } else {
            self.profiler.start();
        }
        self.event.set();
    }
}

extern "C" fn handle_signal(signum: libc::c_int) {
    let saved = errno::get();
    if let Some(slot) = usize::try_from(signum).ok().and_then(|i| SLOTS.get(i)) {
        let shared = slot.load(Ordering::Acquire);
        if !shared.is_null() {
            // SAFETY: the slot holds a strong reference until the owning
            // trigger has restored the previous handler and cleared it
            unsafe { (*shared).toggle() };
        }
    }
    errno::set(saved);
}

/// Signal disposition that was in place before [`BackgroundTrigger::prepare`].
pub struct PreviousHandler {
    signum: Signum,
    action: libc::sigaction,
}

impl PreviousHandler {
    #[must_use]
    pub fn signum(&self) -> Signum {
        self.signum
    }

    /// Whether the previous disposition was the default one.
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.action.sa_sigaction == libc::SIG_DFL
    }

    /// Reinstall the previous disposition.
    ///
    /// The trigger does this itself when dropped; calling it while the
    /// trigger is still in use makes later toggles hang.
    pub fn restore(&self) -> Result<(), TriggerError> {
        install(self.signum, &self.action, None)
    }
}

impl fmt::Debug for PreviousHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreviousHandler")
            .field("signum", &self.signum)
            .field("default", &self.is_default())
            .finish_non_exhaustive()
    }
}

fn install(
    signum: Signum,
    action: &libc::sigaction,
    previous: Option<&mut libc::sigaction>,
) -> Result<(), TriggerError> {
    let previous = previous.map_or(ptr::null_mut(), ptr::from_mut);
    // SAFETY: action is a fully initialised sigaction; previous is either
    // null or a writable sigaction
    if unsafe { libc::sigaction(signum.0, action, previous) } != 0 {
        return Err(TriggerError::InstallFailed {
            signum,
            source: std::io::Error::last_os_error(),
        });
    }
    Ok(())
}

enum Notifier {
    Unprepared,
    Signal {
        signum: Signum,
        previous: libc::sigaction,
    },
    Channel {
        tx: Option<Sender<()>>,
        thread: Option<JoinHandle<()>>,
    },
}

/// Toggles a profiler on request and waits for the toggle to land.
pub struct BackgroundTrigger {
    shared: Arc<TriggerShared>,
    transport: TriggerTransport,
    notifier: Notifier,
}

impl BackgroundTrigger {
    pub fn new(profiler: Arc<dyn Profiler>, transport: TriggerTransport) -> Result<Self, TriggerError> {
        if let TriggerTransport::Signal(signum) = transport {
            slot_index(signum)?;
        }
        Ok(Self {
            shared: Arc::new(TriggerShared {
                profiler,
                event: AckEvent::new()?,
            }),
            transport,
            notifier: Notifier::Unprepared,
        })
    }

    #[must_use]
    pub fn transport(&self) -> TriggerTransport {
        self.transport
    }

    #[must_use]
    pub fn profiler(&self) -> &Arc<dyn Profiler> {
        &self.shared.profiler
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.profiler.is_running()
    }

    #[must_use]
    pub fn is_prepared(&self) -> bool {
        !matches!(self.notifier, Notifier::Unprepared)
    }

    /// Register the notification handler.
    ///
    /// Call from the main thread before the first toggle. With the signal
    /// transport this returns the disposition that was replaced; handlers for
    /// other signals are left untouched. Preparing twice is a no-op.
    pub fn prepare(&mut self) -> Result<Option<PreviousHandler>, TriggerError> {
        match &self.notifier {
            Notifier::Signal { signum, previous } => {
                return Ok(Some(PreviousHandler {
                    signum: *signum,
                    action: *previous,
                }));
            }
            Notifier::Channel { .. } => return Ok(None),
            Notifier::Unprepared => {}
        }

        match self.transport {
            TriggerTransport::Signal(signum) => {
                let previous = self.install_handler(signum)?;
                debug!("Trigger handler installed for {signum}");
                self.notifier = Notifier::Signal { signum, previous };
                Ok(Some(PreviousHandler {
                    signum,
                    action: previous,
                }))
            }
            TriggerTransport::Channel => {
                let (tx, rx) = crossbeam_channel::unbounded::<()>();
                let shared = Arc::clone(&self.shared);
                let thread = std::thread::Builder::new()
                    .name("liveprof-trigger".to_string())
                    .spawn(move || {
                        for () in &rx {
                            shared.toggle();
                        }
                    })?;
                self.notifier = Notifier::Channel {
                    tx: Some(tx),
                    thread: Some(thread),
                };
                Ok(None)
            }
        }
    }

    fn install_handler(&self, signum: Signum) -> Result<libc::sigaction, TriggerError> {
        let slot = &SLOTS[slot_index(signum)?];
        let raw = Arc::into_raw(Arc::clone(&self.shared)).cast_mut();
        if slot
            .compare_exchange(ptr::null_mut(), raw, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // SAFETY: raw came from Arc::into_raw above and was never published
            drop(unsafe { Arc::from_raw(raw) });
            return Err(TriggerError::SignalInUse(signum));
        }

        // SAFETY: all-zero is a valid sigaction; the fields that matter are set below
        let mut action: libc::sigaction = unsafe { mem::zeroed() };
        action.sa_sigaction = handle_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
        action.sa_flags = libc::SA_RESTART;
        // SAFETY: sa_mask is a valid sigset_t inside action
        unsafe { libc::sigemptyset(&mut action.sa_mask) };

        // SAFETY: as above
        let mut previous: libc::sigaction = unsafe { mem::zeroed() };
        if let Err(err) = install(signum, &action, Some(&mut previous)) {
            release_slot(slot);
            return Err(err);
        }
        Ok(previous)
    }

    fn notify(&self) -> Result<(), TriggerError> {
        match &self.notifier {
            Notifier::Unprepared => Err(TriggerError::NotPrepared),
            Notifier::Signal { signum, .. } => {
                // SAFETY: plain syscalls with no pointer arguments
                if unsafe { libc::kill(libc::getpid(), signum.0) } != 0 {
                    return Err(TriggerError::SendFailed {
                        signum: *signum,
                        source: std::io::Error::last_os_error(),
                    });
                }
                Ok(())
            }
            Notifier::Channel { tx, .. } => tx
                .as_ref()
                .ok_or(TriggerError::ControlThreadGone)?
                .send(())
                .map_err(|_| TriggerError::ControlThreadGone),
        }
    }

    /// Flip the profiler once and block until the handler acknowledges.
    pub fn toggle(&self) -> Result<(), TriggerError> {
        self.shared.event.clear()?;
        self.notify()?;
        self.shared.event.wait()?;
        Ok(())
    }

    /// Start a profiling window. The profiler runs until the returned guard
    /// is finished or dropped.
    pub fn run(&self) -> Result<TriggerWindow<'_>, TriggerError> {
        self.toggle()?;
        Ok(TriggerWindow {
            trigger: self,
            finished: false,
        })
    }

    /// Profile for `duration` on the calling thread and return what was
    /// recorded during that window.
    pub fn profile_for(&self, duration: Duration) -> Result<StatsSnapshot, TriggerError> {
        let window = self.run()?;
        std::thread::sleep(duration);
        window.finish()?;
        Ok(self.shared.profiler.result())
    }
}

impl fmt::Debug for BackgroundTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackgroundTrigger")
            .field("transport", &self.transport)
            .field("prepared", &self.is_prepared())
            .field("profiler", &self.shared.profiler.kind())
            .finish()
    }
}

impl Drop for BackgroundTrigger {
    fn drop(&mut self) {
        match mem::replace(&mut self.notifier, Notifier::Unprepared) {
            Notifier::Unprepared => {}
            Notifier::Signal { signum, previous } => {
                if let Err(err) = install(signum, &previous, None) {
                    warn!("Failed to restore handler for {signum}: {err}");
                }
                if let Ok(index) = slot_index(signum) {
                    release_slot(&SLOTS[index]);
                }
            }
            Notifier::Channel { mut tx, mut thread } => {
                drop(tx.take());
                if let Some(thread) = thread.take() {
                    if thread.join().is_err() {
                        warn!("Trigger control thread panicked");
                    }
                }
            }
        }
    }
}

fn slot_index(signum: Signum) -> Result<usize, TriggerError> {
    match usize::try_from(signum.0) {
        Ok(index) if index > 0 && index < SLOT_COUNT => Ok(index),
        _ => Err(TriggerError::InvalidSignal(signum)),
    }
}

fn release_slot(slot: &AtomicPtr<TriggerShared>) {
    let raw = slot.swap(ptr::null_mut(), Ordering::AcqRel);
    if !raw.is_null() {
        // SAFETY: a non-null slot value always comes from Arc::into_raw
        drop(unsafe { Arc::from_raw(raw) });
    }
}

/// An open profiling window. Finishing it stops the profiler.
#[must_use = "dropping the window stops profiling immediately"]
#[derive(Debug)]
pub struct TriggerWindow<'t> {
    trigger: &'t BackgroundTrigger,
    finished: bool,
}

impl TriggerWindow<'_> {
    pub fn finish(mut self) -> Result<(), TriggerError> {
        self.finished = true;
        self.trigger.toggle()
    }
}

impl Drop for TriggerWindow<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(err) = self.trigger.toggle() {
                warn!("Failed to close profiling window: {err}");
            }
        }
    }
}
