//! Binary event that a signal handler can set.
//!
//! Built on a self-pipe: `set()` is a single `write(2)`, which is
//! async-signal-safe, and `wait()` blocks in `poll(2)` until a byte arrives.
//! Both ends are non-blocking so a full pipe never stalls the handler.

#![allow(unsafe_code)] // pipe/poll/read/write go through libc

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

#[derive(Debug)]
pub struct AckEvent {
    read: OwnedFd,
    write: OwnedFd,
}

impl AckEvent {
    pub fn new() -> io::Result<Self> {
        let mut fds: [libc::c_int; 2] = [-1; 2];
        // SAFETY: fds points at two writable c_ints
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: pipe() succeeded, both descriptors are fresh and owned here
        let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
        for fd in [&read, &write] {
            set_flags(fd.as_raw_fd())?;
        }
        Ok(Self { read, write })
    }

    /// Set the event. Async-signal-safe.
    pub fn set(&self) {
        let byte = 1u8;
        // SAFETY: writes one byte from a live stack variable. EAGAIN means
        // the pipe is already full, i.e. the event is already set.
        let _ = unsafe { libc::write(self.write.as_raw_fd(), std::ptr::addr_of!(byte).cast(), 1) };
    }

    /// Reset the event without blocking.
    pub fn clear(&self) -> io::Result<()> {
        self.drain().map(|_| ())
    }

    /// Block until the event is set, then reset it.
    pub fn wait(&self) -> io::Result<()> {
        loop {
            let mut pfd = libc::pollfd {
                fd: self.read.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            };
            // SAFETY: pfd is a valid pollfd array of length one
            let rc = unsafe { libc::poll(&mut pfd, 1, -1) };
            if rc < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            if self.drain()? {
                return Ok(());
            }
        }
    }

    /// Returns whether anything was read.
    fn drain(&self) -> io::Result<bool> {
        let mut buf = [0u8; 64];
        let mut any = false;
        loop {
            // SAFETY: buf is writable for buf.len() bytes
            let n = unsafe { libc::read(self.read.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len()) };
            if n > 0 {
                any = true;
                continue;
            }
            if n == 0 {
                return Ok(any);
            }
            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::Interrupted => {}
                io::ErrorKind::WouldBlock => return Ok(any),
                _ => return Err(err),
            }
        }
    }
}

fn set_flags(fd: libc::c_int) -> io::Result<()> {
    // SAFETY: fcntl on a descriptor we own
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 || libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Save and restore `errno` around code running inside a signal handler.
pub(crate) mod errno {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    fn location() -> *mut libc::c_int {
        // SAFETY: returns the calling thread's errno slot
        unsafe { libc::__errno_location() }
    }

    #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
    fn location() -> *mut libc::c_int {
        // SAFETY: returns the calling thread's errno slot
        unsafe { libc::__error() }
    }

    pub(crate) fn get() -> libc::c_int {
        // SAFETY: location() is valid for the current thread
        unsafe { *location() }
    }

    pub(crate) fn set(value: libc::c_int) {
        // SAFETY: location() is valid for the current thread
        unsafe { *location() = value }
    }
}
