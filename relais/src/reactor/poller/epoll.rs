//! Linux `epoll`-based poller implementation.
//!
//! This module provides the readiness backend for the selector runners.
//!
//! Responsibilities:
//! - Register file descriptors with read/write interests
//! - Block waiting for I/O readiness, bounded by the earliest deadline
//! - Wake a blocked runner when cross-thread tasks are submitted
//!
//! Each selector runner owns exactly one poller; only the runner's own
//! thread ever calls [`EpollPoller::poll`].

use super::common::{Interest, Waker};
use crate::reactor::event::Event;

use libc::{
    epoll_create1, epoll_ctl, epoll_event, epoll_wait, EPOLLERR, EPOLLHUP, EPOLLIN, EPOLLOUT,
    EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLL_CTL_MOD,
};
use std::io;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Duration;

/// Reserved token used internally for the wake-up event.
///
/// This value must never collide with tokens derived from file
/// descriptors. Using `u64::MAX` guarantees uniqueness.
const WAKE_TOKEN: u64 = u64::MAX;

/// Linux `epoll` poller.
///
/// This poller owns:
/// - an `epoll` instance,
/// - an internal `eventfd` used as a wake-up signal,
/// - a reusable event buffer.
///
/// The wake-up mechanism allows other threads (the reactor facade and
/// background tasks) to interrupt a blocking `epoll_wait()` call after
/// enqueuing a selector task.
pub(crate) struct EpollPoller {
    /// Epoll file descriptor.
    epoll: RawFd,

    /// Reusable buffer for epoll events.
    events: Vec<epoll_event>,

    /// Waker wrapping the internal eventfd.
    waker: Arc<Waker>,
}

unsafe impl Send for EpollPoller {}

impl Waker {
    /// Wake the poller.
    ///
    /// This writes to the internal `eventfd`, causing `epoll_wait`
    /// to return immediately.
    pub(crate) fn wake(&self) {
        let buf: u64 = 1;
        unsafe {
            libc::write(self.0, &buf as *const _ as *const _, 8);
        }
    }
}

impl EpollPoller {
    /// Create a new `EpollPoller`.
    ///
    /// This:
    /// - creates the epoll instance,
    /// - creates a non-blocking `eventfd`,
    /// - registers the eventfd into epoll as a persistent wake source.
    pub(crate) fn new() -> Self {
        let epoll = unsafe { epoll_create1(EPOLL_CLOEXEC) };
        assert!(epoll >= 0, "epoll_create1 failed");

        let eventfd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        assert!(eventfd >= 0, "eventfd failed");

        let mut event = epoll_event {
            events: EPOLLIN as u32,
            u64: WAKE_TOKEN,
        };

        let rc = unsafe { epoll_ctl(epoll, EPOLL_CTL_ADD, eventfd, &mut event) };
        assert!(rc == 0, "failed to register wake eventfd");

        Self {
            epoll,
            events: Vec::with_capacity(64),
            waker: Arc::new(Waker(eventfd)),
        }
    }

    /// Return the poller waker.
    ///
    /// The reactor facade uses this to interrupt `epoll_wait` when
    /// selector tasks arrive.
    pub(crate) fn waker(&self) -> Arc<Waker> {
        self.waker.clone()
    }

    /// Register a file descriptor with the poller.
    pub(crate) fn register(&self, fd: RawFd, token: usize, interest: Interest) {
        let mut event = Self::event_for(token, interest);

        let rc = unsafe { epoll_ctl(self.epoll, EPOLL_CTL_ADD, fd, &mut event) };
        debug_assert_eq!(rc, 0);
    }

    /// Update interest flags for an already registered descriptor.
    pub(crate) fn reregister(&self, fd: RawFd, token: usize, interest: Interest) {
        let mut event = Self::event_for(token, interest);

        let rc = unsafe { epoll_ctl(self.epoll, EPOLL_CTL_MOD, fd, &mut event) };
        debug_assert_eq!(rc, 0);
    }

    /// Remove a file descriptor from the poller.
    pub(crate) fn deregister(&self, fd: RawFd) {
        unsafe {
            epoll_ctl(self.epoll, EPOLL_CTL_DEL, fd, std::ptr::null_mut());
        }
    }

    fn event_for(token: usize, interest: Interest) -> epoll_event {
        let mut flags = 0;

        if interest.read {
            flags |= EPOLLIN;
        }
        if interest.write {
            flags |= EPOLLOUT;
        }

        epoll_event {
            events: flags as u32,
            u64: token as u64,
        }
    }

    /// Poll for I/O readiness events.
    ///
    /// Blocks until:
    /// - at least one file descriptor becomes ready,
    /// - the wake event is triggered,
    /// - or the optional timeout expires.
    pub(crate) fn poll(
        &mut self,
        events: &mut Vec<Event>,
        timeout: Option<Duration>,
    ) -> io::Result<()> {
        // Rounded up: truncating would turn a sub-millisecond deadline
        // into a zero timeout and spin until it expires.
        let timeout_ms = timeout
            .map(|t| t.as_nanos().div_ceil(1_000_000).min(i32::MAX as u128) as i32)
            .unwrap_or(-1);

        unsafe {
            self.events.set_len(self.events.capacity());
        }

        let n = unsafe {
            epoll_wait(
                self.epoll,
                self.events.as_mut_ptr(),
                self.events.capacity() as i32,
                timeout_ms,
            )
        };

        if n < 0 {
            let err = io::Error::last_os_error();
            unsafe {
                self.events.set_len(0);
            }
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }

        unsafe {
            self.events.set_len(n as usize);
        }

        events.clear();

        for ev in &self.events {
            // Wake-up event
            if ev.u64 == WAKE_TOKEN {
                let mut buf = 0u64;
                unsafe {
                    libc::read(self.waker.0, &mut buf as *mut _ as *mut _, 8);
                }
                continue;
            }

            let token = ev.u64 as usize;

            let readable = ev.events & ((EPOLLIN | EPOLLERR | EPOLLHUP) as u32) != 0;
            let writable = ev.events & ((EPOLLOUT | EPOLLERR | EPOLLHUP) as u32) != 0;

            if let Some(e) = events.iter_mut().find(|e| e.token == token) {
                e.readable |= readable;
                e.writable |= writable;
            } else {
                events.push(Event {
                    token,
                    readable,
                    writable,
                });
            }
        }

        Ok(())
    }
}

impl Drop for EpollPoller {
    /// Closes the epoll instance and the wake eventfd.
    fn drop(&mut self) {
        unsafe {
            libc::close(self.waker.0);
            libc::close(self.epoll);
        }
    }
}
