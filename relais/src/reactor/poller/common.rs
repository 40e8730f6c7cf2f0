use std::os::fd::RawFd;

/// Readiness interest for a registered file descriptor.
///
/// The poller only distinguishes read and write readiness; accept and
/// connect interests map onto them (a listening socket becomes readable
/// when a connection is pending, a connecting socket becomes writable
/// once the handshake has finished).
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct Interest {
    pub(crate) read: bool,
    pub(crate) write: bool,
}

impl Interest {
    /// Returns true if neither read nor write readiness is wanted.
    pub(crate) fn is_empty(&self) -> bool {
        !self.read && !self.write
    }
}

pub(crate) struct Waker(pub(crate) RawFd);

unsafe impl Send for Waker {}
unsafe impl Sync for Waker {}
