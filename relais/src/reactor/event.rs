use std::os::fd::RawFd;

/// An I/O event reported by the poller.
///
/// An `Event` carries readiness information for a registered file
/// descriptor. It is produced by the poller and consumed by the selector
/// runner to dispatch the matching handler callbacks.
pub(crate) struct Event {
    /// Token associated with the registered file descriptor.
    ///
    /// Tokens are the file descriptors themselves; there is exactly one
    /// poller entry per descriptor.
    pub(crate) token: usize,

    /// Indicates that the file descriptor is readable.
    pub(crate) readable: bool,

    /// Indicates that the file descriptor is writable.
    pub(crate) writable: bool,
}

impl Event {
    pub(crate) fn fd(&self) -> RawFd {
        self.token as RawFd
    }
}
