use super::handler::{Registration, SocketHandler};

use std::os::fd::RawFd;
use std::sync::Arc;

/// A task queued for execution on a selector thread.
///
/// All registration state for a channel is mutated only by its owning
/// selector thread; every other thread communicates by enqueuing one of
/// these, drained at the top of each poll iteration.
pub(crate) enum SelectorTask {
    /// Install a registration for one interest kind on a channel.
    Register {
        fd: RawFd,
        registration: Registration,
    },

    /// Remove any registration on the channel whose handler matches by
    /// identity. A no-op on runners that do not own the channel and for
    /// already fired or cancelled registrations.
    Cancel {
        fd: RawFd,
        handler: Arc<dyn SocketHandler>,
    },

    /// Close the channel: notify every live registration via `closed()`,
    /// drop them and close the descriptor. A no-op on non-owning runners.
    Close { fd: RawFd },

    /// Terminate the selector loop.
    Shutdown,
}
