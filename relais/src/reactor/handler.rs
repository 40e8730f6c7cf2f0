//! Handler contracts for readiness notifications.
//!
//! Client code registers interest in a channel by handing the reactor a
//! handler for one interest kind. A registration fires at most once: the
//! action callback, [`SocketHandler::timed_out`] or
//! [`SocketHandler::closed`] ends it, and re-registering afterwards is the
//! handler's own responsibility.

use std::ptr;
use std::sync::Arc;
use std::time::Instant;

/// Base contract shared by all readiness handlers.
///
/// Handlers are shared with the selector threads, so they must use
/// interior mutability for any state they carry.
pub trait SocketHandler: Send + Sync {
    /// Human readable description of the handler, used for diagnostics.
    fn description(&self) -> String;

    /// Absolute deadline for this registration, or `None` to wait forever.
    ///
    /// Queried live by the owning selector thread on every loop iteration.
    fn timeout_at(&self) -> Option<Instant> {
        None
    }

    /// Whether the handler wants its callbacks invoked on a background
    /// worker thread instead of inline on the selector thread.
    ///
    /// Handlers with heavier per-event logic should return true to keep
    /// the selector loop non-blocking.
    fn use_separate_thread(&self) -> bool {
        false
    }

    /// The registration's deadline passed without readiness.
    fn timed_out(&self);

    /// The channel was detected closed while the registration was live.
    fn closed(&self);
}

/// Handler for read readiness.
pub trait ReadHandler: SocketHandler {
    /// The channel has data available for reading.
    fn read(&self);
}

/// Handler for write readiness.
pub trait WriteHandler: SocketHandler {
    /// The channel can accept more data.
    fn write(&self);
}

/// Handler for accept readiness on a listening socket.
pub trait AcceptHandler: SocketHandler {
    /// The listening socket has a pending connection.
    fn accept(&self);
}

/// Handler for completion of a non-blocking connect.
pub trait ConnectHandler: SocketHandler {
    /// The outgoing connection finished its handshake.
    fn connected(&self);
}

/// A live registration record: one capability variant per interest kind.
pub(crate) enum Registration {
    Read(Arc<dyn ReadHandler>),
    Write(Arc<dyn WriteHandler>),
    Accept(Arc<dyn AcceptHandler>),
    Connect(Arc<dyn ConnectHandler>),
}

impl Registration {
    /// The base handler view, independent of interest kind.
    pub(crate) fn base(&self) -> &dyn SocketHandler {
        match self {
            Registration::Read(h) => h.as_ref(),
            Registration::Write(h) => h.as_ref(),
            Registration::Accept(h) => h.as_ref(),
            Registration::Connect(h) => h.as_ref(),
        }
    }

    /// Invokes the kind-specific action callback.
    pub(crate) fn fire(&self) {
        match self {
            Registration::Read(h) => h.read(),
            Registration::Write(h) => h.write(),
            Registration::Accept(h) => h.accept(),
            Registration::Connect(h) => h.connected(),
        }
    }

}

/// Compares two handlers by object identity.
pub(crate) fn same_handler(a: &dyn SocketHandler, b: &dyn SocketHandler) -> bool {
    ptr::addr_eq(a as *const dyn SocketHandler, b as *const dyn SocketHandler)
}
