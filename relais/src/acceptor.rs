//! Accept loop handler.
//!
//! An [`Acceptor`] is a registration that never expires and is never used
//! up: every accept-ready event takes exactly one pending connection,
//! hands it to the application listener and immediately re-registers for
//! the next one. The loop is driven entirely by readiness events and ends
//! only when the registration is cancelled during shutdown.

use crate::reactor::handler::{AcceptHandler, SocketHandler};
use crate::reactor::poller::platform::sys_accept;
use crate::reactor::Reactor;

use std::io;
use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::sync::{Arc, Weak};

/// Callback invoked once per accepted connection.
///
/// The socket is already configured non-blocking. The callback runs on a
/// selector thread and must not block; hand heavier setup to the
/// reactor's background tasks.
pub trait AcceptorListener: Send + Sync {
    fn connection_accepted(&self, fd: RawFd, peer: SocketAddr);
}

/// A standard acceptor.
///
/// Never times out and never uses a separate thread; keeps accepting
/// connections until it is cancelled.
pub struct Acceptor {
    fd: RawFd,
    reactor: Arc<Reactor>,
    listener: Arc<dyn AcceptorListener>,
    me: Weak<Acceptor>,
}

impl Acceptor {
    /// Creates a new acceptor for the given listening socket.
    pub fn new(
        fd: RawFd,
        reactor: Arc<Reactor>,
        listener: Arc<dyn AcceptorListener>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            fd,
            reactor,
            listener,
            me: me.clone(),
        })
    }

    /// Registers accept interest with the reactor.
    pub fn register(self: &Arc<Self>) {
        self.reactor.wait_for_accept(self.fd, self.clone());
    }

    /// Cancels the accept registration, ending the loop.
    pub fn unregister(self: &Arc<Self>) {
        let handler: Arc<dyn SocketHandler> = self.clone();
        self.reactor.cancel(self.fd, &handler);
    }
}

impl SocketHandler for Acceptor {
    fn description(&self) -> String {
        format!("acceptor: fd: {}", self.fd)
    }

    fn timed_out(&self) {
        // No deadline is ever set; nothing can expire.
    }

    fn closed(&self) {
        tracing::info!(fd = self.fd, "listening socket closed");
    }
}

impl AcceptHandler for Acceptor {
    fn accept(&self) {
        match sys_accept(self.fd) {
            Ok((client, peer)) => {
                tracing::debug!(fd = self.fd, client, %peer, "connection accepted");
                self.listener.connection_accepted(client, peer);
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => {
                tracing::error!(fd = self.fd, error = %e, "accept failed");
            }
        }

        if let Some(me) = self.me.upgrade() {
            me.register();
        }
    }
}
