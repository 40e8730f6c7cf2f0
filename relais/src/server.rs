//! Listener bootstrap.
//!
//! [`AcceptingServer`] wires the pieces together: it binds a non-blocking
//! listening socket, builds a reactor and registers an [`Acceptor`] that
//! republishes accepted connections to the application listener.

use crate::acceptor::{Acceptor, AcceptorListener};
use crate::reactor::poller::platform::{
    sys_bind, sys_close, sys_ipv6_is_necessary, sys_listen, sys_parse_sockaddr,
    sys_set_reuseaddr, sys_socket, sys_sockname,
};
use crate::reactor::{Reactor, ReactorBuilder};

use std::io;
use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::sync::{Arc, Mutex};

/// A basic accepting server.
///
/// Binds on construction; [`start`](Self::start) registers the accept
/// loop and [`shutdown`](Self::shutdown) tears the reactor down.
pub struct AcceptingServer {
    fd: RawFd,
    reactor: Arc<Reactor>,
    listener: Arc<dyn AcceptorListener>,
    acceptor: Mutex<Option<Arc<Acceptor>>>,
}

impl AcceptingServer {
    /// Creates a new server bound to the given address.
    ///
    /// The address must be a socket address string such as
    /// `"127.0.0.1:8080"` or `"[::]:8080"`. The reactor is built from
    /// `builder` and starts its threads immediately.
    pub fn new(
        address: &str,
        listener: Arc<dyn AcceptorListener>,
        builder: ReactorBuilder,
    ) -> io::Result<Self> {
        let (storage, len) = sys_parse_sockaddr(address)?;
        let domain = storage.ss_family as i32;

        let fd = sys_socket(domain)?;

        let setup = sys_set_reuseaddr(fd)
            .and_then(|_| sys_ipv6_is_necessary(fd, domain))
            .and_then(|_| sys_bind(fd, &storage, len))
            .and_then(|_| sys_listen(fd));
        if let Err(e) = setup {
            sys_close(fd);
            return Err(e);
        }

        let reactor = builder.build()?;

        Ok(Self {
            fd,
            reactor,
            listener,
            acceptor: Mutex::new(None),
        })
    }

    /// Registers the accept loop with the reactor.
    pub fn start(&self) {
        let acceptor = Acceptor::new(self.fd, self.reactor.clone(), self.listener.clone());
        acceptor.register();
        *self.acceptor.lock().unwrap() = Some(acceptor);
    }

    /// Cancels the accept loop and shuts the reactor down.
    pub fn shutdown(&self) {
        if let Some(acceptor) = self.acceptor.lock().unwrap().take() {
            acceptor.unregister();
        }
        self.reactor.shutdown();
    }

    /// The reactor driving this server.
    pub fn reactor(&self) -> Arc<Reactor> {
        self.reactor.clone()
    }

    /// The local address the server is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        sys_sockname(self.fd)
    }
}

impl Drop for AcceptingServer {
    /// Closes the listening socket.
    fn drop(&mut self) {
        sys_close(self.fd);
    }
}
