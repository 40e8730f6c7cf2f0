//! Full-duplex byte relay.
//!
//! A [`Tunnel`] pairs two one-way pumps between two already-connected
//! sockets, used for CONNECT-style proxying. Each pump is a two-state
//! machine (waiting for read, writing) over one pooled buffer; either
//! pump detecting peer closure, a local error or a timeout shuts both
//! down. The external listener is notified exactly once, and the tunnel
//! never closes the underlying sockets itself; transport lifetime stays
//! with the listener so it can decide on connection reuse.

use crate::buffer::BufferPool;
use crate::reactor::handler::{ReadHandler, SocketHandler, WriteHandler};
use crate::reactor::poller::platform::{sys_read, sys_write};
use crate::reactor::Reactor;
use crate::traffic::TrafficCounter;

use std::io;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};

/// Notified exactly once when the tunnel has shut down.
///
/// Closing the two sockets is the listener's responsibility.
pub trait TunnelDoneListener: Send + Sync {
    fn tunnel_closed(&self);
}

/// State shared by both pumps.
struct TunnelShared {
    reactor: Arc<Reactor>,
    pool: Arc<BufferPool>,
    listener: Arc<dyn TunnelDoneListener>,

    /// Single-use guard: both pumps can detect the closure condition
    /// concurrently, only the first one may run the shutdown.
    closed: AtomicBool,

    pumps: OnceLock<(Weak<OneWayPump>, Weak<OneWayPump>)>,
}

impl TunnelShared {
    /// Shuts both pumps down and notifies the listener once.
    fn close_down(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some((a, b)) = self.pumps.get() {
            if let Some(pump) = a.upgrade() {
                pump.unregister();
            }
            if let Some(pump) = b.upgrade() {
                pump.unregister();
            }
        }

        // The sockets stay open; the listener owns them.
        self.listener.tunnel_closed();
    }
}

/// Buffer cursor for one pump.
#[derive(Default)]
struct PumpState {
    /// In-flight data, `None` while waiting for read with nothing
    /// buffered (the buffer is back in the pool between rounds).
    buf: Option<Vec<u8>>,
    start: usize,
    end: usize,
}

/// One direction of the relay.
struct OneWayPump {
    from: RawFd,
    to: RawFd,
    traffic: Arc<dyn TrafficCounter>,
    state: Mutex<PumpState>,
    shared: Arc<TunnelShared>,
    me: Weak<OneWayPump>,
}

impl OneWayPump {
    fn new(
        from: RawFd,
        to: RawFd,
        traffic: Arc<dyn TrafficCounter>,
        shared: Arc<TunnelShared>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            from,
            to,
            traffic,
            state: Mutex::new(PumpState::default()),
            shared,
            me: me.clone(),
        })
    }

    fn start(self: &Arc<Self>) {
        self.shared.reactor.wait_for_read(self.from, self.clone());
    }

    /// Cancels this pump's registrations on both sockets and returns its
    /// buffer to the pool.
    ///
    /// The state lock orders these cancels against the pump's own
    /// re-registrations: a pump only re-registers under the same lock
    /// after checking the closed flag, so a registration queued before
    /// the cancels is removed by them, and one attempted after sees the
    /// flag and is never issued.
    fn unregister(self: &Arc<Self>) {
        let handler: Arc<dyn SocketHandler> = self.clone();
        let mut state = self.state.lock().unwrap();

        self.shared.reactor.cancel(self.from, &handler);
        self.shared.reactor.cancel(self.to, &handler);

        if let Some(buf) = state.buf.take() {
            self.shared.pool.put_buffer(buf);
        }
    }

    /// Drains the buffered data toward `to`, re-registering for write
    /// readiness when the destination stops accepting bytes and for read
    /// readiness once the buffer is empty.
    fn write_data(&self, me: &Arc<OneWayPump>) {
        let mut state = self.state.lock().unwrap();

        if self.shared.closed.load(Ordering::SeqCst) {
            if let Some(buf) = state.buf.take() {
                self.shared.pool.put_buffer(buf);
            }
            return;
        }

        while let Some(buf) = state.buf.as_ref() {
            if state.start == state.end {
                break;
            }

            let n = sys_write(self.to, &buf[state.start..state.end]);
            if n > 0 {
                self.traffic.write(n as u64);
                state.start += n as usize;
                continue;
            }

            let e = io::Error::last_os_error();
            if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) {
                self.shared.reactor.wait_for_write(self.to, me.clone());
                return;
            }

            drop(state);
            tracing::warn!(from = self.from, to = self.to, error = %e, "tunnel write failed");
            self.shared.close_down();
            return;
        }

        // Fully drained: the buffer goes back to the pool until the next
        // read fires.
        if let Some(buf) = state.buf.take() {
            self.shared.pool.put_buffer(buf);
        }
        state.start = 0;
        state.end = 0;

        self.shared.reactor.wait_for_read(self.from, me.clone());
    }
}

impl SocketHandler for OneWayPump {
    fn description(&self) -> String {
        format!("tunnel pump: from: {} to: {}", self.from, self.to)
    }

    fn timed_out(&self) {
        tracing::warn!(from = self.from, to = self.to, "tunnel got timeout");
        self.shared.close_down();
    }

    fn closed(&self) {
        tracing::info!(from = self.from, to = self.to, "tunnel endpoint closed");
        self.shared.close_down();
    }
}

impl ReadHandler for OneWayPump {
    fn read(&self) {
        let Some(me) = self.me.upgrade() else {
            return;
        };

        let mut state = self.state.lock().unwrap();
        if self.shared.closed.load(Ordering::SeqCst) {
            return;
        }

        let mut buf = match state.buf.take() {
            Some(buf) => buf,
            None => self.shared.pool.get_buffer(),
        };

        let n = sys_read(self.from, &mut buf);
        if n > 0 {
            self.traffic.read(n as u64);
            state.start = 0;
            state.end = n as usize;
            state.buf = Some(buf);
            drop(state);
            self.write_data(&me);
            return;
        }

        if n == 0 {
            // Peer sent EOF; this ends the whole relay.
            self.shared.pool.put_buffer(buf);
            drop(state);
            self.shared.close_down();
            return;
        }

        let e = io::Error::last_os_error();
        self.shared.pool.put_buffer(buf);

        if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) {
            self.shared.reactor.wait_for_read(self.from, me);
        } else {
            drop(state);
            tracing::warn!(from = self.from, error = %e, "tunnel read failed");
            self.shared.close_down();
        }
    }
}

impl WriteHandler for OneWayPump {
    fn write(&self) {
        let Some(me) = self.me.upgrade() else {
            return;
        };
        self.write_data(&me);
    }
}

/// A full-duplex relay between two connected sockets.
pub struct Tunnel {
    a_to_b: Arc<OneWayPump>,
    b_to_a: Arc<OneWayPump>,
}

impl Tunnel {
    /// Creates a tunnel relaying between `a` and `b`.
    ///
    /// `a_traffic` accounts for bytes flowing out of `a`, `b_traffic`
    /// for bytes flowing out of `b`.
    pub fn new(
        reactor: Arc<Reactor>,
        pool: Arc<BufferPool>,
        a: RawFd,
        a_traffic: Arc<dyn TrafficCounter>,
        b: RawFd,
        b_traffic: Arc<dyn TrafficCounter>,
        listener: Arc<dyn TunnelDoneListener>,
    ) -> Self {
        tracing::trace!(a, b, "tunnel created");

        let shared = Arc::new(TunnelShared {
            reactor,
            pool,
            listener,
            closed: AtomicBool::new(false),
            pumps: OnceLock::new(),
        });

        let a_to_b = OneWayPump::new(a, b, a_traffic, shared.clone());
        let b_to_a = OneWayPump::new(b, a, b_traffic, shared.clone());

        let _ = shared
            .pumps
            .set((Arc::downgrade(&a_to_b), Arc::downgrade(&b_to_a)));

        Self { a_to_b, b_to_a }
    }

    /// Starts relaying data in both directions.
    pub fn start(&self) {
        tracing::trace!("tunnel started");
        self.a_to_b.start();
        self.b_to_a.start();
    }
}
