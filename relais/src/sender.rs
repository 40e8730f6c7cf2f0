//! Asynchronous block writer.
//!
//! A [`BlockSender`] writes one block of data to a socket, optionally
//! wrapped in HTTP chunked transfer framing, resuming on write readiness
//! whenever the socket stops accepting bytes. The block buffer comes from
//! a [`BufferPool`] and is returned to it before any terminal listener
//! callback fires, so the listener may immediately reuse the pool.

use crate::buffer::BufferPool;
use crate::reactor::handler::{SocketHandler, WriteHandler};
use crate::reactor::poller::platform::sys_write;
use crate::reactor::Reactor;
use crate::traffic::TrafficCounter;

use std::io;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Instant;

/// Outcome callbacks for one block send.
///
/// Exactly one of the three methods is invoked, exactly once.
pub trait BlockSentListener: Send + Sync {
    /// The whole block including any framing reached the socket.
    fn block_sent(&self);

    /// The send did not finish before the deadline.
    fn timed_out(&self);

    /// The send failed or the channel was closed underneath it.
    fn failed(&self, error: io::Error);
}

/// Write cursor over the framed block.
///
/// The block is three consecutive segments: the chunk-size line (empty
/// when not chunking), the payload and the chunk terminator. `pos` is an
/// absolute offset across all three.
struct SendState {
    header: Vec<u8>,
    body: Option<Vec<u8>>,
    body_len: usize,
    trailer: &'static [u8],
    pos: usize,
}

/// Writes one block of data to a socket.
pub struct BlockSender {
    fd: RawFd,
    reactor: Arc<Reactor>,
    pool: Arc<BufferPool>,
    traffic: Arc<dyn TrafficCounter>,
    listener: Arc<dyn BlockSentListener>,
    deadline: Option<Instant>,
    state: Mutex<SendState>,

    /// Terminal callback guard.
    done: AtomicBool,

    me: Weak<BlockSender>,
}

impl BlockSender {
    /// Creates a sender for the first `len` bytes of `buffer`.
    ///
    /// The buffer must come from `pool` and goes back to it when the send
    /// ends, whatever the outcome. With `chunked` set the payload is
    /// framed as one HTTP chunk. The deadline is the reactor's default
    /// timeout horizon.
    ///
    /// # Panics
    ///
    /// Panics if `len` exceeds the buffer size.
    pub fn new(
        fd: RawFd,
        reactor: Arc<Reactor>,
        pool: Arc<BufferPool>,
        traffic: Arc<dyn TrafficCounter>,
        buffer: Vec<u8>,
        len: usize,
        chunked: bool,
        listener: Arc<dyn BlockSentListener>,
    ) -> Arc<Self> {
        assert!(len <= buffer.len(), "block length exceeds buffer size");

        let header = if chunked {
            format!("{len:x}\r\n").into_bytes()
        } else {
            Vec::new()
        };
        let trailer: &'static [u8] = if chunked { b"\r\n" } else { b"" };

        let deadline = reactor.default_timeout();

        Arc::new_cyclic(|me| Self {
            fd,
            reactor,
            pool,
            traffic,
            listener,
            deadline,
            state: Mutex::new(SendState {
                header,
                body: Some(buffer),
                body_len: len,
                trailer,
                pos: 0,
            }),
            done: AtomicBool::new(false),
            me: me.clone(),
        })
    }

    /// Starts writing the block.
    ///
    /// Writes as much as the socket takes right away and registers for
    /// write readiness if anything is left over.
    pub fn send(self: &Arc<Self>) {
        self.write_data(self);
    }

    fn write_data(&self, me: &Arc<BlockSender>) {
        let mut state = self.state.lock().unwrap();

        loop {
            let header_len = state.header.len();
            let body_len = state.body_len;
            let total = header_len + body_len + state.trailer.len();

            if state.pos >= total {
                drop(state);
                self.complete();
                return;
            }

            let n = {
                let segment: &[u8] = if state.pos < header_len {
                    &state.header[state.pos..]
                } else if state.pos < header_len + body_len {
                    let body = state.body.as_deref().unwrap_or(&[]);
                    &body[state.pos - header_len..body_len]
                } else {
                    &state.trailer[state.pos - header_len - body_len..]
                };
                sys_write(self.fd, segment)
            };

            if n > 0 {
                self.traffic.write(n as u64);
                state.pos += n as usize;
                continue;
            }

            let e = io::Error::last_os_error();
            if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) {
                drop(state);
                self.reactor.wait_for_write(self.fd, me.clone());
                return;
            }

            drop(state);
            self.fail(e);
            return;
        }
    }

    /// Returns the block buffer to the pool.
    fn release_buffer(&self) {
        if let Some(buf) = self.state.lock().unwrap().body.take() {
            self.pool.put_buffer(buf);
        }
    }

    fn complete(&self) {
        if self.done.swap(true, Ordering::SeqCst) {
            return;
        }
        self.release_buffer();
        self.listener.block_sent();
    }

    fn fail(&self, error: io::Error) {
        if self.done.swap(true, Ordering::SeqCst) {
            return;
        }
        self.release_buffer();
        tracing::warn!(fd = self.fd, error = %error, "block send failed");
        self.listener.failed(error);
    }
}

impl SocketHandler for BlockSender {
    fn description(&self) -> String {
        format!("block sender: fd: {}", self.fd)
    }

    fn timeout_at(&self) -> Option<Instant> {
        self.deadline
    }

    fn timed_out(&self) {
        if self.done.swap(true, Ordering::SeqCst) {
            return;
        }
        self.release_buffer();
        tracing::warn!(fd = self.fd, "block send timed out");
        self.listener.timed_out();
    }

    fn closed(&self) {
        self.fail(io::Error::new(
            io::ErrorKind::ConnectionAborted,
            "channel was closed",
        ));
    }
}

impl WriteHandler for BlockSender {
    fn write(&self) {
        if let Some(me) = self.me.upgrade() {
            self.write_data(&me);
        }
    }
}
