//! A line-for-line echo server built on the public API.
//!
//! Run with:
//!
//! ```sh
//! cargo run --example echo -- 127.0.0.1:9999
//! ```

use relais::acceptor::AcceptorListener;
use relais::buffer::BufferPool;
use relais::server::AcceptingServer;
use relais::{Reactor, ReactorBuilder, ReadHandler, SocketHandler, WriteHandler};

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::os::fd::{FromRawFd, RawFd};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

/// One connected client.
///
/// Reads a block, writes it back, then waits for the next block. EOF or
/// any error drops the connection.
struct EchoHandler {
    fd: RawFd,
    reactor: Arc<Reactor>,
    pool: Arc<BufferPool>,
    state: Mutex<EchoState>,
    me: Weak<EchoHandler>,
}

#[derive(Default)]
struct EchoState {
    buf: Option<Vec<u8>>,
    start: usize,
    end: usize,
}

impl EchoHandler {
    fn new(fd: RawFd, reactor: Arc<Reactor>, pool: Arc<BufferPool>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            fd,
            reactor,
            pool,
            state: Mutex::new(EchoState::default()),
            me: me.clone(),
        })
    }

    fn start(self: &Arc<Self>) {
        self.reactor.wait_for_read(self.fd, self.clone());
    }

    fn shut_down(&self) {
        if let Some(buf) = self.state.lock().unwrap().buf.take() {
            self.pool.put_buffer(buf);
        }
        // Take ownership of the descriptor so it is closed on drop.
        drop(unsafe { std::net::TcpStream::from_raw_fd(self.fd) });
        tracing::info!(fd = self.fd, "connection done");
    }

    fn write_back(&self, me: &Arc<EchoHandler>) {
        let mut state = self.state.lock().unwrap();

        while let Some(buf) = state.buf.as_ref() {
            if state.start == state.end {
                break;
            }

            let mut stream = std::mem::ManuallyDrop::new(unsafe {
                TcpStream::from_raw_fd(self.fd)
            });
            match stream.write(&buf[state.start..state.end]) {
                Ok(n) => state.start += n,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    drop(state);
                    self.reactor.wait_for_write(self.fd, me.clone());
                    return;
                }
                Err(e) => {
                    drop(state);
                    tracing::warn!(fd = self.fd, error = %e, "write failed");
                    self.shut_down();
                    return;
                }
            }
        }

        if let Some(buf) = state.buf.take() {
            self.pool.put_buffer(buf);
        }
        state.start = 0;
        state.end = 0;
        drop(state);

        self.reactor.wait_for_read(self.fd, me.clone());
    }
}

impl SocketHandler for EchoHandler {
    fn description(&self) -> String {
        format!("echo handler: fd: {}", self.fd)
    }

    fn timed_out(&self) {
        tracing::info!(fd = self.fd, "client idle too long");
        self.shut_down();
    }

    fn closed(&self) {
        self.shut_down();
    }
}

impl ReadHandler for EchoHandler {
    fn read(&self) {
        let Some(me) = self.me.upgrade() else {
            return;
        };

        let mut state = self.state.lock().unwrap();
        let mut buf = match state.buf.take() {
            Some(buf) => buf,
            None => self.pool.get_buffer(),
        };

        let mut stream = std::mem::ManuallyDrop::new(unsafe {
            TcpStream::from_raw_fd(self.fd)
        });
        match stream.read(&mut buf) {
            Ok(0) => {
                self.pool.put_buffer(buf);
                drop(state);
                self.shut_down();
            }
            Ok(n) => {
                state.start = 0;
                state.end = n;
                state.buf = Some(buf);
                drop(state);
                self.write_back(&me);
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                self.pool.put_buffer(buf);
                drop(state);
                self.reactor.wait_for_read(self.fd, me);
            }
            Err(e) => {
                self.pool.put_buffer(buf);
                drop(state);
                tracing::warn!(fd = self.fd, error = %e, "read failed");
                self.shut_down();
            }
        }
    }
}

impl WriteHandler for EchoHandler {
    fn write(&self) {
        if let Some(me) = self.me.upgrade() {
            self.write_back(&me);
        }
    }
}

struct EchoListener {
    reactor: OnceLock<Arc<Reactor>>,
    pool: Arc<BufferPool>,
}

impl AcceptorListener for EchoListener {
    fn connection_accepted(&self, fd: RawFd, peer: SocketAddr) {
        tracing::info!(fd, %peer, "new client");
        if let Some(reactor) = self.reactor.get() {
            EchoHandler::new(fd, reactor.clone(), self.pool.clone()).start();
        }
    }
}

fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt().init();

    let address = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:9999".to_owned());

    let listener = Arc::new(EchoListener {
        reactor: OnceLock::new(),
        pool: Arc::new(BufferPool::new()),
    });

    let builder = ReactorBuilder::new()
        .selector_threads(2)
        .default_timeout(Duration::from_secs(60));

    let server = AcceptingServer::new(&address, listener.clone(), builder)?;
    let _ = listener.reactor.set(server.reactor());
    server.start();

    tracing::info!(address = %server.local_addr()?, "echo server listening");

    loop {
        std::thread::park();
    }
}
