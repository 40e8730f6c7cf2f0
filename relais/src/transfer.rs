//! Resource-to-socket transfer.
//!
//! A [`TransferHandler`] pushes a byte range of a [`Transferable`] into a
//! socket. The first pass runs on a background worker since the source
//! may block; when the socket stops accepting bytes the handler parks a
//! write waiter on the reactor and resumes on readiness, again on a
//! worker thread.

use crate::reactor::handler::{SocketHandler, WriteHandler};
use crate::reactor::Reactor;
use crate::stats::TaskId;
use crate::traffic::TrafficCounter;

use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Outcome callbacks for one transfer.
///
/// Exactly one of the two methods is invoked, exactly once.
pub trait TransferredListener: Send + Sync {
    /// The whole requested range reached the socket.
    fn transfer_ok(&self);

    /// The transfer failed, timed out or the channel was closed.
    fn failed(&self, error: io::Error);
}

/// A byte source that can push itself into a socket.
pub trait Transferable: Send + Sync {
    /// Total length of the resource in bytes.
    fn length(&self) -> u64;

    /// Moves up to `count` bytes starting at `pos` into `out`.
    ///
    /// Returns the number of bytes moved. `Ok(0)` with `count > 0` means
    /// the destination is not accepting bytes right now, never that the
    /// source is exhausted.
    fn transfer_to(&self, pos: u64, count: u64, out: RawFd) -> io::Result<u64>;
}

/// A file on disk, transferred with `sendfile` where available.
pub struct FileTransferable {
    file: File,
    length: u64,
}

impl FileTransferable {
    pub fn new(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::open(path)?;
        let length = file.metadata()?.len();
        Ok(Self { file, length })
    }
}

impl Transferable for FileTransferable {
    fn length(&self) -> u64 {
        self.length
    }

    #[cfg(target_os = "linux")]
    fn transfer_to(&self, pos: u64, count: u64, out: RawFd) -> io::Result<u64> {
        use crate::reactor::poller::platform::sys_sendfile;

        let chunk = count.min(usize::MAX as u64) as usize;
        let n = sys_sendfile(out, self.file.as_raw_fd(), pos, chunk);
        if n >= 0 {
            return Ok(n as u64);
        }

        let e = io::Error::last_os_error();
        match e.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => Ok(0),
            _ => Err(e),
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn transfer_to(&self, pos: u64, count: u64, out: RawFd) -> io::Result<u64> {
        use crate::reactor::poller::platform::{sys_pread, sys_write};

        let mut buf = [0u8; 16 * 1024];
        let want = count.min(buf.len() as u64) as usize;

        let n = sys_pread(self.file.as_raw_fd(), &mut buf[..want], pos);
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        if n == 0 {
            return Ok(0);
        }

        let written = sys_write(out, &buf[..n as usize]);
        if written > 0 {
            return Ok(written as u64);
        }

        let e = io::Error::last_os_error();
        match e.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => Ok(0),
            _ => Err(e),
        }
    }
}

/// Remaining range of the transfer.
struct Progress {
    pos: u64,
    count: u64,
}

/// Pushes a byte range of a [`Transferable`] into a socket.
pub struct TransferHandler {
    fd: RawFd,
    source: Arc<dyn Transferable>,
    reactor: Arc<Reactor>,
    traffic: Arc<dyn TrafficCounter>,
    listener: Arc<dyn TransferredListener>,
    progress: Mutex<Progress>,

    /// Terminal callback guard.
    done: AtomicBool,
}

impl TransferHandler {
    /// Creates a transfer of `count` bytes of `source` starting at `pos`.
    ///
    /// # Panics
    ///
    /// Panics if the range extends past the end of the source.
    pub fn new(
        reactor: Arc<Reactor>,
        fd: RawFd,
        source: Arc<dyn Transferable>,
        pos: u64,
        count: u64,
        traffic: Arc<dyn TrafficCounter>,
        listener: Arc<dyn TransferredListener>,
    ) -> Arc<Self> {
        assert!(
            pos.checked_add(count).is_some_and(|end| end <= source.length()),
            "transfer range extends past the end of the source"
        );

        Arc::new(Self {
            fd,
            source,
            reactor,
            traffic,
            listener,
            progress: Mutex::new(Progress { pos, count }),
            done: AtomicBool::new(false),
        })
    }

    /// Starts the transfer on a background worker thread.
    pub fn transfer(self: &Arc<Self>) {
        let me = self.clone();
        let ti = TaskId::new("transfer", format!("transfer: fd: {}", self.fd));
        self.reactor.run_thread_task(Box::new(move || me.pump()), ti);
    }

    /// Moves bytes until the range is exhausted, the socket backs up or
    /// an error occurs. Runs on a worker thread.
    fn pump(self: &Arc<Self>) {
        loop {
            let (pos, count) = {
                let progress = self.progress.lock().unwrap();
                (progress.pos, progress.count)
            };

            if count == 0 {
                self.complete();
                return;
            }

            match self.source.transfer_to(pos, count, self.fd) {
                Ok(0) => {
                    // Socket is full; resume when it drains.
                    let waiter = Arc::new(WriteWaiter {
                        owner: self.clone(),
                        deadline: self.reactor.default_timeout(),
                    });
                    self.reactor.wait_for_write(self.fd, waiter);
                    return;
                }
                Ok(n) => {
                    self.traffic.transfer_from(n);
                    self.traffic.transfer_to(n);
                    let mut progress = self.progress.lock().unwrap();
                    progress.pos += n;
                    progress.count = progress.count.saturating_sub(n);
                }
                Err(e) => {
                    self.fail(e);
                    return;
                }
            }
        }
    }

    fn complete(&self) {
        if self.done.swap(true, Ordering::SeqCst) {
            return;
        }
        self.listener.transfer_ok();
    }

    fn fail(&self, error: io::Error) {
        if self.done.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::warn!(fd = self.fd, error = %error, "transfer failed");
        self.listener.failed(error);
    }
}

/// Parked continuation of a backed-up transfer.
struct WriteWaiter {
    owner: Arc<TransferHandler>,
    deadline: Option<Instant>,
}

impl SocketHandler for WriteWaiter {
    fn description(&self) -> String {
        format!("transfer write waiter: fd: {}", self.owner.fd)
    }

    fn timeout_at(&self) -> Option<Instant> {
        self.deadline
    }

    /// The resumed pump may block in the source.
    fn use_separate_thread(&self) -> bool {
        true
    }

    fn timed_out(&self) {
        self.owner.fail(io::Error::new(
            io::ErrorKind::TimedOut,
            "write timed out",
        ));
    }

    fn closed(&self) {
        self.owner.fail(io::Error::new(
            io::ErrorKind::ConnectionAborted,
            "channel was closed",
        ));
    }
}

impl WriteHandler for WriteWaiter {
    fn write(&self) {
        self.owner.pump();
    }
}
