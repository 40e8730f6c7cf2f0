//! Single-threaded selector loop.
//!
//! A `SelectorRunner` owns one poller and the registration state for every
//! channel assigned to it. Only the runner's own thread touches that
//! state; all other threads enqueue [`SelectorTask`]s through the runner's
//! handle, which also wakes the poller so queued work is picked up
//! promptly.
//!
//! Loop shape per iteration:
//! 1. drain queued selector tasks (register / cancel / close / shutdown),
//! 2. compute the minimum deadline among live registrations,
//! 3. wait for readiness, bounded by that deadline,
//! 4. dispatch ready channels, removing each registration before its
//!    callback fires,
//! 5. fire `timed_out()` for registrations whose deadline has elapsed.

use super::command::SelectorTask;
use super::event::Event;
use super::handler::{Registration, SocketHandler};
use super::poller::common::Interest;
use super::poller::platform::sys_close;
use super::poller::{Poller, Waker};
use crate::executor::WorkerPool;
use crate::reactor::handler::same_handler;

use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Cloneable handle used to push work onto a selector thread.
#[derive(Clone)]
pub(crate) struct RunnerHandle {
    sender: Sender<SelectorTask>,
    waker: Arc<Waker>,
}

impl RunnerHandle {
    /// Enqueues a task and wakes the runner if it is blocked in the
    /// poller.
    pub(crate) fn submit(&self, task: SelectorTask) {
        if self.sender.send(task).is_ok() {
            self.waker.wake();
        }
    }
}

/// Registration slots for one channel.
///
/// There is exactly one live registration per (channel, interest kind)
/// pair; installing a new one replaces the previous handler.
#[derive(Default)]
struct ChannelEntry {
    read: Option<Arc<dyn super::handler::ReadHandler>>,
    write: Option<Arc<dyn super::handler::WriteHandler>>,
    accept: Option<Arc<dyn super::handler::AcceptHandler>>,
    connect: Option<Arc<dyn super::handler::ConnectHandler>>,

    /// Interest currently installed in the poller, `None` while the
    /// descriptor is not registered there.
    registered: Option<Interest>,
}

impl ChannelEntry {
    /// The readiness interest implied by the live slots.
    fn interest(&self) -> Interest {
        Interest {
            read: self.read.is_some() || self.accept.is_some(),
            write: self.write.is_some() || self.connect.is_some(),
        }
    }

    fn install(&mut self, registration: Registration) {
        match registration {
            Registration::Read(h) => self.read = Some(h),
            Registration::Write(h) => self.write = Some(h),
            Registration::Accept(h) => self.accept = Some(h),
            Registration::Connect(h) => self.connect = Some(h),
        }
    }

    /// Takes the registration to fire for read readiness: a pending
    /// accept wins over a plain read.
    fn take_readable(&mut self) -> Option<Registration> {
        if let Some(h) = self.accept.take() {
            return Some(Registration::Accept(h));
        }
        self.read.take().map(Registration::Read)
    }

    /// Takes the registration to fire for write readiness: a pending
    /// connect wins over a plain write.
    fn take_writable(&mut self) -> Option<Registration> {
        if let Some(h) = self.connect.take() {
            return Some(Registration::Connect(h));
        }
        self.write.take().map(Registration::Write)
    }

    /// Removes every slot whose handler matches `other` by identity.
    fn cancel(&mut self, other: &dyn SocketHandler) {
        if self.read.as_ref().is_some_and(|h| same_handler(h.as_ref(), other)) {
            self.read = None;
        }
        if self.write.as_ref().is_some_and(|h| same_handler(h.as_ref(), other)) {
            self.write = None;
        }
        if self.accept.as_ref().is_some_and(|h| same_handler(h.as_ref(), other)) {
            self.accept = None;
        }
        if self.connect.as_ref().is_some_and(|h| same_handler(h.as_ref(), other)) {
            self.connect = None;
        }
    }

    /// Drains every live slot, in registration-kind order.
    fn drain(&mut self) -> Vec<Registration> {
        let mut out = Vec::new();
        if let Some(h) = self.accept.take() {
            out.push(Registration::Accept(h));
        }
        if let Some(h) = self.connect.take() {
            out.push(Registration::Connect(h));
        }
        if let Some(h) = self.read.take() {
            out.push(Registration::Read(h));
        }
        if let Some(h) = self.write.take() {
            out.push(Registration::Write(h));
        }
        out
    }

    /// Earliest deadline among the live slots.
    fn next_deadline(&self) -> Option<Instant> {
        let mut min: Option<Instant> = None;
        for deadline in [
            self.read.as_ref().and_then(|h| h.timeout_at()),
            self.write.as_ref().and_then(|h| h.timeout_at()),
            self.accept.as_ref().and_then(|h| h.timeout_at()),
            self.connect.as_ref().and_then(|h| h.timeout_at()),
        ]
        .into_iter()
        .flatten()
        {
            min = Some(match min {
                Some(m) if m <= deadline => m,
                _ => deadline,
            });
        }
        min
    }

    /// Takes every slot whose deadline has elapsed.
    fn take_expired(&mut self, now: Instant) -> Vec<Registration> {
        let mut out = Vec::new();
        if expired(self.read.as_deref(), now) {
            out.extend(self.read.take().map(Registration::Read));
        }
        if expired(self.write.as_deref(), now) {
            out.extend(self.write.take().map(Registration::Write));
        }
        if expired(self.accept.as_deref(), now) {
            out.extend(self.accept.take().map(Registration::Accept));
        }
        if expired(self.connect.as_deref(), now) {
            out.extend(self.connect.take().map(Registration::Connect));
        }
        out
    }
}

fn expired<H: SocketHandler + ?Sized>(slot: Option<&H>, now: Instant) -> bool {
    slot.and_then(|h| h.timeout_at()).is_some_and(|d| d <= now)
}

/// One selector thread's loop state.
pub(crate) struct SelectorRunner {
    index: usize,
    receiver: Receiver<SelectorTask>,

    poller: Poller,
    events: Vec<Event>,

    channels: HashMap<RawFd, ChannelEntry>,

    /// Channel-to-runner assignment shared with the reactor facade;
    /// entries are erased here when the channel is closed.
    affinity: Arc<Mutex<HashMap<RawFd, usize>>>,

    /// Worker pool for handlers that opt out of inline dispatch.
    pool: Arc<WorkerPool>,
}

impl SelectorRunner {
    pub(crate) fn new(
        index: usize,
        affinity: Arc<Mutex<HashMap<RawFd, usize>>>,
        pool: Arc<WorkerPool>,
    ) -> (Self, RunnerHandle) {
        let (sender, receiver) = channel();
        let poller = Poller::new();
        let handle = RunnerHandle {
            sender,
            waker: poller.waker(),
        };

        (
            Self {
                index,
                receiver,
                poller,
                events: Vec::with_capacity(64),
                channels: HashMap::new(),
                affinity,
                pool,
            },
            handle,
        )
    }

    pub(crate) fn run(&mut self) -> io::Result<()> {
        loop {
            while let Ok(task) = self.receiver.try_recv() {
                match task {
                    SelectorTask::Register { fd, registration } => {
                        self.register(fd, registration);
                    }
                    SelectorTask::Cancel { fd, handler } => {
                        self.cancel(fd, handler.as_ref());
                    }
                    SelectorTask::Close { fd } => {
                        self.close(fd);
                    }
                    SelectorTask::Shutdown => {
                        return Ok(());
                    }
                }
            }

            let timeout = self
                .next_deadline()
                .map(|d| d.saturating_duration_since(Instant::now()));

            self.poller.poll(&mut self.events, timeout)?;

            let events: Vec<Event> = self.events.drain(..).collect();
            for event in events {
                self.dispatch(event);
            }

            self.fire_timeouts();
        }
    }

    /// Minimum pending deadline across every channel owned by this
    /// runner, used to bound the readiness wait.
    fn next_deadline(&self) -> Option<Instant> {
        self.channels
            .values()
            .filter_map(ChannelEntry::next_deadline)
            .min()
    }

    fn register(&mut self, fd: RawFd, registration: Registration) {
        tracing::trace!(
            selector = self.index,
            fd,
            handler = %registration.base().description(),
            "installing registration"
        );
        self.channels.entry(fd).or_default().install(registration);
        self.update_interest(fd);
    }

    fn cancel(&mut self, fd: RawFd, handler: &dyn SocketHandler) {
        if let Some(entry) = self.channels.get_mut(&fd) {
            entry.cancel(handler);
            self.update_interest(fd);
        }
    }

    fn close(&mut self, fd: RawFd) {
        let Some(mut entry) = self.channels.remove(&fd) else {
            return;
        };
        if entry.registered.is_some() {
            self.poller.deregister(fd);
        }
        self.affinity.lock().unwrap().remove(&fd);

        for registration in entry.drain() {
            self.run_protected(&registration, |r| r.base().closed());
        }
        sys_close(fd);
    }

    /// Reconciles the poller with the entry's live slots.
    ///
    /// An entry with no live slots keeps its affinity and stays in the
    /// channel map with its poller interest withdrawn: the channel is
    /// owned by this runner until it is closed, so a handler that
    /// re-registers from its own callback lands back here instead of
    /// round-robining to another selector.
    fn update_interest(&mut self, fd: RawFd) {
        let Some(entry) = self.channels.get_mut(&fd) else {
            return;
        };

        let want = entry.interest();
        if want.is_empty() {
            if entry.registered.take().is_some() {
                self.poller.deregister(fd);
            }
            return;
        }

        match entry.registered {
            None => self.poller.register(fd, fd as usize, want),
            Some(current) if current != want => self.poller.reregister(fd, fd as usize, want),
            Some(_) => {}
        }
        entry.registered = Some(want);
    }

    fn dispatch(&mut self, event: Event) {
        let fd = event.fd();

        if event.readable {
            let taken = self.channels.get_mut(&fd).and_then(ChannelEntry::take_readable);
            if let Some(registration) = taken {
                self.invoke(registration);
            }
        }

        if event.writable {
            let taken = self.channels.get_mut(&fd).and_then(ChannelEntry::take_writable);
            if let Some(registration) = taken {
                self.invoke(registration);
            }
        }

        self.update_interest(fd);
    }

    /// Runs the registration's action callback, inline or on the worker
    /// pool depending on the handler's declaration.
    fn invoke(&self, registration: Registration) {
        if registration.base().use_separate_thread() {
            let index = self.index;
            let job = Box::new(move || {
                run_protected_static(&registration, index, |r| r.fire());
            });
            if self.pool.execute(job).is_err() {
                tracing::warn!(selector = self.index, "worker pool rejected handler dispatch");
            }
        } else {
            self.run_protected(&registration, |r| r.fire());
        }
    }

    fn fire_timeouts(&mut self) {
        let now = Instant::now();

        let mut due: Vec<(RawFd, Registration)> = Vec::new();
        for (&fd, entry) in self.channels.iter_mut() {
            for registration in entry.take_expired(now) {
                due.push((fd, registration));
            }
        }

        for (fd, registration) in due {
            tracing::debug!(
                selector = self.index,
                fd,
                handler = %registration.base().description(),
                "registration timed out"
            );
            if registration.base().use_separate_thread() {
                let index = self.index;
                let job = Box::new(move || {
                    run_protected_static(&registration, index, |r| r.base().timed_out());
                });
                if self.pool.execute(job).is_err() {
                    tracing::warn!(selector = self.index, "worker pool rejected timeout dispatch");
                }
            } else {
                self.run_protected(&registration, |r| r.base().timed_out());
            }
            self.update_interest(fd);
        }
    }

    /// Invokes a handler callback, logging a panic instead of letting it
    /// kill the selector thread. A panic ends only that registration.
    fn run_protected(&self, registration: &Registration, f: impl FnOnce(&Registration)) {
        run_protected_static(registration, self.index, f);
    }
}

fn run_protected_static(
    registration: &Registration,
    selector: usize,
    f: impl FnOnce(&Registration),
) {
    if catch_unwind(AssertUnwindSafe(|| f(registration))).is_err() {
        tracing::error!(
            selector,
            handler = %registration.base().description(),
            "handler callback panicked; dropping its registration"
        );
    }
}

impl Drop for SelectorRunner {
    /// Releases every descriptor still registered with this runner.
    fn drop(&mut self) {
        for (&fd, entry) in self.channels.iter() {
            if entry.registered.is_some() {
                self.poller.deregister(fd);
            }
        }
        self.channels.clear();
    }
}
