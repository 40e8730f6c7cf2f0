use super::command::SelectorTask;
use super::handler::{
    AcceptHandler, ConnectHandler, ReadHandler, Registration, SocketHandler, WriteHandler,
};
use super::runner::{RunnerHandle, SelectorRunner};
use crate::executor::WorkerPool;
use crate::stats::{StatisticsLedger, TaskId};

use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Multi-selector reactor facade.
///
/// The reactor shards channels across N selector threads and owns one
/// shared worker pool for background work. It is the sole entry point
/// client code uses to request readiness notifications or background
/// execution; all of its methods are safe to call from any thread.
///
/// Registration requests never fail toward the caller: they are queued
/// for the owning selector thread, and problems surface only through the
/// handler's own `closed()`/`timed_out()` callbacks.
pub struct Reactor {
    runners: Vec<RunnerHandle>,

    pool: Arc<WorkerPool>,
    stats: Arc<StatisticsLedger>,

    /// Sticky channel-to-runner assignment. A channel keeps its runner
    /// until it is closed, across gaps with no live registration; the
    /// owning runner erases the entry on close.
    affinity: Arc<Mutex<HashMap<RawFd, usize>>>,
    next_runner: AtomicUsize,

    default_timeout: Option<Duration>,

    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Reactor {
    pub(crate) fn new(
        selector_threads: usize,
        worker_threads: usize,
        default_timeout: Option<Duration>,
    ) -> io::Result<Arc<Self>> {
        assert!(selector_threads >= 1, "must have at least one selector");

        let pool = Arc::new(WorkerPool::new(worker_threads));
        let affinity = Arc::new(Mutex::new(HashMap::new()));

        let mut runners = Vec::with_capacity(selector_threads);
        let mut threads = Vec::with_capacity(selector_threads);

        for index in 0..selector_threads {
            let (mut runner, handle) = SelectorRunner::new(index, affinity.clone(), pool.clone());
            runners.push(handle);

            let thread = thread::Builder::new()
                .name(format!("relais-selector-{index}"))
                .spawn(move || {
                    if let Err(e) = runner.run() {
                        tracing::error!(selector = index, error = %e, "selector loop failed");
                    }
                })?;
            threads.push(thread);
        }

        Ok(Arc::new(Self {
            runners,
            pool,
            stats: Arc::new(StatisticsLedger::new()),
            affinity,
            next_runner: AtomicUsize::new(0),
            default_timeout,
            threads: Mutex::new(threads),
        }))
    }

    /// Registers interest in read readiness on the channel.
    pub fn wait_for_read(&self, fd: RawFd, handler: Arc<dyn ReadHandler>) {
        tracing::trace!(fd, handler = %handler.description(), "waiting for read");
        self.run_selector_task(fd, Registration::Read(handler));
    }

    /// Registers interest in write readiness on the channel.
    pub fn wait_for_write(&self, fd: RawFd, handler: Arc<dyn WriteHandler>) {
        tracing::trace!(fd, handler = %handler.description(), "waiting for write");
        self.run_selector_task(fd, Registration::Write(handler));
    }

    /// Registers interest in accept readiness on a listening socket.
    pub fn wait_for_accept(&self, fd: RawFd, handler: Arc<dyn AcceptHandler>) {
        tracing::trace!(fd, handler = %handler.description(), "waiting for accept");
        self.run_selector_task(fd, Registration::Accept(handler));
    }

    /// Registers interest in completion of a non-blocking connect.
    pub fn wait_for_connect(&self, fd: RawFd, handler: Arc<dyn ConnectHandler>) {
        self.run_selector_task(fd, Registration::Connect(handler));
    }

    /// Cancels any registration on the channel held by the given handler.
    ///
    /// Safe to call from any thread, including one that does not know
    /// which selector owns the channel: the request is broadcast to every
    /// runner and is a no-op everywhere but on the owner. Cancelling an
    /// already fired or already cancelled registration is a no-op too.
    pub fn cancel(&self, fd: RawFd, handler: &Arc<dyn SocketHandler>) {
        for runner in &self.runners {
            runner.submit(SelectorTask::Cancel {
                fd,
                handler: handler.clone(),
            });
        }
    }

    /// Closes the channel on its owning selector thread, notifying every
    /// live registration via `closed()` first.
    pub fn close(&self, fd: RawFd) {
        for runner in &self.runners {
            runner.submit(SelectorTask::Close { fd });
        }
    }

    /// Submits background work to the shared worker pool.
    ///
    /// The task is tracked in the statistics ledger as pending, running
    /// and finally completed with its outcome and elapsed time. When the
    /// pool rejects the submission the task is dropped with a warning and
    /// its ledger entry rolled back; no completion callback fires in that
    /// case.
    pub fn run_thread_task(&self, job: Box<dyn FnOnce() + Send>, ti: Arc<TaskId>) {
        self.stats.add_pending(&ti);

        let stats = self.stats.clone();
        let task = ti.clone();
        let collector = Box::new(move || {
            stats.mark_running(&task);
            let start = Instant::now();
            let ok = catch_unwind(AssertUnwindSafe(job)).is_ok();
            stats.mark_finished(&task, ok, start.elapsed());
        });

        if self.pool.execute(collector).is_err() {
            tracing::warn!(
                group = ti.group_id(),
                task = ti.description(),
                "could not launch background task; dropping it"
            );
            self.stats.drop_pending(&ti);
        }
    }

    /// The default deadline: now plus the configured horizon, or `None`
    /// when no default was configured.
    pub fn default_timeout(&self) -> Option<Instant> {
        self.default_timeout.map(|d| Instant::now() + d)
    }

    /// The task statistics ledger for monitoring.
    pub fn statistics(&self) -> Arc<StatisticsLedger> {
        self.stats.clone()
    }

    /// Shuts the reactor down asynchronously.
    ///
    /// Stops accepting new work, terminates every selector loop and the
    /// worker pool, without blocking the caller on in-flight tasks.
    pub fn shutdown(&self) {
        let pool = self.pool.clone();
        let runners = self.runners.clone();
        let threads: Vec<_> = self.threads.lock().unwrap().drain(..).collect();

        thread::spawn(move || {
            pool.shutdown();
            for runner in &runners {
                runner.submit(SelectorTask::Shutdown);
            }
            for thread in threads {
                let _ = thread.join();
            }
            pool.join();
        });
    }

    /// Routes a registration to the channel's owning runner, assigning
    /// one round-robin when the channel is new.
    fn run_selector_task(&self, fd: RawFd, registration: Registration) {
        let index = {
            let mut affinity = self.affinity.lock().unwrap();
            *affinity
                .entry(fd)
                .or_insert_with(|| self.next_runner.fetch_add(1, Ordering::Relaxed) % self.runners.len())
        };
        self.runners[index].submit(SelectorTask::Register { fd, registration });
    }
}
