//! Shared background worker pool.
//!
//! The pool runs CPU or disk bound work (file transfers, image
//! conversion, DNS lookups) so it never blocks a selector loop. Jobs are
//! opaque closures fed through one MPMC channel; workers drain it until
//! the pool shuts down.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Sender};

pub(crate) type Job = Box<dyn FnOnce() + Send>;

/// Submission failed because the pool is shutting down.
///
/// The job is dropped; its side effects must be assumed not to have run.
#[derive(Debug)]
pub(crate) struct RejectedError;

/// Fixed-size pool of worker threads.
pub(crate) struct WorkerPool {
    /// Job queue; taken on shutdown so workers see a disconnect.
    sender: Mutex<Option<Sender<Job>>>,

    /// Set before the sender is dropped so late submitters are rejected
    /// without racing on the channel.
    shutdown: AtomicBool,

    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawns `threads` workers draining a shared queue.
    pub(crate) fn new(threads: usize) -> Self {
        assert!(threads > 0, "worker pool needs at least one thread");

        let (sender, receiver) = unbounded::<Job>();

        let mut handles = Vec::with_capacity(threads);
        for id in 0..threads {
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("relais-worker-{id}"))
                .spawn(move || {
                    while let Ok(job) = receiver.recv() {
                        // Jobs arrive pre-wrapped by their submitters; this
                        // guard only keeps the worker alive.
                        let _ = catch_unwind(AssertUnwindSafe(job));
                    }
                })
                .expect("failed to spawn worker thread");
            handles.push(handle);
        }

        Self {
            sender: Mutex::new(Some(sender)),
            shutdown: AtomicBool::new(false),
            handles: Mutex::new(handles),
        }
    }

    /// Submits a job, rejecting it once shutdown has begun.
    pub(crate) fn execute(&self, job: Job) -> Result<(), RejectedError> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(RejectedError);
        }

        let guard = self.sender.lock().unwrap();
        match guard.as_ref() {
            Some(sender) => sender.send(job).map_err(|_| RejectedError),
            None => Err(RejectedError),
        }
    }

    /// Stops accepting jobs; queued work still drains before the workers
    /// exit.
    pub(crate) fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.sender.lock().unwrap().take();
    }

    /// Waits for all worker threads to terminate.
    ///
    /// Should be called after initiating shutdown.
    pub(crate) fn join(&self) {
        let handles: Vec<_> = self.handles.lock().unwrap().drain(..).collect();
        for h in handles {
            let _ = h.join();
        }
    }
}
