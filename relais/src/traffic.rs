//! Traffic accounting.
//!
//! Every byte read, written or transferred through the transport pumps is
//! reported to a counter. The crate only assumes the counting contract;
//! what the numbers feed (access logs, rate displays) is up to the
//! application.

use std::sync::atomic::{AtomicU64, Ordering};

/// Sink for byte-level traffic accounting.
pub trait TrafficCounter: Send + Sync {
    /// Bytes read from a channel.
    fn read(&self, n: u64);

    /// Bytes written to a channel.
    fn write(&self, n: u64);

    /// Bytes moved out of a transferable resource.
    fn transfer_from(&self, n: u64);

    /// Bytes moved into a channel by a transfer.
    fn transfer_to(&self, n: u64);
}

/// Lock-free counter totals, usable from any thread.
#[derive(Default)]
pub struct TrafficTotals {
    read: AtomicU64,
    written: AtomicU64,
    transferred_from: AtomicU64,
    transferred_to: AtomicU64,
}

impl TrafficTotals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_read(&self) -> u64 {
        self.read.load(Ordering::Relaxed)
    }

    pub fn total_written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    pub fn total_transferred_from(&self) -> u64 {
        self.transferred_from.load(Ordering::Relaxed)
    }

    pub fn total_transferred_to(&self) -> u64 {
        self.transferred_to.load(Ordering::Relaxed)
    }
}

impl TrafficCounter for TrafficTotals {
    fn read(&self, n: u64) {
        self.read.fetch_add(n, Ordering::Relaxed);
    }

    fn write(&self, n: u64) {
        self.written.fetch_add(n, Ordering::Relaxed);
    }

    fn transfer_from(&self, n: u64) {
        self.transferred_from.fetch_add(n, Ordering::Relaxed);
    }

    fn transfer_to(&self, n: u64) {
        self.transferred_to.fetch_add(n, Ordering::Relaxed);
    }
}
