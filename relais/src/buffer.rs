//! Buffer pool with two capacity classes.
//!
//! The pool recycles binary buffers instead of allocating per I/O
//! operation. Normal buffers cover the common case (one socket read);
//! large buffers exist for in-flight reads that outgrow the normal size.
//! Buffers are handed out by value, never shared, and live until process
//! shutdown; the pool never returns memory to the allocator.
//!
//! The free lists are lock-free queues, so the pool can be hit from
//! selector threads and worker threads alike without contention.

use crossbeam_queue::SegQueue;

/// Capacity of a normal buffer: one typical socket read.
pub const NORMAL_BUFFER_SIZE: usize = 4096;

/// Capacity of a large buffer, grown on demand.
pub const LARGE_BUFFER_SIZE: usize = 128 * 1024;

/// Recycles fixed-size binary buffers across two free lists.
#[derive(Default)]
pub struct BufferPool {
    normal: SegQueue<Vec<u8>>,
    large: SegQueue<Vec<u8>>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a normal buffer, reusing a pooled one when available.
    ///
    /// The buffer's full capacity is usable; any previous contents are
    /// stale and the caller tracks its own fill cursor.
    pub fn get_buffer(&self) -> Vec<u8> {
        self.normal
            .pop()
            .unwrap_or_else(|| vec![0; NORMAL_BUFFER_SIZE])
    }

    /// Returns a buffer to the free list matching its capacity class.
    ///
    /// # Panics
    ///
    /// Panics if the buffer belongs to neither class; returning a foreign
    /// buffer is a programming error.
    pub fn put_buffer(&self, buffer: Vec<u8>) {
        match buffer.len() {
            NORMAL_BUFFER_SIZE => self.normal.push(buffer),
            LARGE_BUFFER_SIZE => self.large.push(buffer),
            n => panic!("buffer of size {n} does not belong to this pool"),
        }
    }

    /// Trades `buffer` for a large buffer holding a copy of its
    /// contents; the small buffer goes back to its free list.
    ///
    /// Used when an in-flight read needs more room than the normal size
    /// provides.
    pub fn grow_buffer(&self, buffer: Vec<u8>) -> Vec<u8> {
        let mut large = self
            .large
            .pop()
            .unwrap_or_else(|| vec![0; LARGE_BUFFER_SIZE]);
        large[..buffer.len()].copy_from_slice(&buffer);
        self.put_buffer(buffer);
        large
    }
}
