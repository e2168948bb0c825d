// Copyright The weir authors
// SPDX-License-Identifier: Apache-2.0

//! The node-wide tuple buffer pool.
//!
//! The pool owns a fixed number of equally sized slabs. Acquiring hands out a
//! [`TupleBuffer`] handle; when the last handle to a buffer drops, its slab
//! returns to the free list and one blocked acquirer is woken. The pool is
//! the engine's backpressure mechanism: task volume is bounded by buffer
//! availability, not by queue capacity.
//!
//! Slabs are backed by `u64` words, so every buffer is 8-byte aligned, which
//! satisfies the strictest scalar alignment the row layout produces. Slab
//! contents are not zeroed on release or reuse.

use crate::error::Error;
use crate::tuple_buffer::{PoolShared, TupleBuffer};
use std::sync::Arc;

/// Hands out buffers; implemented by [`BufferPool`] and by the testing
/// harness. Pipeline stages and record accessors allocate through this trait
/// so they never depend on the concrete pool.
pub trait BufferProvider: Send + Sync {
    /// Attempts to acquire a buffer without blocking.
    fn try_acquire(&self) -> Result<TupleBuffer, Error>;

    /// Acquires a buffer, blocking until one is free.
    fn acquire_blocking(&self) -> TupleBuffer;
}

/// A fixed-capacity pool of fixed-size buffers.
///
/// Cheap to clone; all clones share the same free list. Outstanding buffers
/// keep the underlying pool state alive, so dropping the last `BufferPool`
/// handle while buffers are in flight is safe.
#[derive(Clone)]
pub struct BufferPool {
    shared: Arc<PoolShared>,
}

impl BufferPool {
    /// Creates a pool of `capacity` buffers of `buffer_size` bytes each.
    ///
    /// The buffer size is rounded up to the next multiple of 8 bytes.
    #[must_use]
    pub fn new(capacity: usize, buffer_size: usize) -> Self {
        let words = buffer_size.div_ceil(8);
        let shared = PoolShared::new(capacity, words);
        for _ in 0..capacity {
            shared.release(vec![0u64; words].into_boxed_slice());
        }
        BufferPool { shared }
    }

    /// Number of buffers the pool was created with.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }

    /// Bytes per buffer (after alignment rounding).
    #[must_use]
    pub fn buffer_size(&self) -> usize {
        self.shared.buffer_bytes()
    }

    /// Number of buffers currently in the free list.
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.shared.free_count()
    }

    /// Blocks the calling thread until every buffer has returned to the
    /// pool, or the timeout elapses. Returns `true` on full occupancy.
    ///
    /// Intended for orderly shutdown and tests; production callers should
    /// prefer observing query termination events.
    #[must_use]
    pub fn wait_until_full(&self, timeout: std::time::Duration) -> bool {
        self.shared.wait_until_full(timeout)
    }
}

impl BufferProvider for BufferPool {
    fn try_acquire(&self) -> Result<TupleBuffer, Error> {
        self.shared
            .try_take()
            .map(|slab| TupleBuffer::from_slab(slab, self.shared.clone()))
            .ok_or(Error::OutOfBuffers)
    }

    fn acquire_blocking(&self) -> TupleBuffer {
        let slab = self.shared.take_blocking();
        TupleBuffer::from_slab(slab, self.shared.clone())
    }
}
