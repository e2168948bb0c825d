// Copyright The weir authors
// SPDX-License-Identifier: Apache-2.0

//! Reference-counted tuple buffers.
//!
//! A [`TupleBuffer`] is a handle to one pool slab plus metadata: tuple count,
//! creation timestamp, origin (the source the data descends from), a
//! watermark, and the list of child buffers backing variable-size fields.
//!
//! Handles are cheap to clone; a buffer shared by N workers returns to the
//! pool only after the Nth release. Mutation requires a unique handle —
//! [`TupleBuffer::data_mut`] and the metadata setters fail with
//! [`Error::BufferShared`] once the buffer has been fanned out. Child buffers
//! are held by the parent, so they live at least as long as the parent, and
//! release transitively with it. The child list is append-only during the
//! parent's lifetime, so no reference cycles can form.

use crate::error::Error;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use weir_config::SourceId;

/// Shared pool state: the free list and its condition variable.
pub(crate) struct PoolShared {
    free: Mutex<Vec<Box<[u64]>>>,
    available: Condvar,
    capacity: usize,
    words: usize,
}

impl PoolShared {
    pub(crate) fn new(capacity: usize, words: usize) -> Arc<Self> {
        Arc::new(PoolShared {
            free: Mutex::new(Vec::with_capacity(capacity)),
            available: Condvar::new(),
            capacity,
            words,
        })
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn buffer_bytes(&self) -> usize {
        self.words * 8
    }

    pub(crate) fn free_count(&self) -> usize {
        self.free.lock().len()
    }

    pub(crate) fn try_take(&self) -> Option<Box<[u64]>> {
        self.free.lock().pop()
    }

    pub(crate) fn take_blocking(&self) -> Box<[u64]> {
        let mut free = self.free.lock();
        loop {
            if let Some(slab) = free.pop() {
                return slab;
            }
            self.available.wait(&mut free);
        }
    }

    pub(crate) fn release(&self, slab: Box<[u64]>) {
        let mut free = self.free.lock();
        free.push(slab);
        drop(free);
        // notify_all: both blocked acquirers and full-pool waiters listen.
        _ = self.available.notify_all();
    }

    pub(crate) fn wait_until_full(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut free = self.free.lock();
        while free.len() < self.capacity {
            if self
                .available
                .wait_until(&mut free, deadline)
                .timed_out()
            {
                return free.len() == self.capacity;
            }
        }
        true
    }
}

struct BufferInner {
    slab: Box<[u64]>,
    tuple_count: u64,
    created_at_millis: u64,
    origin: SourceId,
    watermark: u64,
    children: Vec<TupleBuffer>,
    pool: Arc<PoolShared>,
}

impl Drop for BufferInner {
    fn drop(&mut self) {
        let slab = std::mem::take(&mut self.slab);
        self.pool.release(slab);
        // `children` drop here and release transitively.
    }
}

/// A reference-counted handle to one fixed-size buffer of tuples.
#[derive(Clone)]
pub struct TupleBuffer {
    inner: Arc<BufferInner>,
}

impl TupleBuffer {
    pub(crate) fn from_slab(slab: Box<[u64]>, pool: Arc<PoolShared>) -> Self {
        let created_at_millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        TupleBuffer {
            inner: Arc::new(BufferInner {
                slab,
                tuple_count: 0,
                created_at_millis,
                origin: SourceId::INVALID,
                watermark: 0,
                children: Vec::new(),
                pool,
            }),
        }
    }

    fn inner_mut(&mut self) -> Result<&mut BufferInner, Error> {
        Arc::get_mut(&mut self.inner).ok_or(Error::BufferShared)
    }

    /// Buffer capacity in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.slab.len() * 8
    }

    /// The buffer contents as bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        bytemuck::cast_slice(&self.inner.slab)
    }

    /// Mutable access to the buffer contents; only while the handle is
    /// unique.
    pub fn data_mut(&mut self) -> Result<&mut [u8], Error> {
        Ok(bytemuck::cast_slice_mut(&mut self.inner_mut()?.slab))
    }

    /// Number of tuples currently stored.
    #[must_use]
    pub fn tuple_count(&self) -> u64 {
        self.inner.tuple_count
    }

    /// Sets the tuple count; only while the handle is unique.
    pub fn set_tuple_count(&mut self, count: u64) -> Result<(), Error> {
        self.inner_mut()?.tuple_count = count;
        Ok(())
    }

    /// Milliseconds since the Unix epoch at which the buffer was acquired.
    #[must_use]
    pub fn created_at_millis(&self) -> u64 {
        self.inner.created_at_millis
    }

    /// The source this buffer's data descends from.
    #[must_use]
    pub fn origin(&self) -> SourceId {
        self.inner.origin
    }

    /// Stamps the origin; only while the handle is unique.
    pub fn set_origin(&mut self, origin: SourceId) -> Result<(), Error> {
        self.inner_mut()?.origin = origin;
        Ok(())
    }

    /// The watermark carried by this buffer.
    #[must_use]
    pub fn watermark(&self) -> u64 {
        self.inner.watermark
    }

    /// Sets the watermark; only while the handle is unique.
    pub fn set_watermark(&mut self, watermark: u64) -> Result<(), Error> {
        self.inner_mut()?.watermark = watermark;
        Ok(())
    }

    /// Number of live handles to this buffer.
    #[must_use]
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Number of attached child buffers.
    #[must_use]
    pub fn child_count(&self) -> usize {
        self.inner.children.len()
    }

    /// Maximum number of child buffers a parent of this size can hold: one
    /// per possible inline 4-byte index slot.
    #[must_use]
    pub fn child_limit(&self) -> usize {
        self.capacity() / 4
    }

    /// Attaches a child buffer and returns its index; only while the parent
    /// handle is unique. The parent retains the child until it is released
    /// itself.
    pub fn attach_child(&mut self, child: TupleBuffer) -> Result<u32, Error> {
        let limit = self.child_limit();
        let inner = self.inner_mut()?;
        if inner.children.len() >= limit {
            return Err(Error::TooManyChildBuffers { limit });
        }
        let index = inner.children.len() as u32;
        inner.children.push(child);
        Ok(index)
    }

    /// Returns a handle to the child buffer at `index`.
    pub fn child(&self, index: u32) -> Result<TupleBuffer, Error> {
        self.inner
            .children
            .get(index as usize)
            .cloned()
            .ok_or(Error::ChildIndexOutOfRange {
                index,
                children: self.inner.children.len(),
            })
    }
}

impl std::fmt::Debug for TupleBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TupleBuffer")
            .field("capacity", &self.capacity())
            .field("tuple_count", &self.tuple_count())
            .field("origin", &self.origin())
            .field("watermark", &self.watermark())
            .field("children", &self.child_count())
            .field("handles", &self.handle_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{BufferPool, BufferProvider};

    #[test]
    fn test_writes_require_unique_handle() {
        let pool = BufferPool::new(2, 64);
        let mut buffer = pool.try_acquire().expect("buffer");
        buffer.data_mut().expect("unique")[0] = 7;
        buffer.set_tuple_count(1).expect("unique");

        let shared = buffer.clone();
        assert_eq!(buffer.data_mut().err(), Some(Error::BufferShared));
        assert_eq!(buffer.set_tuple_count(2).err(), Some(Error::BufferShared));
        assert_eq!(shared.data()[0], 7);
        assert_eq!(shared.tuple_count(), 1);
    }

    #[test]
    fn test_metadata_round_trip() {
        let pool = BufferPool::new(1, 64);
        let mut buffer = pool.try_acquire().expect("buffer");
        let origin = SourceId::new(3).expect("valid");
        buffer.set_origin(origin).expect("unique");
        buffer.set_watermark(17).expect("unique");
        assert_eq!(buffer.origin(), origin);
        assert_eq!(buffer.watermark(), 17);
        assert!(buffer.created_at_millis() > 0);
    }

    #[test]
    fn test_children_release_transitively() {
        let pool = BufferPool::new(3, 64);
        let mut parent = pool.try_acquire().expect("parent");
        let child_a = pool.try_acquire().expect("child");
        let child_b = pool.try_acquire().expect("child");
        assert_eq!(parent.attach_child(child_a).expect("attach"), 0);
        assert_eq!(parent.attach_child(child_b).expect("attach"), 1);
        assert_eq!(pool.free_count(), 0);

        // A loaded child handle keeps the child alive past the parent.
        let loaded = parent.child(1).expect("child");
        drop(parent);
        assert_eq!(pool.free_count(), 2);
        drop(loaded);
        assert_eq!(pool.free_count(), 3);
    }

    #[test]
    fn test_child_index_out_of_range() {
        let pool = BufferPool::new(1, 64);
        let parent = pool.try_acquire().expect("parent");
        assert_eq!(
            parent.child(0).err(),
            Some(Error::ChildIndexOutOfRange {
                index: 0,
                children: 0
            })
        );
    }

    #[test]
    fn test_metadata_resets_on_reacquire() {
        let pool = BufferPool::new(1, 64);
        let mut buffer = pool.try_acquire().expect("buffer");
        buffer.set_tuple_count(9).expect("unique");
        drop(buffer);
        let fresh = pool.try_acquire().expect("buffer");
        assert_eq!(fresh.tuple_count(), 0);
        assert_eq!(fresh.origin(), SourceId::INVALID);
    }
}
