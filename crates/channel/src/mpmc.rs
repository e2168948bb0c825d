// Copyright The weir authors
// SPDX-License-Identifier: Apache-2.0

//! Multiple-producer, multiple-consumer blocking FIFO queue.
//!
//! The queue is unbounded on the push side: backpressure in the engine comes
//! from the bounded tuple-buffer pool, so producers (sources signalling from
//! their own threads, workers emitting to successor pipelines) never block.
//! Consumers park on a condition variable until an element or close arrives.
//!
//! Closing is cooperative: after [`MpmcQueue::close`] no further pushes are
//! accepted, already-queued elements remain poppable via [`MpmcQueue::try_pop`],
//! and every consumer blocked in [`MpmcQueue::pop`] wakes up with
//! [`RecvError::Closed`].

use crate::error::{RecvError, SendError};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

struct QueueState<T> {
    buffer: VecDeque<T>,
    is_closed: bool,
}

/// An unbounded MPMC FIFO queue with blocking pop.
pub struct MpmcQueue<T> {
    state: Mutex<QueueState<T>>,
    readable: Condvar,
}

impl<T> Default for MpmcQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> MpmcQueue<T> {
    /// Creates a new, empty queue.
    #[must_use]
    pub fn new() -> Self {
        MpmcQueue {
            state: Mutex::new(QueueState {
                buffer: VecDeque::new(),
                is_closed: false,
            }),
            readable: Condvar::new(),
        }
    }

    /// Appends an element to the back of the queue, waking one consumer.
    pub fn push(&self, value: T) -> Result<(), SendError<T>> {
        let mut state = self.state.lock();
        if state.is_closed {
            return Err(SendError::Closed(value));
        }
        state.buffer.push_back(value);
        drop(state);
        _ = self.readable.notify_one();
        Ok(())
    }

    /// Appends a batch of elements atomically, preserving their order with no
    /// interleaving from concurrent pushers.
    pub fn push_all<I>(&self, values: I) -> Result<(), SendError<T>>
    where
        I: IntoIterator<Item = T>,
    {
        let mut values = values.into_iter();
        let mut state = self.state.lock();
        if state.is_closed {
            match values.next() {
                Some(first) => return Err(SendError::Closed(first)),
                None => return Ok(()),
            }
        }
        let mut pushed = 0usize;
        for value in values {
            state.buffer.push_back(value);
            pushed += 1;
        }
        drop(state);
        for _ in 0..pushed {
            _ = self.readable.notify_one();
        }
        Ok(())
    }

    /// Removes the element at the front of the queue, blocking while the
    /// queue is empty and open.
    ///
    /// Returns [`RecvError::Closed`] once the queue is closed and drained.
    pub fn pop(&self) -> Result<T, RecvError> {
        let mut state = self.state.lock();
        loop {
            if let Some(value) = state.buffer.pop_front() {
                return Ok(value);
            }
            if state.is_closed {
                return Err(RecvError::Closed);
            }
            self.readable.wait(&mut state);
        }
    }

    /// Removes the element at the front of the queue without blocking.
    pub fn try_pop(&self) -> Result<T, RecvError> {
        let mut state = self.state.lock();
        if let Some(value) = state.buffer.pop_front() {
            Ok(value)
        } else if state.is_closed {
            Err(RecvError::Closed)
        } else {
            Err(RecvError::Empty)
        }
    }

    /// Closes the queue and wakes every blocked consumer.
    ///
    /// Idempotent. Queued elements stay poppable through [`MpmcQueue::try_pop`].
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.is_closed = true;
        drop(state);
        _ = self.readable.notify_all();
    }

    /// Returns `true` if the queue has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().is_closed
    }

    /// Number of elements currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().buffer.len()
    }

    /// Returns `true` if no elements are currently queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().buffer.is_empty()
    }
}
