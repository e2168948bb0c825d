// Copyright The weir authors
// SPDX-License-Identifier: Apache-2.0

//! A sink that retains what it consumed, for assertions.

use crate::error::Error;
use crate::stage::Sink;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};
use weir_buffer::TupleBuffer;

#[derive(Default)]
struct SinkState {
    buffers: Vec<TupleBuffer>,
    received: usize,
    invocations: usize,
    started: bool,
    stopped: bool,
}

struct SinkShared {
    state: Mutex<SinkState>,
    changed: Condvar,
}

impl SinkShared {
    fn wait_for(&self, timeout: Duration, predicate: impl Fn(&SinkState) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while !predicate(&state) {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                return predicate(&state);
            }
        }
        true
    }
}

/// Test-side handle to a [`CountingSink`].
#[derive(Clone)]
pub struct TestSinkControl {
    shared: Arc<SinkShared>,
}

impl TestSinkControl {
    /// Waits until the sink received at least `count` buffers in total.
    #[must_use]
    pub fn wait_for_buffers(&self, count: usize, timeout: Duration) -> bool {
        self.shared.wait_for(timeout, |state| state.received >= count)
    }

    /// Waits until the sink's `start` ran.
    #[must_use]
    pub fn wait_for_start(&self, timeout: Duration) -> bool {
        self.shared.wait_for(timeout, |state| state.started)
    }

    /// Waits until the sink's `stop` ran.
    #[must_use]
    pub fn wait_for_stop(&self, timeout: Duration) -> bool {
        self.shared.wait_for(timeout, |state| state.stopped)
    }

    /// Removes and returns the retained buffers, releasing their references.
    #[must_use]
    pub fn take_buffers(&self) -> Vec<TupleBuffer> {
        std::mem::take(&mut self.shared.state.lock().buffers)
    }

    /// Number of `consume` invocations so far.
    #[must_use]
    pub fn invocations(&self) -> usize {
        self.shared.state.lock().invocations
    }

    /// Whether the sink's `stop` ran.
    #[must_use]
    pub fn was_stopped(&self) -> bool {
        self.shared.state.lock().stopped
    }
}

/// A sink that counts invocations and retains consumed buffers.
pub struct CountingSink {
    shared: Arc<SinkShared>,
}

impl CountingSink {
    /// Creates the sink and its control.
    #[must_use]
    pub fn new() -> (Self, TestSinkControl) {
        let shared = Arc::new(SinkShared {
            state: Mutex::new(SinkState::default()),
            changed: Condvar::new(),
        });
        (
            CountingSink {
                shared: shared.clone(),
            },
            TestSinkControl { shared },
        )
    }
}

impl Sink for CountingSink {
    fn start(&self) -> Result<(), Error> {
        let mut state = self.shared.state.lock();
        state.started = true;
        drop(state);
        _ = self.shared.changed.notify_all();
        Ok(())
    }

    fn consume(&self, buffer: TupleBuffer) -> Result<(), Error> {
        let mut state = self.shared.state.lock();
        state.invocations += 1;
        state.received += 1;
        state.buffers.push(buffer);
        drop(state);
        _ = self.shared.changed.notify_all();
        Ok(())
    }

    fn stop(&self) -> Result<(), Error> {
        let mut state = self.shared.state.lock();
        state.stopped = true;
        drop(state);
        _ = self.shared.changed.notify_all();
        Ok(())
    }
}
