// Copyright The weir authors
// SPDX-License-Identifier: Apache-2.0

//! A source controlled from the test thread.
//!
//! The control handle queues commands (data, end-of-stream, error) that the
//! source thread replays into its listener, and exposes waiting helpers for
//! the open/close/destroy milestones.

use crate::error::Error;
use crate::source::{Source, SourceListener};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use weir_buffer::{BufferPool, BufferProvider};

enum Command {
    Data { payload: Vec<u8>, tuples: u64 },
    EndOfStream,
    Error(String),
}

#[derive(Default)]
struct ControlState {
    commands: VecDeque<Command>,
    opened: bool,
    closed: bool,
    destroyed: bool,
    stop: bool,
    fail_open_after: Option<Duration>,
}

struct SourceShared {
    state: Mutex<ControlState>,
    changed: Condvar,
    pool: BufferPool,
}

impl SourceShared {
    fn wait_for(&self, timeout: Duration, predicate: impl Fn(&ControlState) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while !predicate(&state) {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                return predicate(&state);
            }
        }
        true
    }

    fn mutate(&self, mutate: impl FnOnce(&mut ControlState)) {
        let mut state = self.state.lock();
        mutate(&mut state);
        drop(state);
        _ = self.changed.notify_all();
    }
}

/// Test-side handle to a [`TestSource`].
#[derive(Clone)]
pub struct TestSourceControl {
    shared: Arc<SourceShared>,
}

impl TestSourceControl {
    /// Queues one buffer worth of raw bytes; returns `false` if the source
    /// was already closed or terminated.
    pub fn inject_data(&self, payload: Vec<u8>, tuples: u64) -> bool {
        let mut state = self.shared.state.lock();
        if state.stop || state.closed {
            return false;
        }
        state.commands.push_back(Command::Data { payload, tuples });
        drop(state);
        _ = self.shared.changed.notify_all();
        true
    }

    /// Queues the graceful end-of-stream signal.
    pub fn inject_eos(&self) -> bool {
        let mut state = self.shared.state.lock();
        if state.stop || state.closed {
            return false;
        }
        state.commands.push_back(Command::EndOfStream);
        drop(state);
        _ = self.shared.changed.notify_all();
        true
    }

    /// Queues a source failure.
    pub fn inject_error(&self, reason: impl Into<String>) -> bool {
        let mut state = self.shared.state.lock();
        if state.stop || state.closed {
            return false;
        }
        state.commands.push_back(Command::Error(reason.into()));
        drop(state);
        _ = self.shared.changed.notify_all();
        true
    }

    /// Makes `open` report a failure after `delay` instead of producing.
    pub fn fail_during_open(&self, delay: Duration) {
        self.shared
            .mutate(|state| state.fail_open_after = Some(delay));
    }

    /// Waits until the source finished opening.
    #[must_use]
    pub fn wait_until_opened(&self, timeout: Duration) -> bool {
        self.shared.wait_for(timeout, |state| state.opened)
    }

    /// Waits until the source was closed.
    #[must_use]
    pub fn wait_until_closed(&self, timeout: Duration) -> bool {
        self.shared.wait_for(timeout, |state| state.closed)
    }

    /// Waits until the source object was dropped by the engine.
    #[must_use]
    pub fn wait_until_destroyed(&self, timeout: Duration) -> bool {
        self.shared.wait_for(timeout, |state| state.destroyed)
    }

    /// Whether the source ever finished opening.
    #[must_use]
    pub fn was_opened(&self) -> bool {
        self.shared.state.lock().opened
    }

    /// Whether the source was closed.
    #[must_use]
    pub fn was_closed(&self) -> bool {
        self.shared.state.lock().closed
    }
}

/// A source whose behavior is scripted through a [`TestSourceControl`].
pub struct TestSource {
    shared: Arc<SourceShared>,
    thread: Option<JoinHandle<()>>,
}

impl TestSource {
    /// Creates the source and its control. Buffers are acquired from `pool`.
    #[must_use]
    pub fn new(pool: BufferPool) -> (Self, TestSourceControl) {
        let shared = Arc::new(SourceShared {
            state: Mutex::new(ControlState::default()),
            changed: Condvar::new(),
            pool,
        });
        (
            TestSource {
                shared: shared.clone(),
                thread: None,
            },
            TestSourceControl { shared },
        )
    }
}

impl Source for TestSource {
    fn open(&mut self, listener: SourceListener) -> Result<(), Error> {
        let shared = self.shared.clone();
        let query = listener.query();
        let source = listener.source();
        let thread = std::thread::Builder::new()
            .name(format!("test-source-{source}"))
            .spawn(move || produce(&shared, &listener))
            .map_err(|error| Error::SourceFailed {
                query,
                source_id: source,
                reason: error.to_string(),
            })?;
        self.thread = Some(thread);
        Ok(())
    }

    fn close(&mut self) {
        self.shared.mutate(|state| {
            state.stop = true;
            state.closed = true;
        });
        if let Some(thread) = self.thread.take() {
            // Close may arrive on the producer thread itself (it delivered
            // the terminal signal); the loop is exiting, joining ourselves
            // would deadlock.
            if thread.thread().id() == std::thread::current().id() {
                return;
            }
            if thread.join().is_err() {
                tracing::error!("test source thread panicked");
            }
        }
    }
}

impl Drop for TestSource {
    fn drop(&mut self) {
        self.close();
        self.shared.mutate(|state| state.destroyed = true);
    }
}

fn produce(shared: &Arc<SourceShared>, listener: &SourceListener) {
    let fail_after = shared.state.lock().fail_open_after;
    if let Some(delay) = fail_after {
        std::thread::sleep(delay);
        listener.on_error("source failed during open");
        shared.mutate(|state| state.stop = true);
        return;
    }

    shared.mutate(|state| state.opened = true);
    listener.on_open();

    loop {
        let command = {
            let mut state = shared.state.lock();
            loop {
                if state.stop {
                    return;
                }
                if let Some(command) = state.commands.pop_front() {
                    break command;
                }
                shared.changed.wait(&mut state);
            }
        };
        match command {
            Command::Data { payload, tuples } => {
                let mut buffer = shared.pool.acquire_blocking();
                let length = payload.len().min(buffer.capacity());
                if let Ok(data) = buffer.data_mut() {
                    data[..length].copy_from_slice(&payload[..length]);
                }
                _ = buffer.set_tuple_count(tuples);
                _ = buffer.set_origin(listener.source());
                listener.on_data(buffer);
            }
            Command::EndOfStream => {
                listener.on_end_of_stream();
                return;
            }
            Command::Error(reason) => {
                listener.on_error(reason);
                return;
            }
        }
    }
}
