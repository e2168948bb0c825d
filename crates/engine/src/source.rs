// Copyright The weir authors
// SPDX-License-Identifier: Apache-2.0

//! Sources and the listener surface they report into.
//!
//! A source produces tuple buffers asynchronously, typically from a thread of
//! its own, and hands them to the engine through its [`SourceListener`]. The
//! listener is also the channel for the two terminal signals: end-of-stream
//! (graceful) and error (failure). A source must not invoke the listener
//! after either terminal signal; the engine additionally guards against it.
//!
//! Source state machine, engine side:
//! `created → opening → open → closing → closed` (linear); a failure
//! transitions to `closed` after `on_error` without passing through
//! `closing`. [`Source::close`] must be idempotent, and it may be invoked
//! from the very thread that delivered a terminal listener signal —
//! implementations must tolerate that (no unconditional self-join).

use crate::engine::EngineCore;
use crate::error::Error;
use crate::pipeline::RuntimePipeline;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use weir_buffer::TupleBuffer;
use weir_config::{QueryId, SourceId};

/// A producer of tuple buffers.
pub trait Source: Send {
    /// Begins producing. The source keeps the listener and reports data and
    /// termination through it until closed.
    fn open(&mut self, listener: SourceListener) -> Result<(), Error>;

    /// Stops producing and releases resources. Idempotent.
    fn close(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SourceState {
    Created,
    Opening,
    Open,
    Closing,
    Closed,
}

/// Engine-backed handle a source reports into. Cheap to clone.
#[derive(Clone)]
pub struct SourceListener {
    inner: Arc<ListenerShared>,
}

struct ListenerShared {
    engine: Weak<EngineCore>,
    query: QueryId,
    source: SourceId,
    /// Set once a terminal signal was delivered; later signals are ignored.
    terminated: AtomicBool,
}

impl SourceListener {
    pub(crate) fn new(engine: Weak<EngineCore>, query: QueryId, source: SourceId) -> Self {
        SourceListener {
            inner: Arc::new(ListenerShared {
                engine,
                query,
                source,
                terminated: AtomicBool::new(false),
            }),
        }
    }

    /// The query this listener feeds.
    #[must_use]
    pub fn query(&self) -> QueryId {
        self.inner.query
    }

    /// The source this listener belongs to.
    #[must_use]
    pub fn source(&self) -> SourceId {
        self.inner.source
    }

    /// Reports that the source finished opening and is producing.
    pub fn on_open(&self) {
        if let Some(engine) = self.inner.engine.upgrade() {
            engine.source_opened(self.inner.query, self.inner.source);
        }
    }

    /// Hands one buffer to the engine. The engine takes a reference per
    /// successor pipeline; the buffer is dropped if the query has already
    /// terminated.
    pub fn on_data(&self, buffer: TupleBuffer) {
        if self.inner.terminated.load(Ordering::Acquire) {
            return;
        }
        if let Some(engine) = self.inner.engine.upgrade() {
            engine.source_data(self.inner.query, self.inner.source, buffer);
        }
    }

    /// Signals graceful end-of-stream; no further buffers will be delivered.
    pub fn on_end_of_stream(&self) {
        if self.inner.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(engine) = self.inner.engine.upgrade() {
            engine.source_end_of_stream(self.inner.query, self.inner.source);
        }
    }

    /// Signals source failure; the owning query fails.
    pub fn on_error(&self, reason: impl Into<String>) {
        if self.inner.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(engine) = self.inner.engine.upgrade() {
            engine.source_error(self.inner.query, self.inner.source, reason.into());
        }
    }
}

/// Engine-side bookkeeping for one source of a registered query.
pub(crate) struct SourceRuntime {
    pub(crate) id: SourceId,
    source: Mutex<Box<dyn Source>>,
    state: Mutex<SourceState>,
    /// Set once a termination event (any kind) was emitted for this source.
    terminated: AtomicBool,
    pub(crate) successors: Vec<Arc<RuntimePipeline>>,
}

impl SourceRuntime {
    pub(crate) fn new(
        id: SourceId,
        source: Box<dyn Source>,
        successors: Vec<Arc<RuntimePipeline>>,
    ) -> Self {
        SourceRuntime {
            id,
            source: Mutex::new(source),
            state: Mutex::new(SourceState::Created),
            terminated: AtomicBool::new(false),
            successors,
        }
    }

    pub(crate) fn set_state(&self, state: SourceState) {
        *self.state.lock() = state;
    }

    /// Claims the right to emit the termination event for this source.
    pub(crate) fn claim_termination(&self) -> bool {
        !self.terminated.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn open(&self, listener: SourceListener) -> Result<(), Error> {
        self.set_state(SourceState::Opening);
        self.source.lock().open(listener)
    }

    /// Closes the source if it is not closed yet. Safe to call repeatedly
    /// and from any thread, including a source callback thread.
    pub(crate) fn close(&self) {
        {
            let mut state = self.state.lock();
            if *state == SourceState::Closed {
                return;
            }
            *state = SourceState::Closing;
        }
        self.source.lock().close();
        self.set_state(SourceState::Closed);
    }
}
