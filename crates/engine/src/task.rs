// Copyright The weir authors
// SPDX-License-Identifier: Apache-2.0

//! Tasks and reconfiguration messages.
//!
//! Everything a worker dequeues is a [`Task`]: data, a reconfiguration, or
//! poison. Reconfigurations flow through the same FIFO queue as data — that
//! ordering is the mechanism by which a pipeline's stop observes every data
//! task enqueued before it.
//!
//! A reconfiguration message is enqueued once per worker on the target
//! queue. Each worker that dequeues a copy joins a rendezvous; the last
//! arrival executes the embedded action while its siblings are parked, then
//! releases them and signals the completion latch. While every worker on the
//! queue stands at the rendezvous, none of them can be mid-execute on any
//! pipeline of that queue, which is exactly the guarantee stop needs.

use crate::pipeline::RuntimePipeline;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use weir_buffer::TupleBuffer;
use weir_config::{QueryId, TaskId};

/// One unit of work on a queue partition.
pub(crate) struct Task {
    pub(crate) id: TaskId,
    pub(crate) kind: TaskKind,
}

/// What the task carries.
pub(crate) enum TaskKind {
    /// A buffer to run through a pipeline.
    Data {
        pipeline: Arc<RuntimePipeline>,
        buffer: TupleBuffer,
    },
    /// One copy of a reconfiguration message.
    Reconfigure(Arc<ReconfigurationMessage>),
    /// Shut the worker down after draining pending reconfigurations.
    Poison,
}

/// How a stop reconfiguration treats the pipeline's upstream count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StopMode {
    /// One upstream terminated; stop only when all upstreams are done.
    Drain,
    /// Stop now, regardless of remaining upstreams.
    Force,
}

/// The lifecycle action embedded in a reconfiguration message.
pub(crate) enum ReconfigureAction {
    StartPipeline(Arc<RuntimePipeline>),
    StopPipeline {
        pipeline: Arc<RuntimePipeline>,
        mode: StopMode,
    },
}

/// An in-band control message with a worker rendezvous and completion latch.
pub(crate) struct ReconfigurationMessage {
    pub(crate) query: QueryId,
    pub(crate) action: ReconfigureAction,
    barrier: Rendezvous,
    executed: AtomicBool,
    done: Latch,
}

impl ReconfigurationMessage {
    pub(crate) fn new(query: QueryId, action: ReconfigureAction, workers: usize) -> Arc<Self> {
        Arc::new(ReconfigurationMessage {
            query,
            action,
            barrier: Rendezvous::new(workers),
            executed: AtomicBool::new(false),
            done: Latch::new(),
        })
    }

    /// Joins the rendezvous. Returns `true` for the executor (the last
    /// arrival); all other callers block until [`Self::release`].
    pub(crate) fn arrive(&self) -> bool {
        self.barrier.arrive()
    }

    /// Claims the one-shot right to execute the action. The drain path uses
    /// this directly, without the rendezvous, once no data task can be
    /// concurrent anymore.
    pub(crate) fn try_claim(&self) -> bool {
        !self.executed.swap(true, Ordering::AcqRel)
    }

    /// Releases parked rendezvous participants and signals completion.
    pub(crate) fn release(&self) {
        self.barrier.release();
        self.done.signal();
    }

    /// Blocks until the action has executed, or the timeout elapses.
    /// Used by blocking requesters; `false` on timeout.
    #[allow(dead_code)]
    pub(crate) fn wait_done(&self, timeout: Duration) -> bool {
        self.done.wait(timeout)
    }
}

struct RendezvousState {
    arrived: usize,
    released: bool,
}

struct Rendezvous {
    state: Mutex<RendezvousState>,
    all_arrived: Condvar,
    count: usize,
}

impl Rendezvous {
    fn new(count: usize) -> Self {
        Rendezvous {
            state: Mutex::new(RendezvousState {
                arrived: 0,
                released: false,
            }),
            all_arrived: Condvar::new(),
            count,
        }
    }

    fn arrive(&self) -> bool {
        let mut state = self.state.lock();
        state.arrived += 1;
        if state.arrived >= self.count {
            return true;
        }
        while !state.released {
            self.all_arrived.wait(&mut state);
        }
        false
    }

    fn release(&self) {
        let mut state = self.state.lock();
        state.released = true;
        drop(state);
        _ = self.all_arrived.notify_all();
    }
}

struct Latch {
    state: Mutex<bool>,
    signalled: Condvar,
}

impl Latch {
    fn new() -> Self {
        Latch {
            state: Mutex::new(false),
            signalled: Condvar::new(),
        }
    }

    fn signal(&self) {
        let mut done = self.state.lock();
        *done = true;
        drop(done);
        _ = self.signalled.notify_all();
    }

    fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut done = self.state.lock();
        while !*done {
            if self.signalled.wait_until(&mut done, deadline).timed_out() {
                return *done;
            }
        }
        true
    }
}
