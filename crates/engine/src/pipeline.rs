// Copyright The weir authors
// SPDX-License-Identifier: Apache-2.0

//! Runtime pipelines: one compiled stage (or sink) plus its successor edges
//! and lifecycle state.
//!
//! Invariants: a pipeline enters running exactly once; once stopped or
//! failed it never executes again. Lifecycle transitions happen inside
//! reconfiguration actions, which the worker rendezvous serializes against
//! data-task execution, so the state mutex here only provides visibility.

use crate::stage::{PipelineStage, Sink};
use smallvec::SmallVec;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use parking_lot::Mutex;
use weir_config::{PipelineId, QueryId};

/// What kind of node a runtime pipeline is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PipelineKind {
    Operator,
    Sink,
}

/// The executable inside a pipeline.
pub(crate) enum StageKind {
    Operator(Box<dyn PipelineStage>),
    Sink(Box<dyn Sink>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PipelineState {
    Created,
    Running,
    Stopped,
    Failed,
}

pub(crate) struct RuntimePipeline {
    pub(crate) query: QueryId,
    pub(crate) id: PipelineId,
    pub(crate) kind: PipelineKind,
    pub(crate) stage: StageKind,
    pub(crate) successors: SmallVec<[Arc<RuntimePipeline>; 2]>,
    state: Mutex<PipelineState>,
    /// Number of direct upstream edges (sources and pipelines) that have not
    /// yet terminated; a drain-stop only takes effect at zero.
    pending_upstreams: AtomicUsize,
    /// Set when the owning query reaches a terminal state; dequeued data
    /// tasks expire instead of executing.
    query_terminal: Arc<AtomicBool>,
}

impl RuntimePipeline {
    pub(crate) fn new(
        query: QueryId,
        id: PipelineId,
        kind: PipelineKind,
        stage: StageKind,
        successors: SmallVec<[Arc<RuntimePipeline>; 2]>,
        upstreams: usize,
        query_terminal: Arc<AtomicBool>,
    ) -> Arc<Self> {
        Arc::new(RuntimePipeline {
            query,
            id,
            kind,
            stage,
            successors,
            state: Mutex::new(PipelineState::Created),
            pending_upstreams: AtomicUsize::new(upstreams),
            query_terminal,
        })
    }

    pub(crate) fn state(&self) -> PipelineState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: PipelineState) {
        *self.state.lock() = state;
    }

    pub(crate) fn is_running(&self) -> bool {
        self.state() == PipelineState::Running
    }

    pub(crate) fn query_terminal(&self) -> bool {
        self.query_terminal.load(Ordering::Acquire)
    }

    /// Records that one upstream edge terminated; returns `true` when this
    /// was the last one.
    pub(crate) fn upstream_terminated(&self) -> bool {
        self.pending_upstreams.fetch_sub(1, Ordering::AcqRel) == 1
    }
}

impl std::fmt::Debug for RuntimePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimePipeline")
            .field("query", &self.query)
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .field("successors", &self.successors.len())
            .finish()
    }
}
