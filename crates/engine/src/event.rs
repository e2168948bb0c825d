// Copyright The weir authors
// SPDX-License-Identifier: Apache-2.0

//! Status events and execution statistics emitted by the engine.
//!
//! An [`EventListener`] is the engine's only out-edge for observability: it
//! receives query status transitions, source terminations, and per-task
//! statistics. Listeners are invoked from worker threads, source threads, and
//! the caller's thread, so they must be thread-safe and should return
//! quickly.
//!
//! Ordering: the status events of a single query are delivered in causal
//! order with respect to the engine's internal transitions; statistics may
//! interleave freely, and nothing is ordered across queries.

use weir_config::{PipelineId, QueryId, SourceId, TaskId};

/// Observable status of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    /// The plan was validated and registered.
    Started,
    /// All pipelines started; sources are opening.
    Running,
    /// Terminal: the query drained and stopped gracefully.
    Stopped,
    /// Terminal: the query failed.
    Failed,
}

impl QueryStatus {
    /// Returns `true` for the two terminal statuses.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, QueryStatus::Stopped | QueryStatus::Failed)
    }

    pub(crate) const fn bit(self) -> u8 {
        match self {
            QueryStatus::Started => 1,
            QueryStatus::Running => 1 << 1,
            QueryStatus::Stopped => 1 << 2,
            QueryStatus::Failed => 1 << 3,
        }
    }
}

/// How a source terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationKind {
    /// The source signalled end-of-stream.
    Graceful,
    /// The source reported an error.
    Failure,
    /// The engine closed the source as part of a stop or failure.
    Hard,
}

/// Everything the engine reports to its listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// A query status transition.
    QueryStatus {
        /// The query.
        query: QueryId,
        /// The new status.
        status: QueryStatus,
        /// For [`QueryStatus::Failed`], the failure rendered as text.
        reason: Option<String>,
    },

    /// A source reached its end, one way or another.
    SourceTermination {
        /// The owning query.
        query: QueryId,
        /// The terminated source.
        source: SourceId,
        /// How it terminated.
        kind: TerminationKind,
    },

    /// The engine accepted a start request for the query.
    QueryStart {
        /// The query.
        query: QueryId,
    },

    /// The engine accepted an external stop request for the query.
    QueryStop {
        /// The query.
        query: QueryId,
    },

    /// A pipeline entered running.
    PipelineStart {
        /// The owning query.
        query: QueryId,
        /// The started pipeline.
        pipeline: PipelineId,
    },

    /// A pipeline stopped.
    PipelineStop {
        /// The owning query.
        query: QueryId,
        /// The stopped pipeline.
        pipeline: PipelineId,
    },

    /// A worker began executing a data task.
    TaskExecutionStart {
        /// The owning query.
        query: QueryId,
        /// The target pipeline.
        pipeline: PipelineId,
        /// The task.
        task: TaskId,
    },

    /// A data task completed successfully.
    TaskExecutionComplete {
        /// The owning query.
        query: QueryId,
        /// The target pipeline.
        pipeline: PipelineId,
        /// The task.
        task: TaskId,
    },

    /// A data task was dequeued after its pipeline or query had terminated
    /// and was dropped without executing.
    TaskExpired {
        /// The owning query.
        query: QueryId,
        /// The target pipeline.
        pipeline: PipelineId,
        /// The task.
        task: TaskId,
    },

    /// A pipeline emitted one buffer to its successors.
    TaskEmit {
        /// The owning query.
        query: QueryId,
        /// The emitting pipeline.
        pipeline: PipelineId,
        /// Number of successor tasks created for the buffer.
        count: usize,
    },
}

/// A pluggable sink for engine events.
///
/// Invoked from arbitrary threads; implementations must be thread-safe.
pub trait EventListener: Send + Sync {
    /// Delivers one event.
    fn on_event(&self, event: EngineEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventListener;

impl EventListener for NoopEventListener {
    fn on_event(&self, _event: EngineEvent) {}
}

/// Logs every event through `tracing` at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventListener;

impl EventListener for TracingEventListener {
    fn on_event(&self, event: EngineEvent) {
        tracing::debug!(?event, "engine event");
    }
}
