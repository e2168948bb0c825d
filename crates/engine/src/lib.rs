// Copyright The weir authors
// SPDX-License-Identifier: Apache-2.0

//! The weir query engine: executes compiled dataflow query plans on a pool of
//! worker threads.
//!
//! A plan is a DAG of sources → pipelines → sinks. Sources produce tuple
//! buffers; the engine wraps each buffer as one data task per successor
//! pipeline and enqueues it on the query's queue partition; workers dequeue
//! tasks and invoke the compiled pipeline stages, which emit buffers to their
//! successors; sinks consume and drop.
//!
//! All lifecycle control — starting a pipeline, stopping it, poisoning a
//! worker — flows through the same queues as data, as reconfiguration tasks.
//! FIFO order within a queue therefore guarantees that a pipeline's stop
//! executes only after every data task enqueued before it, and a rendezvous
//! barrier inside each reconfiguration guarantees that no worker is
//! mid-execute on a pipeline when its lifecycle method runs.
//!
//! Entry point: [`QueryEngine`].

pub mod error;
pub mod event;
pub mod plan;
pub mod source;
pub mod stage;

mod engine;
mod pipeline;
mod task;
mod worker;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use engine::QueryEngine;
pub use error::Error;
pub use event::{EngineEvent, EventListener, NoopEventListener, QueryStatus, TerminationKind};
pub use plan::{ExecutableQueryPlan, QueryPlanBuilder, Upstream};
pub use source::{Source, SourceListener};
pub use stage::{ExecutionContext, PipelineStage, Sink, StageContext};
