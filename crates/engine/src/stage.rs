// Copyright The weir authors
// SPDX-License-Identifier: Apache-2.0

//! The capability surface of compiled pipeline stages and sinks.
//!
//! A stage is `{start, execute, stop}`; a sink is `{start, consume, stop}`.
//! Stages hold their own cross-invocation state (hash tables, window slices)
//! behind interior mutability: by default the engine serializes execution per
//! pipeline per queue, and a stage that opts into concurrent invocation is
//! responsible for its own synchronization.

use crate::error::Error;
use weir_buffer::{BufferProvider, TupleBuffer};
use weir_config::{PipelineId, QueryId, TaskId};

/// Context handed to stage `start` and `stop`.
pub struct StageContext<'a> {
    query: QueryId,
    pipeline: PipelineId,
    provider: &'a dyn BufferProvider,
}

impl<'a> StageContext<'a> {
    pub(crate) fn new(
        query: QueryId,
        pipeline: PipelineId,
        provider: &'a dyn BufferProvider,
    ) -> Self {
        StageContext {
            query,
            pipeline,
            provider,
        }
    }

    /// The owning query.
    #[must_use]
    pub fn query(&self) -> QueryId {
        self.query
    }

    /// The pipeline this stage belongs to.
    #[must_use]
    pub fn pipeline(&self) -> PipelineId {
        self.pipeline
    }

    /// The node-wide buffer provider.
    #[must_use]
    pub fn buffer_provider(&self) -> &dyn BufferProvider {
        self.provider
    }
}

/// Context handed to stage `execute`.
///
/// Buffers passed to [`ExecutionContext::emit`] are collected and, once the
/// invocation returns successfully, wrapped as one data task per successor
/// pipeline on the same queue partition.
pub struct ExecutionContext<'a> {
    query: QueryId,
    pipeline: PipelineId,
    task: TaskId,
    worker_id: usize,
    queue_id: usize,
    provider: &'a dyn BufferProvider,
    emitted: Vec<TupleBuffer>,
}

impl<'a> ExecutionContext<'a> {
    pub(crate) fn new(
        query: QueryId,
        pipeline: PipelineId,
        task: TaskId,
        worker_id: usize,
        queue_id: usize,
        provider: &'a dyn BufferProvider,
    ) -> Self {
        ExecutionContext {
            query,
            pipeline,
            task,
            worker_id,
            queue_id,
            provider,
            emitted: Vec::new(),
        }
    }

    /// The owning query.
    #[must_use]
    pub fn query(&self) -> QueryId {
        self.query
    }

    /// The executing pipeline.
    #[must_use]
    pub fn pipeline(&self) -> PipelineId {
        self.pipeline
    }

    /// The task being executed.
    #[must_use]
    pub fn task(&self) -> TaskId {
        self.task
    }

    /// The executing worker's index.
    #[must_use]
    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    /// The queue partition the worker drains.
    #[must_use]
    pub fn queue_id(&self) -> usize {
        self.queue_id
    }

    /// The node-wide buffer provider.
    #[must_use]
    pub fn buffer_provider(&self) -> &dyn BufferProvider {
        self.provider
    }

    /// Emits a buffer to every successor of the executing pipeline.
    pub fn emit(&mut self, buffer: TupleBuffer) {
        self.emitted.push(buffer);
    }

    pub(crate) fn take_emitted(&mut self) -> Vec<TupleBuffer> {
        std::mem::take(&mut self.emitted)
    }
}

/// One compiled pipeline stage.
pub trait PipelineStage: Send + Sync {
    /// Runs exactly once before the first `execute`; never concurrently with
    /// `execute` on the same pipeline.
    fn start(&self, _ctx: &StageContext<'_>) -> Result<(), Error> {
        Ok(())
    }

    /// Processes one input buffer; may emit output buffers through the
    /// context. Errors fail the owning query.
    fn execute(&self, input: &TupleBuffer, ctx: &mut ExecutionContext<'_>) -> Result<(), Error>;

    /// Runs exactly once after the last `execute`; never concurrently with
    /// `execute` on the same pipeline.
    fn stop(&self, _ctx: &StageContext<'_>) -> Result<(), Error> {
        Ok(())
    }
}

/// A terminal pipeline: consumes buffers, has no successors.
pub trait Sink: Send + Sync {
    /// Runs exactly once before the first `consume`.
    fn start(&self) -> Result<(), Error> {
        Ok(())
    }

    /// Consumes one buffer. Errors fail the owning query.
    fn consume(&self, buffer: TupleBuffer) -> Result<(), Error>;

    /// Runs exactly once after the last `consume`.
    fn stop(&self) -> Result<(), Error> {
        Ok(())
    }
}
