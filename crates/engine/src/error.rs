// Copyright The weir authors
// SPDX-License-Identifier: Apache-2.0

//! Errors for the query engine.
//!
//! Important note: It is important not to use `!Send` data types in errors to
//! ensure these errors can be emitted from worker threads and source threads
//! alike.

use weir_config::{PipelineId, QueryId, SourceId};

/// All errors that can occur in the query engine.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A wrapper for configuration validation errors.
    #[error("A configuration error occurred: {0}")]
    ConfigError(#[from] weir_config::error::Error),

    /// A wrapper for buffer and record-accessor errors.
    #[error("A buffer error occurred: {0}")]
    BufferError(#[from] weir_buffer::Error),

    /// The submitted plan used the invalid identifier sentinel.
    #[error("Plan for {query} contains an invalid identifier")]
    InvalidIdentifier {
        /// The query the plan belongs to.
        query: QueryId,
    },

    /// Two plan nodes share a pipeline identifier.
    #[error("Plan for {query} declares pipeline {pipeline} twice")]
    DuplicatePipeline {
        /// The query the plan belongs to.
        query: QueryId,
        /// The duplicated pipeline id.
        pipeline: PipelineId,
    },

    /// Two sources share an identifier.
    #[error("Plan for {query} declares source {source_id} twice")]
    DuplicateSource {
        /// The query the plan belongs to.
        query: QueryId,
        /// The duplicated source id.
        source_id: SourceId,
    },

    /// A successor reference did not resolve to a pipeline or sink.
    #[error("Plan for {query} references unknown successor {successor}")]
    UnknownSuccessor {
        /// The query the plan belongs to.
        query: QueryId,
        /// The unresolved successor id.
        successor: PipelineId,
    },

    /// The plan has no sources.
    #[error("Plan for {query} has no sources")]
    PlanWithoutSources {
        /// The query the plan belongs to.
        query: QueryId,
    },

    /// The plan has no sinks.
    #[error("Plan for {query} has no sinks")]
    PlanWithoutSinks {
        /// The query the plan belongs to.
        query: QueryId,
    },

    /// A source has no successor pipeline to deliver into.
    #[error("Source {source_id} in plan for {query} has no successors")]
    SourceWithoutSuccessor {
        /// The query the plan belongs to.
        query: QueryId,
        /// The dangling source.
        source_id: SourceId,
    },

    /// The successor graph contains a cycle.
    #[error("Plan for {query} is cyclic")]
    CyclicPlan {
        /// The query the plan belongs to.
        query: QueryId,
    },

    /// A pipeline or sink is not reachable from any source.
    #[error("Pipeline {pipeline} in plan for {query} is unreachable from every source")]
    UnreachablePipeline {
        /// The query the plan belongs to.
        query: QueryId,
        /// The unreachable pipeline.
        pipeline: PipelineId,
    },

    /// A query with this identifier is already registered.
    #[error("Query {query} is already registered")]
    QueryAlreadyRegistered {
        /// The conflicting query id.
        query: QueryId,
    },

    /// No query with this identifier is registered.
    #[error("Unknown query {query}")]
    UnknownQuery {
        /// The unknown query id.
        query: QueryId,
    },

    /// The engine is shutting down and accepts no further operations.
    #[error("The engine is shut down")]
    EngineShutDown,

    /// A worker thread could not be spawned.
    #[error("Failed to spawn worker {worker}: {reason}")]
    WorkerSpawnFailed {
        /// The worker index.
        worker: usize,
        /// The underlying I/O error, rendered.
        reason: String,
    },

    /// A pipeline's `start` failed; the query start is aborted.
    #[error("Pipeline {pipeline} of query {query} failed to start: {reason}")]
    PipelineStartFailed {
        /// The owning query.
        query: QueryId,
        /// The failing pipeline.
        pipeline: PipelineId,
        /// The failure, rendered.
        reason: String,
    },

    /// A pipeline's `stop` failed; logged, does not block termination.
    #[error("Pipeline {pipeline} of query {query} failed to stop: {reason}")]
    PipelineStopFailed {
        /// The owning query.
        query: QueryId,
        /// The failing pipeline.
        pipeline: PipelineId,
        /// The failure, rendered.
        reason: String,
    },

    /// A pipeline's `execute` failed; the query transitions to failed.
    #[error("Pipeline {pipeline} of query {query} failed during execute: {reason}")]
    PipelineExecuteFailed {
        /// The owning query.
        query: QueryId,
        /// The failing pipeline.
        pipeline: PipelineId,
        /// The failure, rendered.
        reason: String,
    },

    /// A source reported a failure; the query transitions to failed.
    #[error("Source {source_id} of query {query} failed: {reason}")]
    SourceFailed {
        /// The owning query.
        query: QueryId,
        /// The failing source.
        source_id: SourceId,
        /// The failure, rendered.
        reason: String,
    },
}
