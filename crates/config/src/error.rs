// Copyright The weir authors
// SPDX-License-Identifier: Apache-2.0

//! Errors for the configuration model.

/// All errors that can occur validating an engine configuration.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// The worker pool must have at least one thread.
    #[error("`number_of_workers` must be at least 1")]
    NoWorkers,

    /// The queue count must be between one and the worker count.
    #[error("`number_of_queues` must satisfy 1 <= queues ({queues}) <= workers ({workers})")]
    InvalidQueueCount {
        /// The configured queue count.
        queues: usize,
        /// The configured worker count.
        workers: usize,
    },

    /// An explicit worker-to-queue mapping must assign every worker.
    #[error("`worker_to_queue_mapping` has {entries} entries but there are {workers} workers")]
    MappingLengthMismatch {
        /// Number of entries in the mapping.
        entries: usize,
        /// The configured worker count.
        workers: usize,
    },

    /// A worker was mapped to a queue that does not exist.
    #[error("worker {worker} is mapped to queue {queue}, but only {queues} queues exist")]
    MappedToUnknownQueue {
        /// The offending worker index.
        worker: usize,
        /// The queue it was mapped to.
        queue: usize,
        /// The configured queue count.
        queues: usize,
    },

    /// Every queue partition needs at least one worker draining it.
    #[error("queue {queue} has no worker assigned")]
    QueueWithoutWorker {
        /// The starved queue index.
        queue: usize,
    },

    /// The buffer pool must hold at least one buffer.
    #[error("`buffer_pool_capacity` must be at least 1")]
    EmptyBufferPool,

    /// Buffers must be large enough to hold at least one 8-byte word.
    #[error("`buffer_size` of {size} bytes is too small")]
    BufferTooSmall {
        /// The configured buffer size.
        size: usize,
    },
}
