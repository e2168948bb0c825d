// Copyright The weir authors
// SPDX-License-Identifier: Apache-2.0

//! Engine-level settings: buffer pool sizing, worker pool shape, and the
//! policies that pin workers and queries to queue partitions.
//!
//! Note: this system configuration is distinct from the query plan, which
//! defines the interconnection of sources, pipelines, and sinks. The plan is
//! an in-memory value; these settings are what an operator tunes per node.

use crate::QueryId;
use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default number of buffers in the node-wide pool. Sized so that a handful
/// of queries can keep every worker busy without exhausting the pool; the
/// pool is the engine's backpressure mechanism, so this bounds in-flight work.
const DEFAULT_BUFFER_POOL_CAPACITY: usize = 1024;

/// Default buffer size in bytes. One buffer carries one batch of tuples.
const DEFAULT_BUFFER_SIZE: usize = 4096;

const fn default_buffer_pool_capacity() -> usize {
    DEFAULT_BUFFER_POOL_CAPACITY
}

const fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

fn default_number_of_workers() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(4)
}

const fn default_number_of_queues() -> usize {
    1
}

/// Policy assigning a newly registered query to a queue partition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueryQueuePolicy {
    /// Queries are spread across queues in registration order.
    #[default]
    RoundRobin,
    /// Explicit assignment; queries absent from the map fall back to
    /// round-robin.
    Explicit(HashMap<QueryId, usize>),
}

/// Engine configuration: buffer pool and worker pool shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of buffers in the node-wide pool.
    pub buffer_pool_capacity: usize,

    /// Bytes per buffer.
    pub buffer_size: usize,

    /// Number of worker threads (T).
    pub number_of_workers: usize,

    /// Number of queue partitions (Q), `1 <= Q <= T`.
    pub number_of_queues: usize,

    /// Optional explicit worker-to-queue mapping (`mapping[worker] = queue`).
    /// Every worker serves exactly one queue; configurations where a worker
    /// would serve several queues are unrepresentable and every queue must be
    /// covered. Defaults to round-robin.
    pub worker_to_queue_mapping: Option<Vec<usize>>,

    /// Policy assigning queries to queues at registration.
    pub query_to_queue_policy: QueryQueuePolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            buffer_pool_capacity: default_buffer_pool_capacity(),
            buffer_size: default_buffer_size(),
            number_of_workers: default_number_of_workers(),
            number_of_queues: default_number_of_queues(),
            worker_to_queue_mapping: None,
            query_to_queue_policy: QueryQueuePolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Validates the configuration and resolves the effective
    /// worker-to-queue mapping.
    pub fn validate(&self) -> Result<ResolvedTopology, Error> {
        if self.number_of_workers == 0 {
            return Err(Error::NoWorkers);
        }
        if self.number_of_queues == 0 || self.number_of_queues > self.number_of_workers {
            return Err(Error::InvalidQueueCount {
                queues: self.number_of_queues,
                workers: self.number_of_workers,
            });
        }
        if self.buffer_pool_capacity == 0 {
            return Err(Error::EmptyBufferPool);
        }
        if self.buffer_size < 8 {
            return Err(Error::BufferTooSmall {
                size: self.buffer_size,
            });
        }

        let mapping = match &self.worker_to_queue_mapping {
            Some(mapping) => {
                if mapping.len() != self.number_of_workers {
                    return Err(Error::MappingLengthMismatch {
                        entries: mapping.len(),
                        workers: self.number_of_workers,
                    });
                }
                for (worker, &queue) in mapping.iter().enumerate() {
                    if queue >= self.number_of_queues {
                        return Err(Error::MappedToUnknownQueue {
                            worker,
                            queue,
                            queues: self.number_of_queues,
                        });
                    }
                }
                mapping.clone()
            }
            None => (0..self.number_of_workers)
                .map(|worker| worker % self.number_of_queues)
                .collect(),
        };

        let mut workers_per_queue = vec![0usize; self.number_of_queues];
        for &queue in &mapping {
            workers_per_queue[queue] += 1;
        }
        if let Some(queue) = workers_per_queue.iter().position(|&count| count == 0) {
            return Err(Error::QueueWithoutWorker { queue });
        }

        Ok(ResolvedTopology {
            worker_to_queue: mapping,
            workers_per_queue,
        })
    }
}

/// The validated worker-pool topology derived from an [`EngineConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTopology {
    /// `worker_to_queue[worker]` is the queue that worker drains.
    pub worker_to_queue: Vec<usize>,
    /// `workers_per_queue[queue]` is the number of workers draining it; this
    /// is the reconfiguration barrier count for the queue.
    pub workers_per_queue: Vec<usize>,
}
