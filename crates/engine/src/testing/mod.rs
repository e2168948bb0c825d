// Copyright The weir authors
// SPDX-License-Identifier: Apache-2.0

//! Common testing utilities for engine components.
//!
//! This module provides the controllable building blocks the engine's own
//! tests are written with:
//!
//! - [`TestSource`] / [`TestSourceControl`]: a source whose data, end-of-
//!   stream, and error signals are injected from the test thread
//! - [`CountingSink`] / [`TestSinkControl`]: a sink that retains consumed
//!   buffers and exposes waiting helpers
//! - [`ControllableStage`] / [`StageControl`]: a passthrough stage that can
//!   be instructed to fail on start, stop, or the n-th invocation
//! - [`RecordingListener`]: an [`crate::EventListener`] capturing every
//!   event for assertions

pub mod listener;
pub mod sink;
pub mod source;
pub mod stage;

pub use listener::RecordingListener;
pub use sink::{CountingSink, TestSinkControl};
pub use source::{TestSource, TestSourceControl};
pub use stage::{ControllableStage, StageControl};

use std::time::Duration;
use weir_buffer::{PhysicalType, ScalarType, Schema};
use weir_config::engine::EngineConfig;

/// Short await used for conditions expected to already hold.
pub const DEFAULT_AWAIT: Duration = Duration::from_millis(500);

/// Long await used for conditions reached through the worker pool.
pub const DEFAULT_LONG_AWAIT: Duration = Duration::from_secs(5);

/// An engine configuration sized for tests.
#[must_use]
pub fn test_config(workers: usize, buffers: usize) -> EngineConfig {
    EngineConfig {
        buffer_pool_capacity: buffers,
        buffer_size: 128,
        number_of_workers: workers,
        number_of_queues: 1,
        ..EngineConfig::default()
    }
}

/// The single-`u64`-field schema the test sources and sinks exchange.
#[must_use]
pub fn test_schema() -> Schema {
    Schema::new().with_field("value", PhysicalType::Scalar(ScalarType::U64))
}

/// A payload of `tuples` little-endian `u64` values `seed, seed+1, ..`,
/// identifying the buffer it rode in.
#[must_use]
pub fn identifiable_payload(seed: u64, tuples: u64) -> Vec<u8> {
    let mut payload = Vec::with_capacity(tuples as usize * 8);
    for value in seed..seed + tuples {
        payload.extend_from_slice(&value.to_le_bytes());
    }
    payload
}

/// Checks that a buffer carries [`identifiable_payload`]`(seed, tuples)`.
#[must_use]
pub fn verify_identifiable(buffer: &weir_buffer::TupleBuffer, seed: u64, tuples: u64) -> bool {
    if buffer.tuple_count() != tuples {
        return false;
    }
    let expected = identifiable_payload(seed, tuples);
    buffer.data()[..expected.len()] == expected[..]
}
