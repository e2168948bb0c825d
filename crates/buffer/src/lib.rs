// Copyright The weir authors
// SPDX-License-Identifier: Apache-2.0

//! Tuple buffers and the memory layer of the weir query engine.
//!
//! The engine moves data in fixed-size, reference-counted [`TupleBuffer`]s
//! drawn from a node-wide [`BufferPool`]. A buffer carries a batch of
//! row-layout records described by a [`Schema`]; variable-size field payloads
//! live in child buffers owned by the parent. Compiled pipeline stages read
//! and write records through a [`RowLayout`] accessor and operate on
//! [`VarVal`] runtime values.
//!
//! Mutation follows a writer-owns-then-shares discipline: a buffer is
//! writable only while its handle is unique; once the engine fans a buffer
//! out to successor pipelines, every handle is read-only. The last handle to
//! drop returns the underlying slab (and, transitively, any child buffers)
//! to the pool.

pub mod error;
pub mod layout;
pub mod pool;
pub mod schema;
pub mod tuple_buffer;
pub mod varval;

pub use error::Error;
pub use layout::{RecordRef, RowLayout};
pub use pool::{BufferPool, BufferProvider};
pub use schema::{Field, PhysicalType, ScalarType, Schema};
pub use tuple_buffer::TupleBuffer;
pub use varval::{BinaryOp, ScalarValue, VarVal, VariableSizeValue};
