// Copyright The weir authors
// SPDX-License-Identifier: Apache-2.0

//! Errors for the buffer and memory-layout layer.

use crate::schema::ScalarType;

/// All errors that can occur in the buffer pool and record accessors.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// The pool has no free buffers; transient, callers may back off or
    /// expire the work that needed the buffer.
    #[error("The buffer pool is exhausted")]
    OutOfBuffers,

    /// A write was attempted through a handle that is no longer unique.
    #[error("The buffer is shared and can no longer be written")]
    BufferShared,

    /// A child-buffer index did not resolve to an attached child.
    #[error("Child buffer index {index} is out of range ({children} children)")]
    ChildIndexOutOfRange {
        /// The requested index.
        index: u32,
        /// Number of children attached to the parent.
        children: usize,
    },

    /// The parent cannot hold any more child buffers.
    #[error("The buffer already holds the maximum of {limit} child buffers")]
    TooManyChildBuffers {
        /// The per-buffer child limit.
        limit: usize,
    },

    /// A record index was outside the buffer's tuple count or capacity.
    #[error("Record index {index} is out of range ({limit} records)")]
    RecordIndexOutOfRange {
        /// The requested record index.
        index: u64,
        /// The bound that was exceeded.
        limit: u64,
    },

    /// A tuple of this schema does not fit into one buffer.
    #[error("Tuple width {tuple_size} exceeds the buffer capacity of {capacity} bytes")]
    TupleTooLarge {
        /// Tuple width in bytes.
        tuple_size: usize,
        /// Buffer capacity in bytes.
        capacity: usize,
    },

    /// A schema must have at least one field.
    #[error("The schema has no fields")]
    EmptySchema,

    /// Two schema fields share a name.
    #[error("Duplicate field `{name}` in schema")]
    DuplicateField {
        /// The duplicated field name.
        name: String,
    },

    /// A field name did not resolve.
    #[error("Unknown field `{name}`")]
    UnknownField {
        /// The unresolved field name.
        name: String,
    },

    /// A value's scalar type does not match the field it is written to.
    #[error("Expected a {expected:?} value but got {actual:?}")]
    TypeMismatch {
        /// Scalar type of the field.
        expected: ScalarType,
        /// Scalar type of the provided value.
        actual: ScalarType,
    },

    /// The shape of a value does not match its field (wrong category, wrong
    /// fixed-size element count, or inconsistent variable-size length).
    #[error("Value shape does not match field: {reason}")]
    ValueShape {
        /// Human-readable description of the mismatch.
        reason: String,
    },

    /// A variable-size payload does not fit into one child buffer.
    #[error("Variable-size payload of {payload} bytes exceeds the child capacity of {capacity}")]
    VariableSizeTooLarge {
        /// Payload length including the length prefix.
        payload: usize,
        /// Child buffer capacity in bytes.
        capacity: usize,
    },

    /// An operation was applied to [`crate::VarVal`] variants that do not
    /// support it; fatal to the executing pipeline.
    #[error("Unsupported operation: {reason}")]
    UnsupportedOperation {
        /// Human-readable description of the variant mismatch.
        reason: String,
    },

    /// Integer division or remainder by zero.
    #[error("Division by zero")]
    DivisionByZero,
}

impl Error {
    pub(crate) fn unsupported(reason: impl Into<String>) -> Self {
        Error::UnsupportedOperation {
            reason: reason.into(),
        }
    }
}
