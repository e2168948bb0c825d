// Copyright The weir authors
// SPDX-License-Identifier: Apache-2.0

//! Identifiers and configuration model for the weir query engine.
//!
//! Data model:
//! - a node runs one [`engine::EngineConfig`]-sized worker pool and buffer pool
//! - queries, pipelines, sources, and tasks are addressed by typed identifiers
//!
//! Identifiers are opaque, strictly positive integers; the zero value is a
//! distinguished invalid sentinel used in logs and events before an id has
//! been assigned.

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod engine;
pub mod error;

/// Declares a typed identifier over a strictly positive `u64`.
macro_rules! identifier {
    ($(#[$docs:meta])* $name:ident) => {
        $(#[$docs])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            /// The distinguished invalid sentinel.
            pub const INVALID: $name = $name(0);

            /// The first valid identifier.
            pub const INITIAL: $name = $name(1);

            /// Creates an identifier from a raw value; returns `None` for zero.
            #[must_use]
            pub const fn new(raw: u64) -> Option<Self> {
                if raw == 0 { None } else { Some($name(raw)) }
            }

            /// Returns the raw value.
            #[must_use]
            pub const fn raw(self) -> u64 {
                self.0
            }

            /// Returns `true` unless this is the invalid sentinel.
            #[must_use]
            pub const fn is_valid(self) -> bool {
                self.0 != 0
            }

            /// Returns the next identifier in the sequence.
            #[must_use]
            pub const fn next(self) -> Self {
                $name(self.0 + 1)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

identifier!(
    /// Identifies one registered query on this node.
    QueryId
);
identifier!(
    /// Identifies one pipeline (operator or sink) within a query plan.
    PipelineId
);
identifier!(
    /// Identifies one source within a query plan; doubles as the origin id
    /// stamped onto buffers the source produces.
    SourceId
);
identifier!(
    /// Identifies one task; assigned from a node-wide monotonic counter.
    TaskId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_is_invalid() {
        assert_eq!(QueryId::new(0), None);
        assert!(!QueryId::INVALID.is_valid());
        assert!(QueryId::INITIAL.is_valid());
    }

    #[test]
    fn test_identifier_sequence() {
        let first = PipelineId::INITIAL;
        assert_eq!(first.next().raw(), 2);
        assert!(first < first.next());
    }

    #[test]
    fn test_serde_transparent() {
        let id = SourceId::new(7).expect("valid id");
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, "7");
        let back: SourceId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, id);
    }
}
