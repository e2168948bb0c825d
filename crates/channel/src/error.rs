// Copyright The weir authors
// SPDX-License-Identifier: Apache-2.0

//! Errors for the channels.
//!
//! Important note: It is important not to use `!Send` data types in errors to
//! ensure these errors can cross worker-thread boundaries.

/// Errors that can occur sending messages to a channel.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum SendError<T> {
    /// The channel is closed and the message could not be sent.
    #[error("Channel is closed and the message could not be sent")]
    Closed(T),
}

impl<T> SendError<T> {
    /// Returns the message that could not be sent.
    pub fn into_inner(self) -> T {
        match self {
            Self::Closed(value) => value,
        }
    }
}

/// Errors that can occur when consuming messages from a channel.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum RecvError {
    /// The channel is closed and fully drained.
    #[error("The channel is closed")]
    Closed,

    /// The channel is empty.
    #[error("The channel is empty")]
    Empty,
}
