// Copyright The weir authors
// SPDX-License-Identifier: Apache-2.0

//! Blocking channel implementations used by the weir worker pool.
//!
//! The engine runs on plain OS threads, so these channels park on condition
//! variables rather than yielding to an async runtime. The only shape the
//! engine needs is a multi-producer multi-consumer FIFO queue: every worker
//! assigned to a queue partition pops from the same [`mpmc::MpmcQueue`], and
//! sources, workers, and the orchestrator all push into it.

pub mod error;
pub mod mpmc;
