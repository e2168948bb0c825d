// Copyright The weir authors
// SPDX-License-Identifier: Apache-2.0

//! A passthrough stage with scriptable failures.

use crate::error::Error;
use crate::stage::{ExecutionContext, PipelineStage, StageContext};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};
use weir_buffer::TupleBuffer;

#[derive(Default)]
struct StageState {
    started: bool,
    stopped: bool,
    invocations: usize,
    fail_on_start: bool,
    fail_on_stop: bool,
    fail_on_invocation: Option<usize>,
}

struct StageShared {
    state: Mutex<StageState>,
    changed: Condvar,
}

impl StageShared {
    fn wait_for(&self, timeout: Duration, predicate: impl Fn(&StageState) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while !predicate(&state) {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                return predicate(&state);
            }
        }
        true
    }
}

/// Test-side handle to a [`ControllableStage`].
#[derive(Clone)]
pub struct StageControl {
    shared: Arc<StageShared>,
}

impl StageControl {
    /// Makes `start` fail.
    pub fn fail_on_start(&self) {
        self.shared.state.lock().fail_on_start = true;
    }

    /// Makes `stop` fail.
    pub fn fail_on_stop(&self) {
        self.shared.state.lock().fail_on_stop = true;
    }

    /// Makes the `nth` `execute` invocation (1-based) fail.
    pub fn fail_on_invocation(&self, nth: usize) {
        self.shared.state.lock().fail_on_invocation = Some(nth);
    }

    /// Waits until `start` ran.
    #[must_use]
    pub fn wait_for_start(&self, timeout: Duration) -> bool {
        self.shared.wait_for(timeout, |state| state.started)
    }

    /// Waits until `stop` ran.
    #[must_use]
    pub fn wait_for_stop(&self, timeout: Duration) -> bool {
        self.shared.wait_for(timeout, |state| state.stopped)
    }

    /// Number of `execute` invocations so far.
    #[must_use]
    pub fn invocations(&self) -> usize {
        self.shared.state.lock().invocations
    }

    /// Whether `stop` ran.
    #[must_use]
    pub fn was_stopped(&self) -> bool {
        self.shared.state.lock().stopped
    }
}

/// A stage that forwards every input buffer unchanged and can be instructed
/// to fail at each lifecycle point.
pub struct ControllableStage {
    shared: Arc<StageShared>,
}

impl ControllableStage {
    /// Creates the stage and its control.
    #[must_use]
    pub fn new() -> (Self, StageControl) {
        let shared = Arc::new(StageShared {
            state: Mutex::new(StageState::default()),
            changed: Condvar::new(),
        });
        (
            ControllableStage {
                shared: shared.clone(),
            },
            StageControl { shared },
        )
    }
}

impl PipelineStage for ControllableStage {
    fn start(&self, ctx: &StageContext<'_>) -> Result<(), Error> {
        let mut state = self.shared.state.lock();
        if state.fail_on_start {
            return Err(Error::PipelineStartFailed {
                query: ctx.query(),
                pipeline: ctx.pipeline(),
                reason: "injected start failure".to_owned(),
            });
        }
        state.started = true;
        drop(state);
        _ = self.shared.changed.notify_all();
        Ok(())
    }

    fn execute(&self, input: &TupleBuffer, ctx: &mut ExecutionContext<'_>) -> Result<(), Error> {
        let mut state = self.shared.state.lock();
        state.invocations += 1;
        let failing = state.fail_on_invocation == Some(state.invocations);
        drop(state);
        _ = self.shared.changed.notify_all();
        if failing {
            return Err(Error::PipelineExecuteFailed {
                query: ctx.query(),
                pipeline: ctx.pipeline(),
                reason: "injected execute failure".to_owned(),
            });
        }
        ctx.emit(input.clone());
        Ok(())
    }

    fn stop(&self, ctx: &StageContext<'_>) -> Result<(), Error> {
        let mut state = self.shared.state.lock();
        if state.fail_on_stop {
            return Err(Error::PipelineStopFailed {
                query: ctx.query(),
                pipeline: ctx.pipeline(),
                reason: "injected stop failure".to_owned(),
            });
        }
        state.stopped = true;
        drop(state);
        _ = self.shared.changed.notify_all();
        Ok(())
    }
}
