// Copyright The weir authors
// SPDX-License-Identifier: Apache-2.0

//! An event listener that records everything for assertions.

use crate::event::{EngineEvent, EventListener, QueryStatus, TerminationKind};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};
use weir_config::{QueryId, SourceId};

struct ListenerState {
    events: Mutex<Vec<EngineEvent>>,
    changed: Condvar,
}

/// Captures every engine event; cheap to clone.
#[derive(Clone)]
pub struct RecordingListener {
    state: Arc<ListenerState>,
}

impl Default for RecordingListener {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingListener {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        RecordingListener {
            state: Arc::new(ListenerState {
                events: Mutex::new(Vec::new()),
                changed: Condvar::new(),
            }),
        }
    }

    /// A snapshot of every event recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<EngineEvent> {
        self.state.events.lock().clone()
    }

    /// The status events of `query`, in emission order.
    #[must_use]
    pub fn statuses(&self, query: QueryId) -> Vec<QueryStatus> {
        self.state
            .events
            .lock()
            .iter()
            .filter_map(|event| match event {
                EngineEvent::QueryStatus {
                    query: event_query,
                    status,
                    ..
                } if *event_query == query => Some(*status),
                _ => None,
            })
            .collect()
    }

    /// How `source` of `query` terminated, if it did.
    #[must_use]
    pub fn termination_kind(&self, query: QueryId, source: SourceId) -> Option<TerminationKind> {
        self.state.events.lock().iter().find_map(|event| match event {
            EngineEvent::SourceTermination {
                query: event_query,
                source: event_source,
                kind,
            } if *event_query == query && *event_source == source => Some(*kind),
            _ => None,
        })
    }

    /// Number of recorded events matching `predicate`.
    #[must_use]
    pub fn count(&self, predicate: impl Fn(&EngineEvent) -> bool) -> usize {
        self.state
            .events
            .lock()
            .iter()
            .filter(|event| predicate(event))
            .count()
    }

    /// Waits until `predicate` holds over the recorded events.
    #[must_use]
    pub fn wait_until(
        &self,
        timeout: Duration,
        predicate: impl Fn(&[EngineEvent]) -> bool,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        let mut events = self.state.events.lock();
        while !predicate(&events) {
            if self
                .state
                .changed
                .wait_until(&mut events, deadline)
                .timed_out()
            {
                return predicate(&events);
            }
        }
        true
    }
}

impl EventListener for RecordingListener {
    fn on_event(&self, event: EngineEvent) {
        let mut events = self.state.events.lock();
        events.push(event);
        drop(events);
        _ = self.state.changed.notify_all();
    }
}
