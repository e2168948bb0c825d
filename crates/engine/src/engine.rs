// Copyright The weir authors
// SPDX-License-Identifier: Apache-2.0

//! The query engine: registration, lifecycle orchestration, and termination.
//!
//! Lifecycle is driven in-band: `start` and `stop` enqueue reconfiguration
//! tasks on the query's queue partition, so FIFO order against data tasks is
//! the only synchronization the data path needs. The engine itself only
//! performs registry bookkeeping, source management, and event emission.
//!
//! Termination rules:
//! - A query reaches a terminal status (`Stopped`, `Failed`) exactly once;
//!   later triggers are ignored.
//! - Graceful paths (end-of-stream on every source, or an external stop)
//!   emit `Stopped` when the last pipeline's stop completes.
//! - Failure paths emit `Failed` immediately after sources are closed and
//!   best-effort teardown is enqueued. Transitive successors of the failing
//!   component are not stopped; their pending tasks expire.

use crate::error::Error;
use crate::event::{EngineEvent, EventListener, NoopEventListener, QueryStatus, TerminationKind};
use crate::pipeline::{PipelineKind, PipelineState, RuntimePipeline, StageKind};
use crate::plan::ExecutableQueryPlan;
use crate::source::{SourceListener, SourceRuntime, SourceState};
use crate::stage::StageContext;
use crate::task::{ReconfigurationMessage, ReconfigureAction, StopMode, Task, TaskKind};
use crate::worker;
use parking_lot::{Condvar, Mutex, RwLock};
use smallvec::SmallVec;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use weir_buffer::BufferPool;
use weir_channel::mpmc::MpmcQueue;
use weir_config::engine::{EngineConfig, QueryQueuePolicy};
use weir_config::{PipelineId, QueryId, SourceId, TaskId};

/// One queue partition and the number of workers pinned to it; the worker
/// count doubles as the reconfiguration barrier width.
pub(crate) struct QueuePartition {
    pub(crate) queue: MpmcQueue<Task>,
    pub(crate) workers: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Registered,
    Starting,
    Running,
    Stopping,
    Terminal,
}

struct StatusCell {
    phase: Phase,
    observed: u8,
}

/// Per-query runtime bookkeeping.
pub(crate) struct QueryRuntime {
    pub(crate) id: QueryId,
    pub(crate) queue_id: usize,
    status: Mutex<StatusCell>,
    status_changed: Condvar,
    /// Shared with every pipeline of the query; dequeued data tasks expire
    /// once set.
    terminal_flag: Arc<AtomicBool>,
    pending_starts: AtomicUsize,
    active_pipelines: AtomicUsize,
    start_failed: AtomicBool,
    failure_reason: Mutex<Option<String>>,
    resources: Mutex<QueryResources>,
}

#[derive(Default)]
struct QueryResources {
    /// Topological order, source side first.
    pipelines: Vec<Arc<RuntimePipeline>>,
    sources: Vec<Arc<SourceRuntime>>,
}

impl QueryRuntime {
    fn record_failure(&self, reason: String) {
        let mut slot = self.failure_reason.lock();
        if slot.is_none() {
            *slot = Some(reason);
        }
    }

    fn failure(&self) -> Option<String> {
        self.failure_reason.lock().clone()
    }
}

/// Which component a failure originated from; its transitive successors are
/// left to expire rather than stopped.
pub(crate) enum FailureOrigin {
    External,
    Source(SourceId),
    Pipeline(Arc<RuntimePipeline>),
}

/// Shared engine state; workers, sources, and the public handle all point
/// here.
pub(crate) struct EngineCore {
    pub(crate) pool: BufferPool,
    pub(crate) listener: Arc<dyn EventListener>,
    pub(crate) queues: Vec<QueuePartition>,
    self_weak: Weak<EngineCore>,
    queries: RwLock<HashMap<QueryId, Arc<QueryRuntime>>>,
    next_task: AtomicU64,
    next_queue: AtomicUsize,
    policy: QueryQueuePolicy,
    shutting_down: AtomicBool,
}

impl EngineCore {
    pub(crate) fn emit(&self, event: EngineEvent) {
        self.listener.on_event(event);
    }

    pub(crate) fn next_task_id(&self) -> TaskId {
        let raw = self.next_task.fetch_add(1, Ordering::Relaxed);
        TaskId::new(raw).unwrap_or(TaskId::INITIAL)
    }

    fn query(&self, id: QueryId) -> Result<Arc<QueryRuntime>, Error> {
        self.query_opt(id).ok_or(Error::UnknownQuery { query: id })
    }

    pub(crate) fn query_opt(&self, id: QueryId) -> Option<Arc<QueryRuntime>> {
        self.queries.read().get(&id).cloned()
    }

    fn assign_queue(&self, id: QueryId) -> usize {
        let explicit = match &self.policy {
            QueryQueuePolicy::Explicit(map) => map.get(&id).copied(),
            QueryQueuePolicy::RoundRobin => None,
        };
        explicit.unwrap_or_else(|| {
            self.next_queue.fetch_add(1, Ordering::Relaxed) % self.queues.len()
        })
    }

    /// Pushes a batch of tasks onto a queue; buffers of refused tasks (the
    /// queue closes only during shutdown) are simply dropped.
    pub(crate) fn enqueue_tasks(&self, queue_id: usize, tasks: Vec<Task>) {
        _ = self.queues[queue_id].queue.push_all(tasks);
    }

    /// Enqueues one reconfiguration: one task copy per worker on the query's
    /// queue, so the rendezvous inside the message can span all of them.
    fn enqueue_reconfiguration(
        &self,
        query: &QueryRuntime,
        action: ReconfigureAction,
    ) -> Arc<ReconfigurationMessage> {
        let workers = self.queues[query.queue_id].workers;
        let message = ReconfigurationMessage::new(query.id, action, workers);
        let tasks: Vec<Task> = (0..workers)
            .map(|_| Task {
                id: self.next_task_id(),
                kind: TaskKind::Reconfigure(message.clone()),
            })
            .collect();
        self.enqueue_tasks(query.queue_id, tasks);
        message
    }

    fn publish_status(&self, query: &QueryRuntime, status: QueryStatus, reason: Option<String>) {
        let mut cell = query.status.lock();
        cell.observed |= status.bit();
        if status.is_terminal() {
            cell.phase = Phase::Terminal;
        }
        self.emit(EngineEvent::QueryStatus {
            query: query.id,
            status,
            reason,
        });
        drop(cell);
        _ = query.status_changed.notify_all();
    }

    /// Claims the single terminal transition; `false` if already claimed.
    fn claim_terminal(&self, query: &QueryRuntime) -> bool {
        let mut cell = query.status.lock();
        if cell.phase == Phase::Terminal {
            return false;
        }
        cell.phase = Phase::Terminal;
        true
    }

    fn take_resources(
        &self,
        query: &QueryRuntime,
    ) -> (Vec<Arc<RuntimePipeline>>, Vec<Arc<SourceRuntime>>) {
        let mut resources = query.resources.lock();
        let taken = std::mem::take(&mut *resources);
        (taken.pipelines, taken.sources)
    }

    fn close_source_hard(&self, query: &QueryRuntime, source: &SourceRuntime) {
        if source.claim_termination() {
            source.close();
            self.emit(EngineEvent::SourceTermination {
                query: query.id,
                source: source.id,
                kind: TerminationKind::Hard,
            });
        } else {
            source.close();
        }
    }

    // --- registration -----------------------------------------------------

    fn register(&self, plan: ExecutableQueryPlan) -> Result<(), Error> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(Error::EngineShutDown);
        }
        plan.validate()?;
        let query_id = plan.query_id;
        if self.queries.read().contains_key(&query_id) {
            return Err(Error::QueryAlreadyRegistered { query: query_id });
        }

        let queue_id = self.assign_queue(query_id);
        let terminal_flag = Arc::new(AtomicBool::new(false));

        // Upstream edge counts drive the drain-stop fan-in logic.
        let mut upstreams: HashMap<PipelineId, usize> = HashMap::new();
        for source in &plan.sources {
            for succ in &source.successors {
                *upstreams.entry(*succ).or_insert(0) += 1;
            }
        }
        for pipeline in &plan.pipelines {
            for succ in &pipeline.successors {
                *upstreams.entry(*succ).or_insert(0) += 1;
            }
        }

        let order = plan.topological_ids();
        let ExecutableQueryPlan {
            sources, pipelines, sinks, ..
        } = plan;

        struct NodeParts {
            stage: StageKind,
            kind: PipelineKind,
            successors: Vec<PipelineId>,
        }
        let mut parts: HashMap<PipelineId, NodeParts> = HashMap::new();
        for decl in pipelines {
            _ = parts.insert(
                decl.id,
                NodeParts {
                    stage: StageKind::Operator(decl.stage),
                    kind: PipelineKind::Operator,
                    successors: decl.successors,
                },
            );
        }
        for decl in sinks {
            _ = parts.insert(
                decl.id,
                NodeParts {
                    stage: StageKind::Sink(decl.sink),
                    kind: PipelineKind::Sink,
                    successors: Vec::new(),
                },
            );
        }

        // Build sink-side first so successor nodes exist when referenced.
        let mut nodes: HashMap<PipelineId, Arc<RuntimePipeline>> = HashMap::new();
        for id in order.iter().rev() {
            let NodeParts {
                stage,
                kind,
                successors,
            } = parts.remove(id).expect("topological order covers all nodes");
            let successor_nodes: SmallVec<[Arc<RuntimePipeline>; 2]> = successors
                .iter()
                .map(|succ| nodes[succ].clone())
                .collect();
            let node = RuntimePipeline::new(
                query_id,
                *id,
                kind,
                stage,
                successor_nodes,
                upstreams.get(id).copied().unwrap_or(0),
                terminal_flag.clone(),
            );
            _ = nodes.insert(*id, node);
        }
        let ordered_pipelines: Vec<Arc<RuntimePipeline>> =
            order.iter().map(|id| nodes[id].clone()).collect();
        let source_runtimes: Vec<Arc<SourceRuntime>> = sources
            .into_iter()
            .map(|decl| {
                let successors = decl
                    .successors
                    .iter()
                    .map(|succ| nodes[succ].clone())
                    .collect();
                Arc::new(SourceRuntime::new(decl.id, decl.source, successors))
            })
            .collect();

        let runtime = Arc::new(QueryRuntime {
            id: query_id,
            queue_id,
            status: Mutex::new(StatusCell {
                phase: Phase::Registered,
                observed: 0,
            }),
            status_changed: Condvar::new(),
            terminal_flag,
            pending_starts: AtomicUsize::new(ordered_pipelines.len()),
            active_pipelines: AtomicUsize::new(ordered_pipelines.len()),
            start_failed: AtomicBool::new(false),
            failure_reason: Mutex::new(None),
            resources: Mutex::new(QueryResources {
                pipelines: ordered_pipelines,
                sources: source_runtimes,
            }),
        });

        {
            let mut queries = self.queries.write();
            if queries.contains_key(&query_id) {
                return Err(Error::QueryAlreadyRegistered { query: query_id });
            }
            _ = queries.insert(query_id, runtime.clone());
        }
        tracing::debug!(query = %query_id, queue = queue_id, "query registered");
        self.publish_status(&runtime, QueryStatus::Started, None);
        Ok(())
    }

    // --- start ------------------------------------------------------------

    fn start(&self, id: QueryId) -> Result<(), Error> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(Error::EngineShutDown);
        }
        let query = self.query(id)?;
        {
            let mut cell = query.status.lock();
            if cell.phase != Phase::Registered {
                return Ok(());
            }
            cell.phase = Phase::Starting;
        }
        self.emit(EngineEvent::QueryStart { query: id });
        let pipelines = query.resources.lock().pipelines.clone();
        // Leaves (sinks) first: a pipeline only starts once its successors
        // are ready to receive.
        for pipeline in pipelines.iter().rev() {
            _ = self.enqueue_reconfiguration(
                &query,
                ReconfigureAction::StartPipeline(pipeline.clone()),
            );
        }
        Ok(())
    }

    fn apply_start(&self, query_id: QueryId, pipeline: &Arc<RuntimePipeline>) {
        let Some(query) = self.query_opt(query_id) else {
            return;
        };
        let aborted = query.start_failed.load(Ordering::Acquire)
            || query.status.lock().phase == Phase::Terminal;
        if !aborted && pipeline.state() == PipelineState::Created {
            let ctx = StageContext::new(query_id, pipeline.id, &self.pool);
            let result = match &pipeline.stage {
                StageKind::Operator(stage) => stage.start(&ctx),
                StageKind::Sink(sink) => sink.start(),
            };
            match result {
                Ok(()) => {
                    pipeline.set_state(PipelineState::Running);
                    self.emit(EngineEvent::PipelineStart {
                        query: query_id,
                        pipeline: pipeline.id,
                    });
                }
                Err(error) => {
                    pipeline.set_state(PipelineState::Failed);
                    query.start_failed.store(true, Ordering::Release);
                    let rendered = Error::PipelineStartFailed {
                        query: query_id,
                        pipeline: pipeline.id,
                        reason: error.to_string(),
                    }
                    .to_string();
                    tracing::warn!(query = %query_id, pipeline = %pipeline.id, %error, "pipeline start failed");
                    query.record_failure(rendered);
                }
            }
        }
        if query.pending_starts.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.finalize_start(&query);
        }
    }

    /// Runs on the worker that completed the last pipeline start: either
    /// aborts a failed start, or transitions to running and opens sources.
    fn finalize_start(&self, query: &Arc<QueryRuntime>) {
        if query.start_failed.load(Ordering::Acquire) {
            if !self.claim_terminal(query) {
                return;
            }
            let (pipelines, sources) = self.take_resources(query);
            query.terminal_flag.store(true, Ordering::Release);
            // Sources were never opened; pipelines that did start are
            // stopped best-effort.
            for pipeline in &pipelines {
                if pipeline.is_running() {
                    _ = self.enqueue_reconfiguration(
                        query,
                        ReconfigureAction::StopPipeline {
                            pipeline: pipeline.clone(),
                            mode: StopMode::Force,
                        },
                    );
                }
            }
            drop(sources);
            self.publish_status(query, QueryStatus::Failed, query.failure());
            return;
        }

        {
            let mut cell = query.status.lock();
            if cell.phase != Phase::Starting {
                // A stop or failure raced the start; leave teardown to it.
                return;
            }
            cell.phase = Phase::Running;
            cell.observed |= QueryStatus::Running.bit();
            self.emit(EngineEvent::QueryStatus {
                query: query.id,
                status: QueryStatus::Running,
                reason: None,
            });
            drop(cell);
            _ = query.status_changed.notify_all();
        }

        // Sources open last, once every pipeline is ready to execute.
        let sources = query.resources.lock().sources.clone();
        for source in sources {
            let listener = SourceListener::new(self.self_weak.clone(), query.id, source.id);
            if let Err(error) = source.open(listener) {
                tracing::warn!(query = %query.id, source = %source.id, %error, "source open failed");
                if source.claim_termination() {
                    source.set_state(SourceState::Closed);
                    self.emit(EngineEvent::SourceTermination {
                        query: query.id,
                        source: source.id,
                        kind: TerminationKind::Failure,
                    });
                }
                self.fail_query(query, FailureOrigin::Source(source.id), error.to_string());
                return;
            }
        }
    }

    // --- stop -------------------------------------------------------------

    fn stop(&self, id: QueryId) -> Result<(), Error> {
        let query = self.query(id)?;
        {
            let mut cell = query.status.lock();
            if matches!(cell.phase, Phase::Terminal | Phase::Stopping) {
                return Ok(());
            }
            cell.phase = Phase::Stopping;
        }
        self.emit(EngineEvent::QueryStop { query: id });
        let (pipelines, sources) = {
            let resources = query.resources.lock();
            (resources.pipelines.clone(), resources.sources.clone())
        };
        // Sources first so no further data enters the queue, then one stop
        // per pipeline, sink side first.
        for source in &sources {
            self.close_source_hard(&query, source);
        }
        for pipeline in pipelines.iter().rev() {
            _ = self.enqueue_reconfiguration(
                &query,
                ReconfigureAction::StopPipeline {
                    pipeline: pipeline.clone(),
                    mode: StopMode::Force,
                },
            );
        }
        Ok(())
    }

    pub(crate) fn apply_reconfiguration(&self, message: &ReconfigurationMessage) {
        match &message.action {
            ReconfigureAction::StartPipeline(pipeline) => {
                self.apply_start(message.query, pipeline);
            }
            ReconfigureAction::StopPipeline { pipeline, mode } => {
                self.apply_stop(message.query, pipeline, *mode);
            }
        }
    }

    fn apply_stop(&self, query_id: QueryId, pipeline: &Arc<RuntimePipeline>, mode: StopMode) {
        let Some(query) = self.query_opt(query_id) else {
            return;
        };
        if mode == StopMode::Drain && !pipeline.upstream_terminated() {
            // Other upstream chains are still alive; keep running.
            return;
        }
        match pipeline.state() {
            PipelineState::Running => {
                let ctx = StageContext::new(query_id, pipeline.id, &self.pool);
                let result = match &pipeline.stage {
                    StageKind::Operator(stage) => stage.stop(&ctx),
                    StageKind::Sink(sink) => sink.stop(),
                };
                pipeline.set_state(PipelineState::Stopped);
                self.emit(EngineEvent::PipelineStop {
                    query: query_id,
                    pipeline: pipeline.id,
                });
                if let Err(error) = result {
                    tracing::warn!(query = %query_id, pipeline = %pipeline.id, %error, "pipeline stop failed");
                    let rendered = Error::PipelineStopFailed {
                        query: query_id,
                        pipeline: pipeline.id,
                        reason: error.to_string(),
                    }
                    .to_string();
                    // The stop path errored: terminate as failed and leave
                    // this pipeline's successors to expire.
                    self.fail_query(&query, FailureOrigin::Pipeline(pipeline.clone()), rendered);
                    return;
                }
            }
            PipelineState::Created => {
                // Never started; nothing to run, but it still counts towards
                // the query's teardown.
                pipeline.set_state(PipelineState::Stopped);
            }
            PipelineState::Stopped | PipelineState::Failed => return,
        }
        if mode == StopMode::Drain {
            for successor in &pipeline.successors {
                _ = self.enqueue_reconfiguration(
                    &query,
                    ReconfigureAction::StopPipeline {
                        pipeline: successor.clone(),
                        mode: StopMode::Drain,
                    },
                );
            }
        }
        if query.active_pipelines.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.finalize_termination(&query);
        }
    }

    /// The last pipeline stopped: the graceful terminal transition.
    fn finalize_termination(&self, query: &Arc<QueryRuntime>) {
        if !self.claim_terminal(query) {
            return;
        }
        let (pipelines, sources) = self.take_resources(query);
        for source in &sources {
            // Graceful sources already emitted their termination; this joins
            // their threads. Close is idempotent.
            source.close();
        }
        query.terminal_flag.store(true, Ordering::Release);
        tracing::debug!(query = %query.id, "query terminated");
        self.publish_status(query, QueryStatus::Stopped, None);
        drop(pipelines);
        drop(sources);
    }

    // --- failure ----------------------------------------------------------

    pub(crate) fn fail_query(
        &self,
        query: &Arc<QueryRuntime>,
        origin: FailureOrigin,
        reason: String,
    ) {
        if !self.claim_terminal(query) {
            return;
        }
        query.record_failure(reason);
        query.terminal_flag.store(true, Ordering::Release);
        let (pipelines, sources) = self.take_resources(query);

        for source in &sources {
            match &origin {
                FailureOrigin::Source(id) if *id == source.id => {
                    // Failed sources close themselves after `on_error`; do
                    // not call close from what may be their own thread.
                    source.set_state(SourceState::Closed);
                }
                _ => self.close_source_hard(query, source),
            }
        }

        // Transitive successors of the failing component are left to expire.
        let skip = match &origin {
            FailureOrigin::External => HashSet::new(),
            FailureOrigin::Source(id) => {
                let roots = sources
                    .iter()
                    .find(|source| source.id == *id)
                    .map(|source| source.successors.clone())
                    .unwrap_or_default();
                descendants(&roots)
            }
            FailureOrigin::Pipeline(pipeline) => {
                let mut skip = descendants(&pipeline.successors.to_vec());
                _ = skip.insert(pipeline.id);
                skip
            }
        };
        for pipeline in &pipelines {
            if !skip.contains(&pipeline.id) && pipeline.is_running() {
                _ = self.enqueue_reconfiguration(
                    query,
                    ReconfigureAction::StopPipeline {
                        pipeline: pipeline.clone(),
                        mode: StopMode::Force,
                    },
                );
            }
        }
        self.publish_status(query, QueryStatus::Failed, query.failure());
        drop(pipelines);
        drop(sources);
    }

    // --- source listener surface -----------------------------------------

    pub(crate) fn source_opened(&self, query_id: QueryId, source_id: SourceId) {
        if let Some(source) = self.find_source(query_id, source_id) {
            source.set_state(SourceState::Open);
        }
    }

    pub(crate) fn source_data(
        &self,
        query_id: QueryId,
        source_id: SourceId,
        buffer: weir_buffer::TupleBuffer,
    ) {
        let Some(query) = self.query_opt(query_id) else {
            return;
        };
        if query.terminal_flag.load(Ordering::Acquire) {
            return;
        }
        let Some(source) = self.find_source(query_id, source_id) else {
            return;
        };
        let tasks: Vec<Task> = source
            .successors
            .iter()
            .map(|pipeline| Task {
                id: self.next_task_id(),
                kind: TaskKind::Data {
                    pipeline: pipeline.clone(),
                    buffer: buffer.clone(),
                },
            })
            .collect();
        self.enqueue_tasks(query.queue_id, tasks);
    }

    pub(crate) fn source_end_of_stream(&self, query_id: QueryId, source_id: SourceId) {
        let Some(query) = self.query_opt(query_id) else {
            return;
        };
        let Some(source) = self.find_source(query_id, source_id) else {
            return;
        };
        if !source.claim_termination() {
            return;
        }
        source.set_state(SourceState::Closed);
        self.emit(EngineEvent::SourceTermination {
            query: query_id,
            source: source_id,
            kind: TerminationKind::Graceful,
        });
        // One upstream edge of each successor just drained; the drain-stop
        // rides the queue behind this source's last data task.
        for successor in &source.successors {
            _ = self.enqueue_reconfiguration(
                &query,
                ReconfigureAction::StopPipeline {
                    pipeline: successor.clone(),
                    mode: StopMode::Drain,
                },
            );
        }
    }

    pub(crate) fn source_error(&self, query_id: QueryId, source_id: SourceId, reason: String) {
        let Some(query) = self.query_opt(query_id) else {
            return;
        };
        let Some(source) = self.find_source(query_id, source_id) else {
            return;
        };
        // A source the engine already terminated (external stop, prior EoS)
        // cannot fail the query anymore; its late error is dropped.
        if !source.claim_termination() {
            return;
        }
        source.set_state(SourceState::Closed);
        self.emit(EngineEvent::SourceTermination {
            query: query_id,
            source: source_id,
            kind: TerminationKind::Failure,
        });
        let rendered = Error::SourceFailed {
            query: query_id,
            source_id,
            reason,
        }
        .to_string();
        self.fail_query(&query, FailureOrigin::Source(source_id), rendered);
    }

    fn find_source(&self, query_id: QueryId, source_id: SourceId) -> Option<Arc<SourceRuntime>> {
        let query = self.query_opt(query_id)?;
        let resources = query.resources.lock();
        resources
            .sources
            .iter()
            .find(|source| source.id == source_id)
            .cloned()
    }

    // --- waiting ----------------------------------------------------------

    fn wait_for_status(&self, id: QueryId, status: QueryStatus, timeout: Duration) -> bool {
        let Some(query) = self.query_opt(id) else {
            return false;
        };
        self.wait_for_bits(&query, status.bit(), timeout)
    }

    fn wait_for_termination(&self, id: QueryId, timeout: Duration) -> bool {
        let Some(query) = self.query_opt(id) else {
            return false;
        };
        let bits = QueryStatus::Stopped.bit() | QueryStatus::Failed.bit();
        self.wait_for_bits(&query, bits, timeout)
    }

    fn wait_for_bits(&self, query: &QueryRuntime, bits: u8, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut cell = query.status.lock();
        while cell.observed & bits == 0 {
            if query
                .status_changed
                .wait_until(&mut cell, deadline)
                .timed_out()
            {
                return cell.observed & bits != 0;
            }
        }
        true
    }

    // --- shutdown ---------------------------------------------------------

    fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
        for partition in &self.queues {
            let poisons: Vec<Task> = (0..partition.workers)
                .map(|_| Task {
                    id: self.next_task_id(),
                    kind: TaskKind::Poison,
                })
                .collect();
            _ = partition.queue.push_all(poisons);
        }
    }
}

/// Collects the ids of `roots` and everything reachable from them.
fn descendants(roots: &[Arc<RuntimePipeline>]) -> HashSet<PipelineId> {
    let mut seen = HashSet::new();
    let mut frontier: VecDeque<Arc<RuntimePipeline>> = roots.iter().cloned().collect();
    while let Some(node) = frontier.pop_front() {
        if seen.insert(node.id) {
            for successor in &node.successors {
                frontier.push_back(successor.clone());
            }
        }
    }
    seen
}

/// The per-node query engine.
///
/// Owns the worker pool and the buffer pool. Queries are registered,
/// started, and stopped through this handle; progress is observable through
/// the [`EventListener`] passed at construction and through
/// [`QueryEngine::wait_for_status`].
pub struct QueryEngine {
    core: Arc<EngineCore>,
    workers: Vec<JoinHandle<()>>,
}

impl QueryEngine {
    /// Creates an engine that discards events.
    pub fn new(config: EngineConfig) -> Result<Self, Error> {
        Self::with_listener(config, Arc::new(NoopEventListener))
    }

    /// Creates an engine with the given event listener, spawning its worker
    /// threads.
    pub fn with_listener(
        config: EngineConfig,
        listener: Arc<dyn EventListener>,
    ) -> Result<Self, Error> {
        let topology = config.validate()?;
        let pool = BufferPool::new(config.buffer_pool_capacity, config.buffer_size);
        let queues: Vec<QueuePartition> = topology
            .workers_per_queue
            .iter()
            .map(|&workers| QueuePartition {
                queue: MpmcQueue::new(),
                workers,
            })
            .collect();
        let core = Arc::new_cyclic(|self_weak| EngineCore {
            pool,
            listener,
            queues,
            self_weak: self_weak.clone(),
            queries: RwLock::new(HashMap::new()),
            next_task: AtomicU64::new(1),
            next_queue: AtomicUsize::new(0),
            policy: config.query_to_queue_policy.clone(),
            shutting_down: AtomicBool::new(false),
        });
        let mut workers = Vec::with_capacity(topology.worker_to_queue.len());
        for (worker_id, &queue_id) in topology.worker_to_queue.iter().enumerate() {
            workers.push(worker::spawn(core.clone(), worker_id, queue_id)?);
        }
        Ok(QueryEngine { core, workers })
    }

    /// A handle to the node-wide buffer pool.
    #[must_use]
    pub fn buffer_pool(&self) -> BufferPool {
        self.core.pool.clone()
    }

    /// Validates and registers a plan; emits `QueryStatus::Started`.
    pub fn register(&self, plan: ExecutableQueryPlan) -> Result<(), Error> {
        self.core.register(plan)
    }

    /// Starts a registered query: starts its pipelines leaves-first via
    /// reconfiguration tasks, then opens its sources. Asynchronous; emits
    /// `QueryStatus::Running` once all pipelines started.
    pub fn start(&self, query: QueryId) -> Result<(), Error> {
        self.core.start(query)
    }

    /// Stops a query gracefully. Asynchronous and idempotent; emits
    /// `QueryStatus::Stopped` once every pipeline stop completed.
    pub fn stop(&self, query: QueryId) -> Result<(), Error> {
        self.core.stop(query)
    }

    /// Fails a query. Asynchronous and idempotent; emits
    /// `QueryStatus::Failed` with the reason.
    pub fn fail(&self, query: QueryId, reason: impl Into<String>) -> Result<(), Error> {
        let query_rt = self.core.query(query)?;
        self.core
            .fail_query(&query_rt, FailureOrigin::External, reason.into());
        Ok(())
    }

    /// Blocks until `status` was observed for `query`, or the timeout
    /// elapses. `false` on timeout or unknown query.
    #[must_use]
    pub fn wait_for_status(&self, query: QueryId, status: QueryStatus, timeout: Duration) -> bool {
        self.core.wait_for_status(query, status, timeout)
    }

    /// Blocks until the query reached either terminal status.
    #[must_use]
    pub fn wait_for_termination(&self, query: QueryId, timeout: Duration) -> bool {
        self.core.wait_for_termination(query, timeout)
    }

    /// Shuts the engine down: poisons every queue, joins all workers, and
    /// drops pending tasks as expired. Queries that were still running do
    /// not receive a terminal status event.
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        self.core.begin_shutdown();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::error!("worker thread panicked during shutdown");
            }
        }
        for partition in &self.core.queues {
            partition.queue.close();
        }
    }
}

impl Drop for QueryEngine {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}
