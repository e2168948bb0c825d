// Copyright The weir authors
// SPDX-License-Identifier: Apache-2.0

//! Worker threads.
//!
//! Each worker is pinned to one queue partition and loops: dequeue a task,
//! dispatch on its kind. Data tasks run the pipeline stage and fan emitted
//! buffers out to successors on the same queue. Reconfiguration tasks join
//! the message's rendezvous; the last worker to arrive executes the embedded
//! lifecycle action. Poison switches the worker into drain mode: pending
//! reconfigurations still execute (in-flight stops must land), data tasks
//! expire, and the queue is closed so every sibling worker wakes up and
//! exits.

use crate::engine::{EngineCore, FailureOrigin};
use crate::event::EngineEvent;
use crate::pipeline::{PipelineState, RuntimePipeline, StageKind};
use crate::stage::ExecutionContext;
use crate::task::{Task, TaskKind};
use std::sync::Arc;
use std::thread::JoinHandle;
use weir_buffer::TupleBuffer;
use weir_channel::error::RecvError;
use weir_config::TaskId;

pub(crate) struct WorkerContext {
    pub(crate) worker_id: usize,
    pub(crate) queue_id: usize,
}

pub(crate) fn spawn(
    core: Arc<EngineCore>,
    worker_id: usize,
    queue_id: usize,
) -> Result<JoinHandle<()>, crate::error::Error> {
    std::thread::Builder::new()
        .name(format!("weir-worker-{worker_id}"))
        .spawn(move || {
            run(
                &core,
                &WorkerContext {
                    worker_id,
                    queue_id,
                },
            );
        })
        .map_err(|error| crate::error::Error::WorkerSpawnFailed {
            worker: worker_id,
            reason: error.to_string(),
        })
}

fn run(core: &Arc<EngineCore>, ctx: &WorkerContext) {
    tracing::debug!(worker = ctx.worker_id, queue = ctx.queue_id, "worker started");
    let queue = &core.queues[ctx.queue_id].queue;
    loop {
        match queue.pop() {
            Ok(task) => match task.kind {
                TaskKind::Data { pipeline, buffer } => {
                    execute_data(core, ctx, task.id, &pipeline, buffer);
                }
                TaskKind::Reconfigure(message) => {
                    if message.arrive() {
                        if message.try_claim() {
                            core.apply_reconfiguration(&message);
                        }
                        message.release();
                    }
                }
                TaskKind::Poison => {
                    drain(core, ctx);
                    break;
                }
            },
            Err(_) => break,
        }
    }
    tracing::debug!(worker = ctx.worker_id, queue = ctx.queue_id, "worker exited");
}

/// Runs one data task through its pipeline.
fn execute_data(
    core: &Arc<EngineCore>,
    ctx: &WorkerContext,
    task: TaskId,
    pipeline: &Arc<RuntimePipeline>,
    buffer: TupleBuffer,
) {
    let query = pipeline.query;
    if pipeline.query_terminal() || !pipeline.is_running() {
        core.emit(EngineEvent::TaskExpired {
            query,
            pipeline: pipeline.id,
            task,
        });
        return;
    }
    core.emit(EngineEvent::TaskExecutionStart {
        query,
        pipeline: pipeline.id,
        task,
    });
    let result = match &pipeline.stage {
        StageKind::Operator(stage) => {
            let mut exec_ctx = ExecutionContext::new(
                query,
                pipeline.id,
                task,
                ctx.worker_id,
                ctx.queue_id,
                &core.pool,
            );
            let result = stage.execute(&buffer, &mut exec_ctx);
            if result.is_ok() {
                for emitted in exec_ctx.take_emitted() {
                    core.emit(EngineEvent::TaskEmit {
                        query,
                        pipeline: pipeline.id,
                        count: pipeline.successors.len(),
                    });
                    let tasks: Vec<Task> = pipeline
                        .successors
                        .iter()
                        .map(|successor| Task {
                            id: core.next_task_id(),
                            kind: TaskKind::Data {
                                pipeline: successor.clone(),
                                buffer: emitted.clone(),
                            },
                        })
                        .collect();
                    core.enqueue_tasks(ctx.queue_id, tasks);
                }
            }
            result
        }
        StageKind::Sink(sink) => sink.consume(buffer),
    };
    match result {
        Ok(()) => {
            core.emit(EngineEvent::TaskExecutionComplete {
                query,
                pipeline: pipeline.id,
                task,
            });
        }
        Err(error) => {
            // Caught at the worker boundary: the task is failed, the query
            // fails, other queries on this queue keep running.
            tracing::warn!(%query, pipeline = %pipeline.id, %error, "pipeline execution failed");
            pipeline.set_state(PipelineState::Failed);
            if let Some(query_rt) = core.query_opt(query) {
                core.fail_query(
                    &query_rt,
                    FailureOrigin::Pipeline(pipeline.clone()),
                    error.to_string(),
                );
            }
        }
    }
}

/// Post-poison sweep: expire data, run pending reconfigurations, close the
/// queue so the remaining workers observe shutdown.
fn drain(core: &Arc<EngineCore>, ctx: &WorkerContext) {
    let queue = &core.queues[ctx.queue_id].queue;
    loop {
        match queue.try_pop() {
            Ok(task) => drain_task(core, task),
            Err(RecvError::Empty) => break,
            Err(RecvError::Closed) => return,
        }
    }
    queue.close();
    // Stragglers pushed between the sweep and the close.
    while let Ok(task) = queue.try_pop() {
        drain_task(core, task);
    }
}

fn drain_task(core: &Arc<EngineCore>, task: Task) {
    match task.kind {
        TaskKind::Data { pipeline, buffer } => {
            core.emit(EngineEvent::TaskExpired {
                query: pipeline.query,
                pipeline: pipeline.id,
                task: task.id,
            });
            drop(buffer);
        }
        TaskKind::Reconfigure(message) => {
            // No data task can be concurrent anymore; the rendezvous is
            // unnecessary and would deadlock against exited workers.
            if message.try_claim() {
                core.apply_reconfiguration(&message);
            }
            message.release();
        }
        TaskKind::Poison => {}
    }
}
