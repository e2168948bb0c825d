// Copyright The weir authors
// SPDX-License-Identifier: Apache-2.0

//! End-to-end tests of the query engine lifecycle: graceful end-of-stream,
//! external stops racing data, pipeline and source failures, fan-in keeping
//! shared sinks alive, and engine shutdown semantics.

use std::sync::Arc;
use std::time::Duration;
use weir_config::QueryId;
use weir_engine::testing::{
    identifiable_payload, test_config, test_schema, verify_identifiable, ControllableStage,
    CountingSink, RecordingListener, StageControl, TestSinkControl, TestSource, TestSourceControl,
    DEFAULT_AWAIT, DEFAULT_LONG_AWAIT,
};
use weir_engine::{
    EngineEvent, ExecutableQueryPlan, QueryEngine, QueryStatus, TerminationKind, Upstream,
};

const TUPLES_PER_BUFFER: u64 = 10;

struct Harness {
    engine: QueryEngine,
    listener: RecordingListener,
}

impl Harness {
    fn new(workers: usize, buffers: usize) -> Self {
        let listener = RecordingListener::new();
        let engine =
            QueryEngine::with_listener(test_config(workers, buffers), Arc::new(listener.clone()))
                .expect("engine");
        Harness { engine, listener }
    }
}

/// `source → pipeline → sink` plan with controls for each node.
fn linear_plan(
    harness: &Harness,
    query: QueryId,
) -> (
    ExecutableQueryPlan,
    TestSourceControl,
    StageControl,
    TestSinkControl,
) {
    let mut builder = ExecutableQueryPlan::builder(query);
    let (source, source_ctrl) = TestSource::new(harness.engine.buffer_pool());
    let (stage, stage_ctrl) = ControllableStage::new();
    let (sink, sink_ctrl) = CountingSink::new();
    let source_id = builder.add_source(test_schema(), Box::new(source));
    let pipeline_id = builder.add_pipeline(Box::new(stage), &[source_id.into()]);
    let _ = builder.add_sink(test_schema(), Box::new(sink), &[pipeline_id.into()]);
    (builder.build(), source_ctrl, stage_ctrl, sink_ctrl)
}

fn inject_buffers(ctrl: &TestSourceControl, count: usize) {
    assert!(ctrl.inject_data(
        identifiable_payload(1, TUPLES_PER_BUFFER),
        TUPLES_PER_BUFFER
    ));
    for _ in 1..count {
        assert!(ctrl.inject_data(
            vec![0u8; (TUPLES_PER_BUFFER * 8) as usize],
            TUPLES_PER_BUFFER
        ));
    }
}

#[test]
fn test_engine_shutdown_drops_pending_work() {
    let harness = Harness::new(2, 32);
    let query = QueryId::new(1).expect("id");

    let mut builder = ExecutableQueryPlan::builder(query);
    let (source, source_ctrl) = TestSource::new(harness.engine.buffer_pool());
    let (sink, sink_ctrl) = CountingSink::new();
    let source_id = builder.add_source(test_schema(), Box::new(source));
    let _ = builder.add_sink(test_schema(), Box::new(sink), &[source_id.into()]);

    harness.engine.register(builder.build()).expect("register");
    harness.engine.start(query).expect("start");
    assert!(source_ctrl.wait_until_opened(DEFAULT_LONG_AWAIT));

    inject_buffers(&source_ctrl, 4);
    assert!(sink_ctrl.wait_for_buffers(4, DEFAULT_LONG_AWAIT));

    let pool = harness.engine.buffer_pool();
    harness.engine.shutdown();

    // Shutdown hard-stops the engine: the query gets no terminal status and
    // no pipeline is gracefully stopped.
    assert_eq!(
        harness.listener.statuses(query),
        vec![QueryStatus::Started, QueryStatus::Running]
    );
    assert_eq!(
        harness
            .listener
            .count(|event| matches!(event, EngineEvent::PipelineStop { .. })),
        0
    );
    assert!(source_ctrl.wait_until_destroyed(DEFAULT_LONG_AWAIT));
    assert!(source_ctrl.was_opened());
    assert!(source_ctrl.was_closed());

    let buffers = sink_ctrl.take_buffers();
    assert!(buffers.len() <= 4);
    drop(buffers);
    assert!(pool.wait_until_full(DEFAULT_LONG_AWAIT));
}

#[test]
fn test_graceful_end_of_stream() {
    let harness = Harness::new(2, 32);
    let query = QueryId::new(1).expect("id");
    let (plan, source_ctrl, _stage_ctrl, sink_ctrl) = linear_plan(&harness, query);
    let source_id = plan.sources[0].id;

    harness.engine.register(plan).expect("register");
    harness.engine.start(query).expect("start");
    assert!(source_ctrl.wait_until_opened(DEFAULT_LONG_AWAIT));

    inject_buffers(&source_ctrl, 4);
    assert!(source_ctrl.inject_eos());

    assert!(sink_ctrl.wait_for_buffers(4, DEFAULT_LONG_AWAIT));
    assert!(harness
        .engine
        .wait_for_status(query, QueryStatus::Stopped, DEFAULT_LONG_AWAIT));

    assert_eq!(
        harness.listener.statuses(query),
        vec![
            QueryStatus::Started,
            QueryStatus::Running,
            QueryStatus::Stopped
        ]
    );
    assert_eq!(
        harness.listener.termination_kind(query, source_id),
        Some(TerminationKind::Graceful)
    );

    let buffers = sink_ctrl.take_buffers();
    assert_eq!(buffers.len(), 4);
    let total: u64 = buffers.iter().map(weir_buffer::TupleBuffer::tuple_count).sum();
    assert_eq!(total, 4 * TUPLES_PER_BUFFER);
    assert!(verify_identifiable(&buffers[0], 1, TUPLES_PER_BUFFER));
    drop(buffers);

    let pool = harness.engine.buffer_pool();
    harness.engine.shutdown();
    assert!(pool.wait_until_full(DEFAULT_LONG_AWAIT));
    assert_eq!(pool.free_count(), pool.capacity());
}

#[test]
fn test_external_stop_races_with_data() {
    let harness = Harness::new(2, 32);
    let query = QueryId::new(1).expect("id");
    let (plan, source_ctrl, _stage_ctrl, sink_ctrl) = linear_plan(&harness, query);

    harness.engine.register(plan).expect("register");
    harness.engine.start(query).expect("start");
    assert!(source_ctrl.wait_until_opened(DEFAULT_LONG_AWAIT));

    inject_buffers(&source_ctrl, 4);
    assert!(sink_ctrl.wait_for_buffers(1, DEFAULT_LONG_AWAIT));
    harness.engine.stop(query).expect("stop");
    // Races the teardown; the buffer may flow, expire, or be refused.
    let _ = source_ctrl.inject_data(
        vec![0u8; (TUPLES_PER_BUFFER * 8) as usize],
        TUPLES_PER_BUFFER,
    );

    assert!(harness
        .engine
        .wait_for_termination(query, DEFAULT_LONG_AWAIT));

    let events = harness.listener.events();
    let stopped = events
        .iter()
        .filter(|event| {
            matches!(
                event,
                EngineEvent::QueryStatus {
                    status: QueryStatus::Stopped,
                    ..
                }
            )
        })
        .count();
    assert_eq!(stopped, 1, "exactly one terminal event");

    let invocations = sink_ctrl.invocations();
    assert!(
        (1..=5).contains(&invocations),
        "sink saw {invocations} buffers"
    );

    // Every started task finished, and nothing completed after Stopped.
    let starts = harness
        .listener
        .count(|event| matches!(event, EngineEvent::TaskExecutionStart { .. }));
    let completes = harness
        .listener
        .count(|event| matches!(event, EngineEvent::TaskExecutionComplete { .. }));
    assert_eq!(starts, completes);
    let stopped_index = events
        .iter()
        .position(|event| {
            matches!(
                event,
                EngineEvent::QueryStatus {
                    status: QueryStatus::Stopped,
                    ..
                }
            )
        })
        .expect("stopped event");
    assert!(
        events[stopped_index..]
            .iter()
            .all(|event| !matches!(event, EngineEvent::TaskExecutionComplete { .. })),
        "no data task completes after Stopped"
    );

    harness.engine.shutdown();
}

#[test]
fn test_pipeline_failure_fails_query() {
    let harness = Harness::new(2, 32);
    let query = QueryId::new(1).expect("id");
    let (plan, source_ctrl, stage_ctrl, sink_ctrl) = linear_plan(&harness, query);
    let source_id = plan.sources[0].id;
    stage_ctrl.fail_on_invocation(2);

    harness.engine.register(plan).expect("register");
    harness.engine.start(query).expect("start");
    assert!(source_ctrl.wait_until_opened(DEFAULT_LONG_AWAIT));

    inject_buffers(&source_ctrl, 4);
    assert!(harness
        .engine
        .wait_for_status(query, QueryStatus::Failed, DEFAULT_LONG_AWAIT));

    assert_eq!(
        harness.listener.statuses(query),
        vec![
            QueryStatus::Started,
            QueryStatus::Running,
            QueryStatus::Failed
        ]
    );
    // The source is closed as part of the failure, not gracefully.
    assert!(source_ctrl.wait_until_destroyed(DEFAULT_LONG_AWAIT));
    assert_eq!(
        harness.listener.termination_kind(query, source_id),
        Some(TerminationKind::Hard)
    );

    let invocations = sink_ctrl.invocations();
    assert!(invocations <= 3, "sink saw {invocations} buffers");

    harness.engine.shutdown();
}

#[test]
fn test_one_failing_source_among_many_queries() {
    let queries = 10usize;
    let harness = Harness::new(4, 512);

    let mut source_ctrls: Vec<(TestSourceControl, TestSourceControl)> = Vec::new();
    let mut sink_ctrls: Vec<TestSinkControl> = Vec::new();
    let mut failing_source = None;
    for index in 0..queries {
        let query = QueryId::new(index as u64 + 1).expect("id");
        let mut builder = ExecutableQueryPlan::builder(query);
        let (source_a, ctrl_a) = TestSource::new(harness.engine.buffer_pool());
        let (source_b, ctrl_b) = TestSource::new(harness.engine.buffer_pool());
        let (stage, _stage_ctrl) = ControllableStage::new();
        let (sink, sink_ctrl) = CountingSink::new();
        let id_a = builder.add_source(test_schema(), Box::new(source_a));
        let id_b = builder.add_source(test_schema(), Box::new(source_b));
        let pipeline = builder.add_pipeline(Box::new(stage), &[id_a.into(), id_b.into()]);
        let _ = builder.add_sink(test_schema(), Box::new(sink), &[pipeline.into()]);
        if index == 0 {
            failing_source = Some(id_a);
        }
        harness.engine.register(builder.build()).expect("register");
        harness.engine.start(query).expect("start");
        source_ctrls.push((ctrl_a, ctrl_b));
        sink_ctrls.push(sink_ctrl);
    }

    for (ctrl_a, ctrl_b) in &source_ctrls {
        assert!(ctrl_a.wait_until_opened(DEFAULT_LONG_AWAIT));
        assert!(ctrl_b.wait_until_opened(DEFAULT_LONG_AWAIT));
    }

    // Five buffers per source, then the 0th source of query 1 fails.
    for (ctrl_a, ctrl_b) in &source_ctrls {
        inject_buffers(ctrl_a, 5);
        inject_buffers(ctrl_b, 5);
    }
    assert!(source_ctrls[0].0.inject_error("source failed"));

    let failed_query = QueryId::new(1).expect("id");
    assert!(harness
        .engine
        .wait_for_status(failed_query, QueryStatus::Failed, DEFAULT_LONG_AWAIT));
    assert_eq!(
        harness
            .listener
            .termination_kind(failed_query, failing_source.expect("source")),
        Some(TerminationKind::Failure)
    );

    // Every other query keeps running and keeps receiving data.
    for index in 1..queries {
        let query = QueryId::new(index as u64 + 1).expect("id");
        assert!(
            !harness
                .engine
                .wait_for_termination(query, Duration::from_millis(20)),
            "query {query} should still be running"
        );
        let received = sink_ctrls[index].invocations();
        inject_buffers(&source_ctrls[index].0, 1);
        assert!(sink_ctrls[index].wait_for_buffers(received + 1, DEFAULT_LONG_AWAIT));
    }

    // An external stop terminates the survivors gracefully.
    for index in 1..queries {
        let query = QueryId::new(index as u64 + 1).expect("id");
        harness.engine.stop(query).expect("stop");
        assert!(harness
            .engine
            .wait_for_status(query, QueryStatus::Stopped, DEFAULT_LONG_AWAIT));
    }

    harness.engine.shutdown();
}

#[test]
fn test_start_failure_aborts_without_running() {
    let harness = Harness::new(2, 32);
    let query = QueryId::new(1).expect("id");

    let mut builder = ExecutableQueryPlan::builder(query);
    let (source, _source_ctrl) = TestSource::new(harness.engine.buffer_pool());
    let source_id = builder.add_source(test_schema(), Box::new(source));
    let (failing_stage, failing_ctrl) = ControllableStage::new();
    failing_ctrl.fail_on_start();
    let failing = builder.add_pipeline(Box::new(failing_stage), &[source_id.into()]);
    let (sink_a, _) = CountingSink::new();
    let _ = builder.add_sink(test_schema(), Box::new(sink_a), &[failing.into()]);
    // A healthy parallel chain that may or may not have started already.
    let (okay_stage, _okay_ctrl) = ControllableStage::new();
    let okay = builder.add_pipeline(Box::new(okay_stage), &[source_id.into()]);
    let (sink_b, _) = CountingSink::new();
    let _ = builder.add_sink(test_schema(), Box::new(sink_b), &[okay.into()]);

    harness.engine.register(builder.build()).expect("register");
    harness.engine.start(query).expect("start");

    assert!(harness
        .engine
        .wait_for_status(query, QueryStatus::Failed, DEFAULT_LONG_AWAIT));
    assert_eq!(
        harness.listener.statuses(query),
        vec![QueryStatus::Started, QueryStatus::Failed],
        "a failed start never reaches Running"
    );

    harness.engine.shutdown();
}

#[test]
fn test_stop_is_idempotent() {
    let harness = Harness::new(2, 32);
    let query = QueryId::new(1).expect("id");
    let (plan, source_ctrl, _stage_ctrl, _sink_ctrl) = linear_plan(&harness, query);

    harness.engine.register(plan).expect("register");
    harness.engine.start(query).expect("start");
    assert!(source_ctrl.wait_until_opened(DEFAULT_LONG_AWAIT));

    harness.engine.stop(query).expect("stop");
    harness.engine.stop(query).expect("stop again");
    assert!(harness
        .engine
        .wait_for_status(query, QueryStatus::Stopped, DEFAULT_LONG_AWAIT));
    harness.engine.stop(query).expect("stop after terminal");

    let terminal_events = harness.listener.count(|event| {
        matches!(
            event,
            EngineEvent::QueryStatus {
                status: QueryStatus::Stopped | QueryStatus::Failed,
                ..
            }
        )
    });
    assert_eq!(terminal_events, 1);

    harness.engine.shutdown();
}

#[test]
fn test_failure_during_pipeline_stop_spares_successors() {
    let harness = Harness::new(2, 32);
    let query = QueryId::new(1).expect("id");

    let mut builder = ExecutableQueryPlan::builder(query);
    let (source, source_ctrl) = TestSource::new(harness.engine.buffer_pool());
    let source_id = builder.add_source(test_schema(), Box::new(source));
    let (failing_stage, failing_ctrl) = ControllableStage::new();
    failing_ctrl.fail_on_stop();
    let failing = builder.add_pipeline(Box::new(failing_stage), &[source_id.into()]);
    let (successor_stage, successor_ctrl) = ControllableStage::new();
    let successor = builder.add_pipeline(Box::new(successor_stage), &[failing.into()]);
    let (sink, sink_ctrl) = CountingSink::new();
    let _ = builder.add_sink(test_schema(), Box::new(sink), &[successor.into()]);

    harness.engine.register(builder.build()).expect("register");
    harness.engine.start(query).expect("start");
    assert!(source_ctrl.wait_until_opened(DEFAULT_LONG_AWAIT));
    assert!(source_ctrl.inject_eos());

    assert!(harness
        .engine
        .wait_for_status(query, QueryStatus::Failed, DEFAULT_LONG_AWAIT));
    assert_eq!(
        harness.listener.termination_kind(query, source_id),
        Some(TerminationKind::Graceful)
    );
    // Successors of the failing pipeline are not explicitly stopped.
    assert!(!successor_ctrl.was_stopped());
    assert!(!sink_ctrl.was_stopped());

    harness.engine.shutdown();
}

#[test]
fn test_fan_in_keeps_shared_sink_alive() {
    let harness = Harness::new(2, 64);
    let query = QueryId::new(1).expect("id");

    let mut builder = ExecutableQueryPlan::builder(query);
    let (source_a, ctrl_a) = TestSource::new(harness.engine.buffer_pool());
    let (source_b, ctrl_b) = TestSource::new(harness.engine.buffer_pool());
    let id_a = builder.add_source(test_schema(), Box::new(source_a));
    let id_b = builder.add_source(test_schema(), Box::new(source_b));
    let (stage_a, stage_a_ctrl) = ControllableStage::new();
    let (stage_b, stage_b_ctrl) = ControllableStage::new();
    let chain_a = builder.add_pipeline(Box::new(stage_a), &[id_a.into()]);
    let chain_b = builder.add_pipeline(Box::new(stage_b), &[id_b.into()]);
    let (sink, sink_ctrl) = CountingSink::new();
    let _ = builder.add_sink(
        test_schema(),
        Box::new(sink),
        &[chain_a.into(), chain_b.into()],
    );

    harness.engine.register(builder.build()).expect("register");
    harness.engine.start(query).expect("start");
    assert!(ctrl_a.wait_until_opened(DEFAULT_LONG_AWAIT));
    assert!(ctrl_b.wait_until_opened(DEFAULT_LONG_AWAIT));

    inject_buffers(&ctrl_b, 2);
    assert!(sink_ctrl.wait_for_buffers(2, DEFAULT_LONG_AWAIT));

    // Chain B drains; the shared sink must stay alive for chain A.
    assert!(ctrl_b.inject_eos());
    assert!(stage_b_ctrl.wait_for_stop(DEFAULT_LONG_AWAIT));
    assert!(!sink_ctrl.wait_for_stop(DEFAULT_AWAIT));

    inject_buffers(&ctrl_a, 2);
    assert!(sink_ctrl.wait_for_buffers(4, DEFAULT_LONG_AWAIT));

    assert!(ctrl_a.inject_eos());
    assert!(harness
        .engine
        .wait_for_status(query, QueryStatus::Stopped, DEFAULT_LONG_AWAIT));
    assert!(stage_a_ctrl.was_stopped());
    assert!(sink_ctrl.was_stopped());

    harness.engine.shutdown();
}

#[test]
fn test_fan_out_delivers_to_every_successor() {
    let harness = Harness::new(2, 64);
    let query = QueryId::new(1).expect("id");

    let mut builder = ExecutableQueryPlan::builder(query);
    let (source, source_ctrl) = TestSource::new(harness.engine.buffer_pool());
    let source_id = builder.add_source(test_schema(), Box::new(source));
    let mut stage_ctrls = Vec::new();
    let mut upstream = Vec::new();
    for _ in 0..3 {
        let (stage, ctrl) = ControllableStage::new();
        upstream.push(Upstream::from(
            builder.add_pipeline(Box::new(stage), &[source_id.into()]),
        ));
        stage_ctrls.push(ctrl);
    }
    let (sink, sink_ctrl) = CountingSink::new();
    let _ = builder.add_sink(test_schema(), Box::new(sink), &upstream);

    harness.engine.register(builder.build()).expect("register");
    harness.engine.start(query).expect("start");
    assert!(source_ctrl.wait_until_opened(DEFAULT_LONG_AWAIT));

    inject_buffers(&source_ctrl, 4);
    assert!(source_ctrl.inject_eos());

    assert!(sink_ctrl.wait_for_buffers(4 * 3, DEFAULT_LONG_AWAIT));
    assert!(harness
        .engine
        .wait_for_status(query, QueryStatus::Stopped, DEFAULT_LONG_AWAIT));
    for ctrl in &stage_ctrls {
        assert!(ctrl.was_stopped());
    }

    harness.engine.shutdown();
}

#[test]
fn test_no_worker_executes_after_shutdown() {
    let harness = Harness::new(2, 32);
    let query = QueryId::new(1).expect("id");
    let (plan, source_ctrl, _stage_ctrl, _sink_ctrl) = linear_plan(&harness, query);

    harness.engine.register(plan).expect("register");
    harness.engine.start(query).expect("start");
    assert!(source_ctrl.wait_until_opened(DEFAULT_LONG_AWAIT));
    inject_buffers(&source_ctrl, 2);

    harness.engine.shutdown();
    let snapshot = harness.listener.events().len();
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(
        harness.listener.events().len(),
        snapshot,
        "no events after shutdown returned"
    );
}

#[test]
fn test_source_failing_during_stop_still_stops() {
    let harness = Harness::new(2, 32);
    let query = QueryId::new(1).expect("id");
    let (plan, source_ctrl, stage_ctrl, _sink_ctrl) = linear_plan(&harness, query);
    source_ctrl.fail_during_open(Duration::from_millis(200));

    harness.engine.register(plan).expect("register");
    harness.engine.start(query).expect("start");
    assert!(stage_ctrl.wait_for_start(DEFAULT_LONG_AWAIT));
    assert!(harness
        .engine
        .wait_for_status(query, QueryStatus::Running, DEFAULT_LONG_AWAIT));

    // The stop overlaps the source's eventual failure; the failure loses.
    harness.engine.stop(query).expect("stop");
    assert!(harness
        .engine
        .wait_for_status(query, QueryStatus::Stopped, 2 * DEFAULT_LONG_AWAIT));
    assert_eq!(
        harness.listener.statuses(query),
        vec![
            QueryStatus::Started,
            QueryStatus::Running,
            QueryStatus::Stopped
        ]
    );

    harness.engine.shutdown();
}

#[test]
fn test_register_rejects_duplicate_query() {
    let harness = Harness::new(2, 32);
    let query = QueryId::new(1).expect("id");
    let (plan, _a, _b, _c) = linear_plan(&harness, query);
    harness.engine.register(plan).expect("register");
    let (plan, _a, _b, _c) = linear_plan(&harness, query);
    assert!(matches!(
        harness.engine.register(plan),
        Err(weir_engine::Error::QueryAlreadyRegistered { .. })
    ));
    harness.engine.shutdown();
}

#[test]
fn test_external_fail_emits_failed_with_reason() {
    let harness = Harness::new(2, 32);
    let query = QueryId::new(1).expect("id");
    let (plan, source_ctrl, _stage_ctrl, _sink_ctrl) = linear_plan(&harness, query);

    harness.engine.register(plan).expect("register");
    harness.engine.start(query).expect("start");
    assert!(source_ctrl.wait_until_opened(DEFAULT_LONG_AWAIT));

    harness.engine.fail(query, "operator intervention").expect("fail");
    assert!(harness
        .engine
        .wait_for_status(query, QueryStatus::Failed, DEFAULT_LONG_AWAIT));
    let reasons: Vec<Option<String>> = harness
        .listener
        .events()
        .into_iter()
        .filter_map(|event| match event {
            EngineEvent::QueryStatus {
                status: QueryStatus::Failed,
                reason,
                ..
            } => Some(reason),
            _ => None,
        })
        .collect();
    assert_eq!(reasons.len(), 1);
    assert_eq!(reasons[0].as_deref(), Some("operator intervention"));

    harness.engine.shutdown();
}
