// Copyright The weir authors
// SPDX-License-Identifier: Apache-2.0

//! Variable-size field round trip through a running query: a source emits
//! records with a variable-size string field, a projection copies the field
//! into fresh buffers, and the sink must observe byte-identical payloads
//! with no child-buffer leak.

use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;
use weir_buffer::{
    BufferProvider, PhysicalType, RowLayout, ScalarType, ScalarValue, Schema, TupleBuffer, VarVal,
    VariableSizeValue,
};
use weir_config::QueryId;
use weir_engine::testing::{test_config, CountingSink, RecordingListener, DEFAULT_LONG_AWAIT};
use weir_engine::{
    Error, ExecutableQueryPlan, ExecutionContext, PipelineStage, QueryEngine, QueryStatus, Source,
    SourceListener,
};

fn input_schema() -> Schema {
    Schema::new()
        .with_field("id", PhysicalType::Scalar(ScalarType::U64))
        .with_field(
            "name",
            PhysicalType::VariableSize {
                element: ScalarType::Char,
            },
        )
}

fn output_schema() -> Schema {
    Schema::new().with_field(
        "name",
        PhysicalType::VariableSize {
            element: ScalarType::Char,
        },
    )
}

/// Emits a fixed set of prepared buffers, then end-of-stream.
struct OneShotSource {
    buffers: Mutex<Vec<TupleBuffer>>,
    thread: Option<JoinHandle<()>>,
}

impl OneShotSource {
    fn new(buffers: Vec<TupleBuffer>) -> Self {
        OneShotSource {
            buffers: Mutex::new(buffers),
            thread: None,
        }
    }
}

impl Source for OneShotSource {
    fn open(&mut self, listener: SourceListener) -> Result<(), Error> {
        let buffers: Vec<TupleBuffer> = self.buffers.lock().drain(..).collect();
        let query = listener.query();
        let source = listener.source();
        let thread = std::thread::Builder::new()
            .name("one-shot-source".to_owned())
            .spawn(move || {
                listener.on_open();
                for buffer in buffers {
                    listener.on_data(buffer);
                }
                listener.on_end_of_stream();
            })
            .map_err(|error| Error::SourceFailed {
                query,
                source_id: source,
                reason: error.to_string(),
            })?;
        self.thread = Some(thread);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.thread().id() == std::thread::current().id() {
                return;
            }
            _ = thread.join();
        }
    }
}

/// Copies one field of every input record into a fresh output buffer.
struct ProjectStage {
    input: RowLayout,
    output: RowLayout,
    field: usize,
}

impl ProjectStage {
    fn new(input_schema: &Schema, output_schema: &Schema, field: &str) -> Self {
        let input = RowLayout::new(input_schema).expect("input layout");
        let output = RowLayout::new(output_schema).expect("output layout");
        let field = input.field_index(field).expect("projected field");
        ProjectStage {
            input,
            output,
            field,
        }
    }
}

impl PipelineStage for ProjectStage {
    fn execute(&self, input: &TupleBuffer, ctx: &mut ExecutionContext<'_>) -> Result<(), Error> {
        let mut output = ctx.buffer_provider().acquire_blocking();
        for index in 0..input.tuple_count() {
            let value = self.input.record(input, index)?.get(self.field)?;
            let _ = self
                .output
                .append(&mut output, &[value], ctx.buffer_provider())?;
        }
        ctx.emit(output);
        Ok(())
    }
}

#[test]
fn test_variable_size_round_trip() {
    let names = ["brook", "", "a name considerably longer than the rest"];
    let listener = RecordingListener::new();
    let engine = QueryEngine::with_listener(test_config(2, 32), Arc::new(listener.clone()))
        .expect("engine");
    let pool = engine.buffer_pool();

    // Three single-record buffers with a variable-size string field.
    let input_layout = RowLayout::new(&input_schema()).expect("layout");
    let mut prepared = Vec::new();
    for (index, name) in names.iter().enumerate() {
        let mut buffer = pool.try_acquire().expect("buffer");
        let record = [
            VarVal::Scalar(ScalarValue::U64(index as u64)),
            VarVal::VariableSize(VariableSizeValue::from_str(name)),
        ];
        let _ = input_layout
            .append(&mut buffer, &record, &pool)
            .expect("append");
        prepared.push(buffer);
    }

    let query = QueryId::new(1).expect("id");
    let mut builder = ExecutableQueryPlan::builder(query);
    let source_id = builder.add_source(
        input_schema(),
        Box::new(OneShotSource::new(prepared)),
    );
    let project = builder.add_pipeline(
        Box::new(ProjectStage::new(&input_schema(), &output_schema(), "name")),
        &[source_id.into()],
    );
    let (sink, sink_ctrl) = CountingSink::new();
    let _ = builder.add_sink(output_schema(), Box::new(sink), &[project.into()]);

    engine.register(builder.build()).expect("register");
    engine.start(query).expect("start");

    assert!(sink_ctrl.wait_for_buffers(names.len(), DEFAULT_LONG_AWAIT));
    assert!(engine.wait_for_status(query, QueryStatus::Stopped, DEFAULT_LONG_AWAIT));

    // Byte-exact projection of the variable-size field.
    let output_layout = RowLayout::new(&output_schema()).expect("layout");
    let buffers = sink_ctrl.take_buffers();
    assert_eq!(buffers.len(), names.len());
    for (buffer, expected) in buffers.iter().zip(names.iter()) {
        assert_eq!(buffer.tuple_count(), 1);
        let value = output_layout
            .record(buffer, 0)
            .expect("record")
            .get_named("name")
            .expect("read");
        assert_eq!(
            value,
            VarVal::VariableSize(VariableSizeValue::from_str(expected))
        );
    }
    drop(buffers);

    // No child-buffer leak: everything returns to the pool.
    engine.shutdown();
    assert!(pool.wait_until_full(DEFAULT_LONG_AWAIT));
    assert_eq!(pool.free_count(), pool.capacity());
}
