// Copyright The weir authors
// SPDX-License-Identifier: Apache-2.0

//! Executable query plans and the builder used to assemble them.
//!
//! A plan is the in-memory submission format: sources with their schemas and
//! successor lists, pipelines wrapping compiled stages, and sinks. The
//! builder assigns identifiers and maintains the successor edges; the engine
//! validates the DAG at registration (acyclic, every non-source node
//! reachable from at least one source, sinks terminal).

use crate::error::Error;
use crate::source::Source;
use crate::stage::{PipelineStage, Sink};
use std::collections::{HashMap, HashSet, VecDeque};
use weir_buffer::Schema;
use weir_config::{PipelineId, QueryId, SourceId};

/// One source of a plan.
pub struct SourceDecl {
    /// The source identifier, unique within the plan.
    pub id: SourceId,
    /// Schema of the records this source produces.
    pub schema: Schema,
    /// The source implementation.
    pub source: Box<dyn Source>,
    /// Pipelines (or sinks) fed by this source.
    pub successors: Vec<PipelineId>,
}

/// One operator pipeline of a plan.
pub struct PipelineDecl {
    /// The pipeline identifier, unique within the plan.
    pub id: PipelineId,
    /// The compiled stage.
    pub stage: Box<dyn PipelineStage>,
    /// Pipelines (or sinks) fed by this pipeline.
    pub successors: Vec<PipelineId>,
}

/// One sink of a plan. Sinks share the pipeline identifier namespace and
/// never have successors.
pub struct SinkDecl {
    /// The sink identifier, unique within the plan.
    pub id: PipelineId,
    /// Schema of the records this sink consumes.
    pub schema: Schema,
    /// The sink implementation.
    pub sink: Box<dyn Sink>,
}

/// A compiled, executable query plan.
pub struct ExecutableQueryPlan {
    /// The query this plan belongs to.
    pub query_id: QueryId,
    /// The plan's sources.
    pub sources: Vec<SourceDecl>,
    /// The plan's operator pipelines.
    pub pipelines: Vec<PipelineDecl>,
    /// The plan's sinks.
    pub sinks: Vec<SinkDecl>,
}

/// A reference to the upstream end of an edge while building a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upstream {
    /// The edge starts at a source.
    Source(SourceId),
    /// The edge starts at an operator pipeline.
    Pipeline(PipelineId),
}

impl From<SourceId> for Upstream {
    fn from(id: SourceId) -> Self {
        Upstream::Source(id)
    }
}

impl From<PipelineId> for Upstream {
    fn from(id: PipelineId) -> Self {
        Upstream::Pipeline(id)
    }
}

impl ExecutableQueryPlan {
    /// Starts building a plan for `query_id`.
    #[must_use]
    pub fn builder(query_id: QueryId) -> QueryPlanBuilder {
        QueryPlanBuilder {
            query_id,
            next_source: SourceId::INITIAL,
            next_pipeline: PipelineId::INITIAL,
            sources: Vec::new(),
            pipelines: Vec::new(),
            sinks: Vec::new(),
        }
    }

    /// Validates the plan structure; see the module docs for the rules.
    pub fn validate(&self) -> Result<(), Error> {
        let query = self.query_id;
        if !query.is_valid() {
            return Err(Error::InvalidIdentifier { query });
        }
        if self.sources.is_empty() {
            return Err(Error::PlanWithoutSources { query });
        }
        if self.sinks.is_empty() {
            return Err(Error::PlanWithoutSinks { query });
        }

        let mut source_ids = HashSet::new();
        for source in &self.sources {
            if !source.id.is_valid() {
                return Err(Error::InvalidIdentifier { query });
            }
            if !source_ids.insert(source.id) {
                return Err(Error::DuplicateSource {
                    query,
                    source_id: source.id,
                });
            }
            if source.successors.is_empty() {
                return Err(Error::SourceWithoutSuccessor {
                    query,
                    source_id: source.id,
                });
            }
        }

        // Pipelines and sinks share one identifier namespace.
        let mut successors: HashMap<PipelineId, &[PipelineId]> = HashMap::new();
        for pipeline in &self.pipelines {
            if !pipeline.id.is_valid() {
                return Err(Error::InvalidIdentifier { query });
            }
            if successors
                .insert(pipeline.id, &pipeline.successors)
                .is_some()
            {
                return Err(Error::DuplicatePipeline {
                    query,
                    pipeline: pipeline.id,
                });
            }
        }
        for sink in &self.sinks {
            if !sink.id.is_valid() {
                return Err(Error::InvalidIdentifier { query });
            }
            if successors.insert(sink.id, &[]).is_some() {
                return Err(Error::DuplicatePipeline {
                    query,
                    pipeline: sink.id,
                });
            }
        }

        let resolve = |id: PipelineId| -> Result<(), Error> {
            if successors.contains_key(&id) {
                Ok(())
            } else {
                Err(Error::UnknownSuccessor {
                    query,
                    successor: id,
                })
            }
        };
        for source in &self.sources {
            for &succ in &source.successors {
                resolve(succ)?;
            }
        }
        for pipeline in &self.pipelines {
            for &succ in &pipeline.successors {
                resolve(succ)?;
            }
        }

        // Reachability from the sources.
        let mut reached: HashSet<PipelineId> = HashSet::new();
        let mut frontier: VecDeque<PipelineId> = self
            .sources
            .iter()
            .flat_map(|source| source.successors.iter().copied())
            .collect();
        while let Some(id) = frontier.pop_front() {
            if reached.insert(id) {
                for &succ in successors[&id] {
                    frontier.push_back(succ);
                }
            }
        }
        if let Some(missing) = successors.keys().find(|id| !reached.contains(id)) {
            return Err(Error::UnreachablePipeline {
                query,
                pipeline: *missing,
            });
        }

        // Cycle check over the pipeline/sink successor graph.
        topological_order(&successors)
            .map(|_| ())
            .ok_or(Error::CyclicPlan { query })
    }

    /// Topological order of pipelines and sinks, sources' side first.
    /// The plan must have passed [`Self::validate`].
    pub(crate) fn topological_ids(&self) -> Vec<PipelineId> {
        let mut successors: HashMap<PipelineId, &[PipelineId]> = HashMap::new();
        for pipeline in &self.pipelines {
            _ = successors.insert(pipeline.id, &pipeline.successors);
        }
        for sink in &self.sinks {
            _ = successors.insert(sink.id, &[]);
        }
        topological_order(&successors).unwrap_or_default()
    }
}

/// Kahn's algorithm over the successor map; `None` on a cycle.
fn topological_order(successors: &HashMap<PipelineId, &[PipelineId]>) -> Option<Vec<PipelineId>> {
    let mut in_degree: HashMap<PipelineId, usize> =
        successors.keys().map(|&id| (id, 0)).collect();
    for succs in successors.values() {
        for succ in *succs {
            if let Some(count) = in_degree.get_mut(succ) {
                *count += 1;
            }
        }
    }
    let mut ready: VecDeque<PipelineId> = in_degree
        .iter()
        .filter(|&(_, &count)| count == 0)
        .map(|(&id, _)| id)
        .collect();
    let mut order = Vec::with_capacity(successors.len());
    while let Some(id) = ready.pop_front() {
        order.push(id);
        for &succ in successors[&id] {
            let count = in_degree.get_mut(&succ)?;
            *count -= 1;
            if *count == 0 {
                ready.push_back(succ);
            }
        }
    }
    (order.len() == successors.len()).then_some(order)
}

/// Assembles an [`ExecutableQueryPlan`], assigning identifiers and successor
/// edges. Predecessors are named when a node is added, the way plans are
/// naturally written bottom-up:
///
/// ```ignore
/// let mut builder = ExecutableQueryPlan::builder(query_id);
/// let source = builder.add_source(schema.clone(), Box::new(my_source));
/// let filter = builder.add_pipeline(Box::new(my_stage), &[source.into()]);
/// let _sink = builder.add_sink(schema, Box::new(my_sink), &[filter.into()]);
/// let plan = builder.build();
/// ```
pub struct QueryPlanBuilder {
    query_id: QueryId,
    next_source: SourceId,
    next_pipeline: PipelineId,
    sources: Vec<SourceDecl>,
    pipelines: Vec<PipelineDecl>,
    sinks: Vec<SinkDecl>,
}

impl QueryPlanBuilder {
    /// Adds a source and returns its id.
    pub fn add_source(&mut self, schema: Schema, source: Box<dyn Source>) -> SourceId {
        let id = self.next_source;
        self.next_source = id.next();
        self.sources.push(SourceDecl {
            id,
            schema,
            source,
            successors: Vec::new(),
        });
        id
    }

    /// Adds an operator pipeline fed by `upstream` and returns its id.
    ///
    /// Panics if an upstream reference does not name a source or pipeline
    /// already added to this builder.
    pub fn add_pipeline(
        &mut self,
        stage: Box<dyn PipelineStage>,
        upstream: &[Upstream],
    ) -> PipelineId {
        let id = self.next_pipeline;
        self.next_pipeline = id.next();
        self.pipelines.push(PipelineDecl {
            id,
            stage,
            successors: Vec::new(),
        });
        self.connect(upstream, id);
        id
    }

    /// Adds a sink fed by `upstream` and returns its id.
    ///
    /// Panics if an upstream reference does not name a source or pipeline
    /// already added to this builder.
    pub fn add_sink(
        &mut self,
        schema: Schema,
        sink: Box<dyn Sink>,
        upstream: &[Upstream],
    ) -> PipelineId {
        let id = self.next_pipeline;
        self.next_pipeline = id.next();
        self.sinks.push(SinkDecl { id, schema, sink });
        self.connect(upstream, id);
        id
    }

    fn connect(&mut self, upstream: &[Upstream], downstream: PipelineId) {
        for reference in upstream {
            match reference {
                Upstream::Source(id) => {
                    let source = self
                        .sources
                        .iter_mut()
                        .find(|source| source.id == *id)
                        .unwrap_or_else(|| panic!("unknown upstream source {id}"));
                    source.successors.push(downstream);
                }
                Upstream::Pipeline(id) => {
                    let pipeline = self
                        .pipelines
                        .iter_mut()
                        .find(|pipeline| pipeline.id == *id)
                        .unwrap_or_else(|| panic!("unknown upstream pipeline {id}"));
                    pipeline.successors.push(downstream);
                }
            }
        }
    }

    /// Finishes the plan.
    #[must_use]
    pub fn build(self) -> ExecutableQueryPlan {
        ExecutableQueryPlan {
            query_id: self.query_id,
            sources: self.sources,
            pipelines: self.pipelines,
            sinks: self.sinks,
        }
    }
}
