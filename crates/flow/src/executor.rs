//! Pipeline execution engines.
//!
//! [`PipelineEngine`] is the seam a scheduler implements. [`LocalEngine`] is
//! the in-process reference implementation:
//! 1. Walks each dag in topological order.
//! 2. Gathers every vertex's inputs (aggregator, single input or default merge).
//! 3. Runs the vertex's sub-dag / fan-out / conditional branches, then its
//!    operation chain.
//! 4. Hands the output to each child according to the edge policy.
//! 5. Routes an unrecovered error through the pipeline failure handler and
//!    runs the finally hook exactly once.

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::{stream, FutureExt, StreamExt};
use indexmap::IndexMap;
use tracing::{debug, error, info, instrument, warn};

use operations::{ExecutionOptions, Payload};

use crate::dag::Dag;
use crate::error::EngineError;
use crate::models::{Pipeline, PipelineState, VertexState};
use crate::node::{Aggregator, EdgePolicy, Inputs, Node, VertexKind};

/// Origin key under which a start vertex receives the pipeline input.
pub const INPUT_KEY: &str = "input";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning knobs for the local engine.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// How many for-each instances may run at once. Outputs are merged in
    /// item order regardless.
    pub for_each_concurrency: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { for_each_concurrency: 1 }
    }
}

// ---------------------------------------------------------------------------
// Output of a completed execution
// ---------------------------------------------------------------------------

/// The result of running a full pipeline.
#[derive(Debug)]
pub struct ExecutionResult {
    pub request_id: String,
    /// Output of the end vertex, or the payload the failure handler
    /// recovered with.
    pub output: Payload,
    /// Final state of every top-level vertex, in insertion order.
    pub vertices: IndexMap<String, VertexState>,
}

// ---------------------------------------------------------------------------
// Engine seam
// ---------------------------------------------------------------------------

#[async_trait]
pub trait PipelineEngine: Send + Sync {
    /// Run `pipeline` on `input`.
    ///
    /// # Errors
    /// The unrecovered error, after the pipeline failure handler declined to
    /// recover it. The finally hook has run either way.
    async fn execute(
        &self,
        pipeline: &Pipeline,
        input: Payload,
        options: &ExecutionOptions,
    ) -> Result<ExecutionResult, EngineError>;
}

/// Concatenate `inputs` in key order.
pub fn default_merge(inputs: &Inputs) -> Payload {
    inputs.values().flat_map(|payload| payload.iter().copied()).collect()
}

// ---------------------------------------------------------------------------
// LocalEngine
// ---------------------------------------------------------------------------

/// Sequential in-process engine.
#[derive(Debug, Clone, Default)]
pub struct LocalEngine {
    config: ExecutorConfig,
}

#[async_trait]
impl PipelineEngine for LocalEngine {
    #[instrument(skip_all, fields(request_id = %options.request_id))]
    async fn execute(
        &self,
        pipeline: &Pipeline,
        input: Payload,
        options: &ExecutionOptions,
    ) -> Result<ExecutionResult, EngineError> {
        let dag = pipeline.dag();
        info!("executing pipeline with {} vertices", dag.len());

        let mut states = vec![VertexState::Unvisited; dag.len()];
        let outcome = match self.run_dag(dag, input, options, &mut states).await {
            Ok(output) => Ok(output),
            Err(err) => {
                error!("pipeline failed: {}", err);
                match pipeline.failure_handler() {
                    Some(handler) => handler(err),
                    None => Err(err),
                }
            }
        };

        let state = if outcome.is_ok() {
            PipelineState::Success
        } else {
            PipelineState::Failure
        };
        info!("pipeline finished: {}", state);
        if let Some(finally) = pipeline.finally_handler() {
            finally(state);
        }

        let output = outcome?;
        let vertices = dag
            .nodes()
            .iter()
            .zip(states)
            .map(|(node, state)| (node.id().to_owned(), state))
            .collect();

        Ok(ExecutionResult {
            request_id: options.request_id.clone(),
            output,
            vertices,
        })
    }
}

impl LocalEngine {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    /// Run one dag to completion and return its end vertex's output.
    ///
    /// `states` is indexed like the dag's arena.
    fn run_dag<'a>(
        &'a self,
        dag: &'a Dag,
        input: Payload,
        options: &'a ExecutionOptions,
        states: &'a mut Vec<VertexState>,
    ) -> BoxFuture<'a, Result<Payload, EngineError>> {
        async move {
            let order = dag.topological_order()?;
            states.clear();
            states.resize(dag.len(), VertexState::Unvisited);

            let mut inboxes: Vec<Inputs> = vec![Inputs::new(); dag.len()];
            let mut input = Some(input);
            let mut output = Payload::new();

            for idx in order {
                let node = dag.node_at(idx);
                let mut inbox = std::mem::take(&mut inboxes[idx.index()]);
                if dag.parents(idx).next().is_none() {
                    inbox.insert(INPUT_KEY.to_owned(), input.take().unwrap_or_default());
                }

                states[idx.index()] = VertexState::Ready;
                debug!("vertex '{}' ready with {} input(s)", node.id(), inbox.len());

                states[idx.index()] = VertexState::Executing;
                output = match self.run_vertex(node, inbox, options).await {
                    Ok(output) => output,
                    Err(err) => {
                        states[idx.index()] = VertexState::Errored;
                        warn!("vertex '{}' failed: {}", node.id(), err);
                        return Err(err);
                    }
                };
                states[idx.index()] = VertexState::Done;

                for child in dag.children(idx) {
                    let child_id = dag.node_at(child).id();
                    let forwarded = match node.edge_policy(child_id) {
                        EdgePolicy::Forward => output.clone(),
                        EdgePolicy::Forwarder(forwarder) => forwarder(&output),
                        EdgePolicy::NoData => continue,
                    };
                    inboxes[child.index()].insert(node.id().to_owned(), forwarded);
                }
            }

            Ok(output)
        }
        .boxed()
    }

    async fn run_vertex(
        &self,
        node: &Node,
        inbox: Inputs,
        options: &ExecutionOptions,
    ) -> Result<Payload, EngineError> {
        let input = gather(node.id(), node.aggregator(), &inbox)?;

        let input = match node.kind() {
            VertexKind::Operations => input,
            VertexKind::SubDag(dag) => {
                let mut states = Vec::new();
                self.run_dag(dag, input, options, &mut states)
                    .await
                    .map_err(|source| branch_error(node, "sub_dag", source))?
            }
            VertexKind::ForEach(branch) => {
                let items = (branch.split)(&input).map_err(|source| EngineError::Split {
                    vertex: node.id().to_owned(),
                    source,
                })?;
                info!("vertex '{}' fanning out over {} item(s)", node.id(), items.len());

                let instances = items.into_iter().enumerate().map(move |(i, item)| {
                    let item = if branch.no_forward { Payload::new() } else { item };
                    async move {
                        let mut states = Vec::new();
                        let output = self
                            .run_dag(&branch.template, item, options, &mut states)
                            .await;
                        (i, output)
                    }
                });
                let results: Vec<(usize, Result<Payload, EngineError>)> = stream::iter(instances)
                    .buffered(self.config.for_each_concurrency.max(1))
                    .collect()
                    .await;

                let mut outputs = Inputs::new();
                for (i, result) in results {
                    let output =
                        result.map_err(|source| branch_error(node, &i.to_string(), source))?;
                    outputs.insert(i.to_string(), output);
                }
                gather(node.id(), branch.sub_aggregator.as_ref(), &outputs)?
            }
            VertexKind::Conditional(branch) => {
                let mut outputs = Inputs::new();
                for key in (branch.classify)(&input) {
                    if outputs.contains_key(&key) {
                        continue;
                    }
                    let Some(dag) = branch.branches.get(&key) else {
                        warn!("vertex '{}' has no branch '{}', skipping", node.id(), key);
                        continue;
                    };
                    debug!("vertex '{}' taking branch '{}'", node.id(), key);

                    let branch_input =
                        if branch.no_forward { Payload::new() } else { input.clone() };
                    let mut states = Vec::new();
                    let output = self
                        .run_dag(dag, branch_input, options, &mut states)
                        .await
                        .map_err(|source| branch_error(node, &key, source))?;
                    outputs.insert(key, output);
                }
                gather(node.id(), branch.sub_aggregator.as_ref(), &outputs)?
            }
        };

        self.run_chain(node, input, options).await
    }

    /// Run the vertex's operations in registration order, each one feeding
    /// the next.
    async fn run_chain(
        &self,
        node: &Node,
        mut payload: Payload,
        options: &ExecutionOptions,
    ) -> Result<Payload, EngineError> {
        for operation in node.operations() {
            payload = operation
                .execute(payload, options)
                .await
                .map_err(|source| EngineError::Operation {
                    vertex: node.id().to_owned(),
                    operation: operation.id(),
                    source,
                })?;
        }
        Ok(payload)
    }
}

/// Merge a vertex's inputs: its aggregator if set, otherwise a single input
/// passes through and several are concatenated.
fn gather(
    vertex: &str,
    aggregator: Option<&Aggregator>,
    inputs: &Inputs,
) -> Result<Payload, EngineError> {
    match aggregator {
        Some(aggregator) => aggregator(inputs).map_err(|source| EngineError::Aggregation {
            vertex: vertex.to_owned(),
            source,
        }),
        None if inputs.len() == 1 => Ok(inputs.values().next().cloned().unwrap_or_default()),
        None => Ok(default_merge(inputs)),
    }
}

fn branch_error(node: &Node, branch: &str, source: EngineError) -> EngineError {
    EngineError::Branch {
        vertex: node.id().to_owned(),
        branch: branch.to_owned(),
        source: Box::new(source),
    }
}
