//! Workflow-level models: the mutable [`Workflow`] builder and the frozen
//! [`Pipeline`] handed to an engine.

use std::fmt;
use std::sync::Arc;

use operations::Payload;
use serde::{Deserialize, Serialize};

use crate::dag::Dag;
use crate::description::DagDescription;
use crate::error::{BuildError, EngineError};
use crate::node::Node;

/// ID of the vertex returned by [`Workflow::sync_node`].
pub const SYNC_NODE_ID: &str = "sync";

/// Final arbiter for an error that reached the top of a pipeline.
///
/// `Ok(payload)` ends the pipeline successfully with `payload`; `Err` keeps
/// it failed.
pub type PipelineErrorHandler =
    Arc<dyn Fn(EngineError) -> Result<Payload, EngineError> + Send + Sync>;

/// Runs once after the pipeline reaches a terminal state.
pub type PipelineHandler = Arc<dyn Fn(PipelineState) + Send + Sync>;

// ---------------------------------------------------------------------------
// States
// ---------------------------------------------------------------------------

/// Terminal state of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Success,
    Failure,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("success"),
            Self::Failure => f.write_str("failure"),
        }
    }
}

/// Lifecycle of a single vertex during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VertexState {
    Unvisited,
    /// All parents are done; inputs are gathered.
    Ready,
    Executing,
    Done,
    Errored,
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// A dag plus its pipeline-level hooks, mutable while it is being built.
#[derive(Clone, Default)]
pub struct Workflow {
    dag: Dag,
    failure_handler: Option<PipelineErrorHandler>,
    finally: Option<PipelineHandler>,
}

impl Workflow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dag(&self) -> &Dag {
        &self.dag
    }

    pub fn dag_mut(&mut self) -> &mut Dag {
        &mut self.dag
    }

    /// Replace the workflow's dag.
    pub fn set_dag(&mut self, dag: Dag) -> &mut Self {
        self.dag = dag;
        self
    }

    pub fn on_failure<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(EngineError) -> Result<Payload, EngineError> + Send + Sync + 'static,
    {
        self.failure_handler = Some(Arc::new(handler));
        self
    }

    pub fn finally<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(PipelineState) + Send + Sync + 'static,
    {
        self.finally = Some(Arc::new(handler));
        self
    }

    /// Shorthand for `dag_mut().node("sync")`.
    pub fn sync_node(&mut self) -> &mut Node {
        self.dag.node(SYNC_NODE_ID)
    }

    /// Validate the workflow and freeze it for execution.
    pub fn into_pipeline(self) -> Result<Pipeline, BuildError> {
        self.dag.validate()?;
        Ok(Pipeline {
            dag: self.dag,
            failure_handler: self.failure_handler,
            finally: self.finally,
        })
    }
}

impl fmt::Debug for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workflow")
            .field("dag", &self.dag)
            .field("failure_handler", &self.failure_handler.is_some())
            .field("finally", &self.finally.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// A validated, read-only workflow.
#[derive(Clone)]
pub struct Pipeline {
    dag: Dag,
    failure_handler: Option<PipelineErrorHandler>,
    finally: Option<PipelineHandler>,
}

impl Pipeline {
    pub fn dag(&self) -> &Dag {
        &self.dag
    }

    pub fn failure_handler(&self) -> Option<&PipelineErrorHandler> {
        self.failure_handler.as_ref()
    }

    pub fn finally_handler(&self) -> Option<&PipelineHandler> {
        self.finally.as_ref()
    }

    pub fn describe(&self) -> DagDescription {
        self.dag.describe()
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("dag", &self.dag)
            .field("failure_handler", &self.failure_handler.is_some())
            .field("finally", &self.finally.is_some())
            .finish()
    }
}
