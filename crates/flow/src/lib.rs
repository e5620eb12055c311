//! `flow` crate: the DAG builder, workflow models, validation and the
//! reference execution engine.

pub mod dag;
pub mod description;
pub mod error;
pub mod executor;
pub mod models;
pub mod node;

pub use dag::{BranchDags, Dag, Edge, NodeIndex};
pub use description::{
    DagDescription, EdgeDescription, OperationDescription, VertexDescription, VertexKindDescription,
};
pub use error::{BuildError, EngineError};
pub use executor::{default_merge, ExecutionResult, ExecutorConfig, LocalEngine, PipelineEngine};
pub use models::{
    Pipeline, PipelineErrorHandler, PipelineHandler, PipelineState, VertexState, Workflow,
    SYNC_NODE_ID,
};
pub use node::{
    Aggregator, BranchOptions, ClassifyFn, ConditionalBranch, EdgePolicy, ForEachBranch,
    Forwarder, Inputs, Node, SplitFn, VertexKind,
};

#[cfg(test)]
mod executor_tests;
