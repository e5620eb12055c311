//! Flow-level error types.

use operations::OperationError;
use thiserror::Error;

/// Configuration errors raised while a workflow is being built.
///
/// These are fatal: a workflow that produced one must not be executed.
#[derive(Debug, Error)]
pub enum BuildError {
    /// A composite vertex reused an existing vertex id.
    #[error("duplicate vertex ID: '{0}'")]
    DuplicateVertex(String),

    /// An edge references a vertex that doesn't exist in the dag.
    #[error("edge references unknown vertex '{vertex_id}' ({side} side)")]
    UnknownVertex {
        vertex_id: String,
        side: &'static str,
    },

    #[error("edge '{from}' -> '{to}' is declared twice")]
    DuplicateEdge { from: String, to: String },

    /// Topological sort detected a cycle (self edges included).
    #[error("dag contains a cycle")]
    CycleDetected,

    /// `append` was given a dag sharing a vertex with this one.
    #[error("cannot append dag: vertex '{0}' exists in both dags")]
    NonDisjointAppend(String),

    #[error("conditional branch '{vertex}' declares key '{key}' twice")]
    DuplicateBranchKey { vertex: String, key: String },

    #[error("conditional branch '{0}' declares no keys")]
    NoBranchKeys(String),

    #[error("dag has no vertices")]
    EmptyDag,

    #[error("dag has more than one start vertex: {0:?}")]
    MultipleStartVertices(Vec<String>),

    #[error("dag has more than one end vertex: {0:?}")]
    MultipleEndVertices(Vec<String>),

    /// A dag embedded under `vertex` failed validation.
    #[error("invalid dag under vertex '{vertex}': {source}")]
    InvalidSubDag {
        vertex: String,
        #[source]
        source: Box<BuildError>,
    },
}

/// Errors surfaced while a pipeline executes.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid workflow: {0}")]
    Build(#[from] BuildError),

    /// An operation failed and its failure handler did not recover it.
    #[error("vertex '{vertex}' failed in operation '{operation}': {source}")]
    Operation {
        vertex: String,
        operation: String,
        #[source]
        source: OperationError,
    },

    #[error("vertex '{vertex}' could not aggregate its inputs: {source}")]
    Aggregation {
        vertex: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("vertex '{vertex}' could not split its input: {source}")]
    Split {
        vertex: String,
        #[source]
        source: anyhow::Error,
    },

    /// A sub-dag, for-each instance or conditional branch failed.
    #[error("vertex '{vertex}' branch '{branch}' failed: {source}")]
    Branch {
        vertex: String,
        branch: String,
        #[source]
        source: Box<EngineError>,
    },

    /// Raised by pipeline failure handlers.
    #[error("{0}")]
    Custom(String),
}

impl EngineError {
    /// The operation error at the root of this failure, if any.
    pub fn operation_error(&self) -> Option<&OperationError> {
        match self {
            Self::Operation { source, .. } => Some(source),
            Self::Branch { source, .. } => source.operation_error(),
            _ => None,
        }
    }
}
