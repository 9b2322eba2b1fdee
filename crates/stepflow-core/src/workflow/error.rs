//! Error types for graph validation and the engine service.

use uuid::Uuid;

/// Structural problems found while validating a workflow graph.
///
/// All of these are fatal and reported before any step runs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphValidationError {
    #[error("workflow has no nodes")]
    Empty,

    #[error("duplicate node id '{0}'")]
    DuplicateNodeId(String),

    #[error("edge {edge} references unknown node '{node_id}'")]
    UnknownNode { node_id: String, edge: String },

    #[error("condition on edge {edge} does not parse: {message}")]
    InvalidCondition { edge: String, message: String },

    #[error("cycle detected between '{from}' and '{to}'")]
    CycleDetected { from: String, to: String },

    #[error("workflow has no input node without dependencies")]
    MissingInput,

    #[error("workflow has no terminal output node")]
    MissingOutput,

    #[error("nodes not connected from an input to an output: {}", node_ids.join(", "))]
    Unreachable { node_ids: Vec<String> },
}

/// Errors returned by the workflow engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Graph(#[from] GraphValidationError),

    #[error("node '{node_id}' has unsupported step type '{step_type}'")]
    UnsupportedStepType { node_id: String, step_type: String },

    #[error("node '{node_id}' has invalid configuration: {message}")]
    InvalidStepConfig { node_id: String, message: String },

    #[error("workflow {0} not found")]
    WorkflowNotFound(Uuid),

    #[error("run {0} not found")]
    RunNotFound(Uuid),

    /// The run ended because it was cancelled. Not a step failure.
    #[error("run {run_id} was cancelled")]
    Cancelled { run_id: Uuid },

    #[error("run {run_id} failed: {message}")]
    RunFailed { run_id: Uuid, message: String },
}

impl EngineError {
    /// Whether this error was detected before any step executed.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            EngineError::Graph(_)
                | EngineError::UnsupportedStepType { .. }
                | EngineError::InvalidStepConfig { .. }
        )
    }
}
