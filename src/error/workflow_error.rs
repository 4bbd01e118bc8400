//! Workflow-level error types.

use super::NodeError;
use thiserror::Error;

/// Workflow-level errors
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("DSL parse error: {0}")]
    DslParseError(String),
    #[error("Graph build error: {0}")]
    GraphBuildError(String),
    #[error("Cyclic dependency detected among nodes: {}", nodes.join(", "))]
    CyclicDependency { nodes: Vec<String> },
    #[error("Node not found: {0}")]
    NodeNotFound(String),
    #[error("No start node found")]
    NoStartNode,
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Execution timeout: exceeded {0}s")]
    ExecutionTimeout(u64),
    #[error("Max steps exceeded: {0}")]
    MaxStepsExceeded(u32),
    #[error("Workflow aborted: {0}")]
    Aborted(String),
    #[error("Node execution error: node={node_id}, error={error}")]
    NodeExecutionError {
        node_id: String,
        error: String,
        error_type: Option<String>,
    },
    #[error("Node error: {0}")]
    NodeError(Box<NodeError>),
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<NodeError> for WorkflowError {
    fn from(value: NodeError) -> Self {
        WorkflowError::NodeError(Box::new(value))
    }
}

impl From<serde_json::Error> for WorkflowError {
    fn from(e: serde_json::Error) -> Self {
        WorkflowError::InternalError(format!("serialization: {}", e))
    }
}

impl WorkflowError {
    /// Structural errors are raised before any node runs.
    pub fn is_build_error(&self) -> bool {
        matches!(
            self,
            WorkflowError::DslParseError(_)
                | WorkflowError::GraphBuildError(_)
                | WorkflowError::CyclicDependency { .. }
                | WorkflowError::NoStartNode
        )
    }
}
