//! Error types for the graph engine.
//!
//! - [`NodeError`]: errors raised while a single node executes. They never
//!   escape the worker: the node reports them as a failure event.
//! - [`WorkflowError`]: graph construction and run-level errors.

pub mod node_error;
pub mod workflow_error;

pub use node_error::NodeError;
pub use workflow_error::WorkflowError;

/// Convenience alias for workflow-level results.
pub type WorkflowResult<T> = Result<T, WorkflowError>;
/// Convenience alias for node-level results.
pub type NodeResult<T> = Result<T, NodeError>;
