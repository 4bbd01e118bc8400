use thiserror::Error;

/// Node-level errors
#[derive(Debug, Clone, Error)]
pub enum NodeError {
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Variable not found: {0}")]
    VariableNotFound(String),
    #[error("Execution error: {0}")]
    ExecutionError(String),
    #[error("Type error: {0}")]
    TypeError(String),
    #[error("Template error: {0}")]
    TemplateError(String),
    #[error("Input validation error: {0}")]
    InputValidationError(String),
    #[error("Timeout: node execution exceeded time limit")]
    Timeout,
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("HTTP error: {0}")]
    HttpError(String),
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("Max iterations exceeded: {0}")]
    MaxIterationsExceeded(usize),
    #[error("Node execution cancelled")]
    Cancelled,
}

impl NodeError {
    /// Stable identifier stored in `NodeRunResult::error_type`.
    pub fn error_type(&self) -> &'static str {
        match self {
            NodeError::ConfigError(_) => "ConfigError",
            NodeError::VariableNotFound(_) => "VariableNotFound",
            NodeError::ExecutionError(_) => "ExecutionError",
            NodeError::TypeError(_) => "TypeError",
            NodeError::TemplateError(_) => "TemplateError",
            NodeError::InputValidationError(_) => "InputValidationError",
            NodeError::Timeout => "Timeout",
            NodeError::SerializationError(_) => "SerializationError",
            NodeError::HttpError(_) => "HttpError",
            NodeError::ServiceUnavailable(_) => "ServiceUnavailable",
            NodeError::MaxIterationsExceeded(_) => "MaxIterationsExceeded",
            NodeError::Cancelled => "Cancelled",
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, NodeError::Cancelled)
    }
}

impl From<serde_json::Error> for NodeError {
    fn from(e: serde_json::Error) -> Self {
        NodeError::SerializationError(e.to_string())
    }
}
