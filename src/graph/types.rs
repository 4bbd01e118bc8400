use std::collections::HashMap;

use serde_json::Value;

use crate::dsl::{ErrorStrategyType, NodeType, RetryConfig, DEFAULT_SOURCE_HANDLE, FAIL_BRANCH_HANDLE};

/// Graph node: static definition of one workflow step.
#[derive(Debug, Clone)]
pub struct GraphNode {
    /// Node ID (the DSL `id`).
    pub id: String,

    pub node_type: NodeType,

    /// Type-specific configuration (the DSL `data` minus the common keys).
    pub config: Value,

    pub title: String,

    pub error_strategy: ErrorStrategyType,

    /// Outputs used by the default-value strategy.
    pub default_value: HashMap<String, Value>,

    pub retry_config: Option<RetryConfig>,
}

impl GraphNode {
    pub fn new(id: impl Into<String>, node_type: NodeType, config: Value) -> Self {
        let id = id.into();
        GraphNode {
            title: id.clone(),
            id,
            node_type,
            config,
            error_strategy: ErrorStrategyType::None,
            default_value: HashMap::new(),
            retry_config: None,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.retry_config
            .as_ref()
            .map(RetryConfig::effective_max_retries)
            .unwrap_or(0)
    }
}

/// Directed control-flow edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphEdge {
    pub id: String,

    pub source: String,

    pub target: String,

    /// Branch selector; `"source"` means unconditional.
    pub source_handle: String,

    pub target_handle: Option<String>,
}

impl GraphEdge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self::with_handle(source, target, DEFAULT_SOURCE_HANDLE)
    }

    pub fn with_handle(
        source: impl Into<String>,
        target: impl Into<String>,
        handle: impl Into<String>,
    ) -> Self {
        let source = source.into();
        let target = target.into();
        let source_handle = handle.into();
        GraphEdge {
            id: default_edge_id(&source, &source_handle, &target),
            source,
            target,
            source_handle,
            target_handle: None,
        }
    }

    pub fn is_fail_branch(&self) -> bool {
        self.source_handle == FAIL_BRANCH_HANDLE
    }
}

pub(crate) fn default_edge_id(source: &str, handle: &str, target: &str) -> String {
    format!("{}-{}-{}", source, handle, target)
}
