use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dsl::{NodeRunResult, NodeType};

/// Why a run suspended instead of finishing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PauseReason {
    /// A human-input node is waiting for a resolution written under its
    /// stable `node_id`.
    HumanInputRequired { form_id: String, node_id: String },
}

impl PauseReason {
    pub fn node_id(&self) -> &str {
        match self {
            PauseReason::HumanInputRequired { node_id, .. } => node_id,
        }
    }
}

/// Kind of container a nested node event was produced in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerKind {
    Iteration,
    Loop,
}

/// Container execution that a nested node event belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerScope {
    pub kind: ContainerKind,
    /// Execution id of the container node.
    pub execution_id: String,
    pub node_id: String,
    /// Item index of an iteration, round of a loop.
    pub index: usize,
}

/// Identity shared by every event of one node execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRunMeta {
    /// Per-execution id. Retries of a node keep the id of its first
    /// attempt; a new run gets a new one.
    pub id: String,
    /// Stable workflow-level node id.
    pub node_id: String,
    pub node_type: NodeType,
    pub node_title: String,
    pub start_at: DateTime<Utc>,
    /// Set on events of nodes inside an iteration or loop body. The innermost
    /// container wins.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<ContainerScope>,
}

impl NodeRunMeta {
    /// Whether the event comes from a container body rather than the graph
    /// being dispatched.
    pub fn is_nested(&self) -> bool {
        self.container.is_some()
    }
}

/// Event stream produced by [`GraphEngine::run`](crate::core::GraphEngine::run).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GraphEngineEvent {
    // ---- graph level ----
    GraphRunStarted,
    GraphRunSucceeded {
        outputs: HashMap<String, Value>,
    },
    GraphRunPartialSucceeded {
        exceptions_count: u32,
        outputs: HashMap<String, Value>,
    },
    GraphRunFailed {
        error: String,
        exceptions_count: u32,
    },
    GraphRunAborted {
        reason: Option<String>,
        outputs: HashMap<String, Value>,
    },
    GraphRunPaused {
        reasons: Vec<PauseReason>,
        outputs: HashMap<String, Value>,
    },

    // ---- node level ----
    NodeRunStarted {
        #[serde(flatten)]
        meta: NodeRunMeta,
    },
    NodeRunSucceeded {
        #[serde(flatten)]
        meta: NodeRunMeta,
        result: NodeRunResult,
    },
    NodeRunFailed {
        #[serde(flatten)]
        meta: NodeRunMeta,
        error: String,
        result: NodeRunResult,
    },
    /// Failure absorbed by the fail-branch or default-value strategy.
    NodeRunException {
        #[serde(flatten)]
        meta: NodeRunMeta,
        error: String,
        result: NodeRunResult,
    },
    NodeRunRetry {
        #[serde(flatten)]
        meta: NodeRunMeta,
        error: String,
        retry_index: u32,
    },
    PauseRequested {
        #[serde(flatten)]
        meta: NodeRunMeta,
        reason: PauseReason,
    },
    /// Incremental text of a streaming output, addressed by its selector.
    NodeRunStreamChunk {
        #[serde(flatten)]
        meta: NodeRunMeta,
        selector: Vec<String>,
        chunk: String,
        is_final: bool,
    },

    // ---- containers ----
    IterationStarted {
        #[serde(flatten)]
        meta: NodeRunMeta,
        total: usize,
    },
    IterationNext {
        #[serde(flatten)]
        meta: NodeRunMeta,
        index: usize,
    },
    IterationSucceeded {
        #[serde(flatten)]
        meta: NodeRunMeta,
        outputs: HashMap<String, Value>,
    },
    IterationFailed {
        #[serde(flatten)]
        meta: NodeRunMeta,
        error: String,
    },
    LoopStarted {
        #[serde(flatten)]
        meta: NodeRunMeta,
        loop_count: usize,
    },
    LoopNext {
        #[serde(flatten)]
        meta: NodeRunMeta,
        index: usize,
    },
    LoopSucceeded {
        #[serde(flatten)]
        meta: NodeRunMeta,
        outputs: HashMap<String, Value>,
    },
    LoopFailed {
        #[serde(flatten)]
        meta: NodeRunMeta,
        error: String,
    },
}

impl GraphEngineEvent {
    pub fn meta(&self) -> Option<&NodeRunMeta> {
        use GraphEngineEvent::*;
        match self {
            NodeRunStarted { meta }
            | NodeRunSucceeded { meta, .. }
            | NodeRunFailed { meta, .. }
            | NodeRunException { meta, .. }
            | NodeRunRetry { meta, .. }
            | PauseRequested { meta, .. }
            | NodeRunStreamChunk { meta, .. }
            | IterationStarted { meta, .. }
            | IterationNext { meta, .. }
            | IterationSucceeded { meta, .. }
            | IterationFailed { meta, .. }
            | LoopStarted { meta, .. }
            | LoopNext { meta, .. }
            | LoopSucceeded { meta, .. }
            | LoopFailed { meta, .. } => Some(meta),
            _ => None,
        }
    }

    pub fn meta_mut(&mut self) -> Option<&mut NodeRunMeta> {
        use GraphEngineEvent::*;
        match self {
            NodeRunStarted { meta }
            | NodeRunSucceeded { meta, .. }
            | NodeRunFailed { meta, .. }
            | NodeRunException { meta, .. }
            | NodeRunRetry { meta, .. }
            | PauseRequested { meta, .. }
            | NodeRunStreamChunk { meta, .. }
            | IterationStarted { meta, .. }
            | IterationNext { meta, .. }
            | IterationSucceeded { meta, .. }
            | IterationFailed { meta, .. }
            | LoopStarted { meta, .. }
            | LoopNext { meta, .. }
            | LoopSucceeded { meta, .. }
            | LoopFailed { meta, .. } => Some(meta),
            _ => None,
        }
    }

    pub fn node_id(&self) -> Option<&str> {
        self.meta().map(|m| m.node_id.as_str())
    }

    /// Last event of a node execution as produced by a worker.
    pub fn is_node_terminal(&self) -> bool {
        matches!(
            self,
            GraphEngineEvent::NodeRunSucceeded { .. }
                | GraphEngineEvent::NodeRunFailed { .. }
                | GraphEngineEvent::PauseRequested { .. }
        )
    }

    /// Last event of a `run()` invocation.
    pub fn is_graph_terminal(&self) -> bool {
        matches!(
            self,
            GraphEngineEvent::GraphRunSucceeded { .. }
                | GraphEngineEvent::GraphRunPartialSucceeded { .. }
                | GraphEngineEvent::GraphRunFailed { .. }
                | GraphEngineEvent::GraphRunAborted { .. }
                | GraphEngineEvent::GraphRunPaused { .. }
        )
    }

    /// Snake-case event name, as used in the serialized `event` tag.
    pub fn name(&self) -> &'static str {
        use GraphEngineEvent::*;
        match self {
            GraphRunStarted => "graph_run_started",
            GraphRunSucceeded { .. } => "graph_run_succeeded",
            GraphRunPartialSucceeded { .. } => "graph_run_partial_succeeded",
            GraphRunFailed { .. } => "graph_run_failed",
            GraphRunAborted { .. } => "graph_run_aborted",
            GraphRunPaused { .. } => "graph_run_paused",
            NodeRunStarted { .. } => "node_run_started",
            NodeRunSucceeded { .. } => "node_run_succeeded",
            NodeRunFailed { .. } => "node_run_failed",
            NodeRunException { .. } => "node_run_exception",
            NodeRunRetry { .. } => "node_run_retry",
            PauseRequested { .. } => "pause_requested",
            NodeRunStreamChunk { .. } => "node_run_stream_chunk",
            IterationStarted { .. } => "iteration_started",
            IterationNext { .. } => "iteration_next",
            IterationSucceeded { .. } => "iteration_succeeded",
            IterationFailed { .. } => "iteration_failed",
            LoopStarted { .. } => "loop_started",
            LoopNext { .. } => "loop_next",
            LoopSucceeded { .. } => "loop_succeeded",
            LoopFailed { .. } => "loop_failed",
        }
    }
}
