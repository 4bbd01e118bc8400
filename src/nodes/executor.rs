use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;

use crate::core::config::EngineConfig;
use crate::core::events::{GraphEngineEvent, NodeRunMeta, PauseReason};
use crate::core::runtime_context::RuntimeContext;
use crate::core::runtime_state::GraphRuntimeState;
use crate::core::variable_pool::VariablePool;
use crate::dsl::schema::{NodeRunResult, NodeType};
use crate::error::{NodeError, WorkflowError, WorkflowResult};
use crate::graph::GraphNode;
use crate::llm::{AgentNodeExecutor, LlmNodeExecutor, QuestionClassifierExecutor};

use super::control_flow::{
    AnswerNodeExecutor, EndNodeExecutor, IfElseNodeExecutor, PassThroughExecutor, StartNodeExecutor,
};
use super::data_transform::{
    CodeNodeExecutor, HttpRequestExecutor, TemplateTransformExecutor, VariableAggregatorExecutor,
};
use super::human_input::HumanInputExecutor;
use super::knowledge_retrieval::KnowledgeRetrievalExecutor;
use super::subgraph_nodes::{IterationNodeExecutor, LoopNodeExecutor};

/// What a node execution ended with.
#[derive(Debug, Clone)]
pub enum NodeOutcome {
    Completed(NodeRunResult),
    /// Suspend the run until an external resolution is written.
    Paused(PauseReason),
}

impl From<NodeRunResult> for NodeOutcome {
    fn from(result: NodeRunResult) -> Self {
        NodeOutcome::Completed(result)
    }
}

/// Channel for intermediate events (container progress) of one execution.
#[derive(Debug, Clone)]
pub struct NodeEventEmitter {
    meta: NodeRunMeta,
    tx: mpsc::UnboundedSender<GraphEngineEvent>,
}

impl NodeEventEmitter {
    pub fn new(meta: NodeRunMeta, tx: mpsc::UnboundedSender<GraphEngineEvent>) -> Self {
        Self { meta, tx }
    }

    pub fn meta(&self) -> &NodeRunMeta {
        &self.meta
    }

    pub fn emit(&self, event: GraphEngineEvent) {
        // the receiver lives as long as the node's run() stream
        let _ = self.tx.send(event);
    }

    /// Emit a piece of streamed output for `selector`.
    pub fn stream_chunk(&self, selector: Vec<String>, chunk: impl Into<String>, is_final: bool) {
        self.emit(GraphEngineEvent::NodeRunStreamChunk {
            meta: self.meta.clone(),
            selector,
            chunk: chunk.into(),
            is_final,
        });
    }
}

/// Everything an executor may look at while running.
pub struct NodeContext<'a> {
    pub node_id: &'a str,
    /// Read-only snapshot taken when the execution started.
    pub pool: &'a VariablePool,
    pub state: &'a GraphRuntimeState,
    pub runtime: &'a RuntimeContext,
    pub emitter: &'a NodeEventEmitter,
}

impl NodeContext<'_> {
    pub fn should_stop(&self) -> bool {
        self.state.stop_event().is_set()
    }

    pub fn check_stop(&self) -> Result<(), NodeError> {
        if self.should_stop() {
            Err(NodeError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Trait for node execution. Each node type implements this.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError>;
}

/// Resolves a node's type tag to its executor once, when the engine is built.
pub struct NodeFactory;

impl NodeFactory {
    pub fn create(node: &GraphNode, config: &EngineConfig) -> WorkflowResult<Box<dyn NodeExecutor>> {
        let executor: Box<dyn NodeExecutor> = match node.node_type {
            NodeType::Start => Box::new(StartNodeExecutor::new(parse_config(node)?)),
            NodeType::End => Box::new(EndNodeExecutor::new(parse_config(node)?)),
            NodeType::Answer => Box::new(AnswerNodeExecutor::new(parse_config(node)?)),
            NodeType::IfElse => Box::new(IfElseNodeExecutor::new(parse_config(node)?)),
            NodeType::IterationStart | NodeType::LoopStart => Box::new(PassThroughExecutor),
            NodeType::TemplateTransform => {
                Box::new(TemplateTransformExecutor::new(parse_config(node)?))
            }
            NodeType::Code => Box::new(CodeNodeExecutor::new(parse_config(node)?)),
            NodeType::VariableAggregator => {
                Box::new(VariableAggregatorExecutor::new(parse_config(node)?))
            }
            NodeType::HttpRequest => Box::new(HttpRequestExecutor::new(parse_config(node)?)),
            NodeType::KnowledgeRetrieval => {
                Box::new(KnowledgeRetrievalExecutor::new(parse_config(node)?))
            }
            NodeType::HumanInput => Box::new(HumanInputExecutor::new(parse_config(node)?)),
            NodeType::Llm => Box::new(LlmNodeExecutor::new(parse_config(node)?)),
            NodeType::QuestionClassifier => {
                Box::new(QuestionClassifierExecutor::new(parse_config(node)?).map_err(
                    |e| {
                        WorkflowError::GraphBuildError(format!(
                            "Invalid config for {} node '{}': {}",
                            node.node_type, node.id, e
                        ))
                    },
                )?)
            }
            NodeType::Agent => Box::new(AgentNodeExecutor::new(parse_config(node)?)),
            NodeType::Iteration => Box::new(IterationNodeExecutor::new(
                parse_config(node)?,
                config.clone(),
            )?),
            NodeType::Loop => Box::new(LoopNodeExecutor::new(parse_config(node)?, config.clone())?),
        };
        Ok(executor)
    }
}

/// Parse the typed config of `node`; failures surface at build time.
pub(crate) fn parse_config<T: DeserializeOwned>(node: &GraphNode) -> WorkflowResult<T> {
    serde_json::from_value(node.config.clone()).map_err(|e| {
        WorkflowError::GraphBuildError(format!(
            "Invalid config for {} node '{}': {}",
            node.node_type, node.id, e
        ))
    })
}
