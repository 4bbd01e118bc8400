//! Nested execution of a container node's embedded graph.
//!
//! Each run gets its own [`GraphEngine`] over a copy of the parent's pool,
//! and a stop event chained to the parent's so stopping the outer run
//! cancels every nested one. Node events of the nested run can be relayed
//! to the container's emitter, tagged with a [`ContainerScope`].

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use serde_json::Value;

use super::config::EngineConfig;
use super::engine::GraphEngine;
use super::events::{ContainerScope, GraphEngineEvent};
use super::runtime_context::RuntimeContext;
use super::runtime_state::{GraphRuntimeState, StopEvent};
use super::variable_pool::VariablePool;
use crate::dsl::schema::SubGraphDefinition;
use crate::error::{NodeError, WorkflowResult};
use crate::graph::{build_graph, Graph};
use crate::nodes::executor::NodeEventEmitter;

/// Result of one successful nested run.
#[derive(Debug, Clone)]
pub struct SubGraphRun {
    /// Outputs collected from the embedded end / answer nodes.
    pub outputs: HashMap<String, Value>,
    /// Pool as it stood when the nested run finished.
    pub pool: VariablePool,
}

/// Build the embedded graph once, when the container node is created.
pub fn compile_sub_graph(definition: &SubGraphDefinition) -> WorkflowResult<Arc<Graph>> {
    build_graph(&definition.to_workflow()).map(Arc::new)
}

pub async fn run_sub_graph(
    graph: Arc<Graph>,
    pool: VariablePool,
    runtime: &RuntimeContext,
    parent_stop: &Arc<StopEvent>,
    config: &EngineConfig,
    relay: Option<(&NodeEventEmitter, ContainerScope)>,
) -> Result<SubGraphRun, NodeError> {
    let stop = Arc::new(StopEvent::child_of(Arc::clone(parent_stop)));
    let state = Arc::new(GraphRuntimeState::with_stop_event(pool, stop));
    let engine = GraphEngine::with_context(graph, Arc::clone(&state), config.clone(), runtime.clone())
        .map_err(|e| NodeError::ExecutionError(format!("invalid sub-graph: {}", e)))?;

    let mut events = engine.run();
    let mut terminal = None;
    while let Some(mut event) = events.next().await {
        if event.is_graph_terminal() {
            terminal = Some(event);
            continue;
        }
        let Some((emitter, scope)) = &relay else {
            continue;
        };
        if let Some(meta) = event.meta_mut() {
            if meta.container.is_none() {
                meta.container = Some(scope.clone());
            }
            emitter.emit(event);
        }
    }

    match terminal {
        Some(GraphEngineEvent::GraphRunSucceeded { outputs })
        | Some(GraphEngineEvent::GraphRunPartialSucceeded { outputs, .. }) => Ok(SubGraphRun {
            outputs,
            pool: state.variable_pool().clone(),
        }),
        Some(GraphEngineEvent::GraphRunFailed { error, .. }) => {
            Err(NodeError::ExecutionError(error))
        }
        Some(GraphEngineEvent::GraphRunAborted { .. }) => Err(NodeError::Cancelled),
        Some(GraphEngineEvent::GraphRunPaused { .. }) => Err(NodeError::ExecutionError(
            "nodes inside a container cannot pause".to_string(),
        )),
        _ => Err(NodeError::ExecutionError(
            "sub-graph ended without a terminal event".to_string(),
        )),
    }
}
