use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::stream::BoxStream;
use futures::FutureExt;
use tokio::sync::mpsc;

use crate::core::events::{GraphEngineEvent, NodeRunMeta};
use crate::core::runtime_context::RuntimeContext;
use crate::core::runtime_state::GraphRuntimeState;
use crate::dsl::schema::{NodeRunResult, NodeType, WorkflowNodeExecutionStatus};
use crate::error::NodeError;
use crate::graph::GraphNode;

use super::executor::{NodeContext, NodeEventEmitter, NodeExecutor, NodeOutcome};

/// A graph node bound to its executor and the run's shared state.
pub struct Node {
    id: String,
    node_type: NodeType,
    title: String,
    executor: Box<dyn NodeExecutor>,
    state: Arc<GraphRuntimeState>,
    context: Arc<RuntimeContext>,
}

enum Step {
    Event(Option<GraphEngineEvent>),
    Done(std::thread::Result<Result<NodeOutcome, NodeError>>),
}

impl Node {
    pub fn new(
        node: &GraphNode,
        executor: Box<dyn NodeExecutor>,
        state: Arc<GraphRuntimeState>,
        context: Arc<RuntimeContext>,
    ) -> Self {
        Node {
            id: node.id.clone(),
            node_type: node.node_type,
            title: node.title.clone(),
            executor,
            state,
            context,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn node_type(&self) -> NodeType {
        self.node_type
    }

    pub fn should_stop(&self) -> bool {
        self.state.stop_event().is_set()
    }

    /// Execute once. The stream yields `NodeRunStarted`, any intermediate
    /// events, then exactly one of `NodeRunSucceeded`, `NodeRunFailed` or
    /// `PauseRequested`.
    pub fn run(self: &Arc<Self>) -> BoxStream<'static, GraphEngineEvent> {
        let node = Arc::clone(self);
        Box::pin(async_stream::stream! {
            let meta = NodeRunMeta {
                id: node.context.id_generator.next_id(),
                node_id: node.id.clone(),
                node_type: node.node_type,
                node_title: node.title.clone(),
                start_at: node.context.time_provider.now_utc(),
                container: None,
            };
            yield GraphEngineEvent::NodeRunStarted { meta: meta.clone() };

            if node.should_stop() {
                yield failed_event(meta, &NodeError::Cancelled);
                return;
            }

            let (tx, mut rx) = mpsc::unbounded_channel();
            let emitter = NodeEventEmitter::new(meta.clone(), tx);
            // shallow: node field maps are shared until the dispatcher writes them
            let pool = node.state.variable_pool().clone();
            let exec = {
                let node = Arc::clone(&node);
                async move {
                    let ctx = NodeContext {
                        node_id: &node.id,
                        pool: &pool,
                        state: &node.state,
                        runtime: &node.context,
                        emitter: &emitter,
                    };
                    node.executor.execute(&ctx).await
                }
            };
            let exec = AssertUnwindSafe(exec).catch_unwind();
            tokio::pin!(exec);

            let finished = loop {
                let step = tokio::select! {
                    ev = rx.recv() => Step::Event(ev),
                    res = &mut exec => Step::Done(res),
                };
                match step {
                    Step::Event(Some(ev)) => yield ev,
                    // emitter dropped: the executor is completing
                    Step::Event(None) => break (&mut exec).await,
                    Step::Done(res) => break res,
                }
            };
            while let Ok(ev) = rx.try_recv() {
                yield ev;
            }

            match finished {
                Ok(Ok(NodeOutcome::Completed(mut result))) => {
                    result.status = WorkflowNodeExecutionStatus::Succeeded;
                    yield GraphEngineEvent::NodeRunSucceeded { meta, result };
                }
                Ok(Ok(NodeOutcome::Paused(reason))) => {
                    yield GraphEngineEvent::PauseRequested { meta, reason };
                }
                Ok(Err(err)) => {
                    yield failed_event(meta, &err);
                }
                Err(panic) => {
                    let msg = panic_message(panic.as_ref());
                    tracing::error!(node_id = %meta.node_id, panic = %msg, "Node panicked");
                    yield failed_event(
                        meta,
                        &NodeError::ExecutionError(format!("Node panicked: {}", msg)),
                    );
                }
            }
        })
    }
}

fn failed_event(meta: NodeRunMeta, err: &NodeError) -> GraphEngineEvent {
    let status = if err.is_cancelled() {
        WorkflowNodeExecutionStatus::Stopped
    } else {
        WorkflowNodeExecutionStatus::Failed
    };
    GraphEngineEvent::NodeRunFailed {
        meta,
        error: err.to_string(),
        result: NodeRunResult {
            status,
            error: Some(err.to_string()),
            error_type: Some(err.error_type().to_string()),
            ..Default::default()
        },
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
