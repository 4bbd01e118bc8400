use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::stream::BoxStream;
use tokio::sync::mpsc;

use super::command_channel::{CommandChannel, InMemoryCommandChannel};
use super::config::EngineConfig;
use super::dispatcher::{Dispatcher, RunOutcome};
use super::events::GraphEngineEvent;
use super::execution::ExecutionStatus;
use super::layers::{notify_layers, Layer};
use super::ready_queue::ReadyQueue;
use super::runtime_context::RuntimeContext;
use super::runtime_state::{GraphRuntimeState, StopEvent};
use super::variable_pool::{
    Segment, Selector, VariablePool, CONVERSATION_NODE_ID, ENVIRONMENT_NODE_ID,
};
use super::worker_pool::{initial_worker_count, WorkerPool, WorkerPoolConfig};
use crate::dsl::WorkflowSchema;
use crate::error::{WorkflowError, WorkflowResult};
use crate::graph::{build_graph, Graph};
use crate::nodes::{Node, NodeFactory};

/// Clears the engine's running flag when dropped.
struct RunningReset(Arc<AtomicBool>);

impl Drop for RunningReset {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Winds a run down when its event stream is dropped before the end.
struct RunGuard {
    state: Arc<GraphRuntimeState>,
    queue: Arc<ReadyQueue>,
    finished: bool,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        tracing::debug!("Event stream dropped before the run finished; stopping");
        self.state.stop_event().set();
        self.queue.close();
        let mut execution = self.state.execution();
        if execution.status() == ExecutionStatus::Running {
            execution.set_status(ExecutionStatus::Aborted);
        }
    }
}

/// Runs a [`Graph`] against a [`GraphRuntimeState`].
///
/// Every [`run`](GraphEngine::run) starts a fresh worker pool and
/// dispatcher. A run that ended paused or aborted is resumed by the next
/// `run()`; any other outcome makes the next `run()` start over from the
/// root, keeping the variable pool.
///
/// ```rust,no_run
/// use futures::StreamExt;
/// use xworkflow_engine::{parse_dsl, DslFormat, GraphEngine, VariablePool};
///
/// # async fn demo(yaml: &str) -> xworkflow_engine::WorkflowResult<()> {
/// let schema = parse_dsl(yaml, DslFormat::Yaml)?;
/// let engine = GraphEngine::from_schema(&schema, VariablePool::new(), Default::default())?;
/// let mut events = engine.run();
/// while let Some(event) = events.next().await {
///     println!("{}", event.name());
/// }
/// # Ok(())
/// # }
/// ```
pub struct GraphEngine {
    graph: Arc<Graph>,
    state: Arc<GraphRuntimeState>,
    nodes: Arc<HashMap<String, Arc<Node>>>,
    config: EngineConfig,
    commands: Arc<dyn CommandChannel>,
    layers: Vec<Arc<dyn Layer>>,
    running: Arc<AtomicBool>,
}

impl GraphEngine {
    pub fn new(
        graph: Arc<Graph>,
        state: Arc<GraphRuntimeState>,
        config: EngineConfig,
    ) -> WorkflowResult<Self> {
        Self::with_context(graph, state, config, RuntimeContext::default())
    }

    pub fn with_context(
        graph: Arc<Graph>,
        state: Arc<GraphRuntimeState>,
        config: EngineConfig,
        context: RuntimeContext,
    ) -> WorkflowResult<Self> {
        config.validate()?;
        state.attach_graph(&graph)?;
        seed_graph_variables(&graph, &mut state.variable_pool_mut());

        let context = Arc::new(context);
        let mut nodes = HashMap::with_capacity(graph.node_count());
        for graph_node in graph.nodes() {
            let executor = NodeFactory::create(graph_node, &config)?;
            let node = Node::new(graph_node, executor, Arc::clone(&state), Arc::clone(&context));
            nodes.insert(graph_node.id.clone(), Arc::new(node));
        }

        Ok(Self {
            graph,
            state,
            nodes: Arc::new(nodes),
            config,
            commands: Arc::new(InMemoryCommandChannel::new()),
            layers: Vec::new(),
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Build the graph from `schema` and bind a fresh runtime state.
    pub fn from_schema(
        schema: &WorkflowSchema,
        pool: VariablePool,
        config: EngineConfig,
    ) -> WorkflowResult<Self> {
        let graph = Arc::new(build_graph(schema)?);
        Self::new(graph, Arc::new(GraphRuntimeState::new(pool)), config)
    }

    pub fn layer(mut self, layer: impl Layer + 'static) -> Self {
        self.layers.push(Arc::new(layer));
        self
    }

    pub fn command_channel(mut self, channel: Arc<dyn CommandChannel>) -> Self {
        self.commands = channel;
        self
    }

    pub fn commands(&self) -> &Arc<dyn CommandChannel> {
        &self.commands
    }

    /// Request a cooperative stop of the current run.
    pub fn stop(&self) {
        self.state.stop_event().set();
    }

    pub fn state(&self) -> &Arc<GraphRuntimeState> {
        &self.state
    }

    pub fn graph(&self) -> &Arc<Graph> {
        &self.graph
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Execute the graph. The stream always starts with `GraphRunStarted`
    /// and ends with exactly one graph-terminal event.
    pub fn run(&self) -> BoxStream<'static, GraphEngineEvent> {
        let graph = Arc::clone(&self.graph);
        let state = Arc::clone(&self.state);
        let nodes = Arc::clone(&self.nodes);
        let config = self.config.clone();
        let commands = Arc::clone(&self.commands);
        let layers = self.layers.clone();
        let running = Arc::clone(&self.running);

        Box::pin(async_stream::stream! {
            if running.swap(true, Ordering::SeqCst) {
                tracing::warn!("run() called while a run is in progress");
                yield GraphEngineEvent::GraphRunStarted;
                yield GraphEngineEvent::GraphRunFailed {
                    error: WorkflowError::InternalError("engine is already running".into())
                        .to_string(),
                    exceptions_count: 0,
                };
                return;
            }
            let running_reset = RunningReset(running);
            let queue = Arc::new(ReadyQueue::new());
            let mut guard = RunGuard {
                state: Arc::clone(&state),
                queue: Arc::clone(&queue),
                finished: false,
            };

            let stop: Arc<StopEvent> = Arc::clone(state.stop_event());
            stop.clear();
            state.mark_started();
            state.reset_node_run_steps();

            let initial = {
                let mut execution = state.execution();
                let initial = if execution.status().is_resumable() {
                    execution.clear_pause_reasons();
                    execution.resumable_nodes(&graph)
                } else {
                    execution.reset(&graph);
                    state.outputs_mut().clear();
                    vec![graph.root_node_id().to_string()]
                };
                execution.set_status(ExecutionStatus::Running);
                initial
            };
            tracing::info!(
                nodes = graph.node_count(),
                initial = ?initial,
                "Graph run started"
            );

            notify_layers(&layers, "on_graph_start", |l| l.on_graph_start(&state));
            let started = GraphEngineEvent::GraphRunStarted;
            notify_layers(&layers, "on_event", |l| l.on_event(&started));
            yield started;

            let (event_tx, event_rx) = mpsc::unbounded_channel();
            let (out_tx, mut out_rx) = mpsc::unbounded_channel();
            let pool_config = WorkerPoolConfig::from(&config);
            let worker_count = initial_worker_count(graph.node_count(), &pool_config);
            let mut pool = WorkerPool::new(
                pool_config,
                Arc::clone(&queue),
                Arc::clone(&nodes),
                event_tx,
                Arc::clone(&stop),
            );
            pool.start(worker_count);

            let dispatcher = Dispatcher::new(
                Arc::clone(&graph),
                Arc::clone(&state),
                Arc::clone(&queue),
                pool,
                event_rx,
                out_tx,
                commands,
                config.clone(),
            );
            let mut handle = tokio::spawn(async move {
                let _running = running_reset;
                dispatcher.run(initial).await
            });

            while let Some(event) = out_rx.recv().await {
                notify_layers(&layers, "on_event", |l| l.on_event(&event));
                yield event;
            }

            let outcome = match tokio::time::timeout(config.join_timeout(), &mut handle).await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "Dispatcher task failed");
                    RunOutcome::Failed(WorkflowError::InternalError(format!(
                        "dispatcher task failed: {}",
                        e
                    )))
                }
                Err(_) => {
                    tracing::warn!("Dispatcher did not stop in time; abandoning it");
                    handle.abort();
                    RunOutcome::Failed(WorkflowError::InternalError(
                        "dispatcher did not stop in time".into(),
                    ))
                }
            };
            queue.close();
            stop.set();

            let outputs = state.outputs();
            let exceptions_count = state.execution().exceptions_count();
            let (status, terminal, error) = match outcome {
                RunOutcome::Succeeded => (
                    ExecutionStatus::Succeeded,
                    GraphEngineEvent::GraphRunSucceeded { outputs },
                    None,
                ),
                RunOutcome::PartialSucceeded { exceptions_count } => (
                    ExecutionStatus::PartialSucceeded,
                    GraphEngineEvent::GraphRunPartialSucceeded { exceptions_count, outputs },
                    None,
                ),
                RunOutcome::Failed(e) => (
                    ExecutionStatus::Failed,
                    GraphEngineEvent::GraphRunFailed { error: e.to_string(), exceptions_count },
                    Some(e),
                ),
                RunOutcome::Aborted(reason) => {
                    let error = WorkflowError::Aborted(
                        reason.clone().unwrap_or_else(|| "stopped".to_string()),
                    );
                    (
                        ExecutionStatus::Aborted,
                        GraphEngineEvent::GraphRunAborted { reason, outputs },
                        Some(error),
                    )
                }
                RunOutcome::Paused(reasons) => (
                    ExecutionStatus::Paused,
                    GraphEngineEvent::GraphRunPaused { reasons, outputs },
                    None,
                ),
            };
            state.execution().set_status(status);
            guard.finished = true;
            tracing::info!(
                outcome = terminal.name(),
                elapsed_ms = state.elapsed().as_millis() as u64,
                steps = state.node_run_steps(),
                "Graph run finished"
            );

            notify_layers(&layers, "on_event", |l| l.on_event(&terminal));
            notify_layers(&layers, "on_graph_end", |l| l.on_graph_end(error.as_ref()));
            yield terminal;
        })
    }
}

/// Bind environment and conversation variables declared by the graph unless
/// the caller already provided them.
fn seed_graph_variables(graph: &Graph, pool: &mut VariablePool) {
    for var in graph.environment_variables() {
        let selector = Selector::new(ENVIRONMENT_NODE_ID, var.name.as_str());
        if !pool.has(&selector) {
            pool.add(&selector, Segment::from_value(&var.value));
        }
    }
    for var in graph.conversation_variables() {
        let selector = Selector::new(CONVERSATION_NODE_ID, var.name.as_str());
        if !pool.has(&selector) {
            let value = var.default.clone().unwrap_or(serde_json::Value::Null);
            pool.add(&selector, Segment::from_value(&value));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::{parse_dsl, DslFormat};
    use futures::StreamExt;
    use serde_json::json;

    const LINEAR: &str = r#"
nodes:
  - id: start
    data: { type: start, title: Start }
  - id: ans
    data: { type: answer, title: Answer, answer: "env={{#env.region#}}" }
  - id: end
    data:
      type: end
      title: End
      outputs:
        - { variable: chat, value_selector: [conversation, topic] }
edges:
  - { source: start, target: ans }
  - { source: ans, target: end }
environment_variables:
  - { name: region, value: eu }
conversation_variables:
  - { name: topic, type: string, default: rust }
"#;

    #[tokio::test]
    async fn test_seeds_environment_and_conversation_variables() {
        let schema = parse_dsl(LINEAR, DslFormat::Yaml).unwrap();
        let engine =
            GraphEngine::from_schema(&schema, VariablePool::new(), EngineConfig::default())
                .unwrap();
        let events: Vec<_> = engine.run().collect().await;
        match events.last().unwrap() {
            GraphEngineEvent::GraphRunSucceeded { outputs } => {
                assert_eq!(outputs["answer"], json!("env=eu"));
                assert_eq!(outputs["chat"], json!("rust"));
            }
            other => panic!("unexpected terminal event {:?}", other),
        }
        assert_eq!(engine.state().execution().status(), ExecutionStatus::Succeeded);
        assert!(!engine.is_running());
    }

    #[tokio::test]
    async fn test_rejects_graph_bound_to_other_state() {
        let schema = parse_dsl(LINEAR, DslFormat::Yaml).unwrap();
        let state = Arc::new(GraphRuntimeState::new(VariablePool::new()));
        let first = Arc::new(build_graph(&schema).unwrap());
        let second = Arc::new(build_graph(&schema).unwrap());
        GraphEngine::new(first, Arc::clone(&state), EngineConfig::default()).unwrap();
        assert!(GraphEngine::new(second, state, EngineConfig::default()).is_err());
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let schema = parse_dsl(LINEAR, DslFormat::Yaml).unwrap();
        let config = EngineConfig {
            min_workers: 0,
            ..Default::default()
        };
        assert!(matches!(
            GraphEngine::from_schema(&schema, VariablePool::new(), config),
            Err(WorkflowError::ConfigError(_))
        ));
    }
}
