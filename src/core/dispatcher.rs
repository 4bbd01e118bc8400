use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::command_channel::{CommandChannel, GraphEngineCommand};
use super::config::EngineConfig;
use super::events::{GraphEngineEvent, NodeRunMeta, PauseReason};
use super::execution::{EdgeSelection, NodeState};
use super::ready_queue::ReadyQueue;
use super::runtime_state::GraphRuntimeState;
use super::variable_pool::{Segment, Selector};
use super::worker_pool::WorkerPool;
use crate::dsl::schema::{
    BackoffStrategy, ErrorStrategyType, NodeRunResult, NodeType, RetryConfig,
    WorkflowNodeExecutionStatus, FAIL_BRANCH_HANDLE,
};
use crate::error::WorkflowError;
use crate::graph::{Graph, GraphNode};

/// How a dispatcher run concluded.
#[derive(Debug)]
pub enum RunOutcome {
    Succeeded,
    PartialSucceeded { exceptions_count: u32 },
    Failed(WorkflowError),
    Aborted(Option<String>),
    Paused(Vec<PauseReason>),
}

enum Step {
    Event(Option<GraphEngineEvent>),
    Retry(Option<String>),
    Tick,
}

/// The single writer of a run.
///
/// Consumes worker events, writes node outputs into the variable pool,
/// resolves downstream edges and feeds newly ready nodes back into the
/// ready queue. Finishes once nothing is queued, running or waiting for a
/// retry, or once a stop has been observed and in-flight nodes drained.
pub struct Dispatcher {
    graph: Arc<Graph>,
    state: Arc<GraphRuntimeState>,
    queue: Arc<ReadyQueue>,
    pool: WorkerPool,
    events: mpsc::UnboundedReceiver<GraphEngineEvent>,
    out: mpsc::UnboundedSender<GraphEngineEvent>,
    commands: Arc<dyn CommandChannel>,
    config: EngineConfig,

    /// Queued or running node ids.
    executing: HashSet<String>,
    /// Failed nodes waiting for their retry interval.
    retrying: HashSet<String>,
    /// Identity of the first attempt of every node that is being retried.
    retried: HashMap<String, NodeRunMeta>,
    retry_tx: mpsc::UnboundedSender<String>,
    retry_rx: mpsc::UnboundedReceiver<String>,

    aborted: bool,
    abort_reason: Option<String>,
    failure: Option<WorkflowError>,
    stop_deadline: Option<Instant>,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        graph: Arc<Graph>,
        state: Arc<GraphRuntimeState>,
        queue: Arc<ReadyQueue>,
        pool: WorkerPool,
        events: mpsc::UnboundedReceiver<GraphEngineEvent>,
        out: mpsc::UnboundedSender<GraphEngineEvent>,
        commands: Arc<dyn CommandChannel>,
        config: EngineConfig,
    ) -> Self {
        let (retry_tx, retry_rx) = mpsc::unbounded_channel();
        Self {
            graph,
            state,
            queue,
            pool,
            events,
            out,
            commands,
            config,
            executing: HashSet::new(),
            retrying: HashSet::new(),
            retried: HashMap::new(),
            retry_tx,
            retry_rx,
            aborted: false,
            abort_reason: None,
            failure: None,
            stop_deadline: None,
        }
    }

    /// Seed `initial` and drive the run to completion.
    pub async fn run(mut self, initial: Vec<String>) -> RunOutcome {
        for node_id in initial {
            self.enqueue(node_id);
        }

        let poll = self.config.dispatcher_poll_interval();
        let scale_interval = self.config.scale_check_interval();
        let mut last_scale_check = Instant::now();

        loop {
            self.process_commands();
            self.check_time_limit();

            if last_scale_check.elapsed() >= scale_interval {
                self.pool.check_scaling(self.queue.len());
                last_scale_check = Instant::now();
            }

            if self.state.stop_event().is_set() && self.stop_deadline.is_none() {
                self.begin_stop();
            }

            if self.executing.is_empty() && self.retrying.is_empty() {
                break;
            }
            if let Some(deadline) = self.stop_deadline {
                if Instant::now() >= deadline {
                    tracing::warn!(
                        in_flight = ?self.executing,
                        "Nodes still running after stop; abandoning them"
                    );
                    break;
                }
            }

            let step = tokio::select! {
                event = self.events.recv() => Step::Event(event),
                node_id = self.retry_rx.recv() => Step::Retry(node_id),
                _ = tokio::time::sleep(poll) => Step::Tick,
            };
            match step {
                Step::Event(Some(event)) => self.handle_event(event),
                Step::Event(None) => {
                    tracing::error!("Worker event channel closed unexpectedly");
                    break;
                }
                Step::Retry(Some(node_id)) => self.requeue_retry(node_id),
                Step::Retry(None) | Step::Tick => {}
            }
        }

        self.pool.stop(self.config.join_timeout()).await;
        self.outcome()
    }

    fn stopping(&self) -> bool {
        self.stop_deadline.is_some() || self.state.stop_event().is_set()
    }

    fn forward(&self, event: GraphEngineEvent) {
        // the consumer may have stopped reading; the run guard stops us then
        let _ = self.out.send(event);
    }

    /// Mark `node_id` queued and hand it to the workers unless stopping.
    fn enqueue(&mut self, node_id: String) {
        self.state
            .execution()
            .set_node_state(&node_id, NodeState::Queued);
        if self.stopping() {
            return;
        }
        if self.queue.push(node_id.clone()) {
            self.executing.insert(node_id);
        }
    }

    fn begin_stop(&mut self) {
        for node_id in self.queue.drain() {
            self.executing.remove(&node_id);
        }
        self.retrying.clear();
        self.stop_deadline = Some(Instant::now() + self.config.join_timeout());
        tracing::debug!(in_flight = self.executing.len(), "Stop observed");
    }

    fn process_commands(&mut self) {
        for command in self.commands.fetch_commands() {
            match command {
                GraphEngineCommand::Abort { reason } => {
                    tracing::info!(reason = ?reason, "Abort command received");
                    self.aborted = true;
                    self.abort_reason = reason;
                    self.state.stop_event().set();
                }
                GraphEngineCommand::UpdateVariables { variables } => {
                    let mut pool = self.state.variable_pool_mut();
                    for (key, value) in variables {
                        match Selector::parse_str(&key) {
                            Some(selector) => pool.add(&selector, Segment::from_value(&value)),
                            None => tracing::warn!(selector = %key, "Ignoring invalid selector"),
                        }
                    }
                }
            }
        }
    }

    fn check_time_limit(&mut self) {
        if self.failure.is_some() || self.stopping() {
            return;
        }
        let limit = self.config.max_execution_time();
        if self.state.elapsed() > limit {
            tracing::warn!(limit_secs = limit.as_secs(), "Execution time limit reached");
            self.fail(WorkflowError::ExecutionTimeout(limit.as_secs()));
        }
    }

    fn fail(&mut self, error: WorkflowError) {
        if self.failure.is_none() {
            self.failure = Some(error);
        }
        self.state.stop_event().set();
    }

    fn handle_event(&mut self, mut event: GraphEngineEvent) {
        if event.meta().is_some_and(NodeRunMeta::is_nested) {
            // progress of a container body, the container node owns its state
            self.forward(event);
            return;
        }
        let is_start = matches!(event, GraphEngineEvent::NodeRunStarted { .. });
        if let Some(meta) = event.meta_mut() {
            if let Some(first) = self.retried.get(&meta.node_id) {
                if is_start {
                    // a retry attempt continues the execution already started
                    return;
                }
                meta.id = first.id.clone();
                meta.start_at = first.start_at;
            }
        }

        match event {
            GraphEngineEvent::NodeRunStarted { meta } => {
                let steps = self.state.increment_node_run_steps();
                let max = self.config.max_execution_steps;
                self.forward(GraphEngineEvent::NodeRunStarted { meta });
                if steps > max && self.failure.is_none() {
                    tracing::warn!(max_steps = max, "Execution step limit reached");
                    self.fail(WorkflowError::MaxStepsExceeded(max));
                }
            }
            GraphEngineEvent::NodeRunSucceeded { meta, result } => {
                self.on_node_succeeded(meta, result)
            }
            GraphEngineEvent::NodeRunFailed {
                meta,
                error,
                result,
            } => self.on_node_failed(meta, error, result),
            GraphEngineEvent::PauseRequested { meta, reason } => {
                self.executing.remove(&meta.node_id);
                {
                    let mut execution = self.state.execution();
                    execution.set_node_state(&meta.node_id, NodeState::Paused);
                    execution.add_pause_reason(reason.clone());
                }
                tracing::info!(node_id = %meta.node_id, "Node requested pause");
                self.forward(GraphEngineEvent::PauseRequested { meta, reason });
            }
            other => self.forward(other),
        }
    }

    fn on_node_succeeded(&mut self, meta: NodeRunMeta, mut result: NodeRunResult) {
        let node_id = meta.node_id.clone();
        self.executing.remove(&node_id);
        self.retried.remove(&node_id);
        self.state
            .variable_pool_mut()
            .set_node_outputs(&node_id, &result.outputs);
        self.collect_outputs(meta.node_type, &result.outputs);

        result.retry_index = self.state.execution().retry_count(&node_id);
        let handle = result.edge_source_handle.clone();
        self.forward(GraphEngineEvent::NodeRunSucceeded { meta, result });

        let Some(node) = self.graph.node(&node_id) else {
            tracing::error!(node_id = %node_id, "Succeeded node is not in the graph");
            return;
        };
        let selection = if node.node_type.is_branch() {
            let outgoing = self.graph.get_outgoing_edges(&node_id);
            if !outgoing.is_empty() && !outgoing.iter().any(|e| e.source_handle == handle) {
                tracing::warn!(node_id = %node_id, handle = %handle, "No outgoing edge matches the selected branch");
            }
            EdgeSelection::Handle(&handle)
        } else if node.error_strategy == ErrorStrategyType::FailBranch {
            EdgeSelection::AllExceptFailBranch
        } else {
            EdgeSelection::All
        };
        self.advance(&node_id, NodeState::Succeeded, selection);
    }

    fn on_node_failed(&mut self, meta: NodeRunMeta, error: String, mut result: NodeRunResult) {
        let node_id = meta.node_id.clone();
        if result.status == WorkflowNodeExecutionStatus::Stopped {
            if self.stopping() {
                // interrupted: stays queued for a resumed run
                self.executing.remove(&node_id);
                self.forward(GraphEngineEvent::NodeRunFailed {
                    meta,
                    error,
                    result,
                });
                return;
            }
            // cancelled by the node itself, not by a stop of this run
            result.status = WorkflowNodeExecutionStatus::Failed;
        }

        let Some(node) = self.graph.node(&node_id).cloned() else {
            tracing::error!(node_id = %node_id, "Failed node is not in the graph");
            self.executing.remove(&node_id);
            return;
        };

        let attempts = self.state.execution().retry_count(&node_id);
        if !self.stopping() && attempts < node.max_retries() {
            self.schedule_retry(meta, error, &node);
            return;
        }

        self.executing.remove(&node_id);
        self.retried.remove(&node_id);
        match node.error_strategy {
            ErrorStrategyType::None => {
                tracing::warn!(node_id = %node_id, error = %error, "Node failed; stopping run");
                self.state
                    .execution()
                    .set_node_state(&node_id, NodeState::Failed);
                let error_type = result.error_type.clone();
                self.forward(GraphEngineEvent::NodeRunFailed {
                    meta,
                    error: error.clone(),
                    result,
                });
                self.fail(WorkflowError::NodeExecutionError {
                    node_id,
                    error,
                    error_type,
                });
            }
            ErrorStrategyType::FailBranch => {
                let outputs = error_outputs(&error, &result);
                self.absorb_failure(meta, error, result, outputs, FAIL_BRANCH_HANDLE);
                self.advance(&node_id, NodeState::Exception, EdgeSelection::FailBranchOnly);
            }
            ErrorStrategyType::DefaultValue => {
                let mut outputs = node.default_value.clone();
                outputs.extend(error_outputs(&error, &result));
                self.absorb_failure(
                    meta,
                    error,
                    result,
                    outputs,
                    crate::dsl::schema::DEFAULT_SOURCE_HANDLE,
                );
                self.advance(
                    &node_id,
                    NodeState::Exception,
                    EdgeSelection::AllExceptFailBranch,
                );
            }
        }
    }

    /// Bind fallback outputs and report the failure as an exception.
    fn absorb_failure(
        &mut self,
        meta: NodeRunMeta,
        error: String,
        mut result: NodeRunResult,
        outputs: HashMap<String, Value>,
        handle: &str,
    ) {
        tracing::info!(node_id = %meta.node_id, error = %error, "Node failure handled by error strategy");
        self.state
            .variable_pool_mut()
            .set_node_outputs(&meta.node_id, &outputs);
        self.collect_outputs(meta.node_type, &outputs);
        self.state.execution().record_exception();

        result.status = WorkflowNodeExecutionStatus::Exception;
        result.outputs = outputs;
        result.edge_source_handle = handle.to_string();
        result.retry_index = self.state.execution().retry_count(&meta.node_id);
        self.forward(GraphEngineEvent::NodeRunException {
            meta,
            error,
            result,
        });
    }

    fn schedule_retry(&mut self, meta: NodeRunMeta, error: String, node: &GraphNode) {
        let node_id = meta.node_id.clone();
        let retry_index = self.state.execution().increment_retry(&node_id);
        let delay = calculate_retry_interval(node.retry_config.as_ref(), retry_index - 1);
        tracing::info!(
            node_id = %node_id,
            retry_index,
            delay_ms = delay.as_millis() as u64,
            "Retrying failed node"
        );

        self.executing.remove(&node_id);
        self.retrying.insert(node_id.clone());
        self.retried
            .entry(node_id.clone())
            .or_insert_with(|| meta.clone());
        self.forward(GraphEngineEvent::NodeRunRetry {
            meta,
            error,
            retry_index,
        });

        let tx = self.retry_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(node_id);
        });
    }

    fn requeue_retry(&mut self, node_id: String) {
        if !self.retrying.remove(&node_id) || self.stopping() {
            return;
        }
        if self.queue.push(node_id.clone()) {
            self.executing.insert(node_id);
        }
    }

    fn advance(&mut self, node_id: &str, final_state: NodeState, selection: EdgeSelection<'_>) {
        let ready = {
            let mut execution = self.state.execution();
            execution.set_node_state(node_id, final_state);
            execution.resolve_outgoing(&self.graph, node_id, selection)
        };
        for next in ready {
            self.enqueue(next);
        }
    }

    fn collect_outputs(&self, node_type: NodeType, outputs: &HashMap<String, Value>) {
        match node_type {
            NodeType::End => {
                let mut graph_outputs = self.state.outputs_mut();
                for (key, value) in outputs {
                    graph_outputs.insert(key.clone(), value.clone());
                }
            }
            NodeType::Answer => {
                let mut graph_outputs = self.state.outputs_mut();
                for (key, value) in outputs {
                    if key == "answer" {
                        let mut answer = graph_outputs
                            .get("answer")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string();
                        answer.push_str(value.as_str().unwrap_or_default());
                        graph_outputs.insert(key.clone(), Value::String(answer));
                    } else {
                        graph_outputs.insert(key.clone(), value.clone());
                    }
                }
            }
            _ => {}
        }
    }

    fn outcome(&mut self) -> RunOutcome {
        if let Some(error) = self.failure.take() {
            return RunOutcome::Failed(error);
        }
        if self.aborted || self.state.stop_event().is_set() {
            return RunOutcome::Aborted(self.abort_reason.take());
        }
        let execution = self.state.execution();
        if !execution.pause_reasons().is_empty() {
            return RunOutcome::Paused(execution.pause_reasons().to_vec());
        }
        match execution.exceptions_count() {
            0 => RunOutcome::Succeeded,
            exceptions_count => RunOutcome::PartialSucceeded { exceptions_count },
        }
    }
}

fn error_outputs(error: &str, result: &NodeRunResult) -> HashMap<String, Value> {
    HashMap::from([
        ("error_message".to_string(), Value::String(error.to_string())),
        (
            "error_type".to_string(),
            result
                .error_type
                .clone()
                .map(Value::String)
                .unwrap_or(Value::Null),
        ),
    ])
}

/// Wait before retry number `attempt + 1`.
fn calculate_retry_interval(retry_config: Option<&RetryConfig>, attempt: u32) -> Duration {
    let Some(rc) = retry_config else {
        return Duration::ZERO;
    };

    let base = rc.retry_interval as f64;
    let exponent = attempt.min(i32::MAX as u32) as i32;
    let interval = match rc.backoff_strategy {
        BackoffStrategy::Fixed => base,
        BackoffStrategy::Exponential => base * rc.backoff_multiplier.powi(exponent),
        BackoffStrategy::ExponentialWithJitter => {
            let multiplied = base * rc.backoff_multiplier.powi(exponent);
            multiplied + rand::random::<f64>() * multiplied * 0.1
        }
    };

    Duration::from_millis((interval as u64).min(rc.max_retry_interval))
}
