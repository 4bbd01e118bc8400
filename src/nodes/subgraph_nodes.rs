//! Container node executors: Iteration, Loop.
//!
//! Both run their embedded graph through
//! [`run_sub_graph`](crate::core::sub_graph_runner::run_sub_graph), which
//! gives every round its own nested engine. Scope variables live under the
//! reserved `__scope__` node id.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::core::config::EngineConfig;
use crate::core::events::{ContainerKind, ContainerScope, GraphEngineEvent};
use crate::core::sub_graph_runner::{compile_sub_graph, run_sub_graph, SubGraphRun};
use crate::core::variable_pool::{Segment, Selector, VariablePool, SCOPE_NODE_ID};
use crate::dsl::schema::{
    IterationErrorMode, IterationNodeData, LoopNodeData, LoopValueType, NodeRunResult,
};
use crate::error::{NodeError, WorkflowResult};
use crate::evaluator::evaluate_conditions;
use crate::graph::Graph;
use crate::nodes::executor::{NodeContext, NodeExecutor, NodeOutcome};
use crate::nodes::utils::require_value;

fn bind_scope(pool: &mut VariablePool, name: &str, value: &Value) {
    pool.add(&Selector::new(SCOPE_NODE_ID, name), Segment::from_value(value));
}

/// One nested run, its node events relayed under this container's scope.
async fn run_round(
    graph: &Arc<Graph>,
    pool: VariablePool,
    ctx: &NodeContext<'_>,
    config: &EngineConfig,
    kind: ContainerKind,
    index: usize,
) -> Result<SubGraphRun, NodeError> {
    let container = ctx.emitter.meta();
    let scope = ContainerScope {
        kind,
        execution_id: container.id.clone(),
        node_id: container.node_id.clone(),
        index,
    };
    run_sub_graph(
        Arc::clone(graph),
        pool,
        ctx.runtime,
        ctx.state.stop_event(),
        config,
        Some((ctx.emitter, scope)),
    )
    .await
}

// ================================
// Iteration Node
// ================================

/// Runs the sub-graph once per array element.
pub struct IterationNodeExecutor {
    data: IterationNodeData,
    graph: Arc<Graph>,
    config: EngineConfig,
}

impl IterationNodeExecutor {
    pub fn new(data: IterationNodeData, config: EngineConfig) -> WorkflowResult<Self> {
        let graph = compile_sub_graph(&data.sub_graph)?;
        Ok(Self {
            data,
            graph,
            config,
        })
    }

    async fn run_item(
        &self,
        ctx: &NodeContext<'_>,
        index: usize,
        item: Value,
    ) -> (usize, Result<Value, NodeError>) {
        ctx.emitter.emit(GraphEngineEvent::IterationNext {
            meta: ctx.emitter.meta().clone(),
            index,
        });
        let mut pool = ctx.pool.clone();
        bind_scope(&mut pool, "item", &item);
        bind_scope(&mut pool, "index", &Value::from(index));

        let result = run_round(&self.graph, pool, ctx, &self.config, ContainerKind::Iteration, index)
            .await
            .map(|run| {
                run.pool
                    .get_value(&self.data.output_selector)
                    .unwrap_or(Value::Null)
            });
        (index, result)
    }

    fn fail(&self, ctx: &NodeContext<'_>, error: NodeError) -> NodeError {
        ctx.emitter.emit(GraphEngineEvent::IterationFailed {
            meta: ctx.emitter.meta().clone(),
            error: error.to_string(),
        });
        error
    }
}

#[async_trait]
impl NodeExecutor for IterationNodeExecutor {
    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let items = match require_value(ctx.pool, &self.data.iterator_selector)? {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => {
                return Err(NodeError::TypeError(format!(
                    "Iteration input must be an array, got {}",
                    other
                )))
            }
        };
        if items.len() > self.data.max_iterations {
            return Err(NodeError::MaxIterationsExceeded(self.data.max_iterations));
        }

        let total = items.len();
        ctx.emitter.emit(GraphEngineEvent::IterationStarted {
            meta: ctx.emitter.meta().clone(),
            total,
        });

        let mut slots: Vec<Option<Value>> = vec![None; total];
        let concurrency = if self.data.is_parallel {
            self.data.parallel_nums.max(1)
        } else {
            1
        };
        let mut rounds = futures::stream::iter(items.into_iter().enumerate())
            .map(|(index, item)| self.run_item(ctx, index, item))
            .buffer_unordered(concurrency);

        while let Some((index, result)) = rounds.next().await {
            match result {
                Ok(value) => slots[index] = Some(value),
                Err(e) if e.is_cancelled() => return Err(self.fail(ctx, e)),
                Err(e) => match self.data.error_handle_mode {
                    IterationErrorMode::Terminated => {
                        let error =
                            NodeError::ExecutionError(format!("iteration {} failed: {}", index, e));
                        return Err(self.fail(ctx, error));
                    }
                    IterationErrorMode::ContinueOnError => slots[index] = Some(Value::Null),
                    IterationErrorMode::RemoveAbnormalOutput => {
                        tracing::debug!(index, error = %e, "Dropping failed iteration output");
                    }
                },
            }
        }
        drop(rounds);

        let output: Vec<Value> = slots.into_iter().flatten().collect();
        let outputs = HashMap::from([("output".to_string(), Value::Array(output))]);
        ctx.emitter.emit(GraphEngineEvent::IterationSucceeded {
            meta: ctx.emitter.meta().clone(),
            outputs: outputs.clone(),
        });

        let mut result = NodeRunResult::succeeded(outputs);
        result
            .metadata
            .insert("iteration_count".to_string(), Value::from(total));
        Ok(result.into())
    }
}

// ================================
// Loop Node
// ================================

/// Runs the sub-graph repeatedly, feeding end outputs back into the loop
/// variables until the break conditions hold.
pub struct LoopNodeExecutor {
    data: LoopNodeData,
    graph: Arc<Graph>,
    config: EngineConfig,
}

impl LoopNodeExecutor {
    pub fn new(data: LoopNodeData, config: EngineConfig) -> WorkflowResult<Self> {
        let graph = compile_sub_graph(&data.sub_graph)?;
        Ok(Self {
            data,
            graph,
            config,
        })
    }

    fn initial_variables(&self, pool: &VariablePool) -> Vec<(String, Value)> {
        self.data
            .loop_variables
            .iter()
            .map(|var| {
                let value = match var.value_type {
                    LoopValueType::Constant => var.value.clone(),
                    LoopValueType::Variable => Selector::parse_value(&var.value)
                        .and_then(|sel| pool.get_value(&sel))
                        .unwrap_or(Value::Null),
                };
                (var.label.clone(), value)
            })
            .collect()
    }

    fn fail(&self, ctx: &NodeContext<'_>, error: NodeError) -> NodeError {
        ctx.emitter.emit(GraphEngineEvent::LoopFailed {
            meta: ctx.emitter.meta().clone(),
            error: error.to_string(),
        });
        error
    }
}

#[async_trait]
impl NodeExecutor for LoopNodeExecutor {
    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let mut variables = self.initial_variables(ctx.pool);
        let has_break = !self.data.break_conditions.is_empty();
        ctx.emitter.emit(GraphEngineEvent::LoopStarted {
            meta: ctx.emitter.meta().clone(),
            loop_count: self.data.loop_count,
        });

        let mut rounds = 0usize;
        loop {
            if rounds >= self.data.loop_count {
                if has_break {
                    return Err(self.fail(ctx, NodeError::MaxIterationsExceeded(self.data.loop_count)));
                }
                break;
            }
            if let Err(e) = ctx.check_stop() {
                return Err(self.fail(ctx, e));
            }

            ctx.emitter.emit(GraphEngineEvent::LoopNext {
                meta: ctx.emitter.meta().clone(),
                index: rounds,
            });
            let mut pool = ctx.pool.clone();
            for (label, value) in &variables {
                bind_scope(&mut pool, label, value);
            }
            bind_scope(&mut pool, "index", &Value::from(rounds));

            let run = match run_round(&self.graph, pool, ctx, &self.config, ContainerKind::Loop, rounds).await {
                Ok(run) => run,
                Err(e) => return Err(self.fail(ctx, e)),
            };
            rounds += 1;

            let mut round_pool = run.pool;
            for (label, value) in variables.iter_mut() {
                if let Some(next) = run.outputs.get(label.as_str()) {
                    *value = next.clone();
                }
                bind_scope(&mut round_pool, label, value);
            }

            if has_break
                && evaluate_conditions(
                    &self.data.break_conditions,
                    self.data.logical_operator,
                    &round_pool,
                )
            {
                break;
            }
        }

        let mut outputs: HashMap<String, Value> = variables.into_iter().collect();
        outputs.insert("loop_round".to_string(), Value::from(rounds));
        ctx.emitter.emit(GraphEngineEvent::LoopSucceeded {
            meta: ctx.emitter.meta().clone(),
            outputs: outputs.clone(),
        });
        Ok(NodeRunResult::succeeded(outputs).into())
    }
}
