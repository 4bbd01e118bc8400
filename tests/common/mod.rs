#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;

use xworkflow_engine::dsl::CodeLanguage;
use xworkflow_engine::{
    build_graph, parse_dsl, CodeRunner, DslFormat, EngineConfig, GraphEngine, GraphEngineEvent,
    GraphRuntimeState, NodeError, RuntimeContext, VariablePool,
};

pub fn test_config() -> EngineConfig {
    EngineConfig {
        dispatcher_poll_interval_ms: 5,
        scale_check_interval_ms: 20,
        join_timeout_ms: 500,
        ..EngineConfig::default()
    }
}

pub fn engine(yaml: &str, inputs: Value, runtime: RuntimeContext) -> GraphEngine {
    engine_with_config(yaml, inputs, runtime, test_config())
}

pub fn engine_with_config(
    yaml: &str,
    inputs: Value,
    runtime: RuntimeContext,
    config: EngineConfig,
) -> GraphEngine {
    let schema = parse_dsl(yaml, DslFormat::Yaml).unwrap();
    let graph = Arc::new(build_graph(&schema).unwrap());
    let inputs: HashMap<String, Value> = serde_json::from_value(inputs).unwrap();
    let state = Arc::new(GraphRuntimeState::new(VariablePool::with_user_inputs(inputs)));
    GraphEngine::with_context(graph, state, config, runtime).unwrap()
}

pub async fn collect(engine: &GraphEngine) -> Vec<GraphEngineEvent> {
    engine.run().collect().await
}

pub fn terminal(events: &[GraphEngineEvent]) -> &GraphEngineEvent {
    let last = events.last().expect("no events");
    assert!(last.is_graph_terminal(), "last event is {}", last.name());
    last
}

pub fn outputs(events: &[GraphEngineEvent]) -> HashMap<String, Value> {
    match terminal(events) {
        GraphEngineEvent::GraphRunSucceeded { outputs }
        | GraphEngineEvent::GraphRunPartialSucceeded { outputs, .. }
        | GraphEngineEvent::GraphRunAborted { outputs, .. }
        | GraphEngineEvent::GraphRunPaused { outputs, .. } => outputs.clone(),
        other => panic!("run did not produce outputs: {:?}", other),
    }
}

pub fn count(events: &[GraphEngineEvent], name: &str) -> usize {
    events.iter().filter(|e| e.name() == name).count()
}

/// Node ids that emitted `name`, in event order.
pub fn nodes_with(events: &[GraphEngineEvent], name: &str) -> Vec<String> {
    events
        .iter()
        .filter(|e| e.name() == name)
        .filter_map(|e| e.node_id().map(str::to_string))
        .collect()
}

/// Code runner that echoes its inputs back, optionally after a delay.
pub struct EchoRunner {
    pub delay: Duration,
}

#[async_trait]
impl CodeRunner for EchoRunner {
    async fn run(
        &self,
        _language: CodeLanguage,
        _code: &str,
        inputs: HashMap<String, Value>,
    ) -> Result<HashMap<String, Value>, NodeError> {
        tokio::time::sleep(self.delay).await;
        Ok(inputs)
    }
}

/// Fails the first `failures` calls, then echoes.
pub struct FlakyRunner {
    pub failures: usize,
    pub calls: AtomicUsize,
}

impl FlakyRunner {
    pub fn new(failures: usize) -> Self {
        Self {
            failures,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl CodeRunner for FlakyRunner {
    async fn run(
        &self,
        _language: CodeLanguage,
        _code: &str,
        inputs: HashMap<String, Value>,
    ) -> Result<HashMap<String, Value>, NodeError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(NodeError::ExecutionError(format!("flaky failure {}", call)));
        }
        Ok(inputs)
    }
}

pub fn with_runner(runner: impl CodeRunner + 'static) -> RuntimeContext {
    RuntimeContext::new().with_code_runner(Arc::new(runner))
}
