mod common;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use common::*;
use xworkflow_engine::dsl::{CodeLanguage, NodeType, OutputVariable};
use xworkflow_engine::{
    CodeRunner, GraphBuilder, GraphEngine, NodeDeclaration, NodeError, NodeState, RuntimeContext,
    Selector, VariablePool,
};

const DIAMOND: &str = r#"
nodes:
  - id: start
    data: { type: start, title: Start }
  - id: left
    data: { type: answer, title: Left, answer: "L:{{#start.q#}}" }
  - id: right
    data: { type: answer, title: Right, answer: "R:{{#start.q#}}" }
  - id: end
    data:
      type: end
      title: End
      outputs:
        - { variable: left, value_selector: [left, answer] }
        - { variable: right, value_selector: [right, answer] }
edges:
  - { source: start, target: left }
  - { source: start, target: right }
  - { source: left, target: end }
  - { source: right, target: end }
"#;

#[tokio::test]
async fn test_diamond_joins_once_after_both_branches() {
    let engine = engine(DIAMOND, json!({ "q": "x" }), RuntimeContext::new());
    let events = collect(&engine).await;

    assert_eq!(terminal(&events).name(), "graph_run_succeeded");
    let out = outputs(&events);
    assert_eq!(out["left"], json!("L:x"));
    assert_eq!(out["right"], json!("R:x"));

    let started = nodes_with(&events, "node_run_started");
    assert_eq!(started.iter().filter(|id| *id == "end").count(), 1);
    assert_eq!(started.last().map(String::as_str), Some("end"));
    assert_eq!(events.first().map(|e| e.name()), Some("graph_run_started"));
}

const BRANCHING: &str = r#"
nodes:
  - id: start
    data: { type: start, title: Start }
  - id: check
    data:
      type: if-else
      title: Check
      cases:
        - case_id: fast
          conditions:
            - { variable_selector: [start, mode], comparison_operator: is, value: fast }
  - id: fast_answer
    data: { type: answer, title: Fast, answer: "fast path" }
  - id: slow_answer
    data: { type: answer, title: Slow, answer: "slow path" }
  - id: slow_followup
    data: { type: answer, title: Followup, answer: " and more" }
  - id: end
    data: { type: end, title: End }
edges:
  - { source: start, target: check }
  - { source: check, target: fast_answer, sourceHandle: fast }
  - { source: check, target: slow_answer, sourceHandle: "false" }
  - { source: slow_answer, target: slow_followup }
  - { source: fast_answer, target: end }
  - { source: slow_followup, target: end }
"#;

#[tokio::test]
async fn test_untaken_branch_is_skipped_transitively() {
    let engine = engine(BRANCHING, json!({ "mode": "fast" }), RuntimeContext::new());
    let events = collect(&engine).await;

    assert_eq!(terminal(&events).name(), "graph_run_succeeded");
    assert_eq!(outputs(&events)["answer"], json!("fast path"));

    let started = nodes_with(&events, "node_run_started");
    assert!(!started.contains(&"slow_answer".to_string()));
    assert!(!started.contains(&"slow_followup".to_string()));
    assert!(started.contains(&"end".to_string()));

    let execution = engine.state().execution();
    assert_eq!(execution.node_state("slow_answer"), NodeState::Skipped);
    assert_eq!(execution.node_state("slow_followup"), NodeState::Skipped);
    assert_eq!(execution.node_state("end"), NodeState::Succeeded);
}

#[tokio::test]
async fn test_else_branch_concatenates_answers() {
    let engine = engine(BRANCHING, json!({ "mode": "slow" }), RuntimeContext::new());
    let events = collect(&engine).await;
    assert_eq!(outputs(&events)["answer"], json!("slow path and more"));
    assert_eq!(
        engine.state().execution().node_state("fast_answer"),
        NodeState::Skipped
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_wide_fan_out_runs_every_leaf() {
    const LEAVES: usize = 120;
    let mut nodes = vec![json!({ "id": "start", "data": { "type": "start", "title": "Start" } })];
    let mut edges = Vec::new();
    for i in 0..LEAVES {
        let id = format!("leaf_{}", i);
        nodes.push(json!({ "id": id, "data": {
            "type": "variable-aggregator", "title": id, "variables": [["start", "q"]]
        } }));
        edges.push(json!({ "source": "start", "target": id }));
        edges.push(json!({ "source": id, "target": "end" }));
    }
    nodes.push(json!({ "id": "end", "data": {
        "type": "end", "title": "End",
        "outputs": [{ "variable": "last", "value_selector": ["leaf_119", "output"] }]
    } }));
    let yaml = serde_yaml::to_string(&json!({ "nodes": nodes, "edges": edges })).unwrap();

    let config = xworkflow_engine::EngineConfig {
        max_workers: 8,
        ..test_config()
    };
    let engine = engine_with_config(&yaml, json!({ "q": 7 }), RuntimeContext::new(), config);
    let events = collect(&engine).await;

    assert_eq!(terminal(&events).name(), "graph_run_succeeded");
    assert_eq!(count(&events, "node_run_succeeded"), LEAVES + 2);
    assert_eq!(outputs(&events)["last"], json!(7));

    let pool = engine.state().variable_pool();
    let missing: Vec<usize> = (0..LEAVES)
        .filter(|i| {
            pool.get_value(&Selector::new(format!("leaf_{}", i), "output")) != Some(json!(7))
        })
        .collect();
    assert!(missing.is_empty(), "lost leaf outputs: {:?}", missing);
}

/// Tracks the highest number of overlapping calls.
#[derive(Clone, Default)]
struct ConcurrencyGauge {
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

#[async_trait]
impl CodeRunner for ConcurrencyGauge {
    async fn run(
        &self,
        _language: CodeLanguage,
        _code: &str,
        inputs: HashMap<String, Value>,
    ) -> Result<HashMap<String, Value>, NodeError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(80)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(inputs)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_disjoint_branches_run_concurrently() {
    let mut yaml = String::from("nodes:\n  - id: start\n    data: { type: start, title: Start }\n");
    for i in 0..4 {
        yaml.push_str(&format!(
            "  - id: work_{i}\n    data: {{ type: code, title: W{i}, language: python3, code: '' }}\n"
        ));
    }
    yaml.push_str("  - id: end\n    data: { type: end, title: End }\nedges:\n");
    for i in 0..4 {
        yaml.push_str(&format!(
            "  - {{ source: start, target: work_{i} }}\n  - {{ source: work_{i}, target: end }}\n"
        ));
    }

    let gauge = ConcurrencyGauge::default();
    let config = xworkflow_engine::EngineConfig {
        min_workers: 4,
        max_workers: 4,
        ..test_config()
    };
    let engine = engine_with_config(&yaml, json!({}), with_runner(gauge.clone()), config);
    let events = collect(&engine).await;

    assert_eq!(terminal(&events).name(), "graph_run_succeeded");
    assert!(gauge.peak.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn test_auto_built_graph_runs() {
    let schema = GraphBuilder::new()
        .node(NodeDeclaration::new(
            "greet",
            NodeType::Answer,
            json!({ "answer": "Hi {{#start.name#}}" }),
        ))
        .node(NodeDeclaration::new(
            "shout",
            NodeType::Answer,
            json!({ "answer": "! ({{#greet.answer#}})" }),
        ))
        .outputs(vec![serde_json::from_value::<OutputVariable>(json!({
            "variable": "final", "value_selector": ["shout", "answer"]
        }))
        .unwrap()])
        .build()
        .unwrap();

    let pool = VariablePool::with_user_inputs(HashMap::from([(
        "name".to_string(),
        json!("Ada"),
    )]));
    let engine = GraphEngine::from_schema(&schema, pool, test_config()).unwrap();
    let events = collect(&engine).await;

    let out = outputs(&events);
    assert_eq!(out["answer"], json!("Hi Ada! (Hi Ada)"));
    assert_eq!(out["final"], json!("! (Hi Ada)"));
    let started = nodes_with(&events, "node_run_started");
    assert_eq!(started, vec!["start", "greet", "shout", "end"]);
}

#[tokio::test]
async fn test_auto_builder_rejects_cycles() {
    let err = GraphBuilder::new()
        .node(NodeDeclaration::new("a", NodeType::Answer, json!({ "answer": "x" })).depends_on(["b"]))
        .node(NodeDeclaration::new("b", NodeType::Answer, json!({ "answer": "y" })).depends_on(["a"]))
        .build()
        .unwrap_err();
    assert!(matches!(
        err,
        xworkflow_engine::WorkflowError::CyclicDependency { .. }
    ));
}
