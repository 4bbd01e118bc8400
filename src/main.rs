use std::collections::HashMap;

use anyhow::Context;
use futures::StreamExt;
use xworkflow_engine::{
    parse_dsl, DslFormat, EngineConfig, GraphEngine, GraphEngineEvent, VariablePool,
};

const DEMO_WORKFLOW: &str = r#"
version: "0.1.0"
nodes:
  - id: start
    data:
      type: start
      title: Start
      variables:
        - variable: query
          label: Query
          type: string
  - id: if1
    data:
      type: if-else
      title: Check Query
      cases:
        - case_id: has_query
          logical_operator: and
          conditions:
            - variable_selector: ["start", "query"]
              comparison_operator: not_empty
              value: null
  - id: answer_yes
    data:
      type: answer
      title: Has Query
      answer: "You said: {{#start.query#}}"
  - id: answer_no
    data:
      type: answer
      title: No Query
      answer: "No query provided."
  - id: merge
    data:
      type: variable-aggregator
      title: Merge
      variables:
        - ["answer_yes", "answer"]
        - ["answer_no", "answer"]
  - id: end
    data:
      type: end
      title: End
      outputs:
        - variable: result
          value_selector: ["merge", "output"]
edges:
  - source: start
    target: if1
  - source: if1
    target: answer_yes
    sourceHandle: has_query
  - source: if1
    target: answer_no
    sourceHandle: "false"
  - source: answer_yes
    target: merge
  - source: answer_no
    target: merge
  - source: merge
    target: end
"#;

/// Usage: `xworkflow-engine [WORKFLOW.yaml] [QUERY]`
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let source = match args.next() {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("reading workflow file {}", path))?,
        None => DEMO_WORKFLOW.to_string(),
    };
    let query = args.next().unwrap_or_else(|| "Hello, Dify!".to_string());

    println!("=== XWorkflow Engine (Dify-compatible) ===\n");

    let schema = parse_dsl(&source, DslFormat::Yaml)?;
    println!(
        "[OK] DSL parsed ({} nodes, {} edges)",
        schema.nodes.len(),
        schema.edges.len()
    );

    let inputs = HashMap::from([("query".to_string(), serde_json::Value::String(query))]);
    let config = EngineConfig::from_env()?;
    let engine = GraphEngine::from_schema(&schema, VariablePool::with_user_inputs(inputs), config)?;

    let mut events = engine.run();
    while let Some(event) = events.next().await {
        match &event {
            GraphEngineEvent::GraphRunSucceeded { outputs }
            | GraphEngineEvent::GraphRunPartialSucceeded { outputs, .. } => {
                println!("\n=== Workflow completed ({}) ===", event.name());
                let mut keys: Vec<_> = outputs.keys().collect();
                keys.sort();
                for key in keys {
                    println!("  {} = {}", key, outputs[key]);
                }
            }
            GraphEngineEvent::GraphRunFailed { error, .. } => {
                println!("\n=== Workflow failed: {} ===", error);
            }
            GraphEngineEvent::GraphRunAborted { reason, .. } => {
                println!("\n=== Workflow aborted: {:?} ===", reason);
            }
            GraphEngineEvent::GraphRunPaused { reasons, .. } => {
                println!("\n=== Workflow paused: {:?} ===", reasons);
            }
            GraphEngineEvent::NodeRunStreamChunk {
                selector, chunk, ..
            } => {
                if !chunk.is_empty() {
                    println!("  >> {} {}", selector.join("."), chunk);
                }
            }
            other => match other.node_id() {
                Some(node_id) => println!("  [{}] {}", other.name(), node_id),
                None => println!("  [{}]", other.name()),
            },
        }
    }
    Ok(())
}
