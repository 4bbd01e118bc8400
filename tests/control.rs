mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::json;

use common::*;
use xworkflow_engine::{
    EngineConfig, ExecutionStatus, GraphEngineCommand, GraphEngineEvent, NodeState, PauseReason,
    RuntimeContext, Segment, Selector,
};

const SLOW_CHAIN: &str = r#"
nodes:
  - id: start
    data: { type: start, title: Start }
  - id: slow
    data:
      type: code
      title: Slow
      language: python3
      code: ""
      variables:
        - { variable: q, value_selector: [start, q] }
  - id: after
    data: { type: answer, title: After, answer: "done {{#slow.q#}}" }
  - id: end
    data: { type: end, title: End }
edges:
  - { source: start, target: slow }
  - { source: slow, target: after }
  - { source: after, target: end }
"#;

fn slow_runner() -> RuntimeContext {
    with_runner(EchoRunner {
        delay: Duration::from_millis(150),
    })
}

#[tokio::test]
async fn test_stop_then_rerun_resumes_remaining_nodes() {
    let engine = engine(SLOW_CHAIN, json!({ "q": "x" }), slow_runner());

    let mut first = Vec::new();
    let mut stream = engine.run();
    while let Some(event) = stream.next().await {
        if matches!(&event, GraphEngineEvent::NodeRunStarted { meta } if meta.node_id == "slow") {
            engine.stop();
        }
        first.push(event);
    }
    drop(stream);

    assert_eq!(terminal(&first).name(), "graph_run_aborted");
    assert!(!nodes_with(&first, "node_run_started").contains(&"after".to_string()));
    assert_eq!(
        engine.state().execution().status(),
        ExecutionStatus::Aborted
    );

    let second = collect(&engine).await;
    assert_eq!(terminal(&second).name(), "graph_run_succeeded");
    assert_eq!(nodes_with(&second, "node_run_started"), vec!["after", "end"]);
    assert_eq!(outputs(&second)["answer"], json!("done x"));
}

#[tokio::test]
async fn test_stop_before_run_is_cleared() {
    let engine = engine(SLOW_CHAIN, json!({ "q": "x" }), with_runner(EchoRunner {
        delay: Duration::ZERO,
    }));
    engine.stop();
    assert!(engine.state().stop_event().is_set());

    let events = collect(&engine).await;
    assert_eq!(events.first().map(|e| e.name()), Some("graph_run_started"));
    assert_eq!(terminal(&events).name(), "graph_run_succeeded");
    assert_eq!(
        nodes_with(&events, "node_run_started"),
        vec!["start", "slow", "after", "end"]
    );
    assert!(!engine.state().stop_event().is_set());
}

#[tokio::test]
async fn test_completed_run_starts_over() {
    let engine = engine(SLOW_CHAIN, json!({ "q": "x" }), with_runner(EchoRunner {
        delay: Duration::ZERO,
    }));
    let first = collect(&engine).await;
    let second = collect(&engine).await;
    assert_eq!(terminal(&first).name(), "graph_run_succeeded");
    assert_eq!(terminal(&second).name(), "graph_run_succeeded");
    assert_eq!(
        nodes_with(&second, "node_run_started"),
        vec!["start", "slow", "after", "end"]
    );
    assert_eq!(outputs(&second)["answer"], json!("done x"));
}

#[tokio::test]
async fn test_abort_command_carries_reason() {
    let engine = engine(SLOW_CHAIN, json!({ "q": "x" }), slow_runner());
    let commands = Arc::clone(engine.commands());

    let mut events = Vec::new();
    let mut stream = engine.run();
    while let Some(event) = stream.next().await {
        if matches!(&event, GraphEngineEvent::NodeRunStarted { meta } if meta.node_id == "slow") {
            commands.send_command(GraphEngineCommand::Abort {
                reason: Some("user cancelled".into()),
            });
        }
        events.push(event);
    }

    match terminal(&events) {
        GraphEngineEvent::GraphRunAborted { reason, .. } => {
            assert_eq!(reason.as_deref(), Some("user cancelled"))
        }
        other => panic!("expected abort, got {:?}", other),
    }
}

#[tokio::test]
async fn test_update_variables_command_is_visible_downstream() {
    let yaml = r#"
nodes:
  - id: start
    data: { type: start, title: Start }
  - id: reply
    data: { type: answer, title: Reply, answer: "topic={{#conversation.topic#}}" }
  - id: end
    data: { type: end, title: End }
edges:
  - { source: start, target: reply }
  - { source: reply, target: end }
"#;
    let engine = engine(yaml, json!({}), RuntimeContext::new());
    engine
        .commands()
        .send_command(GraphEngineCommand::UpdateVariables {
            variables: HashMap::from([
                ("conversation.topic".to_string(), json!("rust")),
                ("".to_string(), json!(1)),
            ]),
        });
    let events = collect(&engine).await;
    assert_eq!(outputs(&events)["answer"], json!("topic=rust"));
}

#[tokio::test]
async fn test_step_limit_fails_the_run() {
    let config = EngineConfig {
        max_execution_steps: 2,
        ..test_config()
    };
    let engine = engine_with_config(
        SLOW_CHAIN,
        json!({ "q": "x" }),
        with_runner(EchoRunner {
            delay: Duration::ZERO,
        }),
        config,
    );
    let events = collect(&engine).await;
    match terminal(&events) {
        GraphEngineEvent::GraphRunFailed { error, .. } => {
            assert!(error.contains("2"), "unexpected error: {}", error)
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert!(!nodes_with(&events, "node_run_started").contains(&"end".to_string()));
}

#[tokio::test]
async fn test_concurrent_run_is_rejected() {
    let engine = engine(SLOW_CHAIN, json!({ "q": "x" }), slow_runner());
    let mut first = engine.run();
    assert_eq!(first.next().await.map(|e| e.name()), Some("graph_run_started"));
    assert!(engine.is_running());

    let second: Vec<_> = engine.run().collect().await;
    assert_eq!(terminal(&second).name(), "graph_run_failed");

    let rest: Vec<_> = first.collect().await;
    assert_eq!(terminal(&rest).name(), "graph_run_succeeded");
}

const REVIEW: &str = r#"
nodes:
  - id: start
    data: { type: start, title: Start }
  - id: review
    data:
      type: human-input
      title: Review
      form_id: approval
      inputs:
        - { variable: comment, required: true }
  - id: end
    data:
      type: end
      title: End
      outputs:
        - { variable: approved, value_selector: [review, approved] }
        - { variable: comment, value_selector: [review, comment] }
edges:
  - { source: start, target: review }
  - { source: review, target: end }
"#;

#[tokio::test]
async fn test_human_input_pauses_and_resumes() {
    let engine = engine(REVIEW, json!({}), RuntimeContext::new());

    let first = collect(&engine).await;
    match terminal(&first) {
        GraphEngineEvent::GraphRunPaused { reasons, .. } => {
            assert_eq!(
                reasons,
                &vec![PauseReason::HumanInputRequired {
                    form_id: "approval".into(),
                    node_id: "review".into(),
                }]
            );
        }
        other => panic!("expected pause, got {:?}", other),
    }
    assert_eq!(count(&first, "pause_requested"), 1);
    assert_eq!(engine.state().execution().node_state("review"), NodeState::Paused);
    assert!(!nodes_with(&first, "node_run_started").contains(&"end".to_string()));

    {
        let mut pool = engine.state().variable_pool_mut();
        pool.add(&Selector::new("review", "action"), Segment::String("approve".into()));
        pool.add(&Selector::new("review", "comment"), Segment::String("lgtm".into()));
    }

    let second = collect(&engine).await;
    assert_eq!(terminal(&second).name(), "graph_run_succeeded");
    assert_eq!(nodes_with(&second, "node_run_started"), vec!["review", "end"]);
    let out = outputs(&second);
    assert_eq!(out["approved"], json!(true));
    assert_eq!(out["comment"], json!("lgtm"));
}

#[tokio::test]
async fn test_dropped_stream_leaves_run_resumable() {
    let engine = engine(SLOW_CHAIN, json!({ "q": "x" }), slow_runner());
    {
        let mut stream = engine.run();
        while let Some(event) = stream.next().await {
            if matches!(&event, GraphEngineEvent::NodeRunStarted { meta } if meta.node_id == "slow") {
                break;
            }
        }
    }
    // the dispatcher task winds down on its own
    for _ in 0..100 {
        if !engine.is_running() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!engine.is_running());
    assert_eq!(engine.state().execution().status(), ExecutionStatus::Aborted);

    let events = collect(&engine).await;
    assert_eq!(terminal(&events).name(), "graph_run_succeeded");
    assert!(!nodes_with(&events, "node_run_started").contains(&"start".to_string()));
}
