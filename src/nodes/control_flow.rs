use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

use crate::core::variable_pool::SYSTEM_NODE_ID;
use crate::dsl::schema::{
    AnswerNodeData, Case, EndNodeData, IfElseNodeData, NodeRunResult, StartNodeData,
};
use crate::error::NodeError;
use crate::evaluator::{evaluate_cases, ELSE_CASE_ID};
use crate::nodes::executor::{NodeContext, NodeExecutor, NodeOutcome};
use crate::template::render_template;

// ================================
// Start Node
// ================================

pub struct StartNodeExecutor {
    data: StartNodeData,
}

impl StartNodeExecutor {
    pub fn new(data: StartNodeData) -> Self {
        Self { data }
    }
}

#[async_trait]
impl NodeExecutor for StartNodeExecutor {
    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let user_inputs = ctx.pool.user_inputs();
        let mut outputs = HashMap::new();

        for var in &self.data.variables {
            match user_inputs.get(&var.variable).filter(|v| !v.is_null()) {
                Some(v) => {
                    outputs.insert(var.variable.clone(), v.clone());
                }
                None => match &var.default {
                    Some(default) => {
                        outputs.insert(var.variable.clone(), default.clone());
                    }
                    None if var.required => {
                        return Err(NodeError::InputValidationError(format!(
                            "Missing required input: {}",
                            var.variable
                        )));
                    }
                    None => {
                        outputs.insert(var.variable.clone(), Value::Null);
                    }
                },
            }
        }

        // undeclared inputs pass through as well
        for (key, value) in user_inputs {
            outputs.entry(key.clone()).or_insert_with(|| value.clone());
        }

        for (name, value) in ctx.pool.node_variables(SYSTEM_NODE_ID) {
            outputs.insert(format!("{}.{}", SYSTEM_NODE_ID, name), value.to_value());
        }

        Ok(NodeRunResult::succeeded(outputs)
            .with_inputs(user_inputs.clone())
            .into())
    }
}

// ================================
// End Node
// ================================

pub struct EndNodeExecutor {
    data: EndNodeData,
}

impl EndNodeExecutor {
    pub fn new(data: EndNodeData) -> Self {
        Self { data }
    }
}

#[async_trait]
impl NodeExecutor for EndNodeExecutor {
    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let outputs: HashMap<String, Value> = self
            .data
            .outputs
            .iter()
            .map(|ov| {
                (
                    ov.variable.clone(),
                    ctx.pool.get_value(&ov.value_selector).unwrap_or(Value::Null),
                )
            })
            .collect();

        Ok(NodeRunResult::succeeded(outputs.clone())
            .with_inputs(outputs)
            .into())
    }
}

// ================================
// Answer Node
// ================================

pub struct AnswerNodeExecutor {
    data: AnswerNodeData,
}

impl AnswerNodeExecutor {
    pub fn new(data: AnswerNodeData) -> Self {
        Self { data }
    }
}

#[async_trait]
impl NodeExecutor for AnswerNodeExecutor {
    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let rendered = render_template(&self.data.answer, ctx.pool);
        ctx.emitter.stream_chunk(
            vec![ctx.node_id.to_string(), "answer".to_string()],
            rendered.clone(),
            true,
        );
        let outputs = HashMap::from([("answer".to_string(), Value::String(rendered))]);
        Ok(NodeRunResult::succeeded(outputs).into())
    }
}

// ================================
// IfElse Node
// ================================

pub struct IfElseNodeExecutor {
    cases: Vec<Case>,
}

impl IfElseNodeExecutor {
    pub fn new(data: IfElseNodeData) -> Self {
        Self {
            cases: data.effective_cases(),
        }
    }
}

#[async_trait]
impl NodeExecutor for IfElseNodeExecutor {
    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let selected = evaluate_cases(&self.cases, ctx.pool);

        let mut outputs = HashMap::new();
        outputs.insert("result".to_string(), Value::Bool(selected != ELSE_CASE_ID));
        outputs.insert(
            "selected_case_id".to_string(),
            Value::String(selected.clone()),
        );

        Ok(NodeRunResult::succeeded(outputs).with_handle(selected).into())
    }
}

// ================================
// Iteration / Loop start markers
// ================================

/// Entry node of a container sub-graph; scope variables are already bound.
pub struct PassThroughExecutor;

#[async_trait]
impl NodeExecutor for PassThroughExecutor {
    async fn execute(&self, _ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        Ok(NodeRunResult::default().into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::events::GraphEngineEvent;
    use crate::core::runtime_context::RuntimeContext;
    use crate::core::variable_pool::{Segment, Selector, VariablePool};
    use crate::nodes::utils::test_support::{completed, execute};
    use serde_json::json;

    fn pool_with_inputs(inputs: Value) -> VariablePool {
        let map: HashMap<String, Value> = serde_json::from_value(inputs).unwrap();
        VariablePool::with_user_inputs(map)
    }

    #[tokio::test]
    async fn test_start_binds_inputs_and_defaults() {
        let data: StartNodeData = serde_json::from_value(json!({
            "variables": [
                { "variable": "query", "required": true },
                { "variable": "lang", "default": "en" }
            ]
        }))
        .unwrap();
        let mut pool = pool_with_inputs(json!({ "query": "hello", "extra": 1 }));
        pool.set_system_variable("user_id", Segment::String("u1".into()));
        let exec = StartNodeExecutor::new(data);
        let result = completed(execute(&exec, "start", pool, RuntimeContext::new()).await.0);
        assert_eq!(result.outputs["query"], json!("hello"));
        assert_eq!(result.outputs["lang"], json!("en"));
        assert_eq!(result.outputs["extra"], json!(1));
        assert_eq!(result.outputs["sys.user_id"], json!("u1"));
    }

    #[tokio::test]
    async fn test_start_missing_required_input() {
        let data: StartNodeData = serde_json::from_value(json!({
            "variables": [{ "variable": "query", "required": true }]
        }))
        .unwrap();
        let exec = StartNodeExecutor::new(data);
        let (outcome, _) = execute(&exec, "start", VariablePool::new(), RuntimeContext::new()).await;
        assert!(matches!(outcome, Err(NodeError::InputValidationError(_))));
    }

    #[tokio::test]
    async fn test_end_and_answer() {
        let mut pool = VariablePool::new();
        pool.add(&Selector::new("llm", "text"), Segment::String("hi".into()));

        let end: EndNodeData = serde_json::from_value(json!({
            "outputs": [
                { "variable": "result", "value_selector": ["llm", "text"] },
                { "variable": "missing", "value_selector": ["llm", "nope"] }
            ]
        }))
        .unwrap();
        let result = completed(
            execute(&EndNodeExecutor::new(end), "end", pool.clone(), RuntimeContext::new())
                .await
                .0,
        );
        assert_eq!(result.outputs["result"], json!("hi"));
        assert_eq!(result.outputs["missing"], Value::Null);

        let answer = AnswerNodeExecutor::new(AnswerNodeData {
            answer: "said: {{#llm.text#}}".into(),
        });
        let (outcome, events) = execute(&answer, "ans", pool, RuntimeContext::new()).await;
        assert_eq!(completed(outcome).outputs["answer"], json!("said: hi"));
        assert!(matches!(
            events.as_slice(),
            [GraphEngineEvent::NodeRunStreamChunk { selector, chunk, is_final: true, .. }]
                if selector == &["ans", "answer"] && chunk == "said: hi"
        ));
    }

    #[tokio::test]
    async fn test_if_else_selects_case_handle() {
        let data: IfElseNodeData = serde_json::from_value(json!({
            "cases": [
                {
                    "case_id": "big",
                    "conditions": [{
                        "variable_selector": ["start", "n"],
                        "comparison_operator": ">",
                        "value": 10
                    }]
                }
            ]
        }))
        .unwrap();
        let exec = IfElseNodeExecutor::new(data);

        let mut pool = VariablePool::new();
        pool.add(&Selector::new("start", "n"), Segment::Integer(42));
        let result = completed(execute(&exec, "if", pool, RuntimeContext::new()).await.0);
        assert_eq!(result.edge_source_handle, "big");
        assert_eq!(result.outputs["result"], json!(true));

        let mut pool = VariablePool::new();
        pool.add(&Selector::new("start", "n"), Segment::Integer(1));
        let result = completed(execute(&exec, "if", pool, RuntimeContext::new()).await.0);
        assert_eq!(result.edge_source_handle, "false");
        assert_eq!(result.outputs["result"], json!(false));
    }
}
