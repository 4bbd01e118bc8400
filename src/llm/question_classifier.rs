use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::dsl::schema::{
    ClassConfig, CompletionParams, NodeRunResult, QuestionClassifierNodeData,
};
use crate::error::NodeError;
use crate::nodes::executor::{NodeContext, NodeExecutor, NodeOutcome};
use crate::template::render_template;

use super::types::{ChatMessage, ChatRole, LlmRequest};

/// Branch node: the chosen class id becomes the outgoing handle.
pub struct QuestionClassifierExecutor {
    data: QuestionClassifierNodeData,
}

impl QuestionClassifierExecutor {
    pub fn new(data: QuestionClassifierNodeData) -> Result<Self, NodeError> {
        validate_classes(&data.classes)?;
        Ok(Self { data })
    }

    /// First class whose id or name the model answered with, else the first class.
    fn pick_class(&self, answer: &str) -> &ClassConfig {
        let answered = extract_class_id(answer);
        self.data
            .classes
            .iter()
            .find(|c| c.id == answered)
            .or_else(|| {
                self.data
                    .classes
                    .iter()
                    .find(|c| c.name.eq_ignore_ascii_case(&answered))
            })
            .unwrap_or(&self.data.classes[0])
    }
}

#[async_trait]
impl NodeExecutor for QuestionClassifierExecutor {
    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let client = ctx.runtime.llm()?;
        let query = ctx
            .pool
            .get(&self.data.query_variable_selector)
            .map(|seg| seg.to_display_string())
            .unwrap_or_default();
        let instruction = self
            .data
            .instruction
            .as_deref()
            .map(|t| render_template(t, ctx.pool));

        let params = self
            .data
            .model
            .completion_params
            .clone()
            .unwrap_or(CompletionParams {
                temperature: Some(0.0),
                top_p: None,
                max_tokens: Some(256),
            });
        let request = LlmRequest {
            provider: self.data.model.provider.clone(),
            model: self.data.model.name.clone(),
            messages: vec![
                ChatMessage::new(
                    ChatRole::System,
                    build_system_prompt(&self.data.classes, instruction.as_deref()),
                ),
                ChatMessage::new(ChatRole::User, query.clone()),
            ],
            params,
        };
        let response = client.invoke(request).await?;

        let class = self.pick_class(&response.text);
        let mut outputs = HashMap::new();
        outputs.insert("class_name".to_string(), Value::String(class.name.clone()));
        outputs.insert("class_id".to_string(), Value::String(class.id.clone()));
        outputs.insert("usage".to_string(), serde_json::to_value(&response.usage)?);

        let mut result = NodeRunResult::succeeded(outputs)
            .with_handle(class.id.clone())
            .with_inputs(HashMap::from([("query".to_string(), Value::String(query))]));
        result.llm_usage = Some(response.usage);
        Ok(result.into())
    }
}

fn validate_classes(classes: &[ClassConfig]) -> Result<(), NodeError> {
    if classes.is_empty() {
        return Err(NodeError::ConfigError(
            "question-classifier classes must not be empty".to_string(),
        ));
    }
    let mut ids = std::collections::HashSet::new();
    for class in classes {
        if class.id.trim().is_empty() {
            return Err(NodeError::ConfigError(
                "question-classifier class id must not be empty".to_string(),
            ));
        }
        if !ids.insert(class.id.as_str()) {
            return Err(NodeError::ConfigError(format!(
                "duplicate question-classifier class id: {}",
                class.id
            )));
        }
    }
    Ok(())
}

fn build_system_prompt(classes: &[ClassConfig], instruction: Option<&str>) -> String {
    let mut prompt = String::from(
        "You are a text classification engine. Classify the input text into exactly one category.\n\n",
    );
    prompt.push_str("### Categories\n");
    for class in classes {
        prompt.push_str(&format!(
            "- category_id: \"{}\", category_name: \"{}\"\n",
            class.id, class.name
        ));
    }
    if let Some(instruction) = instruction.map(str::trim).filter(|s| !s.is_empty()) {
        prompt.push_str("\n### Instructions\n");
        prompt.push_str(instruction);
        prompt.push('\n');
    }
    prompt.push_str(
        "\n### Output format\nRespond ONLY with a JSON object: {\"category_id\":\"<id>\"}\nDo not include any other text or markdown formatting.",
    );
    prompt
}

/// Accepts `{"category_id": ..}`, the same inside a code fence, or a bare id.
fn extract_class_id(response: &str) -> String {
    let trimmed = response.trim();
    let body = strip_markdown_code_fence(trimmed).unwrap_or_else(|| trimmed.to_string());
    serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v.get("category_id").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.trim_matches('"').to_string())
        .trim()
        .to_string()
}

fn strip_markdown_code_fence(text: &str) -> Option<String> {
    if !text.starts_with("```") {
        return None;
    }
    let body: Vec<&str> = text
        .lines()
        .skip(1)
        .take_while(|line| !line.trim_start().starts_with("```"))
        .collect();
    (!body.is_empty()).then(|| body.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::runtime_context::RuntimeContext;
    use crate::core::variable_pool::{Segment, Selector, VariablePool};
    use crate::llm::{LlmClient, LlmResponse};
    use crate::nodes::utils::test_support::{completed, execute};
    use serde_json::json;
    use std::sync::Arc;

    struct FixedAnswer(&'static str);

    #[async_trait]
    impl LlmClient for FixedAnswer {
        async fn invoke(&self, _request: LlmRequest) -> Result<LlmResponse, NodeError> {
            Ok(LlmResponse {
                text: self.0.to_string(),
                ..Default::default()
            })
        }
    }

    fn classifier() -> QuestionClassifierExecutor {
        QuestionClassifierExecutor::new(
            serde_json::from_value(json!({
                "query_variable_selector": ["start", "q"],
                "model": { "provider": "mock", "name": "m" },
                "classes": [
                    { "id": "billing", "name": "Billing" },
                    { "id": "tech", "name": "Technical" }
                ]
            }))
            .unwrap(),
        )
        .unwrap()
    }

    async fn classify(answer: &'static str) -> NodeRunResult {
        let mut pool = VariablePool::new();
        pool.add(&Selector::new("start", "q"), Segment::String("it crashes".into()));
        let runtime = RuntimeContext::new().with_llm_client(Arc::new(FixedAnswer(answer)));
        completed(execute(&classifier(), "qc", pool, runtime).await.0)
    }

    #[tokio::test]
    async fn test_json_answer_selects_class_handle() {
        let result = classify("{\"category_id\": \"tech\"}").await;
        assert_eq!(result.edge_source_handle, "tech");
        assert_eq!(result.outputs["class_name"], json!("Technical"));
    }

    #[tokio::test]
    async fn test_fenced_and_bare_answers() {
        assert_eq!(
            classify("```json\n{\"category_id\":\"billing\"}\n```")
                .await
                .edge_source_handle,
            "billing"
        );
        assert_eq!(classify("Technical").await.edge_source_handle, "tech");
    }

    #[tokio::test]
    async fn test_unmatched_answer_falls_back_to_first_class() {
        let result = classify("no idea").await;
        assert_eq!(result.edge_source_handle, "billing");
        assert_eq!(result.outputs["class_id"], json!("billing"));
    }

    #[test]
    fn test_rejects_empty_classes() {
        let data: QuestionClassifierNodeData = serde_json::from_value(json!({
            "query_variable_selector": ["start", "q"],
            "model": { "provider": "mock", "name": "m" },
            "classes": []
        }))
        .unwrap();
        assert!(QuestionClassifierExecutor::new(data).is_err());
    }
}
