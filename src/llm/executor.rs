use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::core::variable_pool::VariablePool;
use crate::dsl::schema::{AgentNodeData, ContextConfig, LlmNodeData, NodeRunResult, PromptMessage};
use crate::error::NodeError;
use crate::nodes::executor::{NodeContext, NodeExecutor, NodeOutcome};
use crate::template::{render_template, render_value};

use super::types::{AgentRequest, ChatMessage, ChatRole, LlmRequest, StreamChunk};

// ================================
// LLM Node
// ================================

/// Renders the prompt template and calls the injected [`LlmClient`](super::LlmClient).
pub struct LlmNodeExecutor {
    data: LlmNodeData,
}

impl LlmNodeExecutor {
    pub fn new(data: LlmNodeData) -> Self {
        Self { data }
    }
}

#[async_trait]
impl NodeExecutor for LlmNodeExecutor {
    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let client = ctx.runtime.llm()?;

        let mut messages = render_messages(&self.data.prompt_template, ctx.pool)?;
        if let Some(context) = &self.data.context {
            if let Some(text) = context_text(context, ctx.pool) {
                inject_context(&mut messages, text);
            }
        }

        let request = LlmRequest {
            provider: self.data.model.provider.clone(),
            model: self.data.model.name.clone(),
            messages,
            params: self.data.model.completion_params.clone().unwrap_or_default(),
        };
        let prompts = serde_json::to_value(&request.messages)?;

        ctx.check_stop()?;
        let (chunk_tx, mut chunk_rx) = mpsc::channel::<StreamChunk>(64);
        let selector = vec![ctx.node_id.to_string(), "text".to_string()];
        let forward = async {
            let mut closed = false;
            while let Some(chunk) = chunk_rx.recv().await {
                let is_final = chunk.finish_reason.is_some();
                closed |= is_final;
                ctx.emitter.stream_chunk(selector.clone(), chunk.delta, is_final);
            }
            if !closed {
                ctx.emitter.stream_chunk(selector.clone(), "", true);
            }
        };
        let (response, ()) = tokio::join!(client.invoke_stream(request, chunk_tx), forward);
        let response = response?;

        let mut outputs = HashMap::new();
        outputs.insert("text".to_string(), Value::String(response.text));
        outputs.insert("usage".to_string(), serde_json::to_value(&response.usage)?);
        outputs.insert(
            "finish_reason".to_string(),
            response
                .finish_reason
                .map(Value::String)
                .unwrap_or(Value::Null),
        );

        let mut result = NodeRunResult::succeeded(outputs);
        result.process_data.insert("prompts".to_string(), prompts);
        result.metadata.insert(
            "model".to_string(),
            Value::String(self.data.model.name.clone()),
        );
        result.metadata.insert(
            "provider".to_string(),
            Value::String(self.data.model.provider.clone()),
        );
        result.llm_usage = Some(response.usage);
        Ok(result.into())
    }
}

pub(crate) fn map_role(role: &str) -> Result<ChatRole, NodeError> {
    match role.to_lowercase().as_str() {
        "system" => Ok(ChatRole::System),
        "user" => Ok(ChatRole::User),
        "assistant" => Ok(ChatRole::Assistant),
        other => Err(NodeError::ConfigError(format!(
            "Unsupported role: {}",
            other
        ))),
    }
}

fn render_messages(
    template: &[PromptMessage],
    pool: &VariablePool,
) -> Result<Vec<ChatMessage>, NodeError> {
    template
        .iter()
        .map(|msg| Ok(ChatMessage::new(map_role(&msg.role)?, render_template(&msg.text, pool))))
        .collect()
}

fn context_text(config: &ContextConfig, pool: &VariablePool) -> Option<String> {
    if !config.enabled {
        return None;
    }
    let selector = config.variable_selector.as_ref()?;
    let text = pool.get(selector)?.to_display_string();
    (!text.is_empty()).then_some(text)
}

/// Append retrieved context to the system message, creating one if absent.
fn inject_context(messages: &mut Vec<ChatMessage>, ctx: String) {
    if let Some(system_msg) = messages.iter_mut().find(|m| m.role == ChatRole::System) {
        system_msg.content.push('\n');
        system_msg.content.push_str(&ctx);
    } else {
        messages.insert(0, ChatMessage::new(ChatRole::System, ctx));
    }
}

// ================================
// Agent Node
// ================================

pub struct AgentNodeExecutor {
    data: AgentNodeData,
}

impl AgentNodeExecutor {
    pub fn new(data: AgentNodeData) -> Self {
        Self { data }
    }
}

#[async_trait]
impl NodeExecutor for AgentNodeExecutor {
    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let strategy = ctx.runtime.agent()?;
        let parameters: HashMap<String, Value> = self
            .data
            .parameters
            .iter()
            .map(|(k, v)| (k.clone(), render_value(v, ctx.pool)))
            .collect();

        let response = strategy
            .run(AgentRequest {
                strategy: self.data.strategy.clone(),
                parameters: parameters.clone(),
            })
            .await?;

        let mut outputs = response.outputs;
        outputs.insert("text".to_string(), Value::String(response.text));

        let mut result = NodeRunResult::succeeded(outputs).with_inputs(parameters);
        result.metadata.insert(
            "strategy".to_string(),
            Value::String(self.data.strategy.clone()),
        );
        result.llm_usage = response.usage;
        Ok(result.into())
    }
}
