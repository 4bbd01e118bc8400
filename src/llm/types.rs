//! Data types exchanged with the injected LLM client.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::dsl::schema::{CompletionParams, LlmUsage};

/// Role of a chat message participant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// A single message in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Request payload for one completion call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequest {
    pub provider: String,
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub params: CompletionParams,
}

/// Response from one completion call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmResponse {
    pub text: String,
    #[serde(default)]
    pub usage: LlmUsage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// A single streamed piece of a completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StreamChunk {
    pub delta: String,
    #[serde(default)]
    pub finish_reason: Option<String>,
    /// Usually only present on the last chunk.
    #[serde(default)]
    pub usage: Option<LlmUsage>,
}

/// Input handed to an agent strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRequest {
    pub strategy: String,
    /// Parameters with `{{#node.field#}}` references already rendered.
    pub parameters: HashMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentResponse {
    pub text: String,
    #[serde(default)]
    pub outputs: HashMap<String, Value>,
    #[serde(default)]
    pub usage: Option<LlmUsage>,
}
