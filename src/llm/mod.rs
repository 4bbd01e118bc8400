//! LLM-backed nodes and the client traits they call through.
//!
//! Provider protocols are out of scope; embedders inject an [`LlmClient`]
//! and optionally an [`AgentStrategy`] via
//! [`RuntimeContext`](crate::core::runtime_context::RuntimeContext).

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::NodeError;

pub mod executor;
pub mod question_classifier;
pub mod types;

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn invoke(&self, request: LlmRequest) -> Result<LlmResponse, NodeError>;

    /// Streaming variant. Deltas go to `chunk_tx` as they arrive and the
    /// aggregated response is returned at the end. The default forwards the
    /// whole answer of [`invoke`](Self::invoke) as one chunk.
    async fn invoke_stream(
        &self,
        request: LlmRequest,
        chunk_tx: mpsc::Sender<StreamChunk>,
    ) -> Result<LlmResponse, NodeError> {
        let response = self.invoke(request).await?;
        let _ = chunk_tx
            .send(StreamChunk {
                delta: response.text.clone(),
                finish_reason: response.finish_reason.clone(),
                usage: Some(response.usage.clone()),
            })
            .await;
        Ok(response)
    }
}

#[async_trait]
pub trait AgentStrategy: Send + Sync {
    async fn run(&self, request: AgentRequest) -> Result<AgentResponse, NodeError>;
}

pub use executor::{AgentNodeExecutor, LlmNodeExecutor};
pub use question_classifier::QuestionClassifierExecutor;
pub use types::{
    AgentRequest, AgentResponse, ChatMessage, ChatRole, LlmRequest, LlmResponse,
    StreamChunk,
};
