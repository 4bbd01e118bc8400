use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dsl::schema::{KnowledgeRetrievalNodeData, NodeRunResult};
use crate::error::NodeError;
use crate::nodes::executor::{NodeContext, NodeExecutor, NodeOutcome};
use crate::nodes::utils::require_value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalRequest {
    pub query: String,
    pub dataset_ids: Vec<String>,
    pub top_k: usize,
    pub score_threshold: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub content: String,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

/// Vector / keyword search backend.
#[async_trait]
pub trait KnowledgeRetriever: Send + Sync {
    async fn retrieve(&self, request: RetrievalRequest) -> Result<Vec<RetrievedChunk>, NodeError>;
}

pub struct KnowledgeRetrievalExecutor {
    data: KnowledgeRetrievalNodeData,
}

impl KnowledgeRetrievalExecutor {
    pub fn new(data: KnowledgeRetrievalNodeData) -> Self {
        Self { data }
    }
}

#[async_trait]
impl NodeExecutor for KnowledgeRetrievalExecutor {
    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let retriever = ctx.runtime.retriever()?;
        let query = match require_value(ctx.pool, &self.data.query_variable_selector)? {
            Value::String(s) => s,
            other => other.to_string(),
        };

        let request = RetrievalRequest {
            query: query.clone(),
            dataset_ids: self.data.dataset_ids.clone(),
            top_k: self.data.top_k,
            score_threshold: self.data.score_threshold,
        };
        let mut chunks = retriever.retrieve(request).await?;
        if let Some(threshold) = self.data.score_threshold {
            chunks.retain(|c| c.score >= threshold);
        }
        chunks.sort_by(|a, b| b.score.total_cmp(&a.score));
        chunks.truncate(self.data.top_k);

        let outputs = HashMap::from([("result".to_string(), serde_json::to_value(&chunks)?)]);
        let inputs = HashMap::from([("query".to_string(), Value::String(query))]);
        Ok(NodeRunResult::succeeded(outputs).with_inputs(inputs).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::runtime_context::RuntimeContext;
    use crate::core::variable_pool::{Segment, Selector, VariablePool};
    use crate::nodes::utils::test_support::{completed, execute};
    use serde_json::json;
    use std::sync::Arc;

    struct StaticRetriever;

    #[async_trait]
    impl KnowledgeRetriever for StaticRetriever {
        async fn retrieve(
            &self,
            request: RetrievalRequest,
        ) -> Result<Vec<RetrievedChunk>, NodeError> {
            Ok([0.2, 0.9, 0.6, 0.7]
                .iter()
                .map(|score| RetrievedChunk {
                    content: format!("{} @ {}", request.query, score),
                    score: *score,
                    title: None,
                    metadata: HashMap::new(),
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn test_retrieval_filters_and_ranks() {
        let data: KnowledgeRetrievalNodeData = serde_json::from_value(json!({
            "query_variable_selector": ["start", "q"],
            "dataset_ids": ["ds1"],
            "top_k": 2,
            "score_threshold": 0.5
        }))
        .unwrap();
        let mut pool = VariablePool::new();
        pool.add(&Selector::new("start", "q"), Segment::String("rust".into()));
        let ctx = RuntimeContext::new().with_knowledge_retriever(Arc::new(StaticRetriever));
        let exec = KnowledgeRetrievalExecutor::new(data);
        let result = completed(execute(&exec, "kr", pool, ctx).await.0);
        let scores: Vec<f64> = result.outputs["result"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["score"].as_f64().unwrap())
            .collect();
        assert_eq!(scores, vec![0.9, 0.7]);
    }

    #[tokio::test]
    async fn test_missing_query_variable() {
        let data: KnowledgeRetrievalNodeData = serde_json::from_value(json!({
            "query_variable_selector": ["start", "q"]
        }))
        .unwrap();
        let ctx = RuntimeContext::new().with_knowledge_retriever(Arc::new(StaticRetriever));
        let (outcome, _) = execute(
            &KnowledgeRetrievalExecutor::new(data),
            "kr",
            VariablePool::new(),
            ctx,
        )
        .await;
        assert!(matches!(outcome, Err(NodeError::VariableNotFound(_))));
    }
}
