use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

use crate::error::NodeError;
use crate::llm::{AgentStrategy, LlmClient};
use crate::nodes::data_transform::CodeRunner;
use crate::nodes::knowledge_retrieval::KnowledgeRetriever;

/// Collaborators injected into node executors.
///
/// Services are optional; a node that needs a missing one fails with
/// [`NodeError::ServiceUnavailable`].
#[derive(Clone)]
pub struct RuntimeContext {
    pub time_provider: Arc<dyn TimeProvider>,
    pub id_generator: Arc<dyn IdGenerator>,
    pub llm_client: Option<Arc<dyn LlmClient>>,
    pub knowledge_retriever: Option<Arc<dyn KnowledgeRetriever>>,
    pub code_runner: Option<Arc<dyn CodeRunner>>,
    pub agent_strategy: Option<Arc<dyn AgentStrategy>>,
}

impl Default for RuntimeContext {
    fn default() -> Self {
        Self {
            time_provider: Arc::new(RealTimeProvider),
            id_generator: Arc::new(RealIdGenerator),
            llm_client: None,
            knowledge_retriever: None,
            code_runner: None,
            agent_strategy: None,
        }
    }
}

impl RuntimeContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_time_provider(mut self, provider: Arc<dyn TimeProvider>) -> Self {
        self.time_provider = provider;
        self
    }

    pub fn with_id_generator(mut self, generator: Arc<dyn IdGenerator>) -> Self {
        self.id_generator = generator;
        self
    }

    pub fn with_llm_client(mut self, client: Arc<dyn LlmClient>) -> Self {
        self.llm_client = Some(client);
        self
    }

    pub fn with_knowledge_retriever(mut self, retriever: Arc<dyn KnowledgeRetriever>) -> Self {
        self.knowledge_retriever = Some(retriever);
        self
    }

    pub fn with_code_runner(mut self, runner: Arc<dyn CodeRunner>) -> Self {
        self.code_runner = Some(runner);
        self
    }

    pub fn with_agent_strategy(mut self, strategy: Arc<dyn AgentStrategy>) -> Self {
        self.agent_strategy = Some(strategy);
        self
    }

    pub fn llm(&self) -> Result<&Arc<dyn LlmClient>, NodeError> {
        self.llm_client
            .as_ref()
            .ok_or_else(|| NodeError::ServiceUnavailable("no LLM client configured".into()))
    }

    pub fn retriever(&self) -> Result<&Arc<dyn KnowledgeRetriever>, NodeError> {
        self.knowledge_retriever.as_ref().ok_or_else(|| {
            NodeError::ServiceUnavailable("no knowledge retriever configured".into())
        })
    }

    pub fn code(&self) -> Result<&Arc<dyn CodeRunner>, NodeError> {
        self.code_runner
            .as_ref()
            .ok_or_else(|| NodeError::ServiceUnavailable("no code runner configured".into()))
    }

    pub fn agent(&self) -> Result<&Arc<dyn AgentStrategy>, NodeError> {
        self.agent_strategy
            .as_ref()
            .ok_or_else(|| NodeError::ServiceUnavailable("no agent strategy configured".into()))
    }
}

pub trait TimeProvider: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;

    fn now_millis(&self) -> i64 {
        self.now_utc().timestamp_millis()
    }
}

pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

// --- Real implementations ---

#[derive(Debug, Default)]
pub struct RealTimeProvider;

impl TimeProvider for RealTimeProvider {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Default)]
pub struct RealIdGenerator;

impl IdGenerator for RealIdGenerator {
    fn next_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

// --- Fake implementations ---

pub struct FakeTimeProvider {
    pub fixed_timestamp: i64,
}

impl FakeTimeProvider {
    /// `fixed_timestamp` is in seconds since the epoch.
    pub fn new(fixed_timestamp: i64) -> Self {
        Self { fixed_timestamp }
    }
}

impl TimeProvider for FakeTimeProvider {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.fixed_timestamp, 0)
            .single()
            .unwrap_or_default()
    }
}

pub struct FakeIdGenerator {
    pub prefix: String,
    pub counter: AtomicU64,
}

impl FakeIdGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: AtomicU64::new(0),
        }
    }
}

impl IdGenerator for FakeIdGenerator {
    fn next_id(&self) -> String {
        let id = self.counter.fetch_add(1, Ordering::SeqCst);
        format!("{}-{}", self.prefix, id)
    }
}
