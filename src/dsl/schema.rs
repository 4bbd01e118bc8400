use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::core::variable_pool::Selector;

/// Default handle of an unconditional edge.
pub const DEFAULT_SOURCE_HANDLE: &str = "source";
/// Handle taken when a node with the fail-branch strategy raises.
pub const FAIL_BRANCH_HANDLE: &str = "fail-branch";

// ================================
// Workflow DSL Schema
// ================================

pub const CURRENT_DSL_VERSION: &str = "0.1.0";

pub const SUPPORTED_DSL_VERSIONS: &[&str] = &["0.1.0"];

fn default_version() -> String {
    CURRENT_DSL_VERSION.to_string()
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct WorkflowSchema {
    #[serde(default = "default_version")]
    pub version: String,
    pub nodes: Vec<NodeSchema>,
    #[serde(default)]
    pub edges: Vec<EdgeSchema>,
    /// Explicit entry point. When absent the unique start node is used.
    #[serde(default, alias = "rootNodeId")]
    pub root_node_id: Option<String>,
    #[serde(default)]
    pub environment_variables: Vec<EnvironmentVariable>,
    #[serde(default)]
    pub conversation_variables: Vec<ConversationVariable>,
}

/// Node definition in the DSL.
/// The `data` object embeds the type tag and all node-specific config.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct NodeSchema {
    pub id: String,
    pub data: NodeData,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct NodeData {
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub error_strategy: Option<ErrorStrategyType>,
    #[serde(default, deserialize_with = "deserialize_default_value")]
    pub default_value: Option<HashMap<String, Value>>,
    #[serde(default)]
    pub retry_config: Option<RetryConfig>,
    /// Type-specific configuration, kept raw until the node factory parses it.
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl NodeData {
    /// Type-specific config as a JSON object.
    pub fn config(&self) -> Value {
        Value::Object(
            self.extra
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct EdgeSchema {
    #[serde(default)]
    pub id: Option<String>,
    pub source: String,
    pub target: String,
    #[serde(default, alias = "sourceHandle")]
    pub source_handle: Option<String>,
    #[serde(default, alias = "targetHandle")]
    pub target_handle: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct EnvironmentVariable {
    pub name: String,
    pub value: Value,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ConversationVariable {
    pub name: String,
    #[serde(rename = "type", default = "default_var_type")]
    pub var_type: String,
    #[serde(default)]
    pub default: Option<Value>,
}

// ================================
// Error Strategy
// ================================

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorStrategyType {
    #[default]
    #[serde(alias = "abort")]
    None,
    FailBranch,
    DefaultValue,
}

/// Accepts either `{key: value}` or Dify's `[{key, type, value}]` list.
fn deserialize_default_value<'de, D>(
    deserializer: D,
) -> Result<Option<HashMap<String, Value>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    match raw {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map.into_iter().collect())),
        Some(Value::Array(items)) => {
            let mut out = HashMap::new();
            for item in items {
                let key = item
                    .get("key")
                    .and_then(Value::as_str)
                    .ok_or_else(|| serde::de::Error::custom("default_value entry without key"))?;
                let value = item.get("value").cloned().unwrap_or(Value::Null);
                out.insert(key.to_string(), value);
            }
            Ok(Some(out))
        }
        Some(_) => Err(serde::de::Error::custom(
            "default_value must be an object or a list of {key, value}",
        )),
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_true")]
    pub retry_enabled: bool,
    #[serde(default)]
    pub max_retries: u32,
    /// Milliseconds.
    #[serde(default)]
    pub retry_interval: u64,
    #[serde(default)]
    pub backoff_strategy: BackoffStrategy,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Milliseconds.
    #[serde(default = "default_max_retry_interval")]
    pub max_retry_interval: u64,
}

impl RetryConfig {
    pub fn effective_max_retries(&self) -> u32 {
        if self.retry_enabled {
            self.max_retries
        } else {
            0
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    #[default]
    Fixed,
    Exponential,
    ExponentialWithJitter,
}

fn default_true() -> bool {
    true
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_max_retry_interval() -> u64 {
    60_000
}

// ================================
// Node Type Enum (Dify-compatible)
// ================================

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum NodeType {
    Start,
    End,
    Answer,
    Llm,
    KnowledgeRetrieval,
    IfElse,
    Code,
    TemplateTransform,
    QuestionClassifier,
    HttpRequest,
    #[serde(alias = "variable-assigner")]
    VariableAggregator,
    Loop,
    LoopStart,
    Iteration,
    IterationStart,
    Agent,
    HumanInput,
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(|s| s.to_string()))
            .unwrap_or_else(|| format!("{:?}", self));
        write!(f, "{}", s)
    }
}

// ================================
// Node Execution Type
// ================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeExecutionType {
    Executable,
    Response,
    Branch,
    Container,
    Root,
}

impl NodeType {
    pub fn execution_type(&self) -> NodeExecutionType {
        match self {
            NodeType::Start | NodeType::IterationStart | NodeType::LoopStart => {
                NodeExecutionType::Root
            }
            NodeType::End | NodeType::Answer => NodeExecutionType::Response,
            NodeType::IfElse | NodeType::QuestionClassifier | NodeType::HumanInput => {
                NodeExecutionType::Branch
            }
            NodeType::Iteration | NodeType::Loop => NodeExecutionType::Container,
            _ => NodeExecutionType::Executable,
        }
    }

    pub fn is_branch(&self) -> bool {
        self.execution_type() == NodeExecutionType::Branch
    }

    pub fn is_root(&self) -> bool {
        self.execution_type() == NodeExecutionType::Root
    }
}

// ================================
// Start Node Config
// ================================

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct StartNodeData {
    #[serde(default)]
    pub variables: Vec<StartVariable>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct StartVariable {
    pub variable: String,
    #[serde(default)]
    pub label: String,
    #[serde(rename = "type", default = "default_var_type")]
    pub var_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
}

fn default_var_type() -> String {
    "string".to_string()
}

// ================================
// End / Answer Node Config
// ================================

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct EndNodeData {
    #[serde(default)]
    pub outputs: Vec<OutputVariable>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct OutputVariable {
    pub variable: String,
    pub value_selector: Selector,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct AnswerNodeData {
    pub answer: String,
}

// ================================
// IfElse Node Config (multi-case branches)
// ================================

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct IfElseNodeData {
    #[serde(default)]
    pub cases: Vec<Case>,
    /// Legacy single-case shape: selects `"true"` / `"false"`.
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub logical_operator: LogicalOperator,
    /// Auto-builder hints; ignored at run time.
    #[serde(default)]
    pub true_branch: Option<String>,
    #[serde(default)]
    pub false_branch: Option<String>,
}

impl IfElseNodeData {
    /// Cases in evaluation order, with the legacy shape mapped to case `"true"`.
    pub fn effective_cases(&self) -> Vec<Case> {
        if !self.cases.is_empty() {
            return self.cases.clone();
        }
        if self.conditions.is_empty() {
            return Vec::new();
        }
        vec![Case {
            case_id: "true".to_string(),
            logical_operator: self.logical_operator,
            conditions: self.conditions.clone(),
        }]
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Case {
    pub case_id: String,
    #[serde(default)]
    pub logical_operator: LogicalOperator,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Condition {
    pub variable_selector: Selector,
    pub comparison_operator: ComparisonOperator,
    #[serde(default)]
    pub value: Value,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOperator {
    // String/Array
    Contains,
    #[serde(alias = "not contains")]
    NotContains,
    #[serde(alias = "start with", alias = "starts_with")]
    StartWith,
    #[serde(alias = "end with", alias = "ends_with")]
    EndWith,
    Is,
    #[serde(alias = "is not")]
    IsNot,
    Empty,
    #[serde(alias = "not empty")]
    NotEmpty,
    In,
    #[serde(alias = "not in")]
    NotIn,
    #[serde(alias = "all of")]
    AllOf,
    // Numeric
    #[serde(alias = "=")]
    Equal,
    #[serde(alias = "≠", alias = "!=")]
    NotEqual,
    #[serde(alias = ">")]
    GreaterThan,
    #[serde(alias = "<")]
    LessThan,
    #[serde(alias = "≥", alias = ">=", alias = "greater_than_or_equal")]
    GreaterOrEqual,
    #[serde(alias = "≤", alias = "<=", alias = "less_than_or_equal")]
    LessOrEqual,
    // Null
    Null,
    #[serde(alias = "not null")]
    NotNull,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogicalOperator {
    #[default]
    And,
    Or,
}

// ================================
// Template Transform / Code / Aggregator
// ================================

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct TemplateTransformNodeData {
    pub template: String,
    #[serde(default)]
    pub variables: Vec<VariableMapping>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct VariableMapping {
    pub variable: String,
    pub value_selector: Selector,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct CodeNodeData {
    pub code: String,
    #[serde(alias = "code_language")]
    pub language: CodeLanguage,
    #[serde(default)]
    pub variables: Vec<VariableMapping>,
    /// Declared outputs: name → `{type: ...}`.
    #[serde(default)]
    pub outputs: HashMap<String, Value>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CodeLanguage {
    Python3,
    Javascript,
}

impl std::fmt::Display for CodeLanguage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodeLanguage::Python3 => write!(f, "python3"),
            CodeLanguage::Javascript => write!(f, "javascript"),
        }
    }
}

/// Dify semantics: the first non-null variable wins.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct VariableAggregatorNodeData {
    pub variables: Vec<Selector>,
    #[serde(default)]
    pub output_type: Option<String>,
}

// ================================
// HTTP Request Node Config
// ================================

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct HttpRequestNodeData {
    pub method: HttpMethod,
    pub url: String,
    #[serde(default)]
    pub headers: Vec<KeyValuePair>,
    #[serde(default)]
    pub params: Vec<KeyValuePair>,
    #[serde(default)]
    pub body: Option<HttpBody>,
    #[serde(default)]
    pub authorization: Option<Authorization>,
    /// Seconds.
    #[serde(default = "default_http_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub fail_on_error_status: bool,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[serde(alias = "get")]
    Get,
    #[serde(alias = "post")]
    Post,
    #[serde(alias = "put")]
    Put,
    #[serde(alias = "delete")]
    Delete,
    #[serde(alias = "patch")]
    Patch,
    #[serde(alias = "head")]
    Head,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct KeyValuePair {
    pub key: String,
    pub value: String,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HttpBody {
    None,
    FormData { data: Vec<KeyValuePair> },
    XWwwFormUrlencoded { data: Vec<KeyValuePair> },
    RawText { data: String },
    Json { data: String },
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Authorization {
    NoAuth,
    ApiKey { key: String, value: String },
    BearerToken { token: String },
    BasicAuth { username: String, password: String },
}

fn default_http_timeout() -> u64 {
    10
}

// ================================
// Knowledge Retrieval / Human Input
// ================================

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct KnowledgeRetrievalNodeData {
    pub query_variable_selector: Selector,
    #[serde(default)]
    pub dataset_ids: Vec<String>,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub score_threshold: Option<f64>,
}

fn default_top_k() -> usize {
    4
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct HumanInputNodeData {
    #[serde(default)]
    pub form_id: Option<String>,
    #[serde(default)]
    pub inputs: Vec<HumanInputField>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct HumanInputField {
    pub variable: String,
    #[serde(default)]
    pub required: bool,
}

// ================================
// Containers
// ================================

/// Graph embedded in an iteration / loop node.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct SubGraphDefinition {
    pub nodes: Vec<NodeSchema>,
    #[serde(default)]
    pub edges: Vec<EdgeSchema>,
    #[serde(default, alias = "start_node_id")]
    pub root_node_id: Option<String>,
}

impl SubGraphDefinition {
    pub fn to_workflow(&self) -> WorkflowSchema {
        WorkflowSchema {
            version: default_version(),
            nodes: self.nodes.clone(),
            edges: self.edges.clone(),
            root_node_id: self.root_node_id.clone(),
            environment_variables: Vec::new(),
            conversation_variables: Vec::new(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct IterationNodeData {
    pub iterator_selector: Selector,
    pub output_selector: Selector,
    pub sub_graph: SubGraphDefinition,
    #[serde(default)]
    pub is_parallel: bool,
    #[serde(default = "default_parallel_nums")]
    pub parallel_nums: usize,
    #[serde(default)]
    pub error_handle_mode: IterationErrorMode,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum IterationErrorMode {
    #[default]
    Terminated,
    ContinueOnError,
    #[serde(alias = "remove_abnormal")]
    RemoveAbnormalOutput,
}

fn default_parallel_nums() -> usize {
    10
}
fn default_max_iterations() -> usize {
    1000
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct LoopNodeData {
    pub loop_count: usize,
    pub sub_graph: SubGraphDefinition,
    #[serde(default)]
    pub loop_variables: Vec<LoopVariable>,
    #[serde(default)]
    pub break_conditions: Vec<Condition>,
    #[serde(default)]
    pub logical_operator: LogicalOperator,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct LoopVariable {
    pub label: String,
    #[serde(default)]
    pub value_type: LoopValueType,
    #[serde(default)]
    pub value: Value,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoopValueType {
    #[default]
    Constant,
    /// `value` is a selector resolved from the pool.
    Variable,
}

// ================================
// LLM / Classifier / Agent Config
// ================================

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct LlmNodeData {
    pub model: ModelConfig,
    #[serde(default)]
    pub prompt_template: Vec<PromptMessage>,
    #[serde(default)]
    pub context: Option<ContextConfig>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ModelConfig {
    pub provider: String,
    pub name: String,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub completion_params: Option<CompletionParams>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct CompletionParams {
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct PromptMessage {
    pub role: String,
    pub text: String,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ContextConfig {
    pub enabled: bool,
    #[serde(default)]
    pub variable_selector: Option<Selector>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct QuestionClassifierNodeData {
    pub query_variable_selector: Selector,
    pub model: ModelConfig,
    pub classes: Vec<ClassConfig>,
    #[serde(default)]
    pub instruction: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ClassConfig {
    pub id: String,
    pub name: String,
    /// Auto-builder hint; ignored at run time.
    #[serde(default)]
    pub target: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct AgentNodeData {
    #[serde(alias = "agent_strategy_name")]
    pub strategy: String,
    /// String values may contain `{{#node.field#}}` references.
    #[serde(default, alias = "agent_parameters")]
    pub parameters: HashMap<String, Value>,
}

// ================================
// Node Run Result (Dify-compatible)
// ================================

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowNodeExecutionStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Exception,
    Stopped,
    Paused,
    Retry,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct NodeRunResult {
    pub status: WorkflowNodeExecutionStatus,
    #[serde(default)]
    pub inputs: HashMap<String, Value>,
    #[serde(default)]
    pub process_data: HashMap<String, Value>,
    #[serde(default)]
    pub outputs: HashMap<String, Value>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    #[serde(default)]
    pub llm_usage: Option<LlmUsage>,
    pub edge_source_handle: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub retry_index: u32,
}

impl Default for NodeRunResult {
    fn default() -> Self {
        NodeRunResult {
            status: WorkflowNodeExecutionStatus::Succeeded,
            inputs: HashMap::new(),
            process_data: HashMap::new(),
            outputs: HashMap::new(),
            metadata: HashMap::new(),
            llm_usage: None,
            edge_source_handle: DEFAULT_SOURCE_HANDLE.to_string(),
            error: None,
            error_type: None,
            retry_index: 0,
        }
    }
}

impl NodeRunResult {
    pub fn succeeded(outputs: HashMap<String, Value>) -> Self {
        NodeRunResult {
            outputs,
            ..Default::default()
        }
    }

    pub fn with_handle(mut self, handle: impl Into<String>) -> Self {
        self.edge_source_handle = handle.into();
        self
    }

    pub fn with_inputs(mut self, inputs: HashMap<String, Value>) -> Self {
        self.inputs = inputs;
        self
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct LlmUsage {
    #[serde(default)]
    pub prompt_tokens: i64,
    #[serde(default)]
    pub completion_tokens: i64,
    #[serde(default)]
    pub total_tokens: i64,
    #[serde(default)]
    pub total_price: f64,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub latency: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_node_data_flattens_config() {
        let node: NodeSchema = serde_json::from_value(json!({
            "id": "a",
            "data": {
                "type": "answer",
                "title": "A",
                "answer": "{{#start.q#}}",
                "error_strategy": "default-value",
                "default_value": [{"key": "answer", "type": "string", "value": "n/a"}]
            }
        }))
        .unwrap();
        assert_eq!(node.data.node_type, NodeType::Answer);
        assert_eq!(node.data.error_strategy, Some(ErrorStrategyType::DefaultValue));
        assert_eq!(
            node.data.default_value.as_ref().unwrap().get("answer"),
            Some(&json!("n/a"))
        );
        assert_eq!(node.data.config()["answer"], json!("{{#start.q#}}"));
    }

    #[test]
    fn test_node_type_display_and_kind() {
        assert_eq!(NodeType::IfElse.to_string(), "if-else");
        assert_eq!(NodeType::HumanInput.to_string(), "human-input");
        assert!(NodeType::HumanInput.is_branch());
        assert!(NodeType::IterationStart.is_root());
        assert_eq!(
            NodeType::Loop.execution_type(),
            NodeExecutionType::Container
        );
    }

    #[test]
    fn test_unknown_node_type_rejected() {
        let res: Result<NodeSchema, _> =
            serde_json::from_value(json!({"id": "x", "data": {"type": "teleport"}}));
        assert!(res.is_err());
    }

    #[test]
    fn test_comparison_operator_aliases() {
        let op: ComparisonOperator = serde_json::from_value(json!("≥")).unwrap();
        assert_eq!(op, ComparisonOperator::GreaterOrEqual);
        let op: ComparisonOperator = serde_json::from_value(json!("not empty")).unwrap();
        assert_eq!(op, ComparisonOperator::NotEmpty);
    }

    #[test]
    fn test_legacy_if_else_shape() {
        let data: IfElseNodeData = serde_json::from_value(json!({
            "logical_operator": "or",
            "conditions": [{
                "variable_selector": ["start", "q"],
                "comparison_operator": "empty"
            }]
        }))
        .unwrap();
        let cases = data.effective_cases();
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].case_id, "true");
        assert_eq!(cases[0].logical_operator, LogicalOperator::Or);
    }

    #[test]
    fn test_retry_config_defaults() {
        let cfg: RetryConfig = serde_json::from_value(json!({"max_retries": 2})).unwrap();
        assert_eq!(cfg.effective_max_retries(), 2);
        assert_eq!(cfg.backoff_strategy, BackoffStrategy::Fixed);
        assert_eq!(cfg.max_retry_interval, 60_000);

        let off: RetryConfig =
            serde_json::from_value(json!({"max_retries": 2, "retry_enabled": false})).unwrap();
        assert_eq!(off.effective_max_retries(), 0);
    }

    #[test]
    fn test_node_run_result_default_handle() {
        let r = NodeRunResult::default();
        assert_eq!(r.edge_source_handle, DEFAULT_SOURCE_HANDLE);
        assert_eq!(r.status, WorkflowNodeExecutionStatus::Succeeded);
    }
}
