use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

use crate::dsl::schema::{
    CodeLanguage, CodeNodeData, HttpRequestNodeData, NodeRunResult, TemplateTransformNodeData,
    VariableAggregatorNodeData,
};
use crate::error::NodeError;
use crate::nodes::executor::{NodeContext, NodeExecutor, NodeOutcome};
use crate::nodes::utils::resolve_mappings;

// ================================
// Template Transform
// ================================

pub struct TemplateTransformExecutor {
    data: TemplateTransformNodeData,
    #[cfg(feature = "builtin-template-jinja")]
    engine: crate::template::TemplateEngine,
}

impl TemplateTransformExecutor {
    pub fn new(data: TemplateTransformNodeData) -> Self {
        Self {
            data,
            #[cfg(feature = "builtin-template-jinja")]
            engine: crate::template::TemplateEngine::new(),
        }
    }

    #[cfg(feature = "builtin-template-jinja")]
    fn render(&self, vars: &HashMap<String, Value>) -> Result<String, NodeError> {
        self.engine.render_template(&self.data.template, vars)
    }

    #[cfg(not(feature = "builtin-template-jinja"))]
    fn render(&self, _vars: &HashMap<String, Value>) -> Result<String, NodeError> {
        Err(NodeError::ServiceUnavailable(
            "template-transform requires the builtin-template-jinja feature".into(),
        ))
    }
}

#[async_trait]
impl NodeExecutor for TemplateTransformExecutor {
    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let vars = resolve_mappings(&self.data.variables, ctx.pool);

        let rendered = self.render(&vars)?;
        let outputs = HashMap::from([("output".to_string(), Value::String(rendered))]);
        Ok(NodeRunResult::succeeded(outputs).with_inputs(vars).into())
    }
}

// ================================
// Variable Aggregator (returns first non-null)
// ================================

pub struct VariableAggregatorExecutor {
    data: VariableAggregatorNodeData,
}

impl VariableAggregatorExecutor {
    pub fn new(data: VariableAggregatorNodeData) -> Self {
        Self { data }
    }
}

#[async_trait]
impl NodeExecutor for VariableAggregatorExecutor {
    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let output = self
            .data
            .variables
            .iter()
            .filter_map(|sel| ctx.pool.get(sel))
            .find(|seg| !seg.is_none())
            .map(|seg| seg.to_value())
            .unwrap_or(Value::Null);

        let outputs = HashMap::from([("output".to_string(), output)]);
        Ok(NodeRunResult::succeeded(outputs).into())
    }
}

// ================================
// Code Node
// ================================

/// Sandbox that executes user code. Returns the script's result object.
#[async_trait]
pub trait CodeRunner: Send + Sync {
    async fn run(
        &self,
        language: CodeLanguage,
        code: &str,
        inputs: HashMap<String, Value>,
    ) -> Result<HashMap<String, Value>, NodeError>;
}

pub struct CodeNodeExecutor {
    data: CodeNodeData,
}

impl CodeNodeExecutor {
    pub fn new(data: CodeNodeData) -> Self {
        Self { data }
    }

    /// Every declared output must be present with a compatible type.
    fn check_outputs(&self, outputs: &HashMap<String, Value>) -> Result<(), NodeError> {
        for (name, decl) in &self.data.outputs {
            let value = outputs
                .get(name)
                .ok_or_else(|| NodeError::ExecutionError(format!("Output '{}' is missing", name)))?;
            let declared = decl.get("type").and_then(Value::as_str).unwrap_or("any");
            if !value.is_null() && !type_matches(declared, value) {
                return Err(NodeError::TypeError(format!(
                    "Output '{}' must be {}, got {}",
                    name, declared, value
                )));
            }
        }
        Ok(())
    }
}

fn type_matches(declared: &str, value: &Value) -> bool {
    match declared {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        t if t.starts_with("array") => value.is_array(),
        _ => true,
    }
}

#[async_trait]
impl NodeExecutor for CodeNodeExecutor {
    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let runner = ctx.runtime.code()?;
        let inputs = resolve_mappings(&self.data.variables, ctx.pool);
        let outputs = runner
            .run(self.data.language, &self.data.code, inputs.clone())
            .await?;
        self.check_outputs(&outputs)?;
        Ok(NodeRunResult::succeeded(outputs).with_inputs(inputs).into())
    }
}

// ================================
// HTTP Request Node
// ================================

pub struct HttpRequestExecutor {
    data: HttpRequestNodeData,
    #[cfg(feature = "builtin-http-node")]
    client: reqwest::Client,
}

impl HttpRequestExecutor {
    pub fn new(data: HttpRequestNodeData) -> Self {
        Self {
            data,
            #[cfg(feature = "builtin-http-node")]
            client: reqwest::Client::builder()
                .pool_max_idle_per_host(10)
                .build()
                .unwrap_or_default(),
        }
    }
}

#[cfg(feature = "builtin-http-node")]
mod http {
    use std::collections::HashMap;
    use std::time::Duration;

    use serde_json::Value;

    use super::HttpRequestExecutor;
    use crate::core::variable_pool::VariablePool;
    use crate::dsl::schema::{Authorization, HttpBody, HttpMethod, KeyValuePair};
    use crate::error::NodeError;
    use crate::template::render_template;

    fn render_pairs(pairs: &[KeyValuePair], pool: &VariablePool) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|kv| (kv.key.clone(), render_template(&kv.value, pool)))
            .collect()
    }

    impl HttpRequestExecutor {
        pub(super) fn build_request(&self, pool: &VariablePool) -> reqwest::RequestBuilder {
            let data = &self.data;
            let url = render_template(&data.url, pool);
            let method = match data.method {
                HttpMethod::Get => reqwest::Method::GET,
                HttpMethod::Post => reqwest::Method::POST,
                HttpMethod::Put => reqwest::Method::PUT,
                HttpMethod::Delete => reqwest::Method::DELETE,
                HttpMethod::Patch => reqwest::Method::PATCH,
                HttpMethod::Head => reqwest::Method::HEAD,
            };

            let mut req = self
                .client
                .request(method, url)
                .timeout(Duration::from_secs(data.timeout.max(1)));

            let params = render_pairs(&data.params, pool);
            if !params.is_empty() {
                req = req.query(&params);
            }
            for (key, value) in render_pairs(&data.headers, pool) {
                req = req.header(key, value);
            }

            req = match &data.authorization {
                Some(Authorization::ApiKey { key, value }) => {
                    req.header(key.as_str(), render_template(value, pool))
                }
                Some(Authorization::BearerToken { token }) => {
                    req.bearer_auth(render_template(token, pool))
                }
                Some(Authorization::BasicAuth { username, password }) => req.basic_auth(
                    render_template(username, pool),
                    Some(render_template(password, pool)),
                ),
                Some(Authorization::NoAuth) | None => req,
            };

            match &data.body {
                Some(HttpBody::RawText { data }) => req.body(render_template(data, pool)),
                Some(HttpBody::Json { data }) => req
                    .header(reqwest::header::CONTENT_TYPE, "application/json")
                    .body(render_template(data, pool)),
                Some(HttpBody::XWwwFormUrlencoded { data }) => req.form(&render_pairs(data, pool)),
                Some(HttpBody::FormData { data }) => {
                    let form = render_pairs(data, pool)
                        .into_iter()
                        .fold(reqwest::multipart::Form::new(), |form, (k, v)| form.text(k, v));
                    req.multipart(form)
                }
                Some(HttpBody::None) | None => req,
            }
        }

        pub(super) async fn send(
            &self,
            pool: &VariablePool,
        ) -> Result<HashMap<String, Value>, NodeError> {
            let resp = self.build_request(pool).send().await.map_err(map_reqwest)?;

            let status = resp.status();
            let headers: serde_json::Map<String, Value> = resp
                .headers()
                .iter()
                .map(|(name, value)| {
                    (
                        name.to_string(),
                        Value::String(value.to_str().unwrap_or_default().to_string()),
                    )
                })
                .collect();
            let body = resp.text().await.map_err(map_reqwest)?;

            if self.data.fail_on_error_status && (status.is_client_error() || status.is_server_error())
            {
                return Err(NodeError::HttpError(format!(
                    "HTTP {}: {}",
                    status.as_u16(),
                    body.chars().take(200).collect::<String>()
                )));
            }

            let mut outputs = HashMap::new();
            outputs.insert("status_code".to_string(), Value::from(status.as_u16()));
            outputs.insert("body".to_string(), Value::String(body));
            outputs.insert("headers".to_string(), Value::Object(headers));
            Ok(outputs)
        }
    }

    fn map_reqwest(e: reqwest::Error) -> NodeError {
        if e.is_timeout() {
            NodeError::Timeout
        } else {
            NodeError::HttpError(e.to_string())
        }
    }
}

#[cfg(not(feature = "builtin-http-node"))]
impl HttpRequestExecutor {
    async fn send(
        &self,
        _pool: &crate::core::variable_pool::VariablePool,
    ) -> Result<HashMap<String, Value>, NodeError> {
        Err(NodeError::ServiceUnavailable(format!(
            "http-request to {} requires the builtin-http-node feature",
            self.data.url
        )))
    }
}

#[async_trait]
impl NodeExecutor for HttpRequestExecutor {
    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let outputs = self.send(ctx.pool).await?;
        Ok(NodeRunResult::succeeded(outputs).into())
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

    struct EchoRunner;

    #[async_trait]
    impl CodeRunner for EchoRunner {
        async fn run(
            &self,
            _language: CodeLanguage,
            _code: &str,
            inputs: HashMap<String, Value>,
        ) -> Result<HashMap<String, Value>, NodeError> {
            Ok(inputs)
        }
    }

    fn pool() -> VariablePool {
        let mut pool = VariablePool::new();
        pool.add(&Selector::new("start", "name"), Segment::String("ada".into()));
        pool.add(&Selector::new("start", "n"), Segment::Integer(2));
        pool
    }

    #[cfg(feature = "builtin-template-jinja")]
    #[tokio::test]
    async fn test_template_transform() {
        let data: TemplateTransformNodeData = serde_json::from_value(json!({
            "template": "hello {{ name }} x{{ n }}",
            "variables": [
                { "variable": "name", "value_selector": ["start", "name"] },
                { "variable": "n", "value_selector": ["start", "n"] }
            ]
        }))
        .unwrap();
        let exec = TemplateTransformExecutor::new(data);
        let result = completed(execute(&exec, "tt", pool(), RuntimeContext::new()).await.0);
        assert_eq!(result.outputs["output"], json!("hello ada x2"));
    }

    #[tokio::test]
    async fn test_aggregator_first_non_null() {
        let exec = VariableAggregatorExecutor::new(VariableAggregatorNodeData {
            variables: vec![Selector::new("branch_a", "out"), Selector::new("start", "name")],
            output_type: None,
        });
        let result = completed(execute(&exec, "agg", pool(), RuntimeContext::new()).await.0);
        assert_eq!(result.outputs["output"], json!("ada"));
    }

    fn code_data(outputs: Value) -> CodeNodeData {
        serde_json::from_value(json!({
            "code": "def main(name): return {'name': name}",
            "language": "python3",
            "variables": [{ "variable": "name", "value_selector": ["start", "name"] }],
            "outputs": outputs
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_code_requires_runner() {
        let exec = CodeNodeExecutor::new(code_data(json!({})));
        let (outcome, _) = execute(&exec, "code", pool(), RuntimeContext::new()).await;
        assert!(matches!(outcome, Err(NodeError::ServiceUnavailable(_))));
    }

    #[tokio::test]
    async fn test_code_validates_declared_outputs() {
        let ctx = RuntimeContext::new().with_code_runner(Arc::new(EchoRunner));

        let ok = CodeNodeExecutor::new(code_data(json!({ "name": { "type": "string" } })));
        let result = completed(execute(&ok, "code", pool(), ctx.clone()).await.0);
        assert_eq!(result.outputs["name"], json!("ada"));

        let wrong_type = CodeNodeExecutor::new(code_data(json!({ "name": { "type": "number" } })));
        let (outcome, _) = execute(&wrong_type, "code", pool(), ctx.clone()).await;
        assert!(matches!(outcome, Err(NodeError::TypeError(_))));

        let missing = CodeNodeExecutor::new(code_data(json!({ "other": { "type": "string" } })));
        let (outcome, _) = execute(&missing, "code", pool(), ctx).await;
        assert!(matches!(outcome, Err(NodeError::ExecutionError(_))));
    }

    #[cfg(feature = "builtin-http-node")]
    #[test]
    fn test_http_request_is_templated() {
        let data: HttpRequestNodeData = serde_json::from_value(json!({
            "method": "post",
            "url": "http://localhost:9/users/{{#start.name#}}",
            "params": [{ "key": "n", "value": "{{#start.n#}}" }],
            "headers": [{ "key": "X-Trace", "value": "t-{{#start.n#}}" }],
            "authorization": { "type": "bearer_token", "token": "secret" },
            "body": { "type": "json", "data": "{\"name\": \"{{#start.name#}}\"}" }
        }))
        .unwrap();
        let exec = HttpRequestExecutor::new(data);
        let req = exec.build_request(&pool()).build().unwrap();
        assert_eq!(req.method(), &reqwest::Method::POST);
        assert_eq!(req.url().as_str(), "http://localhost:9/users/ada?n=2");
        assert_eq!(req.headers()["x-trace"], "t-2");
        assert_eq!(req.headers()["authorization"], "Bearer secret");
        assert_eq!(req.headers()["content-type"], "application/json");
        let body = req.body().and_then(|b| b.as_bytes()).unwrap();
        assert_eq!(body, br#"{"name": "ada"}"#);
    }
}
