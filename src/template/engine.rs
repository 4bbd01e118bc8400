use std::collections::HashMap;

use minijinja::Environment;
use serde_json::Value;

use crate::error::NodeError;

/// Jinja2 renderer for template-transform nodes.
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl TemplateEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_filter("default", default_filter);
        env.add_filter("trim", trim_filter);
        env.add_filter("json", json_filter);
        TemplateEngine { env }
    }

    pub fn render_template(
        &self,
        template: &str,
        variables: &HashMap<String, Value>,
    ) -> Result<String, NodeError> {
        self.env
            .render_str(template, minijinja::Value::from_serialize(variables))
            .map_err(|e| NodeError::TemplateError(format!("Template render error: {}", e)))
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn default_filter(value: minijinja::Value, default: Option<minijinja::Value>) -> minijinja::Value {
    if value.is_undefined() || value.is_none() {
        default.unwrap_or_else(|| minijinja::Value::from(""))
    } else {
        value
    }
}

fn trim_filter(value: String) -> String {
    value.trim().to_string()
}

fn json_filter(value: minijinja::Value) -> String {
    serde_json::to_string(&value).unwrap_or_default()
}
