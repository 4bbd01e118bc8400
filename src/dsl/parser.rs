//! DSL parser: converts raw YAML/JSON/TOML text into [`WorkflowSchema`].

use std::path::Path;

use super::schema::{WorkflowSchema, SUPPORTED_DSL_VERSIONS};
use crate::error::WorkflowError;

/// Supported DSL input formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DslFormat {
    /// YAML format (`.yaml` / `.yml`).
    Yaml,
    /// JSON format (`.json`).
    Json,
    /// TOML format (`.toml`).
    Toml,
}

impl DslFormat {
    /// Pick the format from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "yaml" | "yml" => Some(DslFormat::Yaml),
            "json" => Some(DslFormat::Json),
            "toml" => Some(DslFormat::Toml),
            _ => None,
        }
    }
}

/// Parse DSL content into a version-checked [`WorkflowSchema`].
pub fn parse_dsl(content: &str, format: DslFormat) -> Result<WorkflowSchema, WorkflowError> {
    let value = parse_value(content, format)?;
    let schema: WorkflowSchema =
        serde_json::from_value(value).map_err(|e| WorkflowError::DslParseError(e.to_string()))?;
    if !SUPPORTED_DSL_VERSIONS.contains(&schema.version.as_str()) {
        return Err(WorkflowError::DslParseError(format!(
            "Unsupported DSL version: {} (supported: {})",
            schema.version,
            SUPPORTED_DSL_VERSIONS.join(", ")
        )));
    }
    Ok(schema)
}

/// Parse any of the supported formats into a JSON value.
///
/// All formats go through `serde_json::Value` so that fields typed as
/// `Value` (condition values, node configs) behave the same everywhere.
pub fn parse_value(content: &str, format: DslFormat) -> Result<serde_json::Value, WorkflowError> {
    let parse_err = |e: String| WorkflowError::DslParseError(e);
    match format {
        DslFormat::Yaml => serde_yaml::from_str(content).map_err(|e| parse_err(e.to_string())),
        DslFormat::Json => serde_json::from_str(content).map_err(|e| parse_err(e.to_string())),
        DslFormat::Toml => {
            let toml_val: toml::Value =
                toml::from_str(content).map_err(|e| parse_err(e.to_string()))?;
            Ok(toml_value_to_json(toml_val))
        }
    }
}

/// Convert a [`toml::Value`] into a [`serde_json::Value`].
///
/// TOML has no null type; `Datetime` values are stringified.
pub(crate) fn toml_value_to_json(val: toml::Value) -> serde_json::Value {
    match val {
        toml::Value::String(s) => serde_json::Value::String(s),
        toml::Value::Integer(i) => serde_json::json!(i),
        toml::Value::Float(f) => serde_json::json!(f),
        toml::Value::Boolean(b) => serde_json::Value::Bool(b),
        toml::Value::Array(arr) => {
            serde_json::Value::Array(arr.into_iter().map(toml_value_to_json).collect())
        }
        toml::Value::Table(tbl) => serde_json::Value::Object(
            tbl.into_iter()
                .map(|(k, v)| (k, toml_value_to_json(v)))
                .collect(),
        ),
        toml::Value::Datetime(dt) => serde_json::Value::String(dt.to_string()),
    }
}
