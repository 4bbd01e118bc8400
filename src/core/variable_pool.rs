use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Sentinel node id for container-scoped variables (iteration item, loop vars).
pub const SCOPE_NODE_ID: &str = "__scope__";
/// Node id holding system variables (`sys.query`, `sys.user_id`, ...).
pub const SYSTEM_NODE_ID: &str = "sys";
/// Node id holding environment variables.
pub const ENVIRONMENT_NODE_ID: &str = "env";
/// Node id holding conversation variables.
pub const CONVERSATION_NODE_ID: &str = "conversation";

// ================================
// Segment – Dify variable type system
// ================================

#[derive(Debug, Clone)]
pub enum Segment {
    None,
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Object(HashMap<String, Segment>),
    ArrayString(Vec<String>),
    Array(Vec<Segment>),
    File(FileSegment),
}

/// Reference to an uploaded or remote file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct FileSegment {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub transfer_method: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub extension: Option<String>,
    #[serde(default)]
    pub size: Option<i64>,
}

impl Serialize for Segment {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Segment {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let v = Value::deserialize(deserializer)?;
        Ok(Segment::from_value(&v))
    }
}

impl Segment {
    /// Convert Segment → serde_json::Value
    pub fn to_value(&self) -> Value {
        match self {
            Segment::None => Value::Null,
            Segment::String(s) => Value::String(s.clone()),
            Segment::Integer(i) => serde_json::json!(*i),
            Segment::Float(f) => serde_json::json!(*f),
            Segment::Boolean(b) => Value::Bool(*b),
            Segment::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_value()))
                    .collect(),
            ),
            Segment::ArrayString(v) => {
                Value::Array(v.iter().map(|s| Value::String(s.clone())).collect())
            }
            Segment::Array(v) => Value::Array(v.iter().map(|s| s.to_value()).collect()),
            Segment::File(file) => serde_json::to_value(file).unwrap_or(Value::Null),
        }
    }

    /// Create Segment from serde_json::Value
    pub fn from_value(v: &Value) -> Self {
        match v {
            Value::Null => Segment::None,
            Value::Bool(b) => Segment::Boolean(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Segment::Integer(i)
                } else {
                    Segment::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            Value::String(s) => Segment::String(s.clone()),
            Value::Array(arr) => {
                if !arr.is_empty() && arr.iter().all(|v| v.is_string()) {
                    Segment::ArrayString(
                        arr.iter()
                            .filter_map(|v| v.as_str().map(str::to_string))
                            .collect(),
                    )
                } else {
                    Segment::Array(arr.iter().map(Segment::from_value).collect())
                }
            }
            Value::Object(map) => Segment::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Segment::from_value(v)))
                    .collect(),
            ),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Segment::None)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Segment::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<String> {
        match self {
            Segment::String(s) => Some(s.clone()),
            Segment::Integer(i) => Some(i.to_string()),
            Segment::Float(f) => Some(f.to_string()),
            Segment::Boolean(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Segment::Boolean(b) => Some(*b),
            Segment::String(s) => match s.as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Segment::Integer(i) => Some(*i as f64),
            Segment::Float(f) => Some(*f),
            Segment::String(s) => s.parse::<f64>().ok(),
            _ => None,
        }
    }

    /// Look up a key of an object segment, or a file attribute.
    pub fn field(&self, key: &str) -> Option<Segment> {
        match self {
            Segment::Object(map) => map.get(key).cloned(),
            Segment::File(_) => match self.to_value().get(key) {
                Some(v) => Some(Segment::from_value(v)),
                None => None,
            },
            _ => None,
        }
    }

    pub fn to_display_string(&self) -> String {
        match self {
            Segment::None => String::new(),
            Segment::String(s) => s.clone(),
            Segment::Integer(i) => i.to_string(),
            Segment::Float(f) => f.to_string(),
            Segment::Boolean(b) => b.to_string(),
            other => serde_json::to_string(&other.to_value()).unwrap_or_default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Segment::None => true,
            Segment::String(s) => s.is_empty(),
            Segment::ArrayString(v) => v.is_empty(),
            Segment::Array(v) => v.is_empty(),
            Segment::Object(map) => map.is_empty(),
            _ => false,
        }
    }
}

impl PartialEq for Segment {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Segment::None, Segment::None) => true,
            (Segment::String(a), Segment::String(b)) => a == b,
            (Segment::Integer(a), Segment::Integer(b)) => a == b,
            (Segment::Float(a), Segment::Float(b)) => (a - b).abs() < 1e-10,
            (Segment::Integer(a), Segment::Float(b)) | (Segment::Float(b), Segment::Integer(a)) => {
                (*a as f64 - b).abs() < 1e-10
            }
            (Segment::Boolean(a), Segment::Boolean(b)) => a == b,
            (Segment::ArrayString(a), Segment::ArrayString(b)) => a == b,
            (Segment::File(a), Segment::File(b)) => a == b,
            _ => self.to_value() == other.to_value(),
        }
    }
}

impl std::fmt::Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_display_string())
    }
}

impl From<FileSegment> for Segment {
    fn from(file: FileSegment) -> Self {
        Segment::File(file)
    }
}

// ================================
// Selector
// ================================

/// A variable address: `(node_id, variable_name)` plus an optional path into
/// object values, e.g. `["http", "body", "items"]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Selector {
    node_id: String,
    variable_name: String,
    path: Vec<String>,
}

impl Selector {
    pub fn new(node_id: impl Into<String>, variable_name: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            variable_name: variable_name.into(),
            path: Vec::new(),
        }
    }

    pub fn with_path(mut self, path: Vec<String>) -> Self {
        self.path = path;
        self
    }

    /// Build from raw parts. A single part addresses the container scope.
    pub fn from_parts<S: AsRef<str>>(parts: &[S]) -> Option<Self> {
        let parts: Vec<&str> = parts
            .iter()
            .map(|p| p.as_ref())
            .filter(|p| !p.is_empty())
            .collect();
        match parts.as_slice() {
            [] => None,
            [name] => Some(Self::new(SCOPE_NODE_ID, *name)),
            [node, name, rest @ ..] => Some(
                Self::new(*node, *name).with_path(rest.iter().map(|s| s.to_string()).collect()),
            ),
        }
    }

    pub fn parse_value(value: &Value) -> Option<Self> {
        match value {
            Value::Array(arr) => {
                let mut parts = Vec::with_capacity(arr.len());
                for v in arr {
                    parts.push(v.as_str()?.to_string());
                }
                Self::from_parts(&parts)
            }
            Value::String(s) => Self::parse_str(s),
            _ => None,
        }
    }

    /// Parse dotted form `node.var[.path...]`.
    pub fn parse_str(selector: &str) -> Option<Self> {
        let parts: Vec<&str> = selector.trim().split('.').collect();
        Self::from_parts(&parts)
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn variable_name(&self) -> &str {
        &self.variable_name
    }

    pub fn path(&self) -> &[String] {
        &self.path
    }

    pub fn to_parts(&self) -> Vec<String> {
        let mut parts = vec![self.node_id.clone(), self.variable_name.clone()];
        parts.extend(self.path.iter().cloned());
        parts
    }
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_parts().join("."))
    }
}

impl Serialize for Selector {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_parts().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Selector {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let v = Value::deserialize(deserializer)?;
        Selector::parse_value(&v).ok_or_else(|| {
            serde::de::Error::custom("selector must be 'node.var' or a non-empty string array")
        })
    }
}

// ================================
// VariablePool
// ================================

/// Run-scoped variable bindings keyed by `(node_id, variable_name)`.
///
/// Writes are last-writer-wins. An absent key means the producing node has
/// not completed yet.
///
/// Each node's fields sit behind an `Arc`, so cloning the pool copies one
/// pointer per node id and a write only copies the fields of the node it
/// touches while a snapshot still shares them.
#[derive(Debug, Clone, Default)]
pub struct VariablePool {
    variables: HashMap<String, Arc<HashMap<String, Segment>>>,
    user_inputs: Arc<HashMap<String, Value>>,
}

impl VariablePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pool seeded with the run's user inputs (consumed by the start node).
    pub fn with_user_inputs(user_inputs: HashMap<String, Value>) -> Self {
        VariablePool {
            variables: HashMap::new(),
            user_inputs: Arc::new(user_inputs),
        }
    }

    pub fn user_inputs(&self) -> &HashMap<String, Value> {
        self.user_inputs.as_ref()
    }

    pub fn set_user_input(&mut self, key: impl Into<String>, value: Value) {
        Arc::make_mut(&mut self.user_inputs).insert(key.into(), value);
    }

    pub fn set_system_variable(&mut self, name: &str, value: Segment) {
        self.add(&Selector::new(SYSTEM_NODE_ID, name), value);
    }

    pub fn set_environment_variable(&mut self, name: &str, value: Segment) {
        self.add(&Selector::new(ENVIRONMENT_NODE_ID, name), value);
    }

    /// Bind or overwrite a value. A selector path writes into the nested
    /// object, creating intermediate objects.
    pub fn add(&mut self, selector: &Selector, value: Segment) {
        let fields = Arc::make_mut(
            self.variables
                .entry(selector.node_id().to_string())
                .or_default(),
        );
        if selector.path().is_empty() {
            fields.insert(selector.variable_name().to_string(), value);
            return;
        }
        let mut slot = fields
            .entry(selector.variable_name().to_string())
            .or_insert_with(|| Segment::Object(HashMap::new()));
        for key in selector.path() {
            if !matches!(slot, Segment::Object(_)) {
                *slot = Segment::Object(HashMap::new());
            }
            let Segment::Object(map) = slot else {
                return;
            };
            slot = map
                .entry(key.clone())
                .or_insert_with(|| Segment::Object(HashMap::new()));
        }
        *slot = value;
    }

    /// Get the bound value, descending into objects for selector paths.
    pub fn get(&self, selector: &Selector) -> Option<Segment> {
        let root = self
            .variables
            .get(selector.node_id())?
            .get(selector.variable_name())?;
        let mut current = root.clone();
        for key in selector.path() {
            current = current.field(key)?;
        }
        Some(current)
    }

    /// Get by raw selector parts (`["node", "var", ...]`).
    pub fn get_by_parts<S: AsRef<str>>(&self, parts: &[S]) -> Option<Segment> {
        Selector::from_parts(parts).and_then(|sel| self.get(&sel))
    }

    pub fn get_value(&self, selector: &Selector) -> Option<Value> {
        self.get(selector).map(|s| s.to_value())
    }

    pub fn has(&self, selector: &Selector) -> bool {
        self.get(selector).is_some()
    }

    /// Register node outputs under the node's own id.
    pub fn set_node_outputs(&mut self, node_id: &str, outputs: &HashMap<String, Value>) {
        let fields = Arc::make_mut(self.variables.entry(node_id.to_string()).or_default());
        for (key, val) in outputs {
            fields.insert(key.clone(), Segment::from_value(val));
        }
    }

    pub fn node_variables(&self, node_id: &str) -> HashMap<String, Segment> {
        self.variables
            .get(node_id)
            .map(|fields| fields.as_ref().clone())
            .unwrap_or_default()
    }

    pub fn remove_node(&mut self, node_id: &str) {
        self.variables.remove(node_id);
    }

    pub fn remove(&mut self, selector: &Selector) -> Option<Segment> {
        Arc::make_mut(self.variables.get_mut(selector.node_id())?)
            .remove(selector.variable_name())
    }

    /// Number of bound `(node_id, variable_name)` keys.
    pub fn len(&self) -> usize {
        self.variables.values().map(|fields| fields.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// JSON view of every binding, grouped by node id.
    pub fn snapshot(&self) -> Value {
        Value::Object(
            self.variables
                .iter()
                .map(|(node_id, fields)| {
                    let obj = fields
                        .iter()
                        .map(|(k, v)| (k.clone(), v.to_value()))
                        .collect();
                    (node_id.clone(), Value::Object(obj))
                })
                .collect(),
        )
    }
}
