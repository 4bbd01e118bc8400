use std::collections::HashMap;

use serde_json::Value;

use crate::core::variable_pool::{Selector, VariablePool};
use crate::dsl::schema::VariableMapping;
use crate::error::NodeError;

/// Resolve `variable ← value_selector` mappings; missing selectors become null.
pub fn resolve_mappings(mappings: &[VariableMapping], pool: &VariablePool) -> HashMap<String, Value> {
    mappings
        .iter()
        .map(|m| {
            (
                m.variable.clone(),
                pool.get_value(&m.value_selector).unwrap_or(Value::Null),
            )
        })
        .collect()
}

/// Value at `selector`, or `VariableNotFound`.
pub fn require_value(pool: &VariablePool, selector: &Selector) -> Result<Value, NodeError> {
    pool.get_value(selector)
        .ok_or_else(|| NodeError::VariableNotFound(selector.to_string()))
}
