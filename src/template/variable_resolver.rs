use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::core::variable_pool::{Selector, VariablePool};

fn selector_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{#([^#]+)#\}\}").expect("valid selector pattern"))
}

/// Extract every `{{#...#}}` selector string in `text`, in order of appearance.
pub fn extract_selectors(text: &str) -> Vec<String> {
    selector_regex()
        .captures_iter(text)
        .map(|cap| cap[1].trim().to_string())
        .collect()
}

/// Node ids referenced by `{{#node.field#}}` anywhere inside a JSON value.
///
/// Each id appears once, in order of first appearance.
pub fn extract_node_references(value: &Value) -> Vec<String> {
    let mut out = Vec::new();
    collect_references(value, &mut out);
    out
}

fn collect_references(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => {
            for sel in extract_selectors(s) {
                let node_id = sel.split('.').next().unwrap_or_default().to_string();
                if !node_id.is_empty() && !out.contains(&node_id) {
                    out.push(node_id);
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect_references(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_references(v, out)),
        _ => {}
    }
}

/// Substitute `{{#node.field#}}` references with their display values.
///
/// Unbound selectors render as the empty string.
pub fn render_template(text: &str, pool: &VariablePool) -> String {
    selector_regex()
        .replace_all(text, |cap: &regex::Captures<'_>| {
            Selector::parse_str(&cap[1])
                .and_then(|sel| pool.get(&sel))
                .map(|seg| seg.to_display_string())
                .unwrap_or_default()
        })
        .into_owned()
}

/// Like [`render_template`], but keeps the original JSON type when the whole
/// string is a single reference (`"{{#http.body#}}"` → the object itself).
pub fn render_value(value: &Value, pool: &VariablePool) -> Value {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            if let Some(cap) = selector_regex().captures(trimmed) {
                if cap[0].len() == trimmed.len() {
                    return Selector::parse_str(&cap[1])
                        .and_then(|sel| pool.get_value(&sel))
                        .unwrap_or(Value::Null);
                }
            }
            Value::String(render_template(s, pool))
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| render_value(v, pool)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_value(v, pool)))
                .collect(),
        ),
        other => other.clone(),
    }
}
