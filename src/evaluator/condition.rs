use crate::core::variable_pool::{Segment, VariablePool};
use crate::dsl::schema::{Case, ComparisonOperator, Condition, LogicalOperator};
use crate::template::render_value;
use serde_json::Value;

/// Handle selected when no case matches.
pub const ELSE_CASE_ID: &str = "false";

/// Evaluate if-else cases in order, returning the case_id of the first match
/// or `"false"` (else branch).
pub fn evaluate_cases(cases: &[Case], pool: &VariablePool) -> String {
    cases
        .iter()
        .find(|case| evaluate_case(case, pool))
        .map(|case| case.case_id.clone())
        .unwrap_or_else(|| ELSE_CASE_ID.to_string())
}

/// Evaluate a single case (AND/OR logic). A case without conditions never matches.
pub fn evaluate_case(case: &Case, pool: &VariablePool) -> bool {
    evaluate_conditions(&case.conditions, case.logical_operator, pool)
}

pub fn evaluate_conditions(
    conditions: &[Condition],
    logical_operator: LogicalOperator,
    pool: &VariablePool,
) -> bool {
    if conditions.is_empty() {
        return false;
    }
    match logical_operator {
        LogicalOperator::And => conditions.iter().all(|c| evaluate_condition(c, pool)),
        LogicalOperator::Or => conditions.iter().any(|c| evaluate_condition(c, pool)),
    }
}

/// Evaluate a single condition. String comparison values may reference
/// other variables with `{{#node.field#}}`.
pub fn evaluate_condition(cond: &Condition, pool: &VariablePool) -> bool {
    let actual = pool.get(&cond.variable_selector).unwrap_or(Segment::None);
    let expected = render_value(&cond.value, pool);
    compare(&actual, cond.comparison_operator, &expected)
}

pub fn compare(actual: &Segment, op: ComparisonOperator, expected: &Value) -> bool {
    match op {
        // --- String/Array ---
        ComparisonOperator::Contains => eval_contains(actual, expected),
        ComparisonOperator::NotContains => !eval_contains(actual, expected),
        ComparisonOperator::StartWith => actual
            .to_display_string()
            .starts_with(&value_to_string(expected)),
        ComparisonOperator::EndWith => actual
            .to_display_string()
            .ends_with(&value_to_string(expected)),

        // --- Exact equality ---
        ComparisonOperator::Is => actual.to_display_string() == value_to_string(expected),
        ComparisonOperator::IsNot => actual.to_display_string() != value_to_string(expected),

        // --- Emptiness ---
        ComparisonOperator::Empty => actual.is_empty(),
        ComparisonOperator::NotEmpty => !actual.is_empty(),

        // --- Membership ---
        ComparisonOperator::In => eval_in(actual, expected),
        ComparisonOperator::NotIn => !eval_in(actual, expected),
        ComparisonOperator::AllOf => eval_all_of(actual, expected),

        // --- Numeric ---
        ComparisonOperator::Equal => numeric(actual, expected, |a, b| (a - b).abs() < f64::EPSILON),
        ComparisonOperator::NotEqual => match (actual.as_f64(), value_to_f64(expected)) {
            (Some(a), Some(b)) => (a - b).abs() >= f64::EPSILON,
            _ => true,
        },
        ComparisonOperator::GreaterThan => numeric(actual, expected, |a, b| a > b),
        ComparisonOperator::LessThan => numeric(actual, expected, |a, b| a < b),
        ComparisonOperator::GreaterOrEqual => numeric(actual, expected, |a, b| a >= b),
        ComparisonOperator::LessOrEqual => numeric(actual, expected, |a, b| a <= b),

        // --- Null ---
        ComparisonOperator::Null => actual.is_none(),
        ComparisonOperator::NotNull => !actual.is_none(),
    }
}

// ================================
// Helper functions
// ================================

fn numeric(actual: &Segment, expected: &Value, cmp: impl Fn(f64, f64) -> bool) -> bool {
    match (actual.as_f64(), value_to_f64(expected)) {
        (Some(a), Some(b)) => cmp(a, b),
        _ => false,
    }
}

fn value_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn value_to_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn value_to_string_vec(v: &Value) -> Vec<String> {
    match v {
        Value::Array(arr) => arr.iter().map(value_to_string).collect(),
        Value::String(s) => vec![s.clone()],
        _ => vec![],
    }
}

fn eval_contains(actual: &Segment, expected: &Value) -> bool {
    let e = value_to_string(expected);
    match actual {
        Segment::String(s) => s.contains(&e),
        Segment::ArrayString(arr) => arr.iter().any(|s| s == &e),
        Segment::Array(arr) => arr.iter().any(|s| s.to_display_string() == e),
        Segment::Object(map) => map.contains_key(&e),
        _ => false,
    }
}

fn eval_in(actual: &Segment, expected: &Value) -> bool {
    value_to_string_vec(expected).contains(&actual.to_display_string())
}

fn eval_all_of(actual: &Segment, expected: &Value) -> bool {
    let expected_items = value_to_string_vec(expected);
    let actual_items: Vec<String> = match actual {
        Segment::ArrayString(arr) => arr.clone(),
        Segment::Array(arr) => arr.iter().map(|s| s.to_display_string()).collect(),
        _ => return false,
    };
    expected_items.iter().all(|e| actual_items.contains(e))
}
