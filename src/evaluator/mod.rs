//! Condition evaluation for if-else nodes and loop break conditions.

pub mod condition;

pub use condition::{
    evaluate_case, evaluate_cases, evaluate_condition, evaluate_conditions, ELSE_CASE_ID,
};
