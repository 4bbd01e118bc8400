//! Persisted workflow definition: serde schema and parser.

pub mod parser;
pub mod schema;

pub use parser::{parse_dsl, DslFormat};
pub use schema::*;
