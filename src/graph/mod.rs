//! Graph construction and representation.
//!
//! The immutable [`Graph`] is built from a parsed
//! [`WorkflowSchema`](crate::dsl::WorkflowSchema) by [`build_graph`]. Edges are
//! indexed by source and target so the dispatcher resolves readiness in
//! O(degree). [`GraphBuilder`] derives a schema from `depends_on`
//! declarations and `{{#node.field#}}` references.

pub mod auto_builder;
pub mod builder;
pub mod types;
pub mod validator;

pub use auto_builder::{GraphBuilder, NodeDeclaration};
pub use builder::*;
pub use types::*;
