//! Template rendering.
//!
//! [`render_template`] substitutes Dify-style `{{#node.field#}}` references
//! from the variable pool. [`TemplateEngine`] renders Jinja2 templates for
//! template-transform nodes (feature `builtin-template-jinja`).

#[cfg(feature = "builtin-template-jinja")]
pub mod engine;
pub mod variable_resolver;

#[cfg(feature = "builtin-template-jinja")]
pub use engine::TemplateEngine;
pub use variable_resolver::{
    extract_node_references, extract_selectors, render_template, render_value,
};
