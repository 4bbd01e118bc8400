//! # XWorkflow Engine: Dify-compatible workflow graph execution
//!
//! `xworkflow_engine` runs directed-acyclic workflow graphs described in the
//! Dify DSL. A run is driven by a single dispatcher that owns all state
//! transitions, while an elastic pool of workers executes ready nodes
//! concurrently:
//!
//! - **Scheduling**: readiness by incoming edge states, branch pruning with
//!   skip propagation, and a FIFO ready queue.
//! - **Workers**: a pool that scales between `min_workers` and `max_workers`
//!   by queue depth and utilization.
//! - **Error strategies**: per-node retries with backoff, fail branches and
//!   default values.
//! - **Control**: cooperative stop, an external command channel (abort,
//!   variable updates), pause at human-input nodes and resume.
//! - **Containers**: iteration and loop nodes running an embedded graph.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use xworkflow_engine::{parse_dsl, DslFormat, EngineConfig, GraphEngine, VariablePool};
//!
//! #[tokio::main]
//! async fn main() -> xworkflow_engine::WorkflowResult<()> {
//!     let yaml = std::fs::read_to_string("workflow.yaml")
//!         .map_err(|e| xworkflow_engine::WorkflowError::ConfigError(e.to_string()))?;
//!     let schema = parse_dsl(&yaml, DslFormat::Yaml)?;
//!     let engine = GraphEngine::from_schema(&schema, VariablePool::new(), EngineConfig::default())?;
//!     let mut events = engine.run();
//!     while let Some(event) = events.next().await {
//!         println!("{:?}", event);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Feature Flags
//!
//! | Flag | Description |
//! |------|-------------|
//! | `builtin-template-jinja` | Jinja2 rendering for template-transform nodes |
//! | `builtin-http-node` | HTTP request node backed by `reqwest` |

pub mod core;
pub mod dsl;
pub mod error;
pub mod evaluator;
pub mod graph;
pub mod llm;
pub mod nodes;
pub mod template;

pub use crate::core::{
    CommandChannel, DebugLoggingLayer, EngineConfig, ExecutionStatus, FakeIdGenerator,
    FakeTimeProvider, GraphEngine, GraphEngineCommand, GraphEngineEvent, GraphRuntimeState,
    IdGenerator, InMemoryCommandChannel, Layer, NodeRunMeta, NodeState, PauseReason,
    RuntimeContext, Segment, Selector, StopEvent, TimeProvider, VariablePool,
};
pub use crate::dsl::{parse_dsl, DslFormat, WorkflowSchema};
pub use crate::error::{NodeError, NodeResult, WorkflowError, WorkflowResult};
pub use crate::graph::{build_graph, Graph, GraphBuilder, NodeDeclaration};
pub use crate::llm::{AgentStrategy, LlmClient};
pub use crate::nodes::{CodeRunner, KnowledgeRetriever};
