//! Node executors and the [`Node`] wrapper that runs them.

pub mod control_flow;
pub mod data_transform;
pub mod executor;
pub mod human_input;
pub mod knowledge_retrieval;
pub mod node;
pub mod subgraph_nodes;
pub mod utils;

pub use data_transform::CodeRunner;
pub use executor::{NodeContext, NodeEventEmitter, NodeExecutor, NodeFactory, NodeOutcome};
pub use knowledge_retrieval::{KnowledgeRetriever, RetrievalRequest, RetrievedChunk};
pub use node::Node;
